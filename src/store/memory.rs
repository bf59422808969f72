//! In-process store.
//!
//! Every mutation runs under a single write lock, which makes each trait
//! method one atomic transaction. Snapshots are kept outside that lock in an
//! `ArcSwap` per period so leaderboard reads never contend with ingestion.

use super::{Store, StoreError, StoreResult, Window};
use crate::types::conversions::utc_day;
use crate::types::{
    AppliedEvaluation, CommitOutcome, MiningEvent, NewMiningEvent, Period, Player,
    PlayerAchievement, PlayerId, ProgressUpdate, ScoreInput, SnapshotEntry, Unlock,
};
use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct MemoryState {
    next_player_id: PlayerId,
    next_event_id: i64,
    players: HashMap<PlayerId, Player>,
    wallets: HashMap<String, PlayerId>,
    events: Vec<MiningEvent>,
    event_keys: HashMap<(String, String), usize>,
    events_by_player: HashMap<PlayerId, Vec<usize>>,
    achievements: HashMap<PlayerId, BTreeMap<String, PlayerAchievement>>,
}

impl MemoryState {
    fn player_mut(&mut self, player_id: PlayerId) -> StoreResult<&mut Player> {
        self.players
            .get_mut(&player_id)
            .ok_or_else(|| StoreError::NotFound(format!("player {}", player_id)))
    }

    fn ensure_rows(&mut self, player_id: PlayerId, codes: &[String]) {
        let rows = self.achievements.entry(player_id).or_default();
        for code in codes {
            rows.entry(code.clone())
                .or_insert_with(|| PlayerAchievement::locked(player_id, code.clone()));
        }
    }

    fn events_of(&self, player_id: PlayerId) -> impl Iterator<Item = &MiningEvent> {
        self.events_by_player
            .get(&player_id)
            .into_iter()
            .flat_map(|idx| idx.iter())
            .map(|&i| &self.events[i])
    }
}

pub struct MemoryStore {
    state: RwLock<MemoryState>,
    all_time: ArcSwap<Vec<SnapshotEntry>>,
    this_week: ArcSwap<Vec<SnapshotEntry>>,
    today: ArcSwap<Vec<SnapshotEntry>>,
    efficiency: ArcSwap<Vec<SnapshotEntry>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState {
                next_player_id: 1,
                next_event_id: 1,
                ..Default::default()
            }),
            all_time: ArcSwap::from_pointee(Vec::new()),
            this_week: ArcSwap::from_pointee(Vec::new()),
            today: ArcSwap::from_pointee(Vec::new()),
            efficiency: ArcSwap::from_pointee(Vec::new()),
        }
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, MemoryState>> {
        self.state
            .read()
            .map_err(|_| StoreError::Fatal("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, MemoryState>> {
        self.state
            .write()
            .map_err(|_| StoreError::Fatal("memory store lock poisoned".to_string()))
    }

    fn slot(&self, period: Period) -> &ArcSwap<Vec<SnapshotEntry>> {
        match period {
            Period::AllTime => &self.all_time,
            Period::ThisWeek => &self.this_week,
            Period::Today => &self.today,
            Period::Efficiency => &self.efficiency,
        }
    }

    fn current_snapshot(&self, period: Period) -> Arc<Vec<SnapshotEntry>> {
        self.slot(period).load_full()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn register_player(
        &self,
        wallet_address: &str,
        registered_at: DateTime<Utc>,
        achievement_codes: &[String],
    ) -> StoreResult<Player> {
        let mut state = self.write()?;
        if let Some(&id) = state.wallets.get(wallet_address) {
            state.ensure_rows(id, achievement_codes);
            return Ok(state.players[&id].clone());
        }

        let id = state.next_player_id;
        state.next_player_id += 1;
        let player = Player {
            id,
            wallet_address: wallet_address.to_string(),
            total_ap: 0,
            total_mined_advc: Decimal::ZERO,
            verified: false,
            registered_at,
            last_active_at: None,
        };
        state.players.insert(id, player.clone());
        state.wallets.insert(wallet_address.to_string(), id);
        state.ensure_rows(id, achievement_codes);
        Ok(player)
    }

    async fn get_player(&self, player_id: PlayerId) -> StoreResult<Option<Player>> {
        Ok(self.read()?.players.get(&player_id).cloned())
    }

    async fn find_player_by_wallet(&self, wallet_address: &str) -> StoreResult<Option<Player>> {
        let state = self.read()?;
        Ok(state
            .wallets
            .get(wallet_address)
            .and_then(|id| state.players.get(id))
            .cloned())
    }

    async fn set_verified(&self, player_id: PlayerId, verified: bool) -> StoreResult<Player> {
        let mut state = self.write()?;
        let player = state.player_mut(player_id)?;
        player.verified = verified;
        Ok(player.clone())
    }

    async fn list_wallets(&self) -> StoreResult<Vec<String>> {
        let mut wallets: Vec<String> = self.read()?.wallets.keys().cloned().collect();
        wallets.sort();
        Ok(wallets)
    }

    async fn list_player_ids(&self) -> StoreResult<Vec<PlayerId>> {
        let mut ids: Vec<PlayerId> = self.read()?.players.keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn find_event(&self, pool_id: &str, tx_hash: &str) -> StoreResult<Option<MiningEvent>> {
        let state = self.read()?;
        Ok(state
            .event_keys
            .get(&(pool_id.to_string(), tx_hash.to_string()))
            .map(|&i| state.events[i].clone()))
    }

    async fn commit_event(&self, event: NewMiningEvent) -> StoreResult<CommitOutcome> {
        let mut state = self.write()?;
        let key = (event.pool_id.clone(), event.tx_hash.clone());
        if let Some(&i) = state.event_keys.get(&key) {
            return Ok(CommitOutcome::Duplicate(state.events[i].clone()));
        }
        if !state.players.contains_key(&event.player_id) {
            return Err(StoreError::NotFound(format!("player {}", event.player_id)));
        }

        let id = state.next_event_id;
        state.next_event_id += 1;
        let committed = MiningEvent {
            id,
            player_id: event.player_id,
            pool_id: event.pool_id,
            tx_hash: event.tx_hash,
            amount_advc: event.amount_advc,
            ap_awarded: event.ap_awarded,
            occurred_at: event.occurred_at,
        };
        let index = state.events.len();
        state.events.push(committed.clone());
        state.event_keys.insert(key, index);
        state
            .events_by_player
            .entry(committed.player_id)
            .or_default()
            .push(index);

        let player = state.player_mut(committed.player_id)?;
        player.total_ap += committed.ap_awarded;
        player.total_mined_advc += committed.amount_advc;
        player.last_active_at = Some(match player.last_active_at {
            Some(prev) if prev > committed.occurred_at => prev,
            _ => committed.occurred_at,
        });
        let player = player.clone();

        Ok(CommitOutcome::Inserted {
            event: committed,
            player,
        })
    }

    async fn player_events(&self, player_id: PlayerId) -> StoreResult<Vec<MiningEvent>> {
        let state = self.read()?;
        Ok(state.events_of(player_id).cloned().collect())
    }

    async fn player_achievements(
        &self,
        player_id: PlayerId,
        achievement_codes: &[String],
    ) -> StoreResult<Vec<PlayerAchievement>> {
        let mut state = self.write()?;
        if !state.players.contains_key(&player_id) {
            return Err(StoreError::NotFound(format!("player {}", player_id)));
        }
        state.ensure_rows(player_id, achievement_codes);
        Ok(state
            .achievements
            .get(&player_id)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn apply_evaluation(
        &self,
        player_id: PlayerId,
        progress: &[ProgressUpdate],
        unlocks: &[Unlock],
    ) -> StoreResult<AppliedEvaluation> {
        let mut state = self.write()?;
        if !state.players.contains_key(&player_id) {
            return Err(StoreError::NotFound(format!("player {}", player_id)));
        }

        let rows = state.achievements.entry(player_id).or_default();
        for update in progress {
            let row = rows
                .entry(update.achievement_code.clone())
                .or_insert_with(|| PlayerAchievement::locked(player_id, update.achievement_code.clone()));
            if !row.is_unlocked() {
                row.progress_current = update.current;
                row.progress_target = update.target;
            }
        }

        let mut unlocked = Vec::new();
        let mut ap_credited = 0i64;
        for unlock in unlocks {
            let row = rows
                .entry(unlock.achievement_code.clone())
                .or_insert_with(|| PlayerAchievement::locked(player_id, unlock.achievement_code.clone()));
            if row.is_unlocked() {
                continue;
            }
            row.unlocked_at = Some(unlock.unlocked_at);
            unlocked.push(unlock.achievement_code.clone());
            ap_credited += unlock.ap_reward;
        }

        let player = state.player_mut(player_id)?;
        player.total_ap += ap_credited;
        let player = player.clone();

        Ok(AppliedEvaluation {
            unlocked,
            ap_credited,
            player,
        })
    }

    async fn score_inputs(&self, window: Option<Window>) -> StoreResult<Vec<ScoreInput>> {
        let state = self.read()?;
        let mut inputs = Vec::with_capacity(state.players.len());
        for player in state.players.values() {
            let mut days = HashSet::new();
            let mut window_ap = 0i64;
            for event in state.events_of(player.id) {
                days.insert(utc_day(event.occurred_at));
                if let Some((start, end)) = window {
                    if event.occurred_at >= start && event.occurred_at < end {
                        window_ap += event.ap_awarded;
                    }
                }
            }
            inputs.push(ScoreInput {
                player_id: player.id,
                wallet_address: player.wallet_address.clone(),
                total_ap: player.total_ap,
                total_mined_advc: player.total_mined_advc,
                days_active: days.len() as u32,
                window_ap,
                verified: player.verified,
            });
        }
        Ok(inputs)
    }

    async fn snapshot(&self, period: Period) -> StoreResult<Vec<SnapshotEntry>> {
        Ok(self.current_snapshot(period).as_ref().clone())
    }

    async fn replace_snapshot(&self, period: Period, mut entries: Vec<SnapshotEntry>) -> StoreResult<()> {
        entries.sort_by_key(|e| e.rank);
        self.slot(period).store(Arc::new(entries));
        Ok(())
    }

    async fn snapshot_entry(
        &self,
        period: Period,
        wallet_address: &str,
    ) -> StoreResult<Option<SnapshotEntry>> {
        Ok(self
            .current_snapshot(period)
            .iter()
            .find(|e| e.wallet_address == wallet_address)
            .cloned())
    }

    async fn snapshot_page(
        &self,
        period: Period,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<SnapshotEntry>> {
        Ok(self
            .current_snapshot(period)
            .iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn snapshot_rank_range(
        &self,
        period: Period,
        from_rank: u32,
        to_rank: u32,
    ) -> StoreResult<Vec<SnapshotEntry>> {
        Ok(self
            .current_snapshot(period)
            .iter()
            .filter(|e| e.rank >= from_rank && e.rank <= to_rank)
            .cloned()
            .collect())
    }
}
