use super::catalog::{AchievementCatalog, AchievementDef};
use super::criteria::{PlayerState, Progress};
use crate::metrics;
use crate::notifications::{Event, NotificationHub};
use crate::player_locks::PlayerLocks;
use crate::store::{Store, StoreError};
use crate::types::{Period, PlayerId, ProgressUpdate, Tier, Unlock};
use chrono::{DateTime, FixedOffset, Offset, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// An achievement newly unlocked by one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct UnlockedAchievement {
    pub player_id: PlayerId,
    pub code: String,
    pub name: String,
    pub tier: Tier,
    pub ap_reward: i64,
    pub unlocked_at: DateTime<Utc>,
}

/// Tally of one [`AchievementEngine::evaluate_all`] sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub players: usize,
    pub unlocked: usize,
    pub failed: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("player {0} does not exist")]
    UnknownPlayer(PlayerId),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct AchievementEngine {
    store: Arc<dyn Store>,
    catalog: Arc<AchievementCatalog>,
    locks: Arc<PlayerLocks>,
    hub: NotificationHub,
    local_offset: FixedOffset,
}

impl AchievementEngine {
    pub fn new(
        store: Arc<dyn Store>,
        catalog: Arc<AchievementCatalog>,
        locks: Arc<PlayerLocks>,
        hub: NotificationHub,
        local_utc_offset_minutes: i32,
    ) -> Self {
        let local_offset =
            FixedOffset::east_opt(local_utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix());
        Self {
            store,
            catalog,
            locks,
            hub,
            local_offset,
        }
    }

    pub fn catalog(&self) -> &Arc<AchievementCatalog> {
        &self.catalog
    }

    /// Evaluates every known player in id order. One player failing is logged
    /// and counted; the sweep carries on with the rest.
    pub async fn evaluate_all(&self) -> Result<SweepSummary, EngineError> {
        let ids = self.store.list_player_ids().await?;
        let mut summary = SweepSummary::default();
        for player_id in ids {
            summary.players += 1;
            match self.evaluate(player_id).await {
                Ok(unlocked) => summary.unlocked += unlocked.len(),
                Err(e) => {
                    summary.failed += 1;
                    warn!(player_id, error = %e, "Sweep evaluation failed");
                }
            }
        }
        info!(
            "🔎 [Achievements] Sweep evaluated {} players: {} unlocked, {} failed",
            summary.players, summary.unlocked, summary.failed
        );
        Ok(summary)
    }

    /// Evaluates every still-locked achievement of the player and applies the
    /// unlocks in one store transaction. Re-running is a no-op once nothing
    /// new is satisfied.
    #[instrument(skip(self))]
    pub async fn evaluate(&self, player_id: PlayerId) -> Result<Vec<UnlockedAchievement>, EngineError> {
        let _guard = self.locks.lock(player_id).await;

        let player = self
            .store
            .get_player(player_id)
            .await?
            .ok_or(EngineError::UnknownPlayer(player_id))?;
        let rows = self
            .store
            .player_achievements(player_id, &self.catalog.codes())
            .await?;

        let unlocked: HashSet<&str> = rows
            .iter()
            .filter(|row| row.is_unlocked())
            .map(|row| row.achievement_code.as_str())
            .collect();
        let pending: Vec<&AchievementDef> = self
            .catalog
            .iter()
            .filter(|def| !unlocked.contains(def.code.as_str()))
            .collect();
        if pending.is_empty() {
            debug!(player_id, "No pending achievements");
            return Ok(Vec::new());
        }

        let events = self.store.player_events(player_id).await?;

        // A period whose rank cannot be read stays out of `ranks`; its
        // criteria then fail on their own and are retried next evaluation.
        let periods: HashSet<Period> = pending
            .iter()
            .filter_map(|def| def.criterion.rank_requirement())
            .map(|(period, _)| period)
            .collect();
        let mut ranks: HashMap<Period, Option<u32>> = HashMap::new();
        for period in periods {
            match self
                .store
                .snapshot_entry(period, &player.wallet_address)
                .await
            {
                Ok(entry) => {
                    ranks.insert(period, entry.map(|entry| entry.rank));
                }
                Err(e) => {
                    warn!(player_id, %period, error = %e, "Could not load leaderboard rank");
                }
            }
        }

        let mut state = PlayerState {
            player,
            events,
            ranks,
            local_offset: self.local_offset,
        };

        let now = Utc::now();
        let mut progress: HashMap<&str, Progress> = HashMap::new();
        let mut settled: HashSet<&str> = HashSet::new();
        let mut unlocks: Vec<Unlock> = Vec::new();

        // Rewards feed back into total_ap, so iterate until nothing new unlocks.
        loop {
            let mut unlocked_this_pass = false;
            for def in &pending {
                if settled.contains(def.code.as_str()) {
                    continue;
                }
                match def.criterion.evaluate(&state) {
                    Ok(p) => {
                        progress.insert(def.code.as_str(), p);
                        if p.satisfied {
                            settled.insert(def.code.as_str());
                            state.player.total_ap += def.ap_reward;
                            unlocks.push(Unlock {
                                achievement_code: def.code.clone(),
                                ap_reward: def.ap_reward,
                                unlocked_at: now,
                            });
                            unlocked_this_pass = true;
                        }
                    }
                    Err(e) => {
                        warn!(
                            player_id,
                            achievement = %def.code,
                            criterion = def.criterion.kind(),
                            error = %e,
                            "Criterion evaluation failed, skipping"
                        );
                        metrics::increment_criterion_errors(&def.code);
                        settled.insert(def.code.as_str());
                    }
                }
            }
            if !unlocked_this_pass {
                break;
            }
        }

        let updates: Vec<ProgressUpdate> = pending
            .iter()
            .filter_map(|def| {
                progress.get(def.code.as_str()).map(|p| ProgressUpdate {
                    achievement_code: def.code.clone(),
                    current: p.current,
                    target: p.target,
                })
            })
            .collect();

        let applied = self
            .store
            .apply_evaluation(player_id, &updates, &unlocks)
            .await?;

        let mut result = Vec::with_capacity(applied.unlocked.len());
        for code in &applied.unlocked {
            let Some(def) = self.catalog.get(code) else {
                continue;
            };
            metrics::increment_achievements_unlocked(def.tier.as_str());
            self.hub.publish(Event::AchievementUnlocked {
                player_id,
                achievement_code: def.code.clone(),
                ap_reward: def.ap_reward,
            });
            info!(
                "🏆 [Achievements] Player {} unlocked {} ({}, +{} AP)",
                player_id, def.name, def.tier, def.ap_reward
            );
            result.push(UnlockedAchievement {
                player_id,
                code: def.code.clone(),
                name: def.name.clone(),
                tier: def.tier,
                ap_reward: def.ap_reward,
                unlocked_at: now,
            });
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::Topic;
    use crate::store::MemoryStore;
    use crate::types::NewMiningEvent;
    use rust_decimal::Decimal;

    const CATALOG: &str = r#"[
        {"code":"first_steps","name":"First Steps","tier":"bronze","ap_reward":10,
         "criterion":{"type":"registration"}},
        {"code":"first_blood","name":"First Blood","tier":"bronze","ap_reward":25,
         "criterion":{"type":"event_count","count":1}},
        {"code":"getting_started","name":"Getting Started","tier":"bronze","ap_reward":10,
         "criterion":{"type":"ap_threshold","threshold":50}},
        {"code":"verified_miner","name":"Verified Miner","tier":"bronze","ap_reward":50,
         "criterion":{"type":"verification"}},
        {"code":"top_10","name":"Top 10","tier":"gold","ap_reward":250,
         "criterion":{"type":"leaderboard_rank","max_rank":10}}
    ]"#;

    async fn setup() -> (Arc<MemoryStore>, AchievementEngine, NotificationHub) {
        let store = Arc::new(MemoryStore::new());
        let catalog = Arc::new(AchievementCatalog::from_json(CATALOG).unwrap());
        let hub = NotificationHub::new(64);
        let engine = AchievementEngine::new(
            store.clone(),
            catalog,
            Arc::new(PlayerLocks::new()),
            hub.clone(),
            0,
        );
        (store, engine, hub)
    }

    async fn mine(store: &MemoryStore, player_id: PlayerId, tx: &str, ap: i64) {
        store
            .commit_event(NewMiningEvent {
                player_id,
                pool_id: "cpu-pool".to_string(),
                tx_hash: tx.to_string(),
                amount_advc: Decimal::from(ap) / Decimal::from(10),
                ap_awarded: ap,
                occurred_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_first_event_unlocks_once() {
        let (store, engine, hub) = setup().await;
        let mut sub = hub.subscribe(&[Topic::AchievementUnlocked], 16);
        let player = store
            .register_player("w1", Utc::now(), &engine.catalog().codes())
            .await
            .unwrap();
        mine(&store, player.id, "tx1", 31).await;

        let unlocked = engine.evaluate(player.id).await.unwrap();
        let codes: Vec<_> = unlocked.iter().map(|u| u.code.as_str()).collect();
        // 31 + 10 + 25 = 66 crosses the 50 AP threshold in the same batch.
        assert_eq!(codes, vec!["first_steps", "first_blood", "getting_started"]);

        let player = store.get_player(player.id).await.unwrap().unwrap();
        assert_eq!(player.total_ap, 31 + 10 + 25 + 10);

        assert!(engine.evaluate(player.id).await.unwrap().is_empty());
        let after = store.get_player(player.id).await.unwrap().unwrap();
        assert_eq!(after.total_ap, player.total_ap);

        let mut published = 0;
        while sub.try_recv().is_some() {
            published += 1;
        }
        assert_eq!(published, 3);
    }

    #[tokio::test]
    async fn test_progress_recorded_for_locked_rows() {
        let (store, engine, _hub) = setup().await;
        let player = store
            .register_player("w1", Utc::now(), &engine.catalog().codes())
            .await
            .unwrap();
        engine.evaluate(player.id).await.unwrap();

        let rows = store
            .player_achievements(player.id, &engine.catalog().codes())
            .await
            .unwrap();
        let ap_row = rows
            .iter()
            .find(|r| r.achievement_code == "getting_started")
            .unwrap();
        assert!(!ap_row.is_unlocked());
        assert_eq!(ap_row.progress_current, Decimal::from(10));
        assert_eq!(ap_row.progress_target, Decimal::from(50));

        let rank_row = rows.iter().find(|r| r.achievement_code == "top_10").unwrap();
        assert_eq!(rank_row.progress_current, Decimal::ZERO);
        assert_eq!(rank_row.progress_target, Decimal::from(10));
    }

    #[tokio::test]
    async fn test_verification_change_unlocks() {
        let (store, engine, _hub) = setup().await;
        let player = store
            .register_player("w1", Utc::now(), &engine.catalog().codes())
            .await
            .unwrap();
        engine.evaluate(player.id).await.unwrap();
        store.set_verified(player.id, true).await.unwrap();

        let unlocked = engine.evaluate(player.id).await.unwrap();
        assert_eq!(unlocked.len(), 1);
        assert_eq!(unlocked[0].code, "verified_miner");
        assert_eq!(unlocked[0].ap_reward, 50);
    }

    #[tokio::test]
    async fn test_unknown_player() {
        let (_store, engine, _hub) = setup().await;
        assert!(matches!(
            engine.evaluate(42).await,
            Err(EngineError::UnknownPlayer(42))
        ));
    }

    #[tokio::test]
    async fn test_unlocked_at_never_moves() {
        let (store, engine, _hub) = setup().await;
        let codes = engine.catalog().codes();
        let player = store.register_player("w1", Utc::now(), &codes).await.unwrap();
        mine(&store, player.id, "tx1", 31).await;
        engine.evaluate(player.id).await.unwrap();

        let unlocked_at = |rows: Vec<crate::types::PlayerAchievement>| {
            rows.into_iter()
                .find(|r| r.achievement_code == "first_blood")
                .and_then(|r| r.unlocked_at)
                .unwrap()
        };
        let first = unlocked_at(store.player_achievements(player.id, &codes).await.unwrap());

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        mine(&store, player.id, "tx2", 5).await;
        engine.evaluate(player.id).await.unwrap();
        let second = unlocked_at(store.player_achievements(player.id, &codes).await.unwrap());
        assert_eq!(first, second);

        // A stale unlock for the same row is ignored by the store as well.
        let before = store.get_player(player.id).await.unwrap().unwrap();
        let applied = store
            .apply_evaluation(
                player.id,
                &[],
                &[Unlock {
                    achievement_code: "first_blood".to_string(),
                    ap_reward: 25,
                    unlocked_at: Utc::now(),
                }],
            )
            .await
            .unwrap();
        assert!(applied.unlocked.is_empty());
        assert_eq!(applied.player.total_ap, before.total_ap);
        let third = unlocked_at(store.player_achievements(player.id, &codes).await.unwrap());
        assert_eq!(first, third);
    }

    #[tokio::test]
    async fn test_evaluate_all_reaches_idle_players() {
        let (store, engine, _hub) = setup().await;
        // Neither player has rows nor was ever evaluated.
        let a = store.register_player("w1", Utc::now(), &[]).await.unwrap();
        let b = store.register_player("w2", Utc::now(), &[]).await.unwrap();

        let summary = engine.evaluate_all().await.unwrap();
        assert_eq!(
            summary,
            SweepSummary {
                players: 2,
                unlocked: 2,
                failed: 0,
            }
        );
        for id in [a.id, b.id] {
            assert_eq!(store.get_player(id).await.unwrap().unwrap().total_ap, 10);
        }

        let again = engine.evaluate_all().await.unwrap();
        assert_eq!(again.unlocked, 0);
    }
}
