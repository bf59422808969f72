use crate::store::{Store, StoreError};
use crate::types::{Period, PlayerId, SnapshotEntry};
use rust_decimal::Decimal;
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

pub const MAX_PAGE_LIMIT: usize = 500;
pub const MAX_NEIGHBOR_RADIUS: u32 = 20;

/// Movement since the previous snapshot. Rendered as `NEW`, `up_n`, `down_n`
/// or `same`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankChange {
    New,
    Up(u32),
    Down(u32),
    Same,
}

impl RankChange {
    pub fn between(previous: Option<u32>, current: u32) -> Self {
        match previous {
            None => RankChange::New,
            Some(p) if p > current => RankChange::Up(p - current),
            Some(p) if p < current => RankChange::Down(current - p),
            Some(_) => RankChange::Same,
        }
    }
}

impl fmt::Display for RankChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RankChange::New => f.write_str("NEW"),
            RankChange::Up(n) => write!(f, "up_{}", n),
            RankChange::Down(n) => write!(f, "down_{}", n),
            RankChange::Same => f.write_str("same"),
        }
    }
}

impl Serialize for RankChange {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub player_id: PlayerId,
    pub wallet_address: String,
    pub period_score: Decimal,
    pub previous_rank: Option<u32>,
    pub rank_change: RankChange,
    pub verified: bool,
}

impl From<SnapshotEntry> for LeaderboardEntry {
    fn from(entry: SnapshotEntry) -> Self {
        Self {
            rank_change: RankChange::between(entry.previous_rank, entry.rank),
            rank: entry.rank,
            player_id: entry.player_id,
            wallet_address: entry.wallet_address,
            period_score: entry.period_score,
            previous_rank: entry.previous_rank,
            verified: entry.verified,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerRank {
    pub period: Period,
    pub wallet_address: String,
    pub rank: u32,
    pub previous_rank: Option<u32>,
    pub rank_change: RankChange,
    pub period_score: Decimal,
    pub verified: bool,
    pub nearby_rankings: Vec<LeaderboardEntry>,
}

/// Read-only views over the last committed snapshot of each period.
#[derive(Clone)]
pub struct LeaderboardQueries {
    store: Arc<dyn Store>,
}

impl LeaderboardQueries {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// `limit` is clamped to `1..=500`.
    pub async fn get_leaderboard(
        &self,
        period: Period,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LeaderboardEntry>, StoreError> {
        let limit = limit.clamp(1, MAX_PAGE_LIMIT);
        let page = self.store.snapshot_page(period, limit, offset).await?;
        Ok(page.into_iter().map(LeaderboardEntry::from).collect())
    }

    /// `None` when the wallet is not ranked in `period`. `neighbor_radius` is
    /// clamped to `0..=20`.
    pub async fn get_player_rank(
        &self,
        period: Period,
        wallet_address: &str,
        neighbor_radius: u32,
    ) -> Result<Option<PlayerRank>, StoreError> {
        let Some(entry) = self.store.snapshot_entry(period, wallet_address).await? else {
            return Ok(None);
        };
        let radius = neighbor_radius.min(MAX_NEIGHBOR_RADIUS);
        let from = entry.rank.saturating_sub(radius).max(1);
        let to = entry.rank.saturating_add(radius);
        let nearby = self
            .store
            .snapshot_rank_range(period, from, to)
            .await?
            .into_iter()
            .map(LeaderboardEntry::from)
            .collect();
        Ok(Some(PlayerRank {
            period,
            rank_change: RankChange::between(entry.previous_rank, entry.rank),
            wallet_address: entry.wallet_address,
            rank: entry.rank,
            previous_rank: entry.previous_rank,
            period_score: entry.period_score,
            verified: entry.verified,
            nearby_rankings: nearby,
        }))
    }
}
