//! Persistence layer.
//!
//! The pipeline, engine and ranker only talk to [`Store`]. Two backends are
//! provided: [`memory::MemoryStore`] (tests, single-node deployments) and
//! [`postgres::PgStore`] (durable relational store).

pub mod memory;
pub mod postgres;

use crate::types::{
    AppliedEvaluation, CommitOutcome, MiningEvent, NewMiningEvent, Period, Player,
    PlayerAchievement, PlayerId, ProgressUpdate, ScoreInput, SnapshotEntry, Unlock,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Storage failures, split by whether retrying can help.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("transient storage failure: {0}")]
    Transient(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("constraint violated: {0}")]
    Conflict(String),
    #[error("storage failure: {0}")]
    Fatal(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Time window `[start, end)` used for period scoring.
pub type Window = (DateTime<Utc>, DateTime<Utc>);

#[async_trait]
pub trait Store: Send + Sync {
    /// Creates the player if the wallet is unknown and pre-creates one locked
    /// row per `achievement_codes`. Idempotent; returns the stored player.
    async fn register_player(
        &self,
        wallet_address: &str,
        registered_at: DateTime<Utc>,
        achievement_codes: &[String],
    ) -> StoreResult<Player>;

    async fn get_player(&self, player_id: PlayerId) -> StoreResult<Option<Player>>;

    async fn find_player_by_wallet(&self, wallet_address: &str) -> StoreResult<Option<Player>>;

    async fn set_verified(&self, player_id: PlayerId, verified: bool) -> StoreResult<Player>;

    /// Wallets known to the system, for pool adapters that poll per wallet.
    async fn list_wallets(&self) -> StoreResult<Vec<String>>;

    /// Every player id in ascending order, for bulk re-evaluation.
    async fn list_player_ids(&self) -> StoreResult<Vec<PlayerId>>;

    async fn find_event(&self, pool_id: &str, tx_hash: &str) -> StoreResult<Option<MiningEvent>>;

    /// Atomic insert-if-absent on `(pool_id, tx_hash)`. A fresh insert also
    /// increments the player's `total_ap`, `total_mined_advc` and
    /// `last_active_at` in the same transaction.
    async fn commit_event(&self, event: NewMiningEvent) -> StoreResult<CommitOutcome>;

    async fn player_events(&self, player_id: PlayerId) -> StoreResult<Vec<MiningEvent>>;

    /// Rows for the player, with missing rows for `achievement_codes` created locked.
    async fn player_achievements(
        &self,
        player_id: PlayerId,
        achievement_codes: &[String],
    ) -> StoreResult<Vec<PlayerAchievement>>;

    /// Writes progress for still-locked rows and applies unlocks in one
    /// transaction. An unlock credits AP only if its row was still locked.
    async fn apply_evaluation(
        &self,
        player_id: PlayerId,
        progress: &[ProgressUpdate],
        unlocks: &[Unlock],
    ) -> StoreResult<AppliedEvaluation>;

    /// Per-player aggregates; `window_ap` is summed over `window` when given.
    async fn score_inputs(&self, window: Option<Window>) -> StoreResult<Vec<ScoreInput>>;

    /// Current snapshot of a period ordered by rank.
    async fn snapshot(&self, period: Period) -> StoreResult<Vec<SnapshotEntry>>;

    /// Atomically replaces the period's snapshot. Readers see either the old
    /// or the new set, never a mix or an empty gap.
    async fn replace_snapshot(&self, period: Period, entries: Vec<SnapshotEntry>) -> StoreResult<()>;

    async fn snapshot_entry(
        &self,
        period: Period,
        wallet_address: &str,
    ) -> StoreResult<Option<SnapshotEntry>>;

    async fn snapshot_page(
        &self,
        period: Period,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<SnapshotEntry>>;

    /// Entries with `from_rank <= rank <= to_rank`, ordered by rank.
    async fn snapshot_rank_range(
        &self,
        period: Period,
        from_rank: u32,
        to_rank: u32,
    ) -> StoreResult<Vec<SnapshotEntry>>;
}
