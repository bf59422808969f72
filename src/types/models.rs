use super::{EventId, Period, PlayerId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A player account keyed by wallet address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub wallet_address: String,
    pub total_ap: i64,
    pub total_mined_advc: Decimal,
    pub verified: bool,
    pub registered_at: DateTime<Utc>,
    pub last_active_at: Option<DateTime<Utc>>,
}

/// Event about to be committed. `ap_awarded` is already converted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMiningEvent {
    pub player_id: PlayerId,
    pub pool_id: String,
    pub tx_hash: String,
    pub amount_advc: Decimal,
    pub ap_awarded: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Committed, immutable mining event. `(pool_id, tx_hash)` is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiningEvent {
    pub id: EventId,
    pub player_id: PlayerId,
    pub pool_id: String,
    pub tx_hash: String,
    pub amount_advc: Decimal,
    pub ap_awarded: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Result of the store's atomic insert-if-absent.
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    /// Event inserted and player totals incremented in the same transaction.
    Inserted { event: MiningEvent, player: Player },
    /// `(pool_id, tx_hash)` already existed; nothing was written.
    Duplicate(MiningEvent),
}

/// Per-player state of one catalog achievement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerAchievement {
    pub player_id: PlayerId,
    pub achievement_code: String,
    pub unlocked_at: Option<DateTime<Utc>>,
    pub progress_current: Decimal,
    pub progress_target: Decimal,
}

impl PlayerAchievement {
    pub fn locked(player_id: PlayerId, achievement_code: impl Into<String>) -> Self {
        Self {
            player_id,
            achievement_code: achievement_code.into(),
            unlocked_at: None,
            progress_current: Decimal::ZERO,
            progress_target: Decimal::ZERO,
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub achievement_code: String,
    pub current: Decimal,
    pub target: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Unlock {
    pub achievement_code: String,
    pub ap_reward: i64,
    pub unlocked_at: DateTime<Utc>,
}

/// What `Store::apply_evaluation` actually wrote.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedEvaluation {
    /// Codes whose row was still locked and is now unlocked.
    pub unlocked: Vec<String>,
    pub ap_credited: i64,
    pub player: Player,
}

/// Raw per-player aggregates the ranker turns into a period score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreInput {
    pub player_id: PlayerId,
    pub wallet_address: String,
    pub total_ap: i64,
    pub total_mined_advc: Decimal,
    /// Distinct UTC days with at least one event.
    pub days_active: u32,
    /// Sum of `ap_awarded` inside the requested window, 0 when no window.
    pub window_ap: i64,
    pub verified: bool,
}

/// One row of a period's leaderboard snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub period: Period,
    pub player_id: PlayerId,
    pub wallet_address: String,
    pub rank: u32,
    pub previous_rank: Option<u32>,
    pub period_score: Decimal,
    /// Verification flag of the player when the snapshot was taken.
    #[serde(default)]
    pub verified: bool,
    pub captured_at: DateTime<Utc>,
}
