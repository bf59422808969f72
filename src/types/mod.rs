//! Domain types shared by the ingestion pipeline, the achievement engine and
//! the leaderboard ranker.

pub mod conversions;
pub mod models;
pub mod records;

pub use models::{
    AppliedEvaluation, CommitOutcome, MiningEvent, NewMiningEvent, Player, PlayerAchievement,
    ProgressUpdate, ScoreInput, SnapshotEntry, Unlock,
};
pub use records::{RawMiningRecord, ValidatedRecord};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Database identifier of a player.
pub type PlayerId = i64;

/// Database identifier of a committed mining event.
pub type EventId = i64;

/// Leaderboard scoring window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    AllTime,
    ThisWeek,
    Today,
    Efficiency,
}

impl Period {
    pub const ALL: [Period; 4] = [
        Period::AllTime,
        Period::ThisWeek,
        Period::Today,
        Period::Efficiency,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Period::AllTime => "all_time",
            Period::ThisWeek => "this_week",
            Period::Today => "today",
            Period::Efficiency => "efficiency",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown leaderboard period: {0}")]
pub struct UnknownPeriod(pub String);

impl FromStr for Period {
    type Err = UnknownPeriod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "all_time" => Ok(Period::AllTime),
            "this_week" => Ok(Period::ThisWeek),
            "today" => Ok(Period::Today),
            "efficiency" => Ok(Period::Efficiency),
            other => Err(UnknownPeriod(other.to_string())),
        }
    }
}

/// Achievement tier, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Bronze,
    Silver,
    Gold,
    Platinum,
    Diamond,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Bronze => "bronze",
            Tier::Silver => "silver",
            Tier::Gold => "gold",
            Tier::Platinum => "platinum",
            Tier::Diamond => "diamond",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
