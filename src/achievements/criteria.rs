use crate::types::conversions::utc_day;
use crate::types::{MiningEvent, Period, Player};
use chrono::{DateTime, FixedOffset, NaiveDate, Timelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

fn default_rank_period() -> Period {
    Period::AllTime
}

fn default_time_of_day_count() -> u64 {
    1
}

/// Unlock condition of an achievement. Closed set, resolved when the catalog loads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Criterion {
    Registration,
    #[serde(alias = "verified")]
    Verification,
    #[serde(alias = "total_advc", alias = "mine_amount")]
    MiningAmount {
        #[serde(alias = "threshold")]
        threshold_advc: Decimal,
    },
    #[serde(alias = "mining_events")]
    EventCount { count: u64 },
    #[serde(alias = "total_ap")]
    ApThreshold { threshold: i64 },
    TimeActiveDays { days: u32 },
    ConsecutiveDays { days: u32 },
    LeaderboardRank {
        max_rank: u32,
        #[serde(default = "default_rank_period")]
        period: Period,
    },
    #[serde(alias = "time_based")]
    TimeOfDay {
        start_hour: u32,
        end_hour: u32,
        #[serde(default = "default_time_of_day_count")]
        count: u64,
    },
    #[serde(alias = "pool_count")]
    PoolDiversity { distinct_pools: u32 },
    #[serde(alias = "single_payout")]
    SingleEventAmount {
        #[serde(alias = "threshold")]
        threshold_advc: Decimal,
    },
    #[serde(alias = "join_before", alias = "registration_date")]
    RegisteredBefore { deadline: DateTime<Utc> },
}

/// Everything a criterion may look at. Built once per evaluation.
#[derive(Debug, Clone)]
pub struct PlayerState {
    pub player: Player,
    pub events: Vec<MiningEvent>,
    /// Latest snapshot rank per period; `None` when the player is unranked.
    /// Only periods some pending criterion asked for are present.
    pub ranks: HashMap<Period, Option<u32>>,
    pub local_offset: FixedOffset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub current: Decimal,
    pub target: Decimal,
    pub satisfied: bool,
}

impl Progress {
    fn at_least(current: Decimal, target: Decimal) -> Self {
        Self {
            current,
            target,
            satisfied: current >= target,
        }
    }

    fn flag(value: bool) -> Self {
        Self {
            current: if value { Decimal::ONE } else { Decimal::ZERO },
            target: Decimal::ONE,
            satisfied: value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CriterionError {
    #[error("rank for period {0} was not loaded")]
    RankUnavailable(Period),
}

impl Criterion {
    pub fn kind(&self) -> &'static str {
        match self {
            Criterion::Registration => "registration",
            Criterion::Verification => "verification",
            Criterion::MiningAmount { .. } => "mining_amount",
            Criterion::EventCount { .. } => "event_count",
            Criterion::ApThreshold { .. } => "ap_threshold",
            Criterion::TimeActiveDays { .. } => "time_active_days",
            Criterion::ConsecutiveDays { .. } => "consecutive_days",
            Criterion::LeaderboardRank { .. } => "leaderboard_rank",
            Criterion::TimeOfDay { .. } => "time_of_day",
            Criterion::PoolDiversity { .. } => "pool_diversity",
            Criterion::SingleEventAmount { .. } => "single_event_amount",
            Criterion::RegisteredBefore { .. } => "registered_before",
        }
    }

    /// `(period, max_rank)` for leaderboard criteria.
    pub fn rank_requirement(&self) -> Option<(Period, u32)> {
        match self {
            Criterion::LeaderboardRank { max_rank, period } => Some((*period, *max_rank)),
            _ => None,
        }
    }

    /// Parameter checks run at catalog load.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Criterion::Registration | Criterion::Verification | Criterion::RegisteredBefore { .. } => {
                Ok(())
            }
            Criterion::MiningAmount { threshold_advc }
            | Criterion::SingleEventAmount { threshold_advc } => {
                if *threshold_advc <= Decimal::ZERO {
                    return Err(format!("threshold_advc must be positive, got {}", threshold_advc));
                }
                Ok(())
            }
            Criterion::EventCount { count } => positive(*count as i64, "count"),
            Criterion::ApThreshold { threshold } => positive(*threshold, "threshold"),
            Criterion::TimeActiveDays { days } | Criterion::ConsecutiveDays { days } => {
                positive(*days as i64, "days")
            }
            Criterion::LeaderboardRank { max_rank, .. } => positive(*max_rank as i64, "max_rank"),
            Criterion::PoolDiversity { distinct_pools } => {
                positive(*distinct_pools as i64, "distinct_pools")
            }
            Criterion::TimeOfDay {
                start_hour,
                end_hour,
                count,
            } => {
                if *start_hour > 23 || *end_hour > 23 {
                    return Err(format!(
                        "hours must be within 0..=23, got {}..{}",
                        start_hour, end_hour
                    ));
                }
                if start_hour == end_hour {
                    return Err("start_hour and end_hour must differ".to_string());
                }
                positive(*count as i64, "count")
            }
        }
    }

    pub fn evaluate(&self, state: &PlayerState) -> Result<Progress, CriterionError> {
        let player = &state.player;
        let progress = match self {
            Criterion::Registration => Progress::flag(true),
            Criterion::Verification => Progress::flag(player.verified),
            Criterion::MiningAmount { threshold_advc } => {
                Progress::at_least(player.total_mined_advc, *threshold_advc)
            }
            Criterion::EventCount { count } => Progress::at_least(
                Decimal::from(state.events.len() as u64),
                Decimal::from(*count),
            ),
            Criterion::ApThreshold { threshold } => {
                Progress::at_least(Decimal::from(player.total_ap), Decimal::from(*threshold))
            }
            Criterion::TimeActiveDays { days } => Progress::at_least(
                Decimal::from(active_days(&state.events).len() as u64),
                Decimal::from(*days),
            ),
            Criterion::ConsecutiveDays { days } => Progress::at_least(
                Decimal::from(longest_streak(&active_days(&state.events))),
                Decimal::from(*days),
            ),
            Criterion::LeaderboardRank { max_rank, period } => {
                let rank = state
                    .ranks
                    .get(period)
                    .ok_or(CriterionError::RankUnavailable(*period))?;
                Progress {
                    current: Decimal::from(rank.unwrap_or(0)),
                    target: Decimal::from(*max_rank),
                    satisfied: matches!(rank, Some(r) if *r >= 1 && r <= max_rank),
                }
            }
            Criterion::TimeOfDay {
                start_hour,
                end_hour,
                count,
            } => {
                let matching = state
                    .events
                    .iter()
                    .filter(|e| {
                        let hour = e.occurred_at.with_timezone(&state.local_offset).hour();
                        hour_in_window(hour, *start_hour, *end_hour)
                    })
                    .count();
                Progress::at_least(Decimal::from(matching as u64), Decimal::from(*count))
            }
            Criterion::PoolDiversity { distinct_pools } => {
                let pools: HashSet<&str> = state.events.iter().map(|e| e.pool_id.as_str()).collect();
                Progress::at_least(
                    Decimal::from(pools.len() as u64),
                    Decimal::from(*distinct_pools),
                )
            }
            Criterion::SingleEventAmount { threshold_advc } => {
                let best = state
                    .events
                    .iter()
                    .map(|e| e.amount_advc)
                    .max()
                    .unwrap_or(Decimal::ZERO);
                Progress::at_least(best, *threshold_advc)
            }
            Criterion::RegisteredBefore { deadline } => {
                Progress::flag(player.registered_at <= *deadline)
            }
        };
        Ok(progress)
    }
}

fn positive(value: i64, field: &str) -> Result<(), String> {
    if value <= 0 {
        return Err(format!("{} must be positive, got {}", field, value));
    }
    Ok(())
}

/// `[start, end)`, wrapping past midnight when `start > end`.
fn hour_in_window(hour: u32, start: u32, end: u32) -> bool {
    if start < end {
        hour >= start && hour < end
    } else {
        hour >= start || hour < end
    }
}

pub(crate) fn active_days(events: &[MiningEvent]) -> BTreeSet<NaiveDate> {
    events.iter().map(|e| utc_day(e.occurred_at)).collect()
}

fn longest_streak(days: &BTreeSet<NaiveDate>) -> u64 {
    let mut best = 0u64;
    let mut run = 0u64;
    let mut previous: Option<NaiveDate> = None;
    for day in days {
        run = match previous {
            Some(p) if p.succ_opt() == Some(*day) => run + 1,
            _ => 1,
        };
        best = best.max(run);
        previous = Some(*day);
    }
    best
}
