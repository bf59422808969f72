//! Leaderboard scoring, ranking and read-only queries.
//!
//! Snapshots are eventually consistent with player totals: each period is
//! recomputed on its own interval and replaced wholesale.

pub mod queries;
pub mod ranker;
pub mod scoring;

pub use queries::{LeaderboardEntry, LeaderboardQueries, PlayerRank, RankChange};
pub use ranker::{run_ranker_scheduler, LeaderboardRanker, RankDelta, RecomputeOutcome};
pub use scoring::{period_window, rank_players, score, ScoredPlayer};
