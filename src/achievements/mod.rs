//! Achievement catalog, criteria and the evaluation engine.
//!
//! The catalog is loaded once at startup and shared as an
//! `Arc<AchievementCatalog>`. Evaluations are requested through
//! [`EvaluationQueue`] and run by [`run_evaluation_worker`].

pub mod catalog;
pub mod criteria;
pub mod engine;
pub mod queue;

pub use catalog::{AchievementCatalog, AchievementDef, CatalogError};
pub use criteria::{Criterion, CriterionError, PlayerState, Progress};
pub use engine::{AchievementEngine, EngineError, SweepSummary, UnlockedAchievement};
pub use queue::{run_evaluation_worker, EvaluationQueue, EvaluationReceiver};
