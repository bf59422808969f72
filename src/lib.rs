//! # M2P Rewards Core
//!
//! The "Mine to Play" rewards engine: players earn AP (Action Points) for
//! ADVC mining payouts reported by pools, unlock achievements, and compete on
//! periodic leaderboards.
//!
//! ## Overview
//!
//! - **Ingestion**: validates raw pool records, dedups them on
//!   `(pool_id, tx_hash)` and credits AP atomically
//! - **Achievements**: a closed set of criteria evaluated per player after
//!   every state change
//! - **Leaderboard**: per-period snapshots with rank-change detection
//! - **Notifications**: best-effort fan-out to subscribers
//!
//! ## Architecture
//!
//! ### Sources
//! Pool source adapters poll pools on their own interval and hand records to
//! the ingestion pipeline.
//!
//! ### Persistence
//! Everything goes through the [`store::Store`] trait, backed by PostgreSQL or
//! an in-memory store.
//!
//! ### Background work
//! Achievement evaluations are queued and run by a bounded worker. Each
//! leaderboard period is recomputed by its own scheduler loop.

// Core Types
/// Domain types and conversions
pub mod types;
/// Configuration loading
pub mod settings;
/// Persistence trait and backends
pub mod store;

// Ingestion
/// Pool source adapters and pollers
pub mod pool_sources;
/// Record validation
pub mod normalization;
/// Ingestion & dedup pipeline
pub mod ingestion;
/// Dead-letter queue for records that could not be persisted
pub mod dead_letter;
/// Per-player serialization
pub mod player_locks;

// Rewards
/// Achievement catalog, criteria and engine
pub mod achievements;
/// Leaderboard ranking and queries
pub mod leaderboard;
/// Player registration, verification and progress
pub mod players;

// Delivery & wiring
/// Notification fan-out
pub mod notifications;
/// Service wiring and lifecycle
pub mod service;

// Observability
/// Metrics (no-ops unless the `observability` feature is enabled)
pub mod metrics;

pub use ingestion::{IngestError, IngestOutcome, IngestSummary, IngestionPipeline};
pub use service::{RewardsService, ServiceHandle};
pub use settings::Settings;
pub use store::{Store, StoreError};
