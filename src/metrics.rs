// src/metrics.rs

#[cfg(feature = "observability")]
pub use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
    increment_counter, Unit,
};

// NOTE: When observability feature is disabled, provide stub implementations
#[cfg(not(feature = "observability"))]
pub enum Unit {}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! counter {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
    ($name:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! gauge {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! histogram {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! increment_counter {
    ($name:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_counter {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_gauge {
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_histogram {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
use crate::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
    increment_counter,
};

use once_cell::sync::OnceCell;
use std::time::Duration;

static DESCRIBED: OnceCell<()> = OnceCell::new();

/// Registers descriptions for every metric the crate emits. Safe to call
/// more than once; only the first call registers.
pub fn describe_metrics() {
    DESCRIBED.get_or_init(|| {
        // Ingestion
        describe_counter!(
            "m2p_events_ingested_total",
            Unit::Count,
            "Mining events committed, labeled by pool."
        );
        describe_counter!(
            "m2p_events_duplicate_total",
            Unit::Count,
            "Records whose (pool_id, tx_hash) was already committed."
        );
        describe_counter!(
            "m2p_records_malformed_total",
            Unit::Count,
            "Raw records rejected by validation."
        );
        describe_counter!(
            "m2p_records_dead_lettered_total",
            Unit::Count,
            "Records moved to the dead-letter queue after exhausting retries."
        );
        describe_counter!(
            "m2p_store_retries_total",
            Unit::Count,
            "Retries of transient storage failures."
        );

        // Achievements
        describe_counter!(
            "m2p_achievements_unlocked_total",
            Unit::Count,
            "Achievements unlocked, labeled by tier."
        );
        describe_counter!(
            "m2p_criterion_errors_total",
            Unit::Count,
            "Criterion evaluations that failed and were skipped."
        );

        // Leaderboard
        describe_counter!(
            "m2p_leaderboard_recomputes_total",
            Unit::Count,
            "Completed leaderboard recomputes, labeled by period."
        );
        describe_counter!(
            "m2p_leaderboard_recompute_skipped_total",
            Unit::Count,
            "Recompute requests skipped because one was already in flight."
        );
        describe_histogram!(
            "m2p_leaderboard_recompute_ms",
            Unit::Milliseconds,
            "Leaderboard recompute duration in milliseconds."
        );

        // Notifications
        describe_counter!(
            "m2p_notifications_dropped_total",
            Unit::Count,
            "Notifications dropped from full subscriber queues."
        );
        describe_gauge!(
            "m2p_notification_subscribers",
            "Current number of notification subscribers."
        );

        // Pool sources
        describe_counter!(
            "m2p_pool_fetch_failures_total",
            Unit::Count,
            "Failed or timed out pool fetches, labeled by pool."
        );
        describe_gauge!(
            "m2p_pool_source_degraded",
            "1 when the pool source is degraded, 0 otherwise."
        );
    });
}

pub fn increment_events_ingested(pool_id: &str) {
    increment_counter!("m2p_events_ingested_total", "pool" => pool_id.to_string());
}

pub fn increment_events_duplicate(pool_id: &str) {
    increment_counter!("m2p_events_duplicate_total", "pool" => pool_id.to_string());
}

pub fn increment_records_malformed() {
    increment_counter!("m2p_records_malformed_total");
}

pub fn increment_records_dead_lettered() {
    increment_counter!("m2p_records_dead_lettered_total");
}

pub fn increment_store_retries() {
    increment_counter!("m2p_store_retries_total");
}

pub fn increment_achievements_unlocked(tier: &'static str) {
    increment_counter!("m2p_achievements_unlocked_total", "tier" => tier);
}

pub fn increment_criterion_errors(code: &str) {
    increment_counter!("m2p_criterion_errors_total", "achievement" => code.to_string());
}

pub fn record_leaderboard_recompute(period: &'static str, duration: Duration) {
    increment_counter!("m2p_leaderboard_recomputes_total", "period" => period);
    histogram!(
        "m2p_leaderboard_recompute_ms",
        duration.as_millis() as f64,
        "period" => period
    );
}

pub fn increment_leaderboard_recompute_skipped(period: &'static str) {
    increment_counter!("m2p_leaderboard_recompute_skipped_total", "period" => period);
}

pub fn increment_notifications_dropped(count: u64) {
    counter!("m2p_notifications_dropped_total", count);
}

pub fn set_notification_subscribers(count: usize) {
    gauge!("m2p_notification_subscribers", count as f64);
}

pub fn increment_pool_fetch_failures(pool_id: &str) {
    increment_counter!("m2p_pool_fetch_failures_total", "pool" => pool_id.to_string());
}

pub fn set_pool_source_degraded(pool_id: &str, degraded: bool) {
    gauge!(
        "m2p_pool_source_degraded",
        if degraded { 1.0 } else { 0.0 },
        "pool" => pool_id.to_string()
    );
}
