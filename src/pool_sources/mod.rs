//! Pool source adapters.
//!
//! A [`PoolSource`] turns one pool's payout history into raw mining records.
//! [`worker::PoolSourceWorker`] polls a source on its own interval and feeds
//! the ingestion pipeline.

pub mod http;
pub mod worker;

use crate::types::RawMiningRecord;
use async_trait::async_trait;

pub use http::JsonPaymentsSource;
pub use worker::{PoolSourceWorker, SourceHealth};

#[derive(Debug, thiserror::Error)]
pub enum PoolSourceError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("pool answered with HTTP {0}")]
    Status(u16),
    #[error("unexpected response body: {0}")]
    Decode(String),
    #[error("request timed out")]
    Timeout,
}

#[async_trait]
pub trait PoolSource: Send + Sync {
    fn pool_id(&self) -> &str;

    /// Payouts currently reported for `wallets`. Records already ingested may
    /// be returned again; dedup happens downstream.
    async fn fetch(&self, wallets: &[String]) -> Result<Vec<RawMiningRecord>, PoolSourceError>;
}
