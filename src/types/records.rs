use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Mining record as produced by a pool source adapter.
///
/// Every field is optional: pool payloads are untrusted and a missing field
/// must surface as a malformed record, not as a deserialization panic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawMiningRecord {
    pub pool_id: Option<String>,
    pub tx_hash: Option<String>,
    pub wallet_address: Option<String>,
    pub amount_advc: Option<Decimal>,
    pub occurred_at: Option<DateTime<Utc>>,
}

impl RawMiningRecord {
    pub fn new(
        pool_id: impl Into<String>,
        tx_hash: impl Into<String>,
        wallet_address: impl Into<String>,
        amount_advc: Decimal,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            pool_id: Some(pool_id.into()),
            tx_hash: Some(tx_hash.into()),
            wallet_address: Some(wallet_address.into()),
            amount_advc: Some(amount_advc),
            occurred_at: Some(occurred_at),
        }
    }

    /// Short identifier for log lines.
    pub fn describe(&self) -> String {
        format!(
            "{}:{}",
            self.pool_id.as_deref().unwrap_or("?"),
            self.tx_hash.as_deref().unwrap_or("?")
        )
    }
}

/// Record that passed validation; all fields present and normalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedRecord {
    pub pool_id: String,
    pub tx_hash: String,
    pub wallet_address: String,
    pub amount_advc: Decimal,
    pub occurred_at: DateTime<Utc>,
}

impl From<ValidatedRecord> for RawMiningRecord {
    fn from(record: ValidatedRecord) -> Self {
        RawMiningRecord::new(
            record.pool_id,
            record.tx_hash,
            record.wallet_address,
            record.amount_advc,
            record.occurred_at,
        )
    }
}
