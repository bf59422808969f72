// src/normalization.rs
//
// Validation and normalization of untrusted pool records before they reach the store.

use crate::types::{RawMiningRecord, ValidatedRecord};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing or empty field `{0}`")]
    MissingField(&'static str),
    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),
    #[error("timestamp {occurred_at} is more than {skew_seconds}s in the future")]
    FutureTimestamp {
        occurred_at: DateTime<Utc>,
        skew_seconds: i64,
    },
}

fn required_text(value: &Option<String>, field: &'static str) -> Result<String, ValidationError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(ValidationError::MissingField(field)),
    }
}

/// Trims identifiers and rejects records that cannot become a mining event.
///
/// `max_future_skew_seconds` bounds how far past `now` a pool clock may run.
pub fn validate_record(
    raw: &RawMiningRecord,
    now: DateTime<Utc>,
    max_future_skew_seconds: i64,
) -> Result<ValidatedRecord, ValidationError> {
    let pool_id = required_text(&raw.pool_id, "pool_id")?;
    let tx_hash = required_text(&raw.tx_hash, "tx_hash")?;
    let wallet_address = required_text(&raw.wallet_address, "wallet_address")?;

    let amount_advc = raw
        .amount_advc
        .ok_or(ValidationError::MissingField("amount_advc"))?;
    if amount_advc <= Decimal::ZERO {
        return Err(ValidationError::NonPositiveAmount(amount_advc));
    }

    let occurred_at = raw
        .occurred_at
        .ok_or(ValidationError::MissingField("occurred_at"))?;
    if occurred_at > now + Duration::seconds(max_future_skew_seconds) {
        return Err(ValidationError::FutureTimestamp {
            occurred_at,
            skew_seconds: max_future_skew_seconds,
        });
    }

    Ok(ValidatedRecord {
        pool_id,
        tx_hash,
        wallet_address,
        amount_advc: amount_advc.normalize(),
        occurred_at,
    })
}
