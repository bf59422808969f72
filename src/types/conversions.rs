use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Converts a mined amount to AP, rounding half away from zero.
///
/// Amounts are always positive here, so this is round-half-up.
pub fn ap_for_amount(amount_advc: Decimal, conversion_rate: Decimal) -> Result<i64, ConversionError> {
    let raw = amount_advc
        .checked_mul(conversion_rate)
        .ok_or(ConversionError::Overflow)?;
    raw.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or(ConversionError::Overflow)
}

/// UTC calendar day of a timestamp.
pub fn utc_day(at: DateTime<Utc>) -> NaiveDate {
    at.date_naive()
}

/// `[00:00, 24:00)` UTC of the day containing `now`.
pub fn day_window(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = start_of_day(utc_day(now));
    (start, start + Duration::days(1))
}

/// ISO week (Monday 00:00 UTC) containing `now`.
pub fn calendar_week_window(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let today = utc_day(now);
    let monday = today - Duration::days(today.weekday().num_days_from_monday() as i64);
    let start = start_of_day(monday);
    (start, start + Duration::days(7))
}

fn start_of_day(day: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&day.and_hms_opt(0, 0, 0).unwrap_or_default())
}

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("Overflow in conversion")]
    Overflow,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_ap_rounds_half_up() {
        let rate = Decimal::from(10);
        assert_eq!(ap_for_amount(Decimal::from_str("12.895").unwrap(), rate).unwrap(), 129);
        assert_eq!(ap_for_amount(Decimal::from_str("0.05").unwrap(), rate).unwrap(), 1);
        assert_eq!(ap_for_amount(Decimal::from_str("0.04").unwrap(), rate).unwrap(), 0);
        assert_eq!(ap_for_amount(Decimal::from_str("3.14").unwrap(), rate).unwrap(), 31);
    }

    #[test]
    fn test_day_window_splits_at_midnight() {
        let (start, end) = day_window(ts("2025-11-18T23:59:00Z"));
        assert_eq!(start, ts("2025-11-18T00:00:00Z"));
        assert_eq!(end, ts("2025-11-19T00:00:00Z"));
        let next = ts("2025-11-19T00:01:00Z");
        assert!(next >= end);
    }

    #[test]
    fn test_calendar_week_starts_monday() {
        // 2025-11-19 is a Wednesday.
        let (start, end) = calendar_week_window(ts("2025-11-19T12:00:00Z"));
        assert_eq!(start, ts("2025-11-17T00:00:00Z"));
        assert_eq!(end, ts("2025-11-24T00:00:00Z"));
    }
}
