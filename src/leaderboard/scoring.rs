use crate::settings::WeekWindow;
use crate::store::Window;
use crate::types::conversions::{calendar_week_window, day_window};
use crate::types::{Period, PlayerId, ScoreInput};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPlayer {
    pub player_id: PlayerId,
    pub wallet_address: String,
    pub score: Decimal,
    pub verified: bool,
}

/// Event window a period sums over; `None` for periods scored on totals.
pub fn period_window(period: Period, now: DateTime<Utc>, week: WeekWindow) -> Option<Window> {
    match period {
        Period::AllTime | Period::Efficiency => None,
        Period::Today => Some(day_window(now)),
        Period::ThisWeek => Some(match week {
            WeekWindow::Calendar => calendar_week_window(now),
            WeekWindow::Rolling => (now - Duration::days(7), now),
        }),
    }
}

/// Period score, or `None` when the player does not qualify for the period.
pub fn score(period: Period, input: &ScoreInput) -> Option<Decimal> {
    match period {
        Period::AllTime => (input.total_ap > 0).then(|| Decimal::from(input.total_ap)),
        Period::ThisWeek | Period::Today => {
            (input.window_ap > 0).then(|| Decimal::from(input.window_ap))
        }
        Period::Efficiency => {
            if input.total_mined_advc <= Decimal::ZERO {
                return None;
            }
            let days = Decimal::from(input.days_active.max(1));
            input.total_mined_advc.checked_div(days)
        }
    }
}

/// Eligible players ordered by score descending, ties by wallet ascending.
pub fn rank_players(period: Period, inputs: Vec<ScoreInput>, limit: Option<usize>) -> Vec<ScoredPlayer> {
    let mut scored: Vec<ScoredPlayer> = inputs
        .into_iter()
        .filter_map(|input| {
            score(period, &input).map(|score| ScoredPlayer {
                player_id: input.player_id,
                wallet_address: input.wallet_address,
                score,
                verified: input.verified,
            })
        })
        .collect();
    scored.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| a.wallet_address.cmp(&b.wallet_address))
    });
    if let Some(limit) = limit {
        scored.truncate(limit);
    }
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn input(id: PlayerId, wallet: &str, total_ap: i64, mined: &str, days: u32, window_ap: i64) -> ScoreInput {
        ScoreInput {
            player_id: id,
            wallet_address: wallet.to_string(),
            total_ap,
            total_mined_advc: Decimal::from_str(mined).unwrap(),
            days_active: days,
            window_ap,
            verified: false,
        }
    }

    #[test]
    fn test_ties_break_by_wallet() {
        let ranked = rank_players(
            Period::AllTime,
            vec![
                input(1, "wallet_c", 100, "10", 1, 0),
                input(2, "wallet_a", 100, "10", 1, 0),
                input(3, "wallet_b", 250, "25", 1, 0),
                input(4, "wallet_z", 0, "0", 0, 0),
            ],
            None,
        );
        let wallets: Vec<_> = ranked.iter().map(|s| s.wallet_address.as_str()).collect();
        assert_eq!(wallets, vec!["wallet_b", "wallet_a", "wallet_c"]);
    }

    #[test]
    fn test_efficiency_divides_by_active_days() {
        let s = score(Period::Efficiency, &input(1, "w", 10, "30", 4, 0)).unwrap();
        assert_eq!(s, Decimal::from_str("7.5").unwrap());
        // Mined but no recorded days still divides by one.
        let s = score(Period::Efficiency, &input(1, "w", 10, "30", 0, 0)).unwrap();
        assert_eq!(s, Decimal::from(30));
        assert!(score(Period::Efficiency, &input(1, "w", 10, "0", 0, 0)).is_none());
    }

    #[test]
    fn test_windowed_periods_need_window_ap() {
        assert!(score(Period::Today, &input(1, "w", 500, "50", 3, 0)).is_none());
        assert_eq!(
            score(Period::ThisWeek, &input(1, "w", 500, "50", 3, 40)),
            Some(Decimal::from(40))
        );
    }

    #[test]
    fn test_rolling_week_window() {
        let now = DateTime::parse_from_rfc3339("2025-11-19T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let (start, end) = period_window(Period::ThisWeek, now, WeekWindow::Rolling).unwrap();
        assert_eq!(end, now);
        assert_eq!(end - start, Duration::days(7));
        assert!(period_window(Period::AllTime, now, WeekWindow::Calendar).is_none());
    }

    #[test]
    fn test_limit_truncates() {
        let inputs = (1..=5)
            .map(|i| input(i, &format!("w{}", i), i * 10, "1", 1, 0))
            .collect();
        let ranked = rank_players(Period::AllTime, inputs, Some(2));
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].player_id, 5);
    }
}
