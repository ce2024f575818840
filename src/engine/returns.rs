//! Shared day-over-day return math used by both the simulation driver and
//! the Sort runtime's standalone child simulations.

use chrono::NaiveDate;

use crate::model::{Position, PriceSeries};

/// Weighted close-to-close return of `positions` (weights on a 0-100
/// scale) from `from` to `to`. A ticker missing either close is excluded
/// from both the numerator and the weight base, so a single stale ticker
/// doesn't zero out the whole day.
pub fn weighted_return(
    positions: &[Position],
    prices: &PriceSeries,
    from: NaiveDate,
    to: NaiveDate,
) -> f64 {
    let mut weighted_sum = 0.0;
    let mut weight_base = 0.0;
    for position in positions {
        let (Some(prior), Some(current)) = (
            prices.close(&position.ticker, from),
            prices.close(&position.ticker, to),
        ) else {
            continue;
        };
        if prior == 0.0 {
            continue;
        }
        let daily_return = (current - prior) / prior;
        weighted_sum += daily_return * position.weight;
        weight_base += position.weight;
    }
    if weight_base == 0.0 {
        0.0
    } else {
        weighted_sum / weight_base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Bar;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn bar(date: NaiveDate, c: f64) -> Bar {
        Bar {
            date,
            o: c,
            h: c,
            l: c,
            c,
            v: 100.0,
        }
    }

    #[test]
    fn equal_weight_blend_of_two_tickers() {
        let mut prices = PriceSeries::default();
        prices.insert("A", vec![bar(d("2024-01-01"), 100.0), bar(d("2024-01-02"), 110.0)]);
        prices.insert("B", vec![bar(d("2024-01-01"), 50.0), bar(d("2024-01-02"), 45.0)]);
        let positions = vec![
            Position {
                ticker: "A".into(),
                weight: 50.0,
            },
            Position {
                ticker: "B".into(),
                weight: 50.0,
            },
        ];
        let r = weighted_return(&positions, &prices, d("2024-01-01"), d("2024-01-02"));
        assert!((r - (0.10 - 0.10) / 2.0).abs() < 1e-9);
    }

    #[test]
    fn missing_close_excludes_ticker_instead_of_zeroing_day() {
        let mut prices = PriceSeries::default();
        prices.insert("A", vec![bar(d("2024-01-01"), 100.0), bar(d("2024-01-02"), 110.0)]);
        let positions = vec![
            Position {
                ticker: "A".into(),
                weight: 50.0,
            },
            Position {
                ticker: "MISSING".into(),
                weight: 50.0,
            },
        ];
        let r = weighted_return(&positions, &prices, d("2024-01-01"), d("2024-01-02"));
        assert!((r - 0.10).abs() < 1e-9);
    }
}
