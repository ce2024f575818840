//! Sort runtime (C6): precomputes the synthetic equity series a `Sort`
//! node's own indicator is evaluated against, by running each child
//! subtree standalone across the whole date grid.
//!
//! Processed depth-descending (deepest `Sort` nodes first) so that an
//! outer `Sort` whose child subtree contains a nested `Sort` always sees
//! the inner one's synthetic series already materialized. Sibling `Sort`s
//! at the same depth run concurrently; a single `Sort`'s children are
//! simulated one at a time.

use chrono::NaiveDate;
use futures::future::join_all;

use crate::engine::executor::{execute_at_date, ElementError};
use crate::engine::indicator_compute::{IndicatorComputer, IndicatorRequest};
use crate::engine::returns::weighted_return;
use crate::engine::warmup::compute_effective_start;
use crate::model::indicator::IndicatorSpec;
use crate::model::strategy::StrategyElement;
use crate::model::{Bar, IndicatorSeries, PriceSeries};

/// Precomputes every Sort's synthetic series, then reports the latest
/// first-valid date across all of them (§4.6): the caller re-trims the
/// main simulation grid to this date on top of its own `adjusted_start`,
/// since a Sort's own indicator warmup can only be known once its
/// children's synthetic equity curves exist.
pub async fn precompute_sort_series(
    root: &StrategyElement,
    full_dates: &[NaiveDate],
    prices: &PriceSeries,
    indicators: &IndicatorSeries,
    computer: &IndicatorComputer,
    today: NaiveDate,
) -> (PriceSeries, IndicatorSeries, Vec<ElementError>, Option<NaiveDate>) {
    let mut prices = prices.clone();
    let mut indicators = indicators.clone();
    let mut errors = Vec::new();
    let mut latest_first_valid: Option<NaiveDate> = None;

    for level in sorts_by_depth_descending(root) {
        let futures = level
            .iter()
            .map(|sort| simulate_one_sort(sort, full_dates, &prices, &indicators, computer, today));
        for (new_bars, new_indicators, mut level_errors) in join_all(futures).await {
            for (ticker, bars) in new_bars {
                prices.insert(&ticker, bars);
            }
            for (key, series_by_date) in new_indicators.series {
                if let Some(first) = series_by_date.keys().min().copied() {
                    latest_first_valid =
                        Some(latest_first_valid.map_or(first, |cur| cur.max(first)));
                }
                for (date, value) in series_by_date {
                    indicators.insert_value(&key, date, value);
                }
            }
            errors.append(&mut level_errors);
        }
    }

    (prices, indicators, errors, latest_first_valid)
}

/// The date range a single child is simulated over: widened past the
/// Sort's own grid back to the child's own effective start (§4.6 step 2),
/// so its synthetic equity series has a value at every date the Sort's
/// own indicator might eventually need, including the Sort's parent grid's
/// first date. A leaf ticker has no warmup of its own, so it simply uses
/// the grid it was handed.
fn child_simulation_dates(
    child: &StrategyElement,
    full_dates: &[NaiveDate],
    prices: &PriceSeries,
) -> Vec<NaiveDate> {
    if matches!(child, StrategyElement::Ticker { .. }) {
        return full_dates.to_vec();
    }
    match compute_effective_start(child, prices) {
        Some(breakdown) => full_dates
            .iter()
            .copied()
            .filter(|d| *d >= breakdown.effective_start)
            .collect(),
        None => full_dates.to_vec(),
    }
}

async fn simulate_one_sort(
    sort: &StrategyElement,
    full_dates: &[NaiveDate],
    prices: &PriceSeries,
    indicators: &IndicatorSeries,
    computer: &IndicatorComputer,
    today: NaiveDate,
) -> (Vec<(String, Vec<Bar>)>, IndicatorSeries, Vec<ElementError>) {
    let StrategyElement::Sort {
        id: sort_id,
        indicator,
        children,
        ..
    } = sort
    else {
        return (Vec::new(), IndicatorSeries::default(), Vec::new());
    };

    let mut new_bars = Vec::with_capacity(children.len());
    let mut errors = Vec::new();
    let mut requests = Vec::with_capacity(children.len());
    let mut synthetic_prices = prices.clone();

    for child in children {
        let child_dates = child_simulation_dates(child, full_dates, prices);
        let mut equity = 100.0;
        let mut bars = Vec::with_capacity(child_dates.len());
        for window in child_dates.windows(2) {
            let (from, to) = (window[0], window[1]);
            let outcome = execute_at_date(child, from, indicators);
            errors.extend(outcome.errors);
            let daily_return = weighted_return(&outcome.positions, prices, from, to);
            equity *= 1.0 + daily_return;
            bars.push(Bar {
                date: to,
                o: equity,
                h: equity,
                l: equity,
                c: equity,
                v: 0.0,
            });
        }

        let ticker = synthetic_ticker(sort_id, child.id());
        synthetic_prices.insert(&ticker, bars.clone());
        new_bars.push((ticker.clone(), bars));

        let mut spec = indicator.clone();
        spec.ticker = ticker;
        requests.push(IndicatorRequest {
            dest_key: IndicatorSeries::synthetic_key(sort_id, child.id(), indicator),
            spec,
        });
    }

    let new_indicators = computer
        .compute_batch(&requests, &synthetic_prices, today)
        .await;

    (new_bars, new_indicators, errors)
}

fn synthetic_ticker(sort_id: &str, child_id: &str) -> String {
    format!("SORT_{sort_id}_{child_id}")
}

/// Groups every `Sort` node in the tree by depth, deepest first.
fn sorts_by_depth_descending(root: &StrategyElement) -> Vec<Vec<&StrategyElement>> {
    let mut by_depth: Vec<(usize, &StrategyElement)> = Vec::new();
    collect_sorts(root, 0, &mut by_depth);
    by_depth.sort_by(|a, b| b.0.cmp(&a.0));

    let mut levels: Vec<Vec<&StrategyElement>> = Vec::new();
    let mut current_depth = None;
    for (depth, sort) in by_depth {
        if current_depth != Some(depth) {
            levels.push(Vec::new());
            current_depth = Some(depth);
        }
        levels.last_mut().unwrap().push(sort);
    }
    levels
}

fn collect_sorts<'a>(
    el: &'a StrategyElement,
    depth: usize,
    out: &mut Vec<(usize, &'a StrategyElement)>,
) {
    if matches!(el, StrategyElement::Sort { .. }) {
        out.push((depth, el));
    }
    for child in el.direct_children() {
        collect_sorts(child, depth + 1, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::cache::InMemoryCache;
    use crate::data::indicator_math::LocalIndicatorMath;
    use crate::model::strategy::{SortDirection, WeightMode};
    use std::sync::Arc;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn ticker(id: &str, symbol: &str) -> StrategyElement {
        StrategyElement::Ticker {
            id: id.into(),
            weight: 100.0,
            symbol: symbol.into(),
        }
    }

    fn computer() -> IndicatorComputer {
        let cache = Arc::new(InMemoryCache::new());
        let math = Arc::new(LocalIndicatorMath);
        let config = crate::config::Config {
            vendor_base_url: None,
            vendor_api_token: None,
            math_service_base_url: None,
            cache_ttl: std::time::Duration::from_secs(86_400),
            indicator_concurrency: 8,
            request_timeout: std::time::Duration::from_secs(30),
            port: 8080,
            purge_cron_am: "0 16 * * *".into(),
            purge_cron_pm: "0 20 * * *".into(),
        };
        IndicatorComputer::new(cache, math, &config)
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

    #[tokio::test]
    async fn single_sort_produces_synthetic_series_per_child() {
        let mut prices = PriceSeries::default();
        let dates: Vec<NaiveDate> = (0..10).map(|i| d("2024-01-01") + chrono::Duration::days(i)).collect();
        prices.insert(
            "A",
            dates.iter().enumerate().map(|(i, dt)| bar(*dt, 100.0 + i as f64)).collect(),
        );
        prices.insert(
            "B",
            dates.iter().map(|dt| bar(*dt, 50.0)).collect(),
        );
        let root = StrategyElement::Sort {
            id: "sort1".into(),
            weight: 100.0,
            indicator: IndicatorSpec::new("_", "RETURN").with_param("period", 3),
            direction: SortDirection::Top,
            count: 1,
            children: vec![ticker("a", "A"), ticker("b", "B")],
        };
        let computer = computer();
        let (new_prices, new_indicators, errors, _latest_first_valid) = precompute_sort_series(
            &root,
            &dates,
            &prices,
            &IndicatorSeries::default(),
            &computer,
            d("2024-02-01"),
        )
        .await;
        assert!(errors.is_empty());
        assert!(new_prices.ticker("SORT_sort1_a").is_some());
        assert!(new_prices.ticker("SORT_sort1_b").is_some());
        assert!(!new_indicators.series.is_empty());
    }

    #[test]
    fn depth_descending_orders_nested_sorts_before_outer() {
        let inner = StrategyElement::Sort {
            id: "inner".into(),
            weight: 100.0,
            indicator: IndicatorSpec::new("_", "RETURN"),
            direction: SortDirection::Top,
            count: 1,
            children: vec![ticker("a", "A")],
        };
        let outer = StrategyElement::Weight {
            id: "w".into(),
            weight: 100.0,
            mode: WeightMode::Equal,
            children: vec![
                inner,
                StrategyElement::Sort {
                    id: "outer".into(),
                    weight: 100.0,
                    indicator: IndicatorSpec::new("_", "RETURN"),
                    direction: SortDirection::Top,
                    count: 1,
                    children: vec![ticker("b", "B")],
                },
            ],
        };
        let levels = sorts_by_depth_descending(&outer);
        assert_eq!(levels.len(), 2);
        assert_eq!(levels[0][0].id(), "inner");
        assert_eq!(levels[1][0].id(), "outer");
    }

    #[test]
    fn leaf_ticker_child_uses_the_dates_handed_to_it() {
        let dates: Vec<NaiveDate> = (0..5).map(|i| d("2024-01-10") + chrono::Duration::days(i)).collect();
        let prices = PriceSeries::default();
        let child = ticker("a", "A");
        assert_eq!(child_simulation_dates(&child, &dates, &prices), dates);
    }

    #[test]
    fn gate_child_widens_past_the_narrow_parent_grid_to_its_own_effective_start() {
        use crate::model::strategy::{Condition, ConditionOperand, GateMode, Operator};

        let full_dates: Vec<NaiveDate> =
            (0..60).map(|i| d("2024-01-01") + chrono::Duration::days(i)).collect();
        let mut prices = PriceSeries::default();
        prices.insert(
            "A",
            full_dates.iter().map(|dt| bar(*dt, 100.0)).collect(),
        );
        let gate = StrategyElement::Gate {
            id: "g1".into(),
            weight: 100.0,
            mode: GateMode::If,
            conditions: vec![Condition {
                lhs: IndicatorSpec::new("A", "RSI").with_param("period", 5),
                operator: Operator::Gt,
                rhs: ConditionOperand::Value(50.0),
            }],
            then_children: vec![ticker("a", "A")],
            else_children: vec![],
        };

        // A narrow grid standing in for the Sort's own (already-trimmed)
        // parent window: the Gate's own warmup reaches further back than
        // this, so widening must produce dates before it starts.
        let narrow_dates: Vec<NaiveDate> = full_dates[40..].to_vec();
        let widened = child_simulation_dates(&gate, &narrow_dates, &prices);
        assert!(
            widened[0] < narrow_dates[0],
            "a Gate child with its own warmup must widen past the narrow parent grid"
        );
    }
}
