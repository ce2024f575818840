//! Positions and the aggregation/normalization pass applied after execution.

use rustc_hash::FxHashMap;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub ticker: String,
    pub weight: f64,
}

/// Aggregates duplicate tickers by summing weight, then rescales so the
/// total is exactly 100 (unless the input is empty, in which case the
/// empty vec is returned unchanged).
pub fn aggregate_and_normalize(positions: Vec<Position>) -> Vec<Position> {
    if positions.is_empty() {
        return positions;
    }
    let mut by_ticker: FxHashMap<String, f64> = FxHashMap::default();
    let mut order = Vec::new();
    for p in positions {
        if !by_ticker.contains_key(&p.ticker) {
            order.push(p.ticker.clone());
        }
        *by_ticker.entry(p.ticker).or_insert(0.0) += p.weight;
    }
    let total: f64 = by_ticker.values().sum();
    if total <= 0.0 {
        return Vec::new();
    }
    order
        .into_iter()
        .map(|ticker| {
            let weight = by_ticker[&ticker] / total * 100.0;
            Position { ticker, weight }
        })
        .collect()
}
