//! Indicator specs, the canonical param-fingerprint, and base warmup table.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// `(ticker, name, params)`. Two specs with the same fingerprint are the
/// same series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndicatorSpec {
    pub ticker: String,
    pub name: String,
    /// Ordered canonically: see `canonical_param_order`.
    pub params: BTreeMap<String, i64>,
}

impl IndicatorSpec {
    pub fn new(ticker: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        let mut spec = Self {
            ticker: ticker.into(),
            name,
            params: BTreeMap::new(),
        };
        spec.apply_defaults();
        spec
    }

    pub fn with_param(mut self, key: impl Into<String>, value: i64) -> Self {
        self.params.insert(key.into(), value);
        self.apply_defaults();
        self
    }

    /// Fills in any parameter the caller omitted with the indicator's
    /// documented default, so the fingerprint is identical whether or not
    /// the caller was explicit.
    fn apply_defaults(&mut self) {
        for (key, default) in default_params(&self.name) {
            self.params.entry(key.to_string()).or_insert(*default);
        }
    }

    /// Dash-joined values in canonical parameter order, e.g. `12-26-9` for
    /// MACD, `20` for RSI. The canonical writer; readers must also accept
    /// the legacy concatenated-integer encoding (see `matches_legacy_key`).
    pub fn fingerprint(&self) -> String {
        canonical_param_order(&self.name)
            .iter()
            .filter_map(|k| self.params.get(*k))
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join("-")
    }

    /// The legacy concatenated-digits encoding this crate's reader must
    /// still accept (e.g. `12269` for MACD 12/26/9), until a purge cycle
    /// has flushed every entry written under the old scheme.
    pub fn legacy_fingerprint(&self) -> String {
        canonical_param_order(&self.name)
            .iter()
            .filter_map(|k| self.params.get(*k))
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn cache_key_prefix(&self) -> String {
        format!("indicator:{}:{}:{}", self.ticker, self.name, self.fingerprint())
    }
}

/// The canonical parameter ordering used by the fingerprint, per indicator.
pub fn canonical_param_order(name: &str) -> &'static [&'static str] {
    match name {
        "MACD" | "PPO" => &["fast", "slow", "signal"],
        "BOLLINGER" => &["period", "stddev"],
        "STOCH_K" => &["fastk", "slowk"],
        "AROON" => &["period"],
        _ => &["period"],
    }
}

/// Defaults honored when the caller omits a parameter (e.g. MACD 12/26/9).
pub fn default_params(name: &str) -> &'static [(&'static str, i64)] {
    match name {
        "RSI" => &[("period", 14)],
        "SMA" | "EMA" => &[("period", 20)],
        "ATR" | "ADX" | "MFI" => &[("period", 14)],
        "MACD" => &[("fast", 12), ("slow", 26), ("signal", 9)],
        "PPO" => &[("fast", 12), ("slow", 26), ("signal", 9)],
        "BOLLINGER" => &[("period", 20), ("stddev", 2)],
        "STOCH_K" => &[("fastk", 14), ("slowk", 3)],
        "AROON" => &[("period", 25)],
        "VOLATILITY" | "RETURN" => &[("period", 20)],
        _ => &[("period", 14)],
    }
}

/// Fixed per-indicator base warmup, before cumulative Sort/Gate/Scale
/// contributions. See the warmup calculator for how this composes.
pub fn base_warmup(spec: &IndicatorSpec) -> i64 {
    let p = |key: &str| *spec.params.get(key).unwrap_or(&0);
    match spec.name.as_str() {
        "RSI" | "SMA" | "EMA" | "ATR" | "ADX" | "MFI" | "VOLATILITY" | "RETURN" => p("period"),
        "MACD" | "PPO" => p("slow") + p("signal"),
        "BOLLINGER" => p("period") + 2,
        "STOCH_K" => p("fastk") + p("slowk"),
        "AROON" => 2 * p("period"),
        _ => p("period"),
    }
}

/// Sparse mapping from date (as an ordinal day index into the simulation
/// grid, assigned by the caller) to a finite value, for one spec.
pub type SeriesByDate = FxHashMap<chrono::NaiveDate, f64>;

/// The full indicator store: composite key -> sparse date map.
#[derive(Debug, Clone, Default)]
pub struct IndicatorSeries {
    pub series: FxHashMap<String, SeriesByDate>,
}

impl IndicatorSeries {
    pub fn key_for(spec: &IndicatorSpec) -> String {
        format!("{}|{}|{}", spec.ticker, spec.name, spec.fingerprint())
    }

    pub fn synthetic_key(sort_id: &str, child_id: &str, spec: &IndicatorSpec) -> String {
        format!(
            "SORT_{sort_id}_{child_id}|{}|{}",
            spec.name,
            spec.fingerprint()
        )
    }

    pub fn insert_value(&mut self, key: &str, date: chrono::NaiveDate, value: f64) {
        if value.is_finite() {
            self.series.entry(key.to_string()).or_default().insert(date, value);
        }
    }

    pub fn get(&self, key: &str, date: chrono::NaiveDate) -> Option<f64> {
        self.series.get(key).and_then(|m| m.get(&date)).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macd_defaults_and_fingerprint() {
        let spec = IndicatorSpec::new("SPY", "MACD");
        assert_eq!(spec.fingerprint(), "12-26-9");
        assert_eq!(spec.legacy_fingerprint(), "12269");
    }

    #[test]
    fn rsi_default_period_is_14() {
        let spec = IndicatorSpec::new("SPY", "RSI");
        assert_eq!(spec.fingerprint(), "14");
        assert_eq!(base_warmup(&spec), 14);
    }

    #[test]
    fn explicit_param_overrides_default() {
        let spec = IndicatorSpec::new("SPY", "RSI").with_param("period", 20);
        assert_eq!(spec.fingerprint(), "20");
    }

    #[test]
    fn fingerprint_round_trips_identically_for_same_params() {
        let a = IndicatorSpec::new("SPY", "MACD").with_param("fast", 12);
        let b = IndicatorSpec::new("SPY", "MACD")
            .with_param("slow", 26)
            .with_param("fast", 12);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn macd_base_warmup_is_slow_plus_signal() {
        let spec = IndicatorSpec::new("SPY", "MACD");
        assert_eq!(base_warmup(&spec), 35);
    }

    #[test]
    fn bollinger_base_warmup_adds_safety_of_two() {
        let spec = IndicatorSpec::new("SPY", "BOLLINGER");
        assert_eq!(base_warmup(&spec), 22);
    }
}
