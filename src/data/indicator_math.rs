//! Thin client to the upstream indicator math service, plus a closed-form
//! local stand-in used only so tests and local development can run without
//! a live service. Production numerics are never computed in-process: the
//! math service is the system of record.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One evaluation request: close (and optionally high/low/volume) aligned
/// chronologically, plus the indicator name and its resolved parameters.
#[derive(Debug, Clone)]
pub struct MathRequest<'a> {
    pub indicator: &'a str,
    pub params: &'a BTreeMap<String, i64>,
    pub close: &'a [f64],
    pub high: Option<&'a [f64]>,
    pub low: Option<&'a [f64]>,
    pub volume: Option<&'a [f64]>,
}

#[async_trait]
pub trait IndicatorMath: Send + Sync {
    /// Returns one entry per input index, aligned one-to-one with the
    /// input dates. Non-finite/`None` means "not yet warmed up".
    async fn compute(&self, req: MathRequest<'_>) -> anyhow::Result<Vec<Option<f64>>>;
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    indicator: &'a str,
    params: &'a BTreeMap<String, i64>,
    close: &'a [f64],
    prices: &'a [f64],
    #[serde(skip_serializing_if = "Option::is_none")]
    high: Option<&'a [f64]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    low: Option<&'a [f64]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    volume: Option<&'a [f64]>,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    values: Vec<Option<f64>>,
}

pub struct HttpIndicatorMath {
    client: reqwest::Client,
    base_url: String,
}

impl HttpIndicatorMath {
    pub fn new(base_url: String, timeout: std::time::Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client, base_url }
    }
}

#[async_trait]
impl IndicatorMath for HttpIndicatorMath {
    async fn compute(&self, req: MathRequest<'_>) -> anyhow::Result<Vec<Option<f64>>> {
        let url = format!("{}/indicator", self.base_url);
        let body = WireRequest {
            indicator: req.indicator,
            params: req.params,
            close: req.close,
            prices: req.close,
            high: req.high,
            low: req.low,
            volume: req.volume,
        };
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let parsed: WireResponse = response.json().await?;
        Ok(parsed.values)
    }
}

/// Hand-rolled textbook formulas. Not the production numerics engine —
/// exists so integration tests and local development don't need a live
/// math service. Front-padded with `None` to stay aligned with the input.
#[derive(Default)]
pub struct LocalIndicatorMath;

#[async_trait]
impl IndicatorMath for LocalIndicatorMath {
    async fn compute(&self, req: MathRequest<'_>) -> anyhow::Result<Vec<Option<f64>>> {
        let p = |key: &str, default: i64| *req.params.get(key).unwrap_or(&default) as usize;
        let _n = req.close.len();
        let values = match req.indicator {
            "SMA" => sma(req.close, p("period", 20)),
            "EMA" => ema(req.close, p("period", 20)),
            "RSI" => rsi(req.close, p("period", 14)),
            "MACD" => macd_hist(req.close, p("fast", 12), p("slow", 26), p("signal", 9)),
            "PPO" => ppo_hist(req.close, p("fast", 12), p("slow", 26), p("signal", 9)),
            "BOLLINGER" => bollinger_pct_b(req.close, p("period", 20), p("stddev", 2) as f64),
            "VOLATILITY" => rolling_stdev(&daily_returns(req.close), p("period", 20)),
            "RETURN" => n_day_return(req.close, p("period", 20)),
            "ATR" => atr(req.high, req.low, req.close, p("period", 14)),
            "ADX" => adx(req.high, req.low, req.close, p("period", 14)),
            "MFI" => mfi(req.high, req.low, req.close, req.volume, p("period", 14)),
            "AROON" => aroon_up(req.high, p("period", 25)),
            "STOCH_K" => stochastic_k(req.high, req.low, req.close, p("fastk", 14)),
            other => anyhow::bail!("unknown indicator: {other}"),
        };
        Ok(values)
    }
}

fn pad_front(values: Vec<f64>, total_len: usize) -> Vec<Option<f64>> {
    let missing = total_len.saturating_sub(values.len());
    let mut out = vec![None; missing];
    out.extend(values.into_iter().map(finite_or_none));
    out
}

fn finite_or_none(v: f64) -> Option<f64> {
    if v.is_finite() {
        Some(v)
    } else {
        None
    }
}

fn sma(close: &[f64], period: usize) -> Vec<Option<f64>> {
    if period == 0 || close.len() < period {
        return vec![None; close.len()];
    }
    let out: Vec<f64> = close
        .windows(period)
        .map(|w| w.iter().sum::<f64>() / period as f64)
        .collect();
    pad_front(out, close.len())
}

fn ema(close: &[f64], period: usize) -> Vec<Option<f64>> {
    if period == 0 || close.len() < period {
        return vec![None; close.len()];
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let seed = close[..period].iter().sum::<f64>() / period as f64;
    let mut out = Vec::with_capacity(close.len() - period + 1);
    out.push(seed);
    for &c in &close[period..] {
        let prev = *out.last().unwrap();
        out.push(alpha * c + (1.0 - alpha) * prev);
    }
    pad_front(out, close.len())
}

fn rsi(close: &[f64], period: usize) -> Vec<Option<f64>> {
    if period == 0 || close.len() <= period {
        return vec![None; close.len()];
    }
    let changes: Vec<f64> = close.windows(2).map(|w| w[1] - w[0]).collect();
    let mut out = Vec::new();
    let mut avg_gain = changes[..period].iter().filter(|c| **c > 0.0).sum::<f64>() / period as f64;
    let mut avg_loss =
        changes[..period].iter().filter(|c| **c < 0.0).map(|c| -c).sum::<f64>() / period as f64;
    let rsi_at = |avg_gain: f64, avg_loss: f64| {
        if avg_loss == 0.0 {
            100.0
        } else {
            let rs = avg_gain / avg_loss;
            100.0 - 100.0 / (1.0 + rs)
        }
    };
    out.push(rsi_at(avg_gain, avg_loss));
    for &change in &changes[period..] {
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
        out.push(rsi_at(avg_gain, avg_loss));
    }
    pad_front(out, close.len())
}

fn ema_raw(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let seed = values[..period].iter().sum::<f64>() / period as f64;
    let mut out = vec![seed];
    for &v in &values[period..] {
        let prev = *out.last().unwrap();
        out.push(alpha * v + (1.0 - alpha) * prev);
    }
    out
}

fn macd_line(close: &[f64], fast: usize, slow: usize) -> Vec<f64> {
    let fast_ema = ema_raw(close, fast);
    let slow_ema = ema_raw(close, slow);
    let offset = slow.saturating_sub(fast);
    if fast_ema.len() <= offset {
        return Vec::new();
    }
    fast_ema[offset..]
        .iter()
        .zip(slow_ema.iter())
        .map(|(f, s)| f - s)
        .collect()
}

fn macd_hist(close: &[f64], fast: usize, slow: usize, signal: usize) -> Vec<Option<f64>> {
    let macd = macd_line(close, fast, slow);
    let sig = ema_raw(&macd, signal);
    if sig.is_empty() {
        return vec![None; close.len()];
    }
    let offset = macd.len() - sig.len();
    let hist: Vec<f64> = macd[offset..]
        .iter()
        .zip(sig.iter())
        .map(|(m, s)| m - s)
        .collect();
    pad_front(hist, close.len())
}

fn ppo_hist(close: &[f64], fast: usize, slow: usize, signal: usize) -> Vec<Option<f64>> {
    let fast_ema = ema_raw(close, fast);
    let slow_ema = ema_raw(close, slow);
    let offset = slow.saturating_sub(fast);
    if fast_ema.len() <= offset || slow_ema.is_empty() {
        return vec![None; close.len()];
    }
    let ppo: Vec<f64> = fast_ema[offset..]
        .iter()
        .zip(slow_ema.iter())
        .map(|(f, s)| if *s != 0.0 { (f - s) / s * 100.0 } else { 0.0 })
        .collect();
    let sig = ema_raw(&ppo, signal);
    if sig.is_empty() {
        return vec![None; close.len()];
    }
    let sig_offset = ppo.len() - sig.len();
    let hist: Vec<f64> = ppo[sig_offset..]
        .iter()
        .zip(sig.iter())
        .map(|(p, s)| p - s)
        .collect();
    pad_front(hist, close.len())
}

fn bollinger_pct_b(close: &[f64], period: usize, stddev_mult: f64) -> Vec<Option<f64>> {
    if period == 0 || close.len() < period {
        return vec![None; close.len()];
    }
    let out: Vec<f64> = close
        .windows(period)
        .map(|w| {
            let mean = w.iter().sum::<f64>() / period as f64;
            let variance = w.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / period as f64;
            let sd = variance.sqrt();
            let upper = mean + stddev_mult * sd;
            let lower = mean - stddev_mult * sd;
            let price = *w.last().unwrap();
            if upper > lower {
                (price - lower) / (upper - lower)
            } else {
                0.5
            }
        })
        .collect();
    pad_front(out, close.len())
}

fn daily_returns(close: &[f64]) -> Vec<f64> {
    close
        .windows(2)
        .map(|w| if w[0] != 0.0 { (w[1] - w[0]) / w[0] } else { 0.0 })
        .collect()
}

fn rolling_stdev(returns: &[f64], period: usize) -> Vec<Option<f64>> {
    if period == 0 || returns.len() < period {
        return vec![None; returns.len() + 1];
    }
    let out: Vec<f64> = returns
        .windows(period)
        .map(|w| {
            let mean = w.iter().sum::<f64>() / period as f64;
            (w.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / period as f64).sqrt()
        })
        .collect();
    pad_front(out, returns.len() + 1)
}

fn n_day_return(close: &[f64], period: usize) -> Vec<Option<f64>> {
    if period == 0 || close.len() <= period {
        return vec![None; close.len()];
    }
    let out: Vec<f64> = close
        .windows(period + 1)
        .map(|w| {
            let first = w[0];
            let last = *w.last().unwrap();
            if first != 0.0 {
                (last - first) / first
            } else {
                0.0
            }
        })
        .collect();
    pad_front(out, close.len())
}

fn atr(
    high: Option<&[f64]>,
    low: Option<&[f64]>,
    close: &[f64],
    period: usize,
) -> Vec<Option<f64>> {
    let (Some(high), Some(low)) = (high, low) else {
        return vec![None; close.len()];
    };
    if period == 0 || close.len() <= period {
        return vec![None; close.len()];
    }
    let mut true_ranges = Vec::with_capacity(close.len() - 1);
    for i in 1..close.len() {
        let tr = (high[i] - low[i])
            .max((high[i] - close[i - 1]).abs())
            .max((low[i] - close[i - 1]).abs());
        true_ranges.push(tr);
    }
    let out = sma_raw(&true_ranges, period);
    pad_front(out, close.len())
}

fn sma_raw(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }
    values
        .windows(period)
        .map(|w| w.iter().sum::<f64>() / period as f64)
        .collect()
}

/// Approximation: average directional movement without the full
/// smoothed +DI/-DI machinery, sufficient for local fixture use.
fn adx(high: Option<&[f64]>, low: Option<&[f64]>, close: &[f64], period: usize) -> Vec<Option<f64>> {
    let (Some(high), Some(low)) = (high, low) else {
        return vec![None; close.len()];
    };
    if period == 0 || close.len() <= period {
        return vec![None; close.len()];
    }
    let mut dx = Vec::with_capacity(close.len() - 1);
    for i in 1..close.len() {
        let up_move = high[i] - high[i - 1];
        let down_move = low[i - 1] - low[i];
        let plus_dm = if up_move > down_move && up_move > 0.0 {
            up_move
        } else {
            0.0
        };
        let minus_dm = if down_move > up_move && down_move > 0.0 {
            down_move
        } else {
            0.0
        };
        let tr = (high[i] - low[i]).max((high[i] - close[i - 1]).abs());
        let denom = plus_dm + minus_dm;
        dx.push(if tr > 0.0 && denom > 0.0 {
            (plus_dm - minus_dm).abs() / denom * 100.0
        } else {
            0.0
        });
    }
    let out = sma_raw(&dx, period);
    pad_front(out, close.len())
}

fn mfi(
    high: Option<&[f64]>,
    low: Option<&[f64]>,
    close: &[f64],
    volume: Option<&[f64]>,
    period: usize,
) -> Vec<Option<f64>> {
    let (Some(high), Some(low), Some(volume)) = (high, low, volume) else {
        return vec![None; close.len()];
    };
    if period == 0 || close.len() <= period {
        return vec![None; close.len()];
    }
    let typical: Vec<f64> = (0..close.len())
        .map(|i| (high[i] + low[i] + close[i]) / 3.0)
        .collect();
    let mut out = Vec::new();
    for w in typical.windows(period + 1) {
        let mut pos_flow = 0.0;
        let mut neg_flow = 0.0;
        for i in 1..w.len() {
            let idx = close.len() - (w.len() - i);
            let flow = w[i] * volume[idx];
            if w[i] > w[i - 1] {
                pos_flow += flow;
            } else if w[i] < w[i - 1] {
                neg_flow += flow;
            }
        }
        let mfi_val = if neg_flow == 0.0 {
            100.0
        } else {
            100.0 - 100.0 / (1.0 + pos_flow / neg_flow)
        };
        out.push(mfi_val);
    }
    pad_front(out, close.len())
}

fn aroon_up(high: Option<&[f64]>, period: usize) -> Vec<Option<f64>> {
    let Some(high) = high else {
        return vec![None; 0];
    };
    if period == 0 || high.len() < period {
        return vec![None; high.len()];
    }
    let out: Vec<f64> = high
        .windows(period + 1)
        .map(|w| {
            let (idx, _) = w
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
                .unwrap();
            (idx as f64 / period as f64) * 100.0
        })
        .collect();
    pad_front(out, high.len())
}

fn stochastic_k(
    high: Option<&[f64]>,
    low: Option<&[f64]>,
    close: &[f64],
    period: usize,
) -> Vec<Option<f64>> {
    let (Some(high), Some(low)) = (high, low) else {
        return vec![None; close.len()];
    };
    if period == 0 || close.len() < period {
        return vec![None; close.len()];
    }
    let out: Vec<f64> = (0..=close.len() - period)
        .map(|start| {
            let end = start + period;
            let window_high = high[start..end].iter().cloned().fold(f64::MIN, f64::max);
            let window_low = low[start..end].iter().cloned().fold(f64::MAX, f64::min);
            let c = close[end - 1];
            if window_high > window_low {
                (c - window_low) / (window_high - window_low) * 100.0
            } else {
                50.0
            }
        })
        .collect();
    pad_front(out, close.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, i64)]) -> BTreeMap<String, i64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[tokio::test]
    async fn sma_warms_up_then_produces_values() {
        let close = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let p = params(&[("period", 3)]);
        let math = LocalIndicatorMath;
        let req = MathRequest {
            indicator: "SMA",
            params: &p,
            close: &close,
            high: None,
            low: None,
            volume: None,
        };
        let values = math.compute(req).await.unwrap();
        assert_eq!(values.len(), 5);
        assert_eq!(values[0], None);
        assert_eq!(values[1], None);
        assert!((values[2].unwrap() - 2.0).abs() < 1e-9);
        assert!((values[4].unwrap() - 4.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn rsi_all_gains_approaches_100() {
        let close: Vec<f64> = (1..=30).map(f64::from).collect();
        let p = params(&[("period", 14)]);
        let math = LocalIndicatorMath;
        let req = MathRequest {
            indicator: "RSI",
            params: &p,
            close: &close,
            high: None,
            low: None,
            volume: None,
        };
        let values = math.compute(req).await.unwrap();
        let last = values.last().unwrap().unwrap();
        assert!(last > 99.0);
    }

    #[tokio::test]
    async fn unknown_indicator_errors() {
        let p = params(&[]);
        let math = LocalIndicatorMath;
        let req = MathRequest {
            indicator: "NONEXISTENT",
            params: &p,
            close: &[1.0, 2.0],
            high: None,
            low: None,
            volume: None,
        };
        assert!(math.compute(req).await.is_err());
    }

    #[test]
    fn macd_hist_values_are_aligned_with_input_length() {
        let close: Vec<f64> = (1..=60).map(f64::from).collect();
        let hist = macd_hist(&close, 12, 26, 9);
        assert_eq!(hist.len(), close.len());
        assert!(hist.last().unwrap().is_some());
    }
}
