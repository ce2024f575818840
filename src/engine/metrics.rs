//! Equity-curve performance metrics (C7 tail): CAGR, annualized volatility,
//! Sharpe, Sortino, max drawdown. Risk-free rate is always zero.

use serde::Serialize;

const TRADING_DAYS_PER_YEAR: f64 = 252.0;

#[derive(Debug, Clone, Copy, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub total_return: f64,
    pub cagr: f64,
    pub annualized_volatility: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub max_drawdown: f64,
}

/// `equity_curve` is normalized so its first point is the starting value
/// (not necessarily 1.0 — the benchmark curve starts at the SPY close on
/// the first grid date). Requires at least two points; a shorter curve
/// yields all-zero metrics rather than panicking.
pub fn calculate_metrics(equity_curve: &[f64]) -> PerformanceMetrics {
    if equity_curve.len() < 2 {
        return PerformanceMetrics::default();
    }

    let daily_returns: Vec<f64> = equity_curve
        .windows(2)
        .map(|w| if w[0] != 0.0 { (w[1] - w[0]) / w[0] } else { 0.0 })
        .collect();

    let first = equity_curve[0];
    let last = *equity_curve.last().unwrap();
    let total_return = if first != 0.0 { (last - first) / first } else { 0.0 };

    #[allow(clippy::cast_precision_loss)]
    let n = daily_returns.len() as f64;
    let cagr = if n > 0.0 {
        (1.0 + total_return).powf(TRADING_DAYS_PER_YEAR / n) - 1.0
    } else {
        0.0
    };

    let annualized_volatility = std_dev(&daily_returns) * TRADING_DAYS_PER_YEAR.sqrt();
    let sharpe = if annualized_volatility > 0.0 {
        cagr / annualized_volatility
    } else {
        0.0
    };

    let negative_returns: Vec<f64> = daily_returns.iter().filter(|r| **r < 0.0).copied().collect();
    let downside_volatility = std_dev(&negative_returns) * TRADING_DAYS_PER_YEAR.sqrt();
    let sortino = if downside_volatility > 0.0 {
        cagr / downside_volatility
    } else {
        0.0
    };

    let max_drawdown = calculate_max_drawdown(equity_curve);

    PerformanceMetrics {
        total_return,
        cagr,
        annualized_volatility,
        sharpe,
        sortino,
        max_drawdown,
    }
}

/// Sample standard deviation (n-1). Zero for fewer than two points.
#[allow(clippy::cast_precision_loss)]
fn std_dev(data: &[f64]) -> f64 {
    if data.len() < 2 {
        return 0.0;
    }
    let mean = data.iter().sum::<f64>() / data.len() as f64;
    let variance = data.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (data.len() - 1) as f64;
    variance.sqrt()
}

fn calculate_max_drawdown(equity_curve: &[f64]) -> f64 {
    let mut peak = equity_curve[0];
    let mut max_dd = 0.0;
    for &value in equity_curve {
        if value > peak {
            peak = value;
        }
        if peak > 0.0 {
            let dd = (peak - value) / peak;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }
    max_dd
}

/// True if the curve's daily returns have zero variance — the
/// `BenchmarkFlat` regression guard, a warning rather than a hard failure.
pub fn is_flat(equity_curve: &[f64]) -> bool {
    if equity_curve.len() < 2 {
        return true;
    }
    let daily_returns: Vec<f64> = equity_curve
        .windows(2)
        .map(|w| if w[0] != 0.0 { (w[1] - w[0]) / w[0] } else { 0.0 })
        .collect();
    std_dev(&daily_returns) == 0.0
}
