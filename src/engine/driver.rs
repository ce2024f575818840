//! Simulation driver (C7): orchestrates the whole backtest — fetch,
//! indicator computation, Sort precomputation, the day-by-day loop, and
//! final metrics — and assembles the response the HTTP boundary returns.

use std::sync::Arc;

use chrono::{Days, NaiveDate};
use garde::Validate;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::data::price_fetcher::PriceFetcher;
use crate::data::CacheStore;
use crate::engine::executor::execute_at_date;
use crate::engine::indicator_compute::{IndicatorComputer, IndicatorRequest};
use crate::engine::returns::weighted_return;
use crate::engine::validator::validate;
use crate::engine::warmup::compute_effective_start;
use crate::engine::{metrics, sort_runtime};
use crate::error::{BacktestError, Result};
use crate::model::indicator::IndicatorSpec;
use crate::model::strategy::{ConditionOperand, StrategyElement};
use crate::model::{IndicatorSeries, Position};

const BENCHMARK_TICKER: &str = "SPY";
const WIDE_HISTORY_DAYS: u64 = 3650;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestRequest {
    pub elements: StrategyElement,
    pub start_date: String,
    pub end_date: Option<String>,
    #[serde(default)]
    pub debug: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyPositions {
    pub date: NaiveDate,
    pub positions: Vec<Position>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkReport {
    pub dates: Vec<NaiveDate>,
    pub equity_curve: Vec<f64>,
    pub metrics: metrics::PerformanceMetrics,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartDateAdjustment {
    pub requested_start: NaiveDate,
    pub adjusted_start: NaiveDate,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestResponse {
    pub dates: Vec<NaiveDate>,
    pub equity_curve: Vec<f64>,
    pub benchmark: BenchmarkReport,
    pub metrics: metrics::PerformanceMetrics,
    pub daily_positions: Vec<DailyPositions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date_adjustment: Option<StartDateAdjustment>,
    pub warnings: Vec<String>,
}

pub struct Driver {
    price_fetcher: PriceFetcher,
    indicator_computer: IndicatorComputer,
    request_timeout: std::time::Duration,
}

impl Driver {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        vendor: Arc<dyn crate::data::price_fetcher::PriceVendor>,
        math: Arc<dyn crate::data::indicator_math::IndicatorMath>,
        config: &crate::config::Config,
    ) -> Self {
        Self {
            price_fetcher: PriceFetcher::new(cache.clone(), vendor),
            indicator_computer: IndicatorComputer::new(cache, math, config),
            request_timeout: config.request_timeout,
        }
    }

    /// The deadline the HTTP boundary uses to cancel this request if it
    /// runs too long. Exposed so the handler can schedule the cancellation
    /// without duplicating the configured timeout.
    pub fn request_timeout(&self) -> std::time::Duration {
        self.request_timeout
    }

    pub async fn run(
        &self,
        request: &BacktestRequest,
        today: NaiveDate,
        cancellation: &CancellationToken,
    ) -> Result<BacktestResponse> {
        if let Err(report) = request.elements.validate() {
            return Err(BacktestError::InvalidStrategy(report.to_string()));
        }

        let report = validate(&request.elements);
        if !report.is_valid() {
            let message = report
                .errors
                .iter()
                .map(|e| format!("{}[{}]: {}", e.node_id, e.field, e.message))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(BacktestError::InvalidStrategy(message));
        }
        for warning in &report.warnings {
            warn!(node_id = %warning.node_id, field = %warning.field, "{}", warning.message);
        }

        let end = parse_end_date(request.end_date.as_deref(), today);
        let requested_start = parse_start_date(&request.start_date, end, today);

        let mut tickers = crate::engine::warmup::referenced_tickers(&request.elements);
        if !tickers.iter().any(|t| t == BENCHMARK_TICKER) {
            tickers.push(BENCHMARK_TICKER.to_string());
        }

        let wide_start = today
            .checked_sub_days(Days::new(WIDE_HISTORY_DAYS))
            .unwrap_or(requested_start);
        let fetch_start = wide_start.min(requested_start);
        let prices = self.price_fetcher.fetch(&tickers, fetch_start, end).await?;
        check_cancelled(cancellation)?;

        let breakdown = compute_effective_start(&request.elements, &prices);
        let effective_start = breakdown
            .as_ref()
            .map(|b| b.effective_start)
            .unwrap_or(requested_start);
        let adjusted_start = requested_start.max(effective_start);

        let start_date_adjustment = if adjusted_start != requested_start {
            Some(StartDateAdjustment {
                requested_start,
                adjusted_start,
                reason: breakdown
                    .as_ref()
                    .map(|b| {
                        format!(
                            "warmup requires {} days (culprit: {})",
                            b.warmup_days, b.culprit_element_id
                        )
                    })
                    .unwrap_or_else(|| "insufficient price history".to_string()),
            })
        } else {
            None
        };

        // The full trading-day calendar from whatever was fetched through
        // `end`, unclipped by `adjusted_start`: Sort children need to reach
        // further back than the root's own effective start (§4.6 step 2).
        let full_dates: Vec<NaiveDate> = prices
            .ticker(BENCHMARK_TICKER)
            .map(|s| s.dates().filter(|d| *d <= end).collect())
            .unwrap_or_default();

        let grid: Vec<NaiveDate> = full_dates
            .iter()
            .copied()
            .filter(|d| *d >= adjusted_start)
            .collect();

        if grid.len() < 2 {
            return Err(BacktestError::InsufficientWarmup {
                message: "fewer than 2 valid trading days after warmup".to_string(),
                culprit: breakdown
                    .as_ref()
                    .map(|b| b.culprit_element_id.clone())
                    .unwrap_or_else(|| "root".to_string()),
            });
        }

        let plain_specs = collect_plain_specs(&request.elements);
        let plain_requests: Vec<IndicatorRequest> = plain_specs
            .into_iter()
            .map(|spec| IndicatorRequest {
                dest_key: IndicatorSeries::key_for(&spec),
                spec,
            })
            .collect();
        let mut indicators = self
            .indicator_computer
            .compute_batch(&plain_requests, &prices, today)
            .await;
        check_cancelled(cancellation)?;

        let (prices, sort_indicators, sort_errors, sort_trim_start) =
            sort_runtime::precompute_sort_series(
                &request.elements,
                &full_dates,
                &prices,
                &indicators,
                &self.indicator_computer,
                today,
            )
            .await;
        check_cancelled(cancellation)?;
        for (key, series_by_date) in sort_indicators.series {
            for (date, value) in series_by_date {
                indicators.insert_value(&key, date, value);
            }
        }
        for error in &sort_errors {
            warn!(node_id = %error.node_id, "{}", error.message);
        }

        // After Sort precompute, the grid is trimmed again to the latest
        // first-valid synthetic date across every Sort's own indicator
        // (§4.6): a Sort's indicator has its own warmup on top of each
        // child's, which the pre-precompute `adjusted_start` can't know.
        let grid: Vec<NaiveDate> = match sort_trim_start {
            Some(trim) if trim > adjusted_start => {
                full_dates.into_iter().filter(|d| d >= &trim).collect()
            }
            _ => grid,
        };

        if grid.len() < 2 {
            return Err(BacktestError::InsufficientWarmup {
                message: "fewer than 2 valid trading days after Sort warmup".to_string(),
                culprit: breakdown
                    .map(|b| b.culprit_element_id)
                    .unwrap_or_else(|| "root".to_string()),
            });
        }

        let mut equity = 1.0;
        let mut equity_curve = Vec::with_capacity(grid.len());
        equity_curve.push(equity);

        let spy_first = prices.close(BENCHMARK_TICKER, grid[0]).unwrap_or(1.0);
        let mut benchmark_curve = Vec::with_capacity(grid.len());
        benchmark_curve.push(1.0);

        let mut daily_positions = Vec::with_capacity(grid.len() - 1);
        let mut warnings: Vec<String> = Vec::new();

        for i in 1..grid.len() {
            let decision_date = grid[i - 1];
            let execution_date = grid[i];

            let outcome = execute_at_date(&request.elements, decision_date, &indicators);
            if i == 1 && !outcome.errors.is_empty() {
                let culprit = outcome.errors[0].node_id.clone();
                return Err(BacktestError::InsufficientWarmup {
                    message: outcome.errors[0].message.clone(),
                    culprit,
                });
            }
            for error in &outcome.errors {
                warnings.push(format!("{}: {}", error.node_id, error.message));
            }

            let daily_return = weighted_return(&outcome.positions, &prices, decision_date, execution_date);
            equity *= 1.0 + daily_return;
            equity_curve.push(equity);

            let spy_close = prices.close(BENCHMARK_TICKER, execution_date).unwrap_or(spy_first);
            benchmark_curve.push(if spy_first != 0.0 { spy_close / spy_first } else { 1.0 });

            daily_positions.push(DailyPositions {
                date: execution_date,
                positions: outcome.positions,
            });
        }

        if metrics::is_flat(&benchmark_curve) {
            warnings.push("BenchmarkFlat: SPY variance is zero over the simulated grid".to_string());
        }

        info!(days = grid.len(), adjusted_start = %adjusted_start, "backtest complete");

        let benchmark = BenchmarkReport {
            dates: grid.clone(),
            metrics: metrics::calculate_metrics(&benchmark_curve),
            equity_curve: benchmark_curve,
        };
        let response_metrics = metrics::calculate_metrics(&equity_curve);

        Ok(BacktestResponse {
            dates: grid,
            equity_curve,
            benchmark,
            metrics: response_metrics,
            daily_positions,
            start_date_adjustment,
            warnings,
        })
    }
}

/// Checked after each I/O suspension point (§5): a client disconnect or
/// timeout cancels the token from the HTTP boundary, and the driver bails
/// out here rather than paying for further upstream calls.
fn check_cancelled(cancellation: &CancellationToken) -> Result<()> {
    if cancellation.is_cancelled() {
        return Err(BacktestError::Cancelled);
    }
    Ok(())
}

fn parse_end_date(raw: Option<&str>, today: NaiveDate) -> NaiveDate {
    raw.and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
        .unwrap_or(today)
}

fn parse_start_date(raw: &str, end: NaiveDate, today: NaiveDate) -> NaiveDate {
    if raw == "max" {
        today.checked_sub_days(Days::new(WIDE_HISTORY_DAYS)).unwrap_or(end)
    } else {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").unwrap_or(end)
    }
}

/// Every indicator spec evaluated against a real ticker: `Gate` conditions
/// and `Scale`'s own indicator, recursing through every branch including
/// inside `Sort` children. Excludes a `Sort` node's own indicator, which
/// is only ever evaluated against its synthetic series.
fn collect_plain_specs(el: &StrategyElement) -> Vec<IndicatorSpec> {
    let mut out = Vec::new();
    walk_specs(el, &mut out);
    out
}

fn walk_specs(el: &StrategyElement, out: &mut Vec<IndicatorSpec>) {
    if let StrategyElement::Gate { conditions, .. } = el {
        for condition in conditions {
            out.push(condition.lhs.clone());
            if let ConditionOperand::Indicator(spec) = &condition.rhs {
                out.push(spec.clone());
            }
        }
    }
    if let StrategyElement::Scale { indicator, .. } = el {
        out.push(indicator.clone());
    }
    for child in el.direct_children() {
        walk_specs(child, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::strategy::{Condition, GateMode, Operator, WeightMode};

    #[test]
    fn collect_plain_specs_skips_sort_own_indicator_but_keeps_nested_gate() {
        let gate = StrategyElement::Gate {
            id: "g1".into(),
            weight: 100.0,
            mode: GateMode::If,
            conditions: vec![Condition {
                lhs: IndicatorSpec::new("BND", "RSI"),
                operator: Operator::Gt,
                rhs: ConditionOperand::Value(50.0),
            }],
            then_children: vec![StrategyElement::Ticker {
                id: "t1".into(),
                weight: 100.0,
                symbol: "BND".into(),
            }],
            else_children: vec![],
        };
        let sort = StrategyElement::Sort {
            id: "sort1".into(),
            weight: 100.0,
            indicator: IndicatorSpec::new("_", "RETURN"),
            direction: crate::model::strategy::SortDirection::Top,
            count: 1,
            children: vec![gate],
        };
        let specs = collect_plain_specs(&sort);
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "RSI");
    }

    #[test]
    fn parse_start_date_max_uses_wide_history() {
        let today = NaiveDate::parse_from_str("2024-01-01", "%Y-%m-%d").unwrap();
        let end = today;
        let start = parse_start_date("max", end, today);
        assert!(start < today);
    }

    #[test]
    fn weight_mode_is_reachable_from_driver_module() {
        let _ = WeightMode::Equal;
    }

    struct EmptyVendor;

    #[async_trait::async_trait]
    impl crate::data::price_fetcher::PriceVendor for EmptyVendor {
        async fn fetch_bars(
            &self,
            _tickers: &[String],
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> anyhow::Result<std::collections::HashMap<String, Vec<crate::model::Bar>>> {
            Ok(std::collections::HashMap::new())
        }
    }

    fn test_driver() -> Driver {
        let cache = Arc::new(crate::data::cache::InMemoryCache::new());
        let vendor = Arc::new(EmptyVendor);
        let math = Arc::new(crate::data::indicator_math::LocalIndicatorMath);
        let config = crate::config::Config {
            vendor_base_url: None,
            vendor_api_token: None,
            math_service_base_url: None,
            cache_ttl: std::time::Duration::from_secs(60),
            indicator_concurrency: 8,
            request_timeout: std::time::Duration::from_secs(30),
            port: 8080,
            purge_cron_am: "0 16 * * *".into(),
            purge_cron_pm: "0 20 * * *".into(),
        };
        Driver::new(cache, vendor, math, &config)
    }

    #[tokio::test]
    async fn out_of_range_weight_is_rejected_by_field_validation_before_any_fetch() {
        let driver = test_driver();
        let request = BacktestRequest {
            elements: StrategyElement::Ticker {
                id: "t1".into(),
                weight: 150.0,
                symbol: "SPY".into(),
            },
            start_date: "2024-01-01".to_string(),
            end_date: Some("2024-06-01".to_string()),
            debug: false,
        };
        let today = NaiveDate::parse_from_str("2024-07-01", "%Y-%m-%d").unwrap();
        let err = driver
            .run(&request, today, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BacktestError::InvalidStrategy(_)));
    }

    #[tokio::test]
    async fn pre_cancelled_token_aborts_before_any_fetch() {
        let driver = test_driver();
        let request = BacktestRequest {
            elements: StrategyElement::Ticker {
                id: "t1".into(),
                weight: 100.0,
                symbol: "SPY".into(),
            },
            start_date: "2024-01-01".to_string(),
            end_date: Some("2024-06-01".to_string()),
            debug: false,
        };
        let today = NaiveDate::parse_from_str("2024-07-01", "%Y-%m-%d").unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let err = driver.run(&request, today, &token).await.unwrap_err();
        assert!(matches!(err, BacktestError::Cancelled));
    }
}
