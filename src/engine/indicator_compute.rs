//! Indicator computer (C3 orchestration): cache-through batch evaluation
//! across many specs, bounded concurrency, dual-read fingerprint lookup.

use std::sync::Arc;

use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use tracing::warn;

use crate::config::Config;
use crate::data::indicator_math::{IndicatorMath, MathRequest};
use crate::data::price_fetcher::is_cache_eligible;
use crate::data::CacheStore;
use crate::model::indicator::IndicatorSpec;
use crate::model::{IndicatorSeries, PriceSeries};

/// One unit of work: compute `spec` against its ticker's price history and
/// store the result in the output series under `dest_key` (which may be a
/// plain `ticker|name|fingerprint` key or a `SORT_<id>_<child>|...` one).
#[derive(Debug, Clone)]
pub struct IndicatorRequest {
    pub dest_key: String,
    pub spec: IndicatorSpec,
}

pub struct IndicatorComputer {
    cache: Arc<dyn CacheStore>,
    math: Arc<dyn IndicatorMath>,
    concurrency: usize,
    cache_ttl: std::time::Duration,
}

impl IndicatorComputer {
    pub fn new(cache: Arc<dyn CacheStore>, math: Arc<dyn IndicatorMath>, config: &Config) -> Self {
        Self {
            cache,
            math,
            concurrency: config.indicator_concurrency,
            cache_ttl: config.cache_ttl,
        }
    }

    /// Computes every request against `prices`, fanning out with bounded
    /// concurrency. A spec whose math call fails is logged and simply
    /// contributes no entries — it never aborts the batch.
    pub async fn compute_batch(
        &self,
        requests: &[IndicatorRequest],
        prices: &PriceSeries,
        today: NaiveDate,
    ) -> IndicatorSeries {
        let results = stream::iter(requests.iter().cloned())
            .map(|req| {
                let prices = prices.clone();
                async move { (req.dest_key.clone(), self.compute_one(&req, &prices, today).await) }
            })
            .buffer_unordered(self.concurrency)
            .collect::<Vec<_>>()
            .await;

        let mut out = IndicatorSeries::default();
        for (dest_key, outcome) in results {
            match outcome {
                Ok(values) => {
                    for (date, value) in values {
                        out.insert_value(&dest_key, date, value);
                    }
                }
                Err(message) => warn!(key = %dest_key, error = %message, "indicator compute failed"),
            }
        }
        out
    }

    async fn compute_one(
        &self,
        req: &IndicatorRequest,
        prices: &PriceSeries,
        today: NaiveDate,
    ) -> Result<Vec<(NaiveDate, f64)>, String> {
        let Some(series) = prices.ticker(&req.spec.ticker) else {
            return Ok(Vec::new());
        };
        let dates: Vec<NaiveDate> = series.dates().collect();
        if dates.is_empty() {
            return Ok(Vec::new());
        }

        let cache_key = req.spec.cache_key_prefix();
        let legacy_key = format!(
            "indicator:{}:{}:{}",
            req.spec.ticker,
            req.spec.name,
            req.spec.legacy_fingerprint()
        );
        let cached = match self.cache.get(&cache_key).await {
            Some(raw) => decode_blob(&raw),
            None => match self.cache.get(&legacy_key).await {
                Some(raw) => decode_blob(&raw),
                None => Vec::new(),
            },
        };
        let cached: std::collections::HashMap<NaiveDate, f64> = cached.into_iter().collect();

        let fully_covered = dates.iter().all(|d| cached.contains_key(d));
        let computed: Vec<(NaiveDate, f64)> = if fully_covered {
            dates.iter().map(|d| (*d, cached[d])).collect()
        } else {
            let closes = series.closes_in_order();
            let req_body = MathRequest {
                indicator: &req.spec.name,
                params: &req.spec.params,
                close: &closes,
                high: None,
                low: None,
                volume: None,
            };
            let values = self
                .math
                .compute(req_body)
                .await
                .map_err(|e| e.to_string())?;
            dates
                .iter()
                .zip(values)
                .filter_map(|(d, v)| v.map(|v| (*d, v)))
                .collect()
        };

        if !fully_covered {
            let to_cache: Vec<(NaiveDate, f64)> = computed
                .iter()
                .filter(|(d, _)| is_cache_eligible(*d, today))
                .copied()
                .collect();
            if !to_cache.is_empty() {
                if let Ok(json) = serde_json::to_string(&to_cache) {
                    self.cache
                        .mset(&[(cache_key, json, Some(self.cache_ttl))])
                        .await;
                }
            }
        }

        Ok(computed)
    }
}

fn decode_blob(raw: &str) -> Vec<(NaiveDate, f64)> {
    serde_json::from_str(raw).unwrap_or_default()
}
