#![cfg_attr(test, allow(clippy::float_cmp))]

use std::sync::Arc;

use tracing_subscriber::{self, EnvFilter};

use tree_backtest_engine::config::Config;
use tree_backtest_engine::data::cache::InMemoryCache;
use tree_backtest_engine::data::indicator_math::{HttpIndicatorMath, IndicatorMath, LocalIndicatorMath};
use tree_backtest_engine::data::price_fetcher::HttpPriceVendor;
use tree_backtest_engine::engine::driver::Driver;
use tree_backtest_engine::http::router;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env();

    let cache = Arc::new(InMemoryCache::new());

    let vendor = Arc::new(HttpPriceVendor::new(
        config.vendor_base_url.clone().unwrap_or_default(),
        config.vendor_api_token.clone(),
        config.request_timeout,
    ));

    let math: Arc<dyn IndicatorMath> = match &config.math_service_base_url {
        Some(base_url) => {
            tracing::info!(base_url, "using HTTP indicator math service");
            Arc::new(HttpIndicatorMath::new(base_url.clone(), config.request_timeout))
        }
        None => {
            tracing::warn!("MATH_SERVICE_BASE_URL not set, falling back to LocalIndicatorMath (not production numerics)");
            Arc::new(LocalIndicatorMath)
        }
    };

    let driver = Arc::new(Driver::new(cache, vendor, math, &config));
    let app = router(driver);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting backtester HTTP server on {addr}");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, "failed to bind listener");
            std::process::exit(4);
        }
    };

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

    if let Err(err) = result {
        tracing::error!(error = %err, "server exited with error");
        std::process::exit(4);
    }
}
