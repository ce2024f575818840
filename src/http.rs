//! HTTP boundary (A4): the `backtester` binary's `axum` router.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::Instrument;
use uuid::Uuid;

use crate::engine::driver::{BacktestRequest, Driver};
use crate::error::BacktestError;

pub fn router(driver: Arc<Driver>) -> Router {
    Router::new()
        .route("/backtest", post(run_backtest))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(driver)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn run_backtest(
    State(driver): State<Arc<Driver>>,
    Json(request): Json<BacktestRequest>,
) -> Response {
    let today = Utc::now().date_naive();
    let request_id = Uuid::new_v4();
    let span = tracing::info_span!("backtest_request", %request_id);

    // Threaded into the driver so a timeout (and, once the transport
    // exposes it, a client disconnect) cancels in-flight upstream calls
    // rather than letting them run to completion unobserved.
    let cancellation = CancellationToken::new();
    let deadline = cancellation.clone();
    let timeout = driver.request_timeout();
    let timer = tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        deadline.cancel();
    });

    let result = driver
        .run(&request, today, &cancellation)
        .instrument(span)
        .await;
    timer.abort();

    match result {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => error_response(&err),
    }
}

fn error_response(err: &BacktestError) -> Response {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(err.to_payload())).into_response()
}
