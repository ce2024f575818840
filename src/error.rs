//! Domain error taxonomy surfaced to callers, plus the structured payload shape.

use serde::Serialize;
use thiserror::Error;

/// The kinds a caller can match on. Mirrors the disposition table: some abort
/// the whole request, some degrade silently, some are warnings only.
#[derive(Error, Debug)]
pub enum BacktestError {
    #[error("strategy tree failed validation: {0}")]
    InvalidStrategy(String),

    #[error("upstream price vendor call failed: {0}")]
    UpstreamFetchFailed(String),

    #[error("indicator math service failed for spec {spec}: {message}")]
    IndicatorComputeFailed { spec: String, message: String },

    #[error("required indicator missing on decision date for element {node_id}: {indicator}")]
    MissingIndicator { node_id: String, indicator: String },

    #[error("insufficient warmup: {message} (culprit: {culprit})")]
    InsufficientWarmup { message: String, culprit: String },

    #[error("cache backend unavailable, degrading to direct fetch")]
    CacheUnavailable,

    #[error("request cancelled")]
    Cancelled,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl BacktestError {
    /// The surfaced kind string, stable for API consumers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidStrategy(_) => "InvalidStrategy",
            Self::UpstreamFetchFailed(_) => "UpstreamFetchFailed",
            Self::IndicatorComputeFailed { .. } => "IndicatorComputeFailed",
            Self::MissingIndicator { .. } => "MissingIndicator",
            Self::InsufficientWarmup { .. } => "InsufficientWarmup",
            Self::CacheUnavailable => "CacheUnavailable",
            Self::Cancelled => "Cancelled",
            Self::Internal(_) => "Internal",
        }
    }

    /// The tree node responsible, when the error can be pinned to one.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::MissingIndicator { node_id, .. } => Some(node_id),
            Self::InsufficientWarmup { culprit, .. } => Some(culprit),
            _ => None,
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidStrategy(_) => 400,
            Self::InsufficientWarmup { .. } => 422,
            Self::UpstreamFetchFailed(_) => 502,
            Self::Cancelled => 499,
            Self::IndicatorComputeFailed { .. }
            | Self::MissingIndicator { .. }
            | Self::CacheUnavailable
            | Self::Internal(_) => 500,
        }
    }

    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            code: self.code(),
            message: self.to_string(),
            node_id: self.node_id().map(str::to_owned),
        }
    }
}

/// The wire shape for an error response, matching "structured payload with
/// code, human message, and optionally the culprit tree node id".
#[derive(Debug, Serialize)]
pub struct ErrorPayload {
    pub code: &'static str,
    pub message: String,
    pub node_id: Option<String>,
}

pub type Result<T> = std::result::Result<T, BacktestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(BacktestError::CacheUnavailable.code(), "CacheUnavailable");
        assert_eq!(
            BacktestError::InvalidStrategy("bad".into()).code(),
            "InvalidStrategy"
        );
    }

    #[test]
    fn missing_indicator_carries_node_id() {
        let e = BacktestError::MissingIndicator {
            node_id: "gate-1".into(),
            indicator: "RSI".into(),
        };
        assert_eq!(e.node_id(), Some("gate-1"));
        assert_eq!(e.http_status(), 500);
    }

    #[test]
    fn cancelled_status_is_499() {
        assert_eq!(BacktestError::Cancelled.http_status(), 499);
        assert_eq!(BacktestError::Cancelled.code(), "Cancelled");
    }

    #[test]
    fn insufficient_warmup_status_is_422() {
        let e = BacktestError::InsufficientWarmup {
            message: "not enough data".into(),
            culprit: "sort-1".into(),
        };
        assert_eq!(e.http_status(), 422);
        assert_eq!(e.node_id(), Some("sort-1"));
    }
}
