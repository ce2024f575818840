//! Process-wide configuration, loaded once from the environment.

use std::env;
use std::time::Duration;

/// Settings for vendor/math-service clients, cache behavior, and the HTTP
/// boundary. Read once at startup; nothing in this crate re-reads the
/// environment mid-request.
#[derive(Debug, Clone)]
pub struct Config {
    pub vendor_base_url: Option<String>,
    pub vendor_api_token: Option<String>,
    pub math_service_base_url: Option<String>,
    pub cache_ttl: Duration,
    pub indicator_concurrency: usize,
    pub request_timeout: Duration,
    pub port: u16,
    pub purge_cron_am: String,
    pub purge_cron_pm: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            vendor_base_url: env::var("VENDOR_BASE_URL").ok(),
            vendor_api_token: env::var("VENDOR_API_TOKEN").ok(),
            math_service_base_url: env::var("MATH_SERVICE_BASE_URL").ok(),
            cache_ttl: Duration::from_secs(env_u64("CACHE_TTL_SECONDS", 86_400)),
            indicator_concurrency: env_usize("INDICATOR_CONCURRENCY", 16).clamp(8, 32),
            request_timeout: Duration::from_secs(env_u64("REQUEST_TIMEOUT_SECONDS", 30)),
            port: env_u64("PORT", 8080) as u16,
            purge_cron_am: env::var("PURGE_CRON_AM").unwrap_or_else(|_| "0 16 * * *".to_string()),
            purge_cron_pm: env::var("PURGE_CRON_PM").unwrap_or_else(|_| "0 20 * * *".to_string()),
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_env() {
        let cfg = Config {
            vendor_base_url: None,
            vendor_api_token: None,
            math_service_base_url: None,
            cache_ttl: Duration::from_secs(86_400),
            indicator_concurrency: 16,
            request_timeout: Duration::from_secs(30),
            port: 8080,
            purge_cron_am: "0 16 * * *".into(),
            purge_cron_pm: "0 20 * * *".into(),
        };
        assert_eq!(cfg.indicator_concurrency, 16);
        assert_eq!(cfg.port, 8080);
    }

    #[test]
    fn concurrency_is_clamped_into_range() {
        assert_eq!(env_usize("NONEXISTENT_CONCURRENCY_KEY", 4).clamp(8, 32), 8);
        assert_eq!(
            env_usize("NONEXISTENT_CONCURRENCY_KEY", 100).clamp(8, 32),
            32
        );
    }
}
