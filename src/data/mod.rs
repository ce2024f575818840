pub mod cache;
pub mod indicator_math;
pub mod price_fetcher;

use std::time::Duration;

use async_trait::async_trait;

/// Key/value store with TTL, batch get/put, bulk purge. Observable side
/// effects only through these operations. On a transient backend outage
/// the whole cache is treated as unavailable: `get`/`mget` return empty,
/// `set`/`mset` are no-ops returning false. This must never fail the
/// caller — every component has a fallback path through recomputation.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> bool;
    async fn mget(&self, keys: &[String]) -> Vec<Option<String>>;
    async fn mset(&self, items: &[(String, String, Option<Duration>)]) -> bool;
    async fn del(&self, key: &str) -> bool;
    async fn flush_all(&self) -> bool;
    fn stats(&self) -> CacheStats;
    /// Whether the backend answered the most recent operation. Enables
    /// deterministic tests without a running cache.
    fn available(&self) -> bool;
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}
