//! In-process, dependency-injectable cache backend. A production
//! deployment could swap in a networked store (Redis et al.) behind the
//! same `CacheStore` trait without touching a caller.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{CacheStats, CacheStore};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self) -> bool {
        match self.expires_at {
            Some(at) => Instant::now() < at,
            None => true,
        }
    }
}

/// A `DashMap`-backed cache: durable across requests, but not across a
/// `flush_all` purge. Never fails the caller — when forced into a
/// degraded state (`set_available(false)`, used by tests exercising the
/// `CacheUnavailable` path) every read/write becomes a no-op.
pub struct InMemoryCache {
    entries: DashMap<String, Entry>,
    hits: AtomicU64,
    misses: AtomicU64,
    available: AtomicBool,
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            available: AtomicBool::new(true),
        }
    }

    /// Force the degraded-backend path, matching the `CacheUnavailable`
    /// disposition: "the whole cache is treated as unavailable".
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        if !self.available() {
            return None;
        }
        match self.entries.get(key) {
            Some(entry) if entry.is_live() => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> bool {
        if !self.available() {
            return false;
        }
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
        true
    }

    async fn mget(&self, keys: &[String]) -> Vec<Option<String>> {
        if !self.available() {
            return vec![None; keys.len()];
        }
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            out.push(self.get(key).await);
        }
        out
    }

    async fn mset(&self, items: &[(String, String, Option<Duration>)]) -> bool {
        if !self.available() {
            return false;
        }
        for (key, value, ttl) in items {
            self.set(key, value, *ttl).await;
        }
        true
    }

    async fn del(&self, key: &str) -> bool {
        if !self.available() {
            return false;
        }
        self.entries.remove(key).is_some()
    }

    async fn flush_all(&self) -> bool {
        if !self.available() {
            return false;
        }
        self.entries.clear();
        true
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}
