use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::services::normalize::NormalizedEvent;

/// A normalised upstream answer, shared between the cache and responses.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedResponse {
    pub events: Vec<NormalizedEvent>,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Arc<NormalizedResponse>,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// TTL cache keyed by the canonical upstream query.
///
/// Entries are never updated in place; a refresh replaces the whole entry.
/// Distinct keys are only bounded by TTL, which [`CacheSweeper`] enforces.
#[derive(Debug)]
pub struct CacheStore {
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl CacheStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get(&self, key: &str) -> Option<Arc<NormalizedResponse>> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone())
    }

    pub async fn put(&self, key: String, value: Arc<NormalizedResponse>) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + self.ttl,
        };
        self.entries.write().await.insert(key, entry);
    }

    /// Drops expired entries, returning how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

pub struct CacheSweeper {
    cache: Arc<CacheStore>,
    interval: Duration,
}

impl CacheSweeper {
    pub fn new(cache: Arc<CacheStore>, interval: Duration) -> Self {
        Self { cache, interval }
    }

    pub fn start(self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = self.cache.purge_expired().await;
                        if removed > 0 {
                            tracing::debug!(removed, "purged expired cache entries");
                        }
                    }
                }
            }
        })
    }
}
