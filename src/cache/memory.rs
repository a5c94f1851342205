use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{CacheError, CachedGeneration, ResponseCache};

#[derive(Clone)]
struct CacheEntry {
    payload: String,
    expires_at: Instant,
}

/// Writes between two full sweeps of expired entries.
const SWEEP_EVERY: usize = 64;

/// In-process TTL map. Expired entries are evicted when read, and every
/// `SWEEP_EVERY` writes the whole map is swept so keys that are never read
/// again do not accumulate.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
    writes: AtomicUsize,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn sweep_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
    }
}

#[async_trait]
impl ResponseCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<CachedGeneration>, CacheError> {
        let now = Instant::now();
        if self
            .entries
            .remove_if(key, |_, entry| entry.expires_at <= now)
            .is_some()
        {
            return Ok(None);
        }

        let Some(payload) = self.entries.get(key).map(|entry| entry.payload.clone()) else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&payload)?))
    }

    async fn put(
        &self,
        key: &str,
        value: &CachedGeneration,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let payload = serde_json::to_string(value)?;
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                payload,
                expires_at: Instant::now() + ttl,
            },
        );
        if self.writes.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.sweep_expired();
        }
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
