//! Response Cache
//!
//! Time-bounded memoization of predictions and search summaries. Entries
//! older than the TTL read as misses but stay resident until overwritten or
//! cleared; there is no background sweep.

use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Operation prefix for prediction entries
pub const PREDICT_OP: &str = "predict";

/// Operation prefix for search summaries
pub const SEARCH_OP: &str = "search";

/// Trimmed, lower-cased form used for matching and cache keys
pub fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Cache key for `text` under `operation`
pub fn cache_key(operation: &str, text: &str) -> String {
    format!("{}:{}", operation, normalize(text))
}

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    payload: T,
    inserted_at: Instant,
}

/// Concurrent TTL cache; last write wins
#[derive(Debug)]
pub struct ResponseCache<T> {
    entries: DashMap<String, CacheEntry<T>>,
    ttl: Duration,
    enabled: bool,
}

impl<T: Clone> ResponseCache<T> {
    pub fn new(ttl: Duration, enabled: bool) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh payload for `key`, if any
    pub fn get(&self, key: &str) -> Option<T> {
        if !self.enabled {
            return None;
        }

        let entry = self.entries.get(key)?;
        if entry.inserted_at.elapsed() < self.ttl {
            Some(entry.payload.clone())
        } else {
            None
        }
    }

    /// Store `payload`, replacing any previous entry
    pub fn put(&self, key: String, payload: T) {
        if !self.enabled {
            return;
        }

        self.entries.insert(
            key,
            CacheEntry {
                payload,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drop every entry, fresh or stale
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Resident entries, including stale ones
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
