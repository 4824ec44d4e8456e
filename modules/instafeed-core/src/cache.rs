//! Process-lifetime snapshot cache keyed by `prefix + username`.
//!
//! Entries are never swept. Freshness is judged when read, so a stale entry
//! stays around as a degraded answer until it is overwritten or cleared.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};

use instafeed_common::FeedSnapshot;

use crate::clock::Clock;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub snapshot: Arc<FeedSnapshot>,
    pub stored_at: DateTime<Utc>,
}

pub struct FeedCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    enabled: AtomicBool,
    clock: Arc<dyn Clock>,
}

impl FeedCache {
    pub fn new(enabled: bool, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            enabled: AtomicBool::new(enabled),
            clock,
        }
    }

    /// Runtime switch. While disabled the cache behaves as permanently empty;
    /// entries stored earlier stay put and reappear when re-enabled.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        if !self.is_enabled() {
            return None;
        }
        self.entries
            .read()
            .expect("feed cache lock poisoned")
            .get(key)
            .cloned()
    }

    pub fn put(&self, key: &str, snapshot: Arc<FeedSnapshot>) {
        if !self.is_enabled() {
            return;
        }
        let entry = CacheEntry {
            key: key.to_string(),
            snapshot,
            stored_at: self.clock.now(),
        };
        self.entries
            .write()
            .expect("feed cache lock poisoned")
            .insert(key.to_string(), entry);
    }

    pub fn is_fresh(&self, key: &str, max_age: Duration) -> bool {
        self.get_fresh(key, max_age).is_some()
    }

    /// The entry for `key` if it is younger than `max_age`.
    pub fn get_fresh(&self, key: &str, max_age: Duration) -> Option<CacheEntry> {
        let entry = self.get(key)?;
        let age = self.clock.now().signed_duration_since(entry.stored_at);
        // A clock that went backwards yields a negative age, which counts as fresh.
        let fresh = match age.to_std() {
            Ok(age) => age < max_age,
            Err(_) => true,
        };
        fresh.then_some(entry)
    }

    pub fn clear(&self) {
        self.entries.write().expect("feed cache lock poisoned").clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("feed cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
