use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::fetch::Quote;
use crate::utils::time::Clock;

#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub inserted_at_ms: i64,
}

/// In-memory TTL cache keyed by normalized symbol.
pub struct TtlCache<V: Clone> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    ttl_ms: i64,
    clock: Arc<dyn Clock>,
}

pub type QuoteCache = TtlCache<Quote>;

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl_ms: i64, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl_ms,
            clock,
        }
    }

    pub fn ttl_ms(&self) -> i64 {
        self.ttl_ms
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_fresh(&self, entry: &CacheEntry<V>, now_ms: i64) -> bool {
        now_ms - entry.inserted_at_ms < self.ttl_ms
    }

    /// Value under `key` if it was inserted less than one TTL ago.
    pub fn get(&self, key: &str) -> Option<V> {
        let now_ms = self.clock.now_ms();
        self.entries()
            .get(key)
            .filter(|entry| self.is_fresh(entry, now_ms))
            .map(|entry| entry.value.clone())
    }

    pub fn insert(&self, key: impl Into<String>, value: V) {
        let inserted_at_ms = self.clock.now_ms();
        self.entries().insert(
            key.into(),
            CacheEntry {
                value,
                inserted_at_ms,
            },
        );
    }

    /// Write one value under every key in `keys`, skipping empties and duplicates.
    pub fn insert_many<I, K>(&self, keys: I, value: V)
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let inserted_at_ms = self.clock.now_ms();
        let mut entries = self.entries();
        for key in keys {
            let key = key.into();
            if key.is_empty() {
                continue;
            }
            entries.insert(
                key,
                CacheEntry {
                    value: value.clone(),
                    inserted_at_ms,
                },
            );
        }
    }

    /// Drop expired entries and return how many were removed.
    pub fn clear_expired(&self) -> usize {
        let now_ms = self.clock.now_ms();
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, entry| now_ms - entry.inserted_at_ms < self.ttl_ms);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::time::ManualClock;

    #[test]
    fn entries_expire_after_ttl() {
        let clock = Arc::new(ManualClock::new(0));
        let cache: TtlCache<u32> = TtlCache::new(5_000, clock.clone());
        cache.insert("AAPL", 1);

        clock.advance_ms(4_999);
        assert_eq!(cache.get("AAPL"), Some(1));

        clock.advance_ms(1);
        assert_eq!(cache.get("AAPL"), None);
        assert_eq!(cache.len(), 1);

        assert_eq!(cache.clear_expired(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn insert_many_fans_out_under_aliases() {
        let clock = Arc::new(ManualClock::new(0));
        let cache: TtlCache<&str> = TtlCache::new(1_000, clock);
        cache.insert_many(["MP", "FVAC", "MP_US_EQ", ""], "quote");

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get("FVAC"), Some("quote"));
        assert_eq!(cache.get("MP_US_EQ"), Some("quote"));
    }
}
