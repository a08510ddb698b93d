//! TTL-bounded mapping from secret reference to a previously approved value.
//! Eviction is strictly lazy: entries are dropped when an expired lookup
//! would otherwise return them, or when the process restarts (the cache is
//! process-local and never persisted). A non-positive TTL disables the cache
//! entirely so neither `lookup` nor `store` ever touches the map.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct CacheEntry {
    value: String,
    expires_at: Instant,
}

pub struct ValueCache {
    ttl: Option<Duration>,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ValueCache {
    pub fn new(ttl_ms: i64) -> Self {
        let ttl = if ttl_ms > 0 {
            Some(Duration::from_millis(ttl_ms as u64))
        } else {
            None
        };
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.ttl.is_some()
    }

    pub fn lookup(&self, reference: &str) -> Option<String> {
        self.ttl?;
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        match entries.get(reference) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(reference);
                None
            }
            None => None,
        }
    }

    pub fn store(&self, reference: &str, value: String) {
        let Some(ttl) = self.ttl else { return };
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        entries.insert(
            reference.to_string(),
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn len(&self) -> usize {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        let now = Instant::now();
        entries.retain(|_, entry| entry.expires_at > now);
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_when_ttl_not_positive() {
        let cache = ValueCache::new(0);
        assert!(!cache.is_enabled());
        cache.store("op://sec/k/f", "v".into());
        assert_eq!(cache.lookup("op://sec/k/f"), None);

        let cache = ValueCache::new(-5);
        assert!(!cache.is_enabled());
    }

    #[test]
    fn stores_and_returns_value_before_expiry() {
        let cache = ValueCache::new(60_000);
        cache.store("op://sec/k/f", "v".into());
        assert_eq!(cache.lookup("op://sec/k/f"), Some("v".to_string()));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn expired_entry_is_evicted_lazily() {
        let cache = ValueCache::new(1);
        cache.store("op://sec/k/f", "v".into());
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.lookup("op://sec/k/f"), None);
        assert_eq!(cache.len(), 0);
    }
}
