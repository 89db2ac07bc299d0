//! # Local LRU
//!
//! The replica's own share of the cache: an LRU keyed by string, bounded by
//! the total weight (bytes) of its values rather than by entry count, and
//! aging entries out after a maximum age.
//!
//! Expired entries are dropped lazily, when they are loaded.

use lru::LruCache;
use std::time::{Duration, Instant};

/// Default bound on the total weight of a local cache.
pub const DEFAULT_MAX_WEIGHT: usize = 32 * 1024 * 1024;

/// Default age after which an element is no longer served.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(60 * 60);

#[derive(Clone, Debug)]
struct Element {
    value: Vec<u8>,
    stored_at: Instant,
}

/// Weight-bounded LRU with aging.
pub struct LocalCache {
    entries: LruCache<String, Element>,
    weight: usize,
    max_weight: usize,
    max_age: Duration,
}

impl LocalCache {
    pub fn new(max_weight: usize, max_age: Duration) -> Self {
        Self {
            entries: LruCache::unbounded(),
            weight: 0,
            max_weight,
            max_age,
        }
    }

    /// Store `value` under `key` as the most recently used element,
    /// evicting least recently used elements until the weight fits.
    ///
    /// A value heavier than the whole cache is not stored.
    pub fn store(&mut self, key: &str, value: Vec<u8>) -> bool {
        self.store_at(key, value, Instant::now())
    }

    pub(crate) fn store_at(&mut self, key: &str, value: Vec<u8>, now: Instant) -> bool {
        self.delete(key);
        if value.len() > self.max_weight {
            return false;
        }
        self.weight += value.len();
        self.entries.put(key.to_string(), Element { value, stored_at: now });
        self.evict();
        true
    }

    /// Load the value of `key`. With `bump` the element becomes the most
    /// recently used one.
    pub fn load(&mut self, key: &str, bump: bool) -> Option<Vec<u8>> {
        self.load_at(key, bump, Instant::now())
    }

    pub(crate) fn load_at(&mut self, key: &str, bump: bool, now: Instant) -> Option<Vec<u8>> {
        let stored_at = self.entries.peek(key)?.stored_at;
        if now.saturating_duration_since(stored_at) > self.max_age {
            self.delete(key);
            return None;
        }
        let element = if bump {
            self.entries.get(key)
        } else {
            self.entries.peek(key)
        };
        element.map(|e| e.value.clone())
    }

    pub fn delete(&mut self, key: &str) -> bool {
        match self.entries.pop(key) {
            Some(element) => {
                self.weight -= element.value.len();
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.weight = 0;
    }

    /// Snapshot of all elements, most recently used first.
    pub fn elements(&self) -> Vec<(String, Vec<u8>)> {
        self.entries
            .iter()
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total length of the stored values.
    pub fn weight(&self) -> usize {
        self.weight
    }

    pub fn max_weight(&self) -> usize {
        self.max_weight
    }

    /// Change the weight bound, evicting right away if it shrank.
    pub fn set_max_weight(&mut self, max_weight: usize) {
        self.max_weight = max_weight;
        self.evict();
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub fn set_max_age(&mut self, max_age: Duration) {
        self.max_age = max_age;
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            weight: self.weight,
            max_weight: self.max_weight,
        }
    }

    fn evict(&mut self) {
        while self.weight > self.max_weight {
            match self.entries.pop_lru() {
                Some((_, element)) => self.weight -= element.value.len(),
                None => break,
            }
        }
    }
}

impl Default for LocalCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_WEIGHT, DEFAULT_MAX_AGE)
    }
}

/// Cache statistics for monitoring.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub weight: usize,
    pub max_weight: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_and_load() {
        let mut cache = LocalCache::default();
        assert!(cache.store("a", b"alpha".to_vec()));
        assert_eq!(cache.load("a", true), Some(b"alpha".to_vec()));
        assert_eq!(cache.weight(), 5);
        assert!(cache.load("b", true).is_none());
    }

    #[test]
    fn test_overwrite_adjusts_weight() {
        let mut cache = LocalCache::default();
        cache.store("a", vec![0; 10]);
        cache.store("a", vec![0; 4]);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.weight(), 4);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let mut cache = LocalCache::new(30, DEFAULT_MAX_AGE);
        cache.store("a", vec![1; 10]);
        cache.store("b", vec![2; 10]);
        cache.store("c", vec![3; 10]);
        // Touch "a" so that "b" is the oldest
        assert!(cache.load("a", true).is_some());
        cache.store("d", vec![4; 10]);

        assert!(cache.load("b", false).is_none());
        assert!(cache.load("a", false).is_some());
        assert_eq!(cache.weight(), 30);
    }

    #[test]
    fn test_load_without_bump_keeps_order() {
        let mut cache = LocalCache::new(20, DEFAULT_MAX_AGE);
        cache.store("a", vec![1; 10]);
        cache.store("b", vec![2; 10]);
        assert!(cache.load("a", false).is_some());
        cache.store("c", vec![3; 10]);

        assert!(cache.load("a", false).is_none());
        assert!(cache.load("b", false).is_some());
    }

    #[test]
    fn test_oversize_value_rejected() {
        let mut cache = LocalCache::new(8, DEFAULT_MAX_AGE);
        cache.store("a", vec![1; 4]);
        assert!(!cache.store("big", vec![0; 9]));
        assert!(cache.load("big", false).is_none());
        assert_eq!(cache.weight(), 4);
    }

    #[test]
    fn test_expired_element_is_a_miss() {
        let mut cache = LocalCache::new(DEFAULT_MAX_WEIGHT, Duration::from_secs(10));
        let start = Instant::now();
        cache.store_at("a", b"alpha".to_vec(), start);

        let fresh = start + Duration::from_secs(5);
        assert!(cache.load_at("a", true, fresh).is_some());

        let stale = start + Duration::from_secs(11);
        assert!(cache.load_at("a", true, stale).is_none());
        assert!(cache.is_empty());
        assert_eq!(cache.weight(), 0);
    }

    #[test]
    fn test_shrinking_max_weight_evicts() {
        let mut cache = LocalCache::default();
        for key in ["a", "b", "c", "d"] {
            cache.store(key, vec![0; 100]);
        }
        cache.set_max_weight(250);
        assert_eq!(cache.stats(), CacheStats { entries: 2, weight: 200, max_weight: 250 });
        assert!(cache.load("d", false).is_some());
    }

    #[test]
    fn test_elements_and_clear() {
        let mut cache = LocalCache::default();
        cache.store("a", b"1".to_vec());
        cache.store("b", b"2".to_vec());
        let elements = cache.elements();
        assert_eq!(elements[0].0, "b");
        assert_eq!(elements.len(), 2);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.weight(), 0);
    }
}
