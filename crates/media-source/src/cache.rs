//! Byte-budgeted LRU for bitmaps.
//!
//! Entries are evicted least-recently-used first until the resident byte
//! count fits the budget. A single entry larger than the whole budget is
//! not stored.

use std::hash::Hash;

use lru::LruCache;
use tracing::debug;

use crate::bitmap::Bitmap;

/// Counters reported by [`BitmapCache::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub resident_bytes: usize,
    pub budget_bytes: usize,
    pub evictions: u64,
}

/// LRU map from `K` to bitmaps, bounded by total pixel bytes.
///
/// Not synchronized; owners wrap it in a lock.
#[derive(Debug)]
pub struct BitmapCache<K: Hash + Eq> {
    entries: LruCache<K, Bitmap>,
    resident_bytes: usize,
    budget_bytes: usize,
    evictions: u64,
}

impl<K: Hash + Eq> BitmapCache<K> {
    pub fn new(budget_bytes: usize) -> Self {
        Self {
            entries: LruCache::unbounded(),
            resident_bytes: 0,
            budget_bytes,
            evictions: 0,
        }
    }

    /// Look up and mark as recently used.
    pub fn get(&mut self, key: &K) -> Option<Bitmap> {
        self.entries.get(key).cloned()
    }

    /// Presence check that leaves recency untouched.
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains(key)
    }

    /// Insert, evicting old entries to stay within budget.
    ///
    /// Returns `false` when the bitmap alone exceeds the budget.
    pub fn insert(&mut self, key: K, bitmap: Bitmap) -> bool {
        let size = bitmap.byte_len();
        if size > self.budget_bytes {
            debug!(size, budget = self.budget_bytes, "bitmap exceeds cache budget");
            return false;
        }

        if let Some(old) = self.entries.pop(&key) {
            self.resident_bytes -= old.byte_len();
        }
        while self.resident_bytes + size > self.budget_bytes {
            match self.entries.pop_lru() {
                Some((_, evicted)) => {
                    self.resident_bytes -= evicted.byte_len();
                    self.evictions += 1;
                }
                None => break,
            }
        }

        self.entries.push(key, bitmap);
        self.resident_bytes += size;
        true
    }

    /// Remove every entry matching `predicate`.
    pub fn retain(&mut self, mut predicate: impl FnMut(&K) -> bool)
    where
        K: Clone,
    {
        let doomed: Vec<K> = self
            .entries
            .iter()
            .filter(|(key, _)| !predicate(key))
            .map(|(key, _)| key.clone())
            .collect();
        for key in doomed {
            if let Some(bitmap) = self.entries.pop(&key) {
                self.resident_bytes -= bitmap.byte_len();
            }
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.resident_bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            resident_bytes: self.resident_bytes,
            budget_bytes: self.budget_bytes,
            evictions: self.evictions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> Bitmap {
        // 100 bytes
        Bitmap::solid(5, 5, [1, 1, 1, 255])
    }

    #[test]
    fn test_evicts_least_recently_used_over_budget() {
        let mut cache = BitmapCache::new(250);
        cache.insert(1u32, frame());
        cache.insert(2, frame());
        cache.get(&1);
        cache.insert(3, frame());

        assert!(cache.contains(&1));
        assert!(!cache.contains(&2));
        assert!(cache.contains(&3));
        let stats = cache.stats();
        assert_eq!(stats.resident_bytes, 200);
        assert_eq!(stats.evictions, 1);
    }

    #[test]
    fn test_oversized_entry_is_rejected() {
        let mut cache = BitmapCache::new(50);
        assert!(!cache.insert(1u32, frame()));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_replacing_key_does_not_double_count() {
        let mut cache = BitmapCache::new(1000);
        cache.insert(1u32, frame());
        cache.insert(1, frame());
        assert_eq!(cache.stats().resident_bytes, 100);
    }

    #[test]
    fn test_retain_drops_matching_entries() {
        let mut cache = BitmapCache::new(1000);
        cache.insert(("a".to_string(), 1u64), frame());
        cache.insert(("b".to_string(), 1u64), frame());
        cache.retain(|(source, _)| source != "a");
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().resident_bytes, 100);
    }
}
