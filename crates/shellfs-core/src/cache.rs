//! Attribute snapshot cache.
//!
//! Maps absolute remote path strings to [`FileAttributes`]. Entries may
//! disappear at any time (capacity eviction, TTL expiry); a missing entry is
//! only ever a miss, and the filesystem re-queries the remote host lazily.
//! There is no invalidation API and no single-flight coordination: two
//! concurrent misses on one key both fetch, and the last insert wins.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::attributes::FileAttributes;
use crate::constants::DEFAULT_ATTR_CACHE_CAPACITY;

struct CachedAttributes {
    attrs: FileAttributes,
    inserted: Instant,
    /// Last access time for LRU eviction.
    last_access: Instant,
}

/// Bounded LRU cache of attribute snapshots with optional TTL.
pub struct AttrCache {
    entries: RwLock<HashMap<String, CachedAttributes>>,
    capacity: usize,
    ttl: Option<Duration>,
}

impl Default for AttrCache {
    fn default() -> Self {
        Self::new(DEFAULT_ATTR_CACHE_CAPACITY, None)
    }
}

impl AttrCache {
    /// A capacity of zero disables caching.
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity,
            ttl,
        }
    }

    /// Cached snapshot for `key`, if present and not expired.
    pub fn get(&self, key: &str) -> Option<FileAttributes> {
        let mut entries = self.entries.write();
        let entry = entries.get_mut(key)?;
        if self.ttl.is_some_and(|ttl| entry.inserted.elapsed() >= ttl) {
            entries.remove(key);
            return None;
        }
        entry.last_access = Instant::now();
        Some(entry.attrs.clone())
    }

    /// Store a snapshot, replacing any previous one for `key`.
    pub fn insert(&self, key: impl Into<String>, attrs: FileAttributes) {
        if self.capacity == 0 {
            return;
        }
        let key = key.into();
        let now = Instant::now();
        let mut entries = self.entries.write();
        if !entries.contains_key(&key) {
            self.evict_if_needed(&mut entries);
        }
        entries.insert(
            key,
            CachedAttributes {
                attrs,
                inserted: now,
                last_access: now,
            },
        );
    }

    /// Returns true if a live entry exists for `key`. Does not touch LRU order.
    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .read()
            .get(key)
            .is_some_and(|e| self.ttl.is_none_or(|ttl| e.inserted.elapsed() < ttl))
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn evict_if_needed(&self, entries: &mut HashMap<String, CachedAttributes>) {
        while entries.len() >= self.capacity {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone());

            if let Some(key) = oldest {
                tracing::debug!(path = %key, "evicting cached attributes");
                entries.remove(&key);
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::Listing;

    fn snapshot(size: u64) -> FileAttributes {
        let out = format!("-rw-r--r-- 1 u g {} 2024-01-01 00:00:00 /f\n", size);
        let l = Listing::parse("ls -ld", &out, "/f").unwrap();
        FileAttributes::from_listings(l.clone(), l).unwrap()
    }

    #[test]
    fn test_get_after_insert() {
        let cache = AttrCache::default();
        assert!(cache.get("/f").is_none());
        cache.insert("/f", snapshot(3));
        assert_eq!(cache.get("/f").unwrap().size(), 3);
        cache.insert("/f", snapshot(9));
        assert_eq!(cache.get("/f").unwrap().size(), 9);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_lru_eviction() {
        let cache = AttrCache::new(2, None);
        cache.insert("/a", snapshot(1));
        std::thread::sleep(Duration::from_millis(2));
        cache.insert("/b", snapshot(2));
        std::thread::sleep(Duration::from_millis(2));
        // Touch /a so /b becomes the eviction candidate.
        assert!(cache.get("/a").is_some());
        std::thread::sleep(Duration::from_millis(2));
        cache.insert("/c", snapshot(3));

        assert_eq!(cache.len(), 2);
        assert!(cache.contains("/a"));
        assert!(!cache.contains("/b"));
        assert!(cache.contains("/c"));
    }

    #[test]
    fn test_ttl_expiry_is_a_miss() {
        let cache = AttrCache::new(8, Some(Duration::from_millis(5)));
        cache.insert("/f", snapshot(1));
        std::thread::sleep(Duration::from_millis(20));
        assert!(!cache.contains("/f"));
        assert!(cache.get("/f").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_capacity_disables() {
        let cache = AttrCache::new(0, None);
        cache.insert("/f", snapshot(1));
        assert!(cache.get("/f").is_none());
    }
}
