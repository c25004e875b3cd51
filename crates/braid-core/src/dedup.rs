//! Duplicate suppression for multi-path delivery
//!
//! The same message-id arrives once per subclient path; only the first copy
//! may reach the application. Entries age out after a configured TTL and are
//! removed in bulk once per reaper interval. The cache carries no internal
//! locking; the owner serializes access.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Time-bounded set of recently seen message identifiers.
#[derive(Debug)]
pub struct DedupCache {
    ttl: Duration,
    reap_interval: Duration,
    entries: HashMap<Vec<u8>, Instant>,
    last_reap: Instant,
}

impl DedupCache {
    /// Create a cache with the given entry TTL and reaper cadence. The two
    /// are equal in the default configuration.
    pub fn new(ttl: Duration, reap_interval: Duration) -> Self {
        Self {
            ttl,
            reap_interval,
            entries: HashMap::new(),
            last_reap: Instant::now(),
        }
    }

    /// Whether `key` is currently present and unexpired.
    pub fn seen(&self, key: &[u8]) -> bool {
        self.entries
            .get(key)
            .is_some_and(|inserted| inserted.elapsed() < self.ttl)
    }

    /// Insert `key` with a fresh TTL, reaping expired entries first when the
    /// reaper cadence has elapsed. Exact reap timing is not load-bearing.
    pub fn insert(&mut self, key: Vec<u8>) {
        if self.last_reap.elapsed() >= self.reap_interval {
            self.reap();
        }
        self.entries.insert(key, Instant::now());
    }

    fn reap(&mut self) {
        let ttl = self.ttl;
        self.entries.retain(|_, inserted| inserted.elapsed() < ttl);
        self.last_reap = Instant::now();
    }

    /// Number of entries, including any expired but not yet reaped.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn second_sighting_is_a_duplicate() {
        let mut cache = DedupCache::new(Duration::from_secs(60), Duration::from_secs(60));
        let key = b"pid-1".to_vec();

        assert!(!cache.seen(&key));
        cache.insert(key.clone());
        assert!(cache.seen(&key));
    }

    #[test]
    fn entries_expire_after_ttl() {
        let mut cache = DedupCache::new(Duration::from_millis(20), Duration::from_millis(20));
        cache.insert(b"pid-1".to_vec());

        sleep(Duration::from_millis(40));
        assert!(!cache.seen(b"pid-1"));
    }

    #[test]
    fn reaper_drops_expired_entries_in_bulk() {
        let mut cache = DedupCache::new(Duration::from_millis(10), Duration::from_millis(10));
        cache.insert(b"a".to_vec());
        cache.insert(b"b".to_vec());
        assert_eq!(cache.len(), 2);

        sleep(Duration::from_millis(30));
        cache.insert(b"c".to_vec());
        assert_eq!(cache.len(), 1);
        assert!(cache.seen(b"c"));
    }

    #[test]
    fn reinsert_refreshes_ttl() {
        let mut cache = DedupCache::new(Duration::from_millis(50), Duration::from_secs(60));
        cache.insert(b"pid-1".to_vec());
        sleep(Duration::from_millis(30));
        cache.insert(b"pid-1".to_vec());
        sleep(Duration::from_millis(30));
        assert!(cache.seen(b"pid-1"));
    }
}
