//! Prepared statement cache.
//!
//! Maps SQL text to the server-side statement name, bounded by
//! `statement_limit` with LRU eviction. The session issues the wire-level
//! PREPARE/DEALLOCATE; the cache only tracks names.

use std::num::NonZeroUsize;

use lru::LruCache;

/// LRU cache of prepared statement names, keyed by SQL text.
pub struct StatementCache {
    cache: LruCache<String, String>,
    next_id: u64,
}

impl StatementCache {
    /// Create a cache bounded to `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            cache: LruCache::new(cap),
            next_id: 0,
        }
    }

    /// Look up the server-side name for a statement, marking it recently
    /// used on hit.
    pub fn touch(&mut self, sql: &str) -> Option<&str> {
        self.cache.get(sql).map(|s| s.as_str())
    }

    /// Insert a statement. Returns the name evicted to make room, if the
    /// cache was full; the caller must DEALLOCATE it.
    pub fn insert(&mut self, sql: String, name: String) -> Option<String> {
        let will_evict = self.cache.len() >= self.cache.cap().get() && !self.cache.contains(&sql);
        let evicted = if will_evict {
            self.cache.peek_lru().map(|(_, name)| name.clone())
        } else {
            None
        };
        self.cache.put(sql, name);
        evicted
    }

    /// Remove a statement, returning its server-side name.
    pub fn remove(&mut self, sql: &str) -> Option<String> {
        self.cache.pop(sql)
    }

    /// Next unique statement name for this connection.
    pub fn next_statement_name(&mut self) -> String {
        self.next_id += 1;
        format!("ps_{}", self.next_id)
    }

    /// Number of cached statements.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Drop all entries. Used after DISCARD ALL, which deallocates every
    /// server-side statement in one stroke.
    pub fn clear(&mut self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_touch_and_insert() {
        let mut cache = StatementCache::new(10);
        assert!(cache.is_empty());
        assert!(cache.touch("SELECT 1").is_none());

        assert!(cache.insert("SELECT 1".into(), "ps_1".into()).is_none());
        assert_eq!(cache.touch("SELECT 1"), Some("ps_1"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_lru_eviction_reports_name() {
        let mut cache = StatementCache::new(2);
        cache.insert("q1".into(), "ps_1".into());
        cache.insert("q2".into(), "ps_2".into());

        // Touch q1 so q2 becomes least recently used
        cache.touch("q1");

        let evicted = cache.insert("q3".into(), "ps_3".into());
        assert_eq!(evicted.as_deref(), Some("ps_2"));
        assert!(cache.touch("q1").is_some());
        assert!(cache.touch("q2").is_none());
        assert!(cache.touch("q3").is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_reinsert_does_not_evict() {
        let mut cache = StatementCache::new(2);
        cache.insert("q1".into(), "ps_1".into());
        cache.insert("q2".into(), "ps_2".into());
        assert!(cache.insert("q1".into(), "ps_9".into()).is_none());
        assert_eq!(cache.touch("q1"), Some("ps_9"));
    }

    #[test]
    fn test_remove() {
        let mut cache = StatementCache::new(4);
        cache.insert("q1".into(), "ps_1".into());
        assert_eq!(cache.remove("q1").as_deref(), Some("ps_1"));
        assert!(cache.touch("q1").is_none());
    }

    #[test]
    fn test_statement_names_unique() {
        let mut cache = StatementCache::new(4);
        let names: Vec<String> = (0..10).map(|_| cache.next_statement_name()).collect();
        let unique: std::collections::HashSet<_> = names.iter().collect();
        assert_eq!(unique.len(), names.len());
        assert!(names.iter().all(|n| n.starts_with("ps_")));
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let mut cache = StatementCache::new(0);
        cache.insert("q1".into(), "ps_1".into());
        assert_eq!(cache.len(), 1);
    }
}
