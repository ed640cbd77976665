//! Time-to-live cache keyed by request.
//!
//! Holds the last successful completion time of each request key. Entries older
//! than the TTL are treated as absent, since they can no longer throttle anything.
//! All methods take the current instant explicitly so one coordinator decision
//! uses one consistent timestamp.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use tokio::time::Instant;
//! use market_data_client::coordinator::TtlCache;
//!
//! let start = Instant::now();
//! let mut cache: TtlCache<&str> = TtlCache::new(Duration::from_secs(30));
//!
//! cache.insert("quotes", start);
//! assert_eq!(cache.get_age(&"quotes", start + Duration::from_secs(5)), Some(Duration::from_secs(5)));
//! assert!(cache.get_age(&"quotes", start + Duration::from_secs(30)).is_none());
//! ```

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio::time::Instant;

/// A set of keys whose entries expire a fixed duration after insertion.
#[derive(Debug)]
pub struct TtlCache<K> {
    cache: HashMap<K, Instant>,
    ttl: Duration,
}

impl<K> TtlCache<K>
where
    K: Hash + Eq,
{
    /// Create a new cache with the specified time-to-live.
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: HashMap::new(),
            ttl,
        }
    }

    /// Insert or refresh an entry, stamped at `now`.
    pub fn insert(&mut self, key: K, now: Instant) {
        self.cache.insert(key, now);
    }

    /// Get the age of an entry at `now`.
    ///
    /// Returns `None` if the key doesn't exist or has expired.
    pub fn get_age(&self, key: &K, now: Instant) -> Option<Duration> {
        self.cache.get(key).and_then(|stamp| {
            let age = now.saturating_duration_since(*stamp);
            if age < self.ttl { Some(age) } else { None }
        })
    }

    /// Drop all entries that have expired at `now`.
    pub fn cleanup(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.cache
            .retain(|_, stamp| now.saturating_duration_since(*stamp) < ttl);
    }
}
