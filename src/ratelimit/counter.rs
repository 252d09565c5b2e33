//! Fixed-window counter storage.
//!
//! Counters are keyed by hashed identity. A window is anchored at the first
//! increment of a key and is never extended by later increments; once it
//! expires the next increment starts a fresh window at 1.

use dashmap::DashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use super::clock::{Clock, SystemClock};
use crate::error::Result;

/// Storage for request counts.
///
/// Implementations must make `increment` atomic per key. They know nothing
/// about quotas; the limiter compares the returned count.
pub trait CounterStore: Send + Sync + Debug {
    /// Add one to the counter for `key` and return the new count.
    ///
    /// A key with no live counter starts at 1 with a window of `window_ms`.
    fn increment(&self, key: &str, window_ms: u64) -> Result<u64>;

    /// Drop every counter.
    fn clear(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
struct CounterEntry {
    count: u64,
    expires_at: Instant,
    last_set: Instant,
}

impl CounterEntry {
    fn is_live(&self, now: Instant) -> bool {
        now <= self.expires_at
    }
}

/// In-memory TTL counter store with an optional cap on tracked keys.
///
/// When the cap is reached, expired entries are purged and then the least
/// recently set entries are evicted. Writes are never refused.
#[derive(Debug)]
pub struct TtlStore {
    entries: DashMap<String, CounterEntry>,
    max_keys: Option<usize>,
    clock: Arc<dyn Clock>,
}

impl TtlStore {
    /// Create an unbounded store on the system clock.
    pub fn new() -> Self {
        Self::with_clock(None, Arc::new(SystemClock))
    }

    /// Create a store holding at most `max_keys` counters.
    pub fn bounded(max_keys: usize) -> Self {
        Self::with_clock(Some(max_keys), Arc::new(SystemClock))
    }

    /// Create a store with an explicit cap and clock.
    pub fn with_clock(max_keys: Option<usize>, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            max_keys: max_keys.map(|max| max.max(1)),
            clock,
        }
    }

    /// Number of tracked keys, live or not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the store holds no counters.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current live count for a key, without incrementing.
    pub fn count(&self, key: &str) -> Option<u64> {
        let now = self.clock.now();
        self.entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.count)
    }

    /// Time left before the window for `key` expires.
    pub fn time_to_live(&self, key: &str) -> Option<Duration> {
        let now = self.clock.now();
        self.entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.expires_at.saturating_duration_since(now))
    }

    /// Make room for one new key. Must not be called while holding a map guard.
    fn make_room(&self, now: Instant) {
        let Some(max_keys) = self.max_keys else {
            return;
        };
        if self.entries.len() < max_keys {
            return;
        }

        self.entries.retain(|_, entry| entry.is_live(now));

        while self.entries.len() >= max_keys {
            let victim = self
                .entries
                .iter()
                .min_by_key(|entry| entry.value().last_set)
                .map(|entry| entry.key().clone());

            match victim {
                Some(key) => {
                    debug!(key = %key, max_keys, "Evicting least recently set counter");
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }
}

impl Default for TtlStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterStore for TtlStore {
    fn increment(&self, key: &str, window_ms: u64) -> Result<u64> {
        let now = self.clock.now();
        let window = Duration::from_millis(window_ms);

        if !self.entries.contains_key(key) {
            self.make_room(now);
        }

        let mut entry = self.entries.entry(key.to_owned()).or_insert(CounterEntry {
            count: 0,
            expires_at: now + window,
            last_set: now,
        });

        if !entry.is_live(now) {
            entry.count = 0;
            entry.expires_at = now + window;
        }
        entry.count += 1;
        entry.last_set = now;

        Ok(entry.count)
    }

    fn clear(&self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }
}

/// Remembers when a limited key's window resets.
///
/// The first limited request for a key anchors the reset instant; later
/// lookups within that window return the same instant.
#[derive(Debug)]
pub struct RetryAfterStore {
    resets: DashMap<String, Instant>,
    max_keys: Option<usize>,
    clock: Arc<dyn Clock>,
}

impl RetryAfterStore {
    /// Create a store with an explicit cap and clock.
    pub fn with_clock(max_keys: Option<usize>, clock: Arc<dyn Clock>) -> Self {
        Self {
            resets: DashMap::new(),
            max_keys: max_keys.map(|max| max.max(1)),
            clock,
        }
    }

    /// Current instant according to this store's clock.
    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Return the reset instant for `key`, anchoring a new one if none is live.
    pub fn reset_at(&self, key: &str, window_ms: u64) -> Instant {
        let now = self.clock.now();

        if let Some(reset) = self.resets.get(key) {
            if now < *reset {
                return *reset;
            }
        }

        if let Some(max_keys) = self.max_keys {
            if self.resets.len() >= max_keys {
                self.resets.retain(|_, reset| now < *reset);
                while self.resets.len() >= max_keys {
                    let victim = self
                        .resets
                        .iter()
                        .min_by_key(|entry| *entry.value())
                        .map(|entry| entry.key().clone());
                    match victim {
                        Some(victim) => {
                            self.resets.remove(&victim);
                        }
                        None => break,
                    }
                }
            }
        }

        let reset = now + Duration::from_millis(window_ms);
        let mut entry = self.resets.entry(key.to_owned()).or_insert(reset);
        if now >= *entry {
            *entry = reset;
        }
        *entry
    }

    /// Drop every remembered reset instant.
    pub fn clear(&self) {
        self.resets.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::MockClock;

    fn store_with_clock(max_keys: Option<usize>) -> (TtlStore, MockClock) {
        let clock = MockClock::new();
        (TtlStore::with_clock(max_keys, Arc::new(clock.clone())), clock)
    }

    #[test]
    fn test_first_increment_returns_one() {
        let (store, _) = store_with_clock(None);
        assert_eq!(store.increment("a", 1_000).unwrap(), 1);
        assert_eq!(store.increment("b", 1_000).unwrap(), 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_increments_by_one_within_window() {
        let (store, clock) = store_with_clock(None);
        for expected in 1..=5 {
            assert_eq!(store.increment("key", 60_000).unwrap(), expected);
            clock.advance_ms(1_000);
        }
        assert_eq!(store.count("key"), Some(5));
    }

    #[test]
    fn test_window_resets_after_expiry() {
        let (store, clock) = store_with_clock(None);
        store.increment("key", 1_000).unwrap();
        store.increment("key", 1_000).unwrap();

        clock.advance_ms(1_000);
        assert_eq!(store.increment("key", 1_000).unwrap(), 3);

        clock.advance_ms(1);
        assert_eq!(store.increment("key", 1_000).unwrap(), 1);
    }

    #[test]
    fn test_window_is_not_extended_by_increments() {
        let (store, clock) = store_with_clock(None);
        store.increment("key", 10_000).unwrap();

        clock.advance_ms(6_000);
        store.increment("key", 10_000).unwrap();
        assert_eq!(store.time_to_live("key"), Some(Duration::from_millis(4_000)));

        clock.advance_ms(4_001);
        assert_eq!(store.count("key"), None);
        assert_eq!(store.increment("key", 10_000).unwrap(), 1);
    }

    #[test]
    fn test_bounded_store_evicts_least_recently_set() {
        let (store, clock) = store_with_clock(Some(2));
        store.increment("old", 60_000).unwrap();
        clock.advance_ms(10);
        store.increment("newer", 60_000).unwrap();
        clock.advance_ms(10);
        store.increment("old", 60_000).unwrap();
        clock.advance_ms(10);

        store.increment("third", 60_000).unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.count("old"), Some(2));
        assert_eq!(store.count("newer"), None);
        assert_eq!(store.count("third"), Some(1));
    }

    #[test]
    fn test_bounded_store_purges_expired_first() {
        let (store, clock) = store_with_clock(Some(2));
        store.increment("short", 100).unwrap();
        clock.advance_ms(10);
        store.increment("long", 60_000).unwrap();
        clock.advance_ms(200);

        store.increment("fresh", 60_000).unwrap();

        assert_eq!(store.count("long"), Some(1));
        assert_eq!(store.count("fresh"), Some(1));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_clear_drops_everything() {
        let (store, _) = store_with_clock(None);
        store.increment("a", 1_000).unwrap();
        store.increment("a", 1_000).unwrap();
        store.clear().unwrap();

        assert!(store.is_empty());
        assert_eq!(store.increment("a", 1_000).unwrap(), 1);
    }

    #[test]
    fn test_concurrent_increments_are_atomic() {
        let store = TtlStore::new();
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..250 {
                        store.increment("shared", 60_000).unwrap();
                    }
                });
            }
        });
        assert_eq!(store.count("shared"), Some(2_000));
    }

    #[test]
    fn test_retry_after_store_anchors_reset() {
        let clock = MockClock::new();
        let store = RetryAfterStore::with_clock(None, Arc::new(clock.clone()));
        let start = store.now();

        let reset = store.reset_at("key", 30_000);
        assert_eq!(reset, start + Duration::from_secs(30));

        clock.advance_ms(10_000);
        assert_eq!(store.reset_at("key", 30_000), reset);

        clock.advance_ms(20_000);
        assert_eq!(store.reset_at("key", 30_000), start + Duration::from_secs(60));
    }
}
