// ── Single-slot TTL cache ──
//
// One value, one expiry. Readers load an immutable `Arc<CacheEntry>`
// snapshot through `ArcSwapOption`, so a concurrent `set` is never
// observed half-written and reads never block the writer.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use serde::Serialize;
use tokio::time::Instant;

use crate::clock::{Clock, default_clock};

/// A stored value with the moment it was stored and its lifetime.
#[derive(Debug)]
struct CacheEntry<V> {
    value: Arc<V>,
    stored_at: Instant,
    ttl: Duration,
    invalidated: bool,
}

impl<V> CacheEntry<V> {
    /// Valid iff `now - stored_at < ttl` and not invalidated.
    fn is_valid_at(&self, now: Instant) -> bool {
        !self.invalidated && now.saturating_duration_since(self.stored_at) < self.ttl
    }
}

/// Hit/miss counters for one cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> Option<f64> {
        let total = self.hits + self.misses;
        if total == 0 {
            return None;
        }
        #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
        let ratio = self.hits as f64 / total as f64;
        Some(ratio)
    }
}

/// A single-value cache whose entry expires after a fixed TTL.
///
/// `set` is an atomic replacement; there is no partial update. Any
/// number of readers may call `get` concurrently with one writer.
pub struct TtlCache<V> {
    slot: ArcSwapOption<CacheEntry<V>>,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V> TtlCache<V> {
    pub fn new() -> Self {
        Self::with_clock(default_clock())
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            slot: ArcSwapOption::empty(),
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Replace the stored entry, stamped with the current time.
    pub fn set(&self, value: V, ttl: Duration) {
        self.set_arc(Arc::new(value), ttl);
    }

    pub fn set_arc(&self, value: Arc<V>, ttl: Duration) {
        let entry = CacheEntry {
            value,
            stored_at: self.clock.now(),
            ttl,
            invalidated: false,
        };
        self.slot.store(Some(Arc::new(entry)));
        tracing::trace!(ttl_ms = ttl.as_millis(), "cache entry stored");
    }

    /// The cached value, or `None` if absent, expired or invalidated.
    pub fn get(&self) -> Option<Arc<V>> {
        let now = self.clock.now();
        let guard = self.slot.load();
        match guard.as_ref() {
            Some(entry) if entry.is_valid_at(now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(Arc::clone(&entry.value))
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Force the next `get` to miss. The value stays reachable through
    /// [`last_known`](Self::last_known).
    pub fn invalidate(&self) {
        self.slot.rcu(|current| {
            current.as_ref().map(|entry| {
                Arc::new(CacheEntry {
                    value: Arc::clone(&entry.value),
                    stored_at: entry.stored_at,
                    ttl: entry.ttl,
                    invalidated: true,
                })
            })
        });
    }

    /// The most recently stored value, whether or not it is still valid.
    pub fn last_known(&self) -> Option<Arc<V>> {
        self.slot
            .load()
            .as_ref()
            .map(|entry| Arc::clone(&entry.value))
    }

    /// True when `get` would currently miss. Does not touch the counters.
    pub fn is_expired(&self) -> bool {
        let now = self.clock.now();
        !self
            .slot
            .load()
            .as_ref()
            .is_some_and(|entry| entry.is_valid_at(now))
    }

    /// Time since the current entry was stored.
    pub fn age(&self) -> Option<Duration> {
        let now = self.clock.now();
        self.slot
            .load()
            .as_ref()
            .map(|entry| now.saturating_duration_since(entry.stored_at))
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl<V> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> std::fmt::Debug for TtlCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("expired", &self.is_expired())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn cache() -> (TtlCache<Vec<&'static str>>, ManualClock) {
        let clock = ManualClock::new();
        (TtlCache::with_clock(Arc::new(clock.clone())), clock)
    }

    #[test]
    fn empty_cache_misses() {
        let (cache, _) = cache();
        assert!(cache.get().is_none());
        assert!(cache.is_expired());
        assert!(cache.age().is_none());
        assert_eq!(cache.stats(), CacheStats { hits: 0, misses: 1 });
    }

    #[test]
    fn value_served_until_ttl_elapses() {
        let (cache, clock) = cache();
        cache.set(vec!["a", "b"], Duration::from_secs(120));

        assert_eq!(*cache.get().unwrap(), vec!["a", "b"]);

        clock.advance(Duration::from_secs(119));
        assert!(cache.get().is_some());

        // Valid iff elapsed < ttl, so exactly ttl is already stale.
        clock.advance(Duration::from_secs(1));
        assert!(cache.get().is_none());
        assert_eq!(cache.stats(), CacheStats { hits: 2, misses: 1 });
    }

    #[test]
    fn set_replaces_and_restamps() {
        let (cache, clock) = cache();
        cache.set(vec!["a"], Duration::from_secs(10));
        clock.advance(Duration::from_secs(8));
        cache.set(vec!["b"], Duration::from_secs(10));
        clock.advance(Duration::from_secs(8));

        assert_eq!(*cache.get().unwrap(), vec!["b"]);
        assert_eq!(cache.age(), Some(Duration::from_secs(8)));
    }

    #[test]
    fn invalidate_forces_miss_but_keeps_last_known() {
        let (cache, _) = cache();
        cache.set(vec!["a"], Duration::from_secs(60));
        cache.invalidate();

        assert!(cache.get().is_none());
        assert!(cache.is_expired());
        assert_eq!(*cache.last_known().unwrap(), vec!["a"]);

        cache.set(vec!["b"], Duration::from_secs(60));
        assert_eq!(*cache.get().unwrap(), vec!["b"]);
    }

    #[test]
    fn last_known_survives_expiry() {
        let (cache, clock) = cache();
        cache.set(vec!["a"], Duration::from_secs(1));
        clock.advance(Duration::from_secs(5));

        assert!(cache.get().is_none());
        assert_eq!(*cache.last_known().unwrap(), vec!["a"]);
    }

    #[test]
    fn independent_instances_have_independent_ttls() {
        let clock = ManualClock::new();
        let devices: TtlCache<u32> = TtlCache::with_clock(Arc::new(clock.clone()));
        let nodes: TtlCache<String> = TtlCache::with_clock(Arc::new(clock.clone()));
        devices.set(1, Duration::from_secs(5));
        nodes.set("tree".into(), Duration::from_secs(50));

        clock.advance(Duration::from_secs(10));

        assert!(devices.get().is_none());
        assert_eq!(*nodes.get().unwrap(), "tree");
    }

    #[test]
    fn hit_ratio() {
        let stats = CacheStats { hits: 3, misses: 1 };
        assert_eq!(stats.hit_ratio(), Some(0.75));
        assert_eq!(CacheStats::default().hit_ratio(), None);
    }
}
