//! Replay protection.
//!
//! A bounded in-memory set of envelope ids with first-seen instants. Both
//! pruning policies run inside the same critical section as the check, so a
//! caller that sees `false` once is guaranteed no concurrent caller saw
//! `false` for the same id.
//!
//! Ids are inserted with non-decreasing instants, so the age prune locates
//! its cutoff by binary search over the insertion-ordered key sequence and
//! bulk-deletes the prefix.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

use velum_event::EventId;

/// Default maximum number of cached ids.
pub const REPLAY_CACHE_MAX: usize = 5000;

/// Default entry lifetime: twice the envelope acceptance window, leaving
/// room for late arrivals from slow relays.
pub const REPLAY_CACHE_TTL: Duration = Duration::from_secs(2 * crate::node::MAX_ENVELOPE_AGE_SECS);

struct CacheInner {
    seen: HashMap<EventId, Instant>,
    order: VecDeque<EventId>,
}

/// Mutex-guarded replay cache.
pub struct ReplayCache {
    inner: Mutex<CacheInner>,
    max_size: usize,
    ttl: Duration,
}

impl ReplayCache {
    /// Create a cache bounded by `max_size` entries and `ttl` age.
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                seen: HashMap::with_capacity(max_size),
                order: VecDeque::with_capacity(max_size),
            }),
            max_size,
            ttl,
        }
    }

    /// Bounded by the defaults.
    pub fn with_defaults() -> Self {
        Self::new(REPLAY_CACHE_MAX, REPLAY_CACHE_TTL)
    }

    /// Check whether `id` was already seen and mark it seen, atomically.
    ///
    /// Returns `true` for a replay. Callers must pass non-decreasing `now`
    /// values; both prunes run here so tail latency stays bounded.
    pub fn check_and_mark(&self, id: EventId, now: Instant) -> bool {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        // Capacity prune first: it is the cheap one and guarantees room for
        // the insert below.
        if guard.order.len() >= self.max_size {
            let drop_count = (self.max_size / 4).max(1);
            debug!(size = guard.order.len(), drop_count, "replay cache at capacity, pruning");
            for _ in 0..drop_count {
                if let Some(old) = guard.order.pop_front() {
                    guard.seen.remove(&old);
                }
            }
        }

        // Age prune: binary search for the first entry young enough to keep.
        if let Some(cutoff) = now.checked_sub(self.ttl) {
            let CacheInner { seen, order } = &mut *guard;
            let first_kept = order.partition_point(|id| {
                seen.get(id).map_or(true, |first_seen| *first_seen < cutoff)
            });
            if first_kept > 0 {
                debug!(expired = first_kept, "replay cache dropping aged entries");
                for _ in 0..first_kept {
                    if let Some(old) = order.pop_front() {
                        seen.remove(&old);
                    }
                }
            }
        }

        if guard.seen.contains_key(&id) {
            return true;
        }
        guard.seen.insert(id, now);
        guard.order.push_back(id);
        false
    }

    /// Current number of cached ids.
    pub fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(guard) => guard.order.len(),
            Err(poisoned) => poisoned.into_inner().order.len(),
        }
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> EventId {
        EventId::from_bytes([byte; 32])
    }

    #[test]
    fn test_first_sight_is_not_a_replay() {
        let cache = ReplayCache::new(100, Duration::from_secs(3600));
        let now = Instant::now();
        assert!(!cache.check_and_mark(id(1), now));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_second_sight_is_a_replay() {
        let cache = ReplayCache::new(100, Duration::from_secs(3600));
        let now = Instant::now();
        assert!(!cache.check_and_mark(id(1), now));
        assert!(cache.check_and_mark(id(1), now));
        assert!(cache.check_and_mark(id(1), now + Duration::from_secs(60)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_distinct_ids_do_not_collide() {
        let cache = ReplayCache::new(100, Duration::from_secs(3600));
        let now = Instant::now();
        assert!(!cache.check_and_mark(id(1), now));
        assert!(!cache.check_and_mark(id(2), now));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_aged_entries_are_pruned() {
        let cache = ReplayCache::new(100, Duration::from_secs(7200));
        let t0 = Instant::now();
        assert!(!cache.check_and_mark(id(1), t0));
        assert!(!cache.check_and_mark(id(2), t0 + Duration::from_secs(7000)));

        // Two hours later the first entry is past the ttl and a later call
        // prunes it; the id is accepted again.
        let late = t0 + Duration::from_secs(7201);
        assert!(!cache.check_and_mark(id(1), late));
        // id(2) is still within the window.
        assert!(cache.check_and_mark(id(2), late));
    }

    #[test]
    fn test_capacity_prune_drops_oldest_quarter() {
        let cache = ReplayCache::new(8, Duration::from_secs(3600));
        let t0 = Instant::now();
        for i in 0..8u8 {
            assert!(!cache.check_and_mark(id(i), t0 + Duration::from_secs(i as u64)));
        }
        assert_eq!(cache.len(), 8);

        // The ninth insert triggers a prune of the oldest 25% (2 entries).
        assert!(!cache.check_and_mark(id(8), t0 + Duration::from_secs(8)));
        assert_eq!(cache.len(), 7);

        // The two oldest are forgotten, newer ones are not.
        assert!(!cache.check_and_mark(id(0), t0 + Duration::from_secs(9)));
        assert!(cache.check_and_mark(id(7), t0 + Duration::from_secs(9)));
    }

    #[test]
    fn test_replay_within_window_after_churn() {
        let cache = ReplayCache::new(100, Duration::from_secs(7200));
        let t0 = Instant::now();
        assert!(!cache.check_and_mark(id(1), t0));
        for i in 10..40u8 {
            cache.check_and_mark(id(i), t0 + Duration::from_secs(1));
        }
        assert!(cache.check_and_mark(id(1), t0 + Duration::from_secs(3600)));
    }

    #[test]
    fn test_concurrent_checks_collapse_to_one() {
        use std::sync::Arc;

        let cache = Arc::new(ReplayCache::with_defaults());
        let now = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            handles.push(std::thread::spawn(move || cache.check_and_mark(id(7), now)));
        }
        let fresh = handles
            .into_iter()
            .map(|h| h.join().expect("join"))
            .filter(|seen| !seen)
            .count();
        assert_eq!(fresh, 1);
    }
}
