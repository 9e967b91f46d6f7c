//! In-flight request tracker.
//!
//! Deduplicates fetches for the same `(kind, id)`: however many callers race
//! on a miss, only the first one inside an outstanding window runs its
//! request closure. Entries leave the tracker when the entity is ingested or
//! when they outlive the configured request timeout, so a lost response only
//! delays a retry, it never blocks one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tether_core::EntityKind;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Key of one outstanding request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub kind: EntityKind,
    pub id: String,
}

impl RequestKey {
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

/// Result of [`InFlightTracker::ensure_requested`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// No request was outstanding; the request closure ran.
    Requested,
    /// A request is already outstanding; nothing was done.
    DuplicateSuppressed,
}

/// Snapshot of tracker counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackerStats {
    pub requested: u64,
    pub suppressed: u64,
    pub resolved: u64,
    pub expired: u64,
    pub outstanding: u64,
}

#[derive(Debug, Default)]
struct Counters {
    requested: AtomicU64,
    suppressed: AtomicU64,
    resolved: AtomicU64,
    expired: AtomicU64,
}

/// Tracks outstanding fetches keyed by `(kind, id)`.
#[derive(Debug)]
pub struct InFlightTracker {
    entries: DashMap<RequestKey, Instant>,
    timeout: Duration,
    counters: Counters,
}

impl InFlightTracker {
    /// Create a tracker whose entries expire after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            timeout,
            counters: Counters::default(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `request_fn` unless a request for `(kind, id)` is already
    /// outstanding.
    ///
    /// The entry is claimed atomically before `request_fn` runs, and the map
    /// shard is released before it runs, so `request_fn` may call back into
    /// the tracker. An entry older than the timeout counts as absent and is
    /// re-claimed.
    pub fn ensure_requested<F>(&self, kind: EntityKind, id: &str, request_fn: F) -> RequestOutcome
    where
        F: FnOnce(),
    {
        let now = Instant::now();
        let claimed = match self.entries.entry(RequestKey::new(kind, id)) {
            Entry::Occupied(mut occupied) => {
                if now.saturating_duration_since(*occupied.get()) >= self.timeout {
                    self.counters.expired.fetch_add(1, Ordering::Relaxed);
                    occupied.insert(now);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(now);
                true
            }
        };

        if claimed {
            self.counters.requested.fetch_add(1, Ordering::Relaxed);
            debug!(%kind, id, "Requesting entity");
            request_fn();
            RequestOutcome::Requested
        } else {
            self.counters.suppressed.fetch_add(1, Ordering::Relaxed);
            trace!(%kind, id, "Request already in flight");
            RequestOutcome::DuplicateSuppressed
        }
    }

    /// Clear the entry for `(kind, id)`. Returns whether one was outstanding;
    /// resolving an absent entry is a no-op.
    pub fn resolve(&self, kind: EntityKind, id: &str) -> bool {
        let removed = self.entries.remove(&RequestKey::new(kind, id)).is_some();
        if removed {
            self.counters.resolved.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    pub fn is_outstanding(&self, kind: EntityKind, id: &str) -> bool {
        self.entries.contains_key(&RequestKey::new(kind, id))
    }

    /// Number of entries currently held, expired or not.
    pub fn outstanding(&self) -> usize {
        self.entries.len()
    }

    /// Drop every entry older than the timeout. Returns how many were dropped.
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Instant::now())
    }

    /// [`Self::sweep_expired`] against an explicit clock reading.
    pub fn sweep_expired_at(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, started| now.saturating_duration_since(*started) < self.timeout);
        let swept = before.saturating_sub(self.entries.len());
        if swept > 0 {
            self.counters
                .expired
                .fetch_add(swept as u64, Ordering::Relaxed);
        }
        swept
    }

    /// Forget every outstanding request.
    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> TrackerStats {
        TrackerStats {
            requested: self.counters.requested.load(Ordering::Relaxed),
            suppressed: self.counters.suppressed.load(Ordering::Relaxed),
            resolved: self.counters.resolved.load(Ordering::Relaxed),
            expired: self.counters.expired.load(Ordering::Relaxed),
            outstanding: self.entries.len() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Barrier};

    #[test]
    fn test_second_request_suppressed() {
        let tracker = InFlightTracker::new(Duration::from_secs(30));
        let calls = AtomicUsize::new(0);

        let first = tracker.ensure_requested(EntityKind::Organization, "org-1", || {
            calls.fetch_add(1, Ordering::SeqCst);
        });
        let second = tracker.ensure_requested(EntityKind::Organization, "org-1", || {
            calls.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(first, RequestOutcome::Requested);
        assert_eq!(second, RequestOutcome::DuplicateSuppressed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(tracker.is_outstanding(EntityKind::Organization, "org-1"));
    }

    #[test]
    fn test_resolve_reopens_window() {
        let tracker = InFlightTracker::new(Duration::from_secs(30));
        tracker.ensure_requested(EntityKind::Site, "s1", || {});
        assert!(tracker.resolve(EntityKind::Site, "s1"));
        assert!(!tracker.resolve(EntityKind::Site, "s1"));
        assert_eq!(
            tracker.ensure_requested(EntityKind::Site, "s1", || {}),
            RequestOutcome::Requested
        );
    }

    #[test]
    fn test_keys_distinguish_kind() {
        let tracker = InFlightTracker::new(Duration::from_secs(30));
        tracker.ensure_requested(EntityKind::Site, "x", || {});
        assert_eq!(
            tracker.ensure_requested(EntityKind::Item, "x", || {}),
            RequestOutcome::Requested
        );
        assert_eq!(tracker.outstanding(), 2);
    }

    #[test]
    fn test_request_fn_may_reenter_tracker() {
        let tracker = InFlightTracker::new(Duration::from_secs(30));
        tracker.ensure_requested(EntityKind::Module, "m1", || {
            assert!(tracker.is_outstanding(EntityKind::Module, "m1"));
            assert_eq!(
                tracker.ensure_requested(EntityKind::Module, "m1", || {}),
                RequestOutcome::DuplicateSuppressed
            );
        });
    }

    #[test]
    fn test_sweep_drops_only_expired_entries() {
        let tracker = InFlightTracker::new(Duration::from_secs(10));
        tracker.ensure_requested(EntityKind::Crawler, "c1", || {});
        tracker.ensure_requested(EntityKind::Crawler, "c2", || {});
        let now = Instant::now();

        assert_eq!(tracker.sweep_expired_at(now + Duration::from_secs(9)), 0);
        assert_eq!(tracker.sweep_expired_at(now + Duration::from_secs(11)), 2);
        assert_eq!(tracker.outstanding(), 0);
        assert_eq!(tracker.stats().expired, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_reclaimed_on_next_request() {
        let tracker = InFlightTracker::new(Duration::from_secs(5));
        let calls = AtomicUsize::new(0);
        let bump = || {
            calls.fetch_add(1, Ordering::SeqCst);
        };

        tracker.ensure_requested(EntityKind::Counter, "c1", bump);
        tokio::time::advance(Duration::from_secs(2)).await;
        tracker.ensure_requested(EntityKind::Counter, "c1", bump);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(
            tracker.ensure_requested(EntityKind::Counter, "c1", bump),
            RequestOutcome::Requested
        );
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_concurrent_callers_request_once() {
        let tracker = Arc::new(InFlightTracker::new(Duration::from_secs(30)));
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                let calls = Arc::clone(&calls);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    tracker.ensure_requested(EntityKind::Item, "contended", || {
                        calls.fetch_add(1, Ordering::SeqCst);
                    })
                })
            })
            .collect();

        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            outcomes
                .iter()
                .filter(|o| **o == RequestOutcome::Requested)
                .count(),
            1
        );
        let stats = tracker.stats();
        assert_eq!(stats.requested, 1);
        assert_eq!(stats.suppressed, 15);
    }
}
