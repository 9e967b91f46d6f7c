//! Tracker Sweep Background Task
//!
//! Expired in-flight entries are already reclaimed lazily the next time the
//! same `(kind, id)` is requested. Entities that are never asked for again
//! would otherwise sit in the tracker until teardown, so this task drops
//! every expired entry on a fixed cadence.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tether_core::CacheConfig;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::tracker::InFlightTracker;

/// Configuration for the tracker sweep task.
#[derive(Debug, Clone)]
pub struct TrackerSweepConfig {
    /// How often to sweep.
    pub interval: Duration,
}

impl TrackerSweepConfig {
    pub fn from_cache_config(config: &CacheConfig) -> Self {
        Self {
            interval: config.sweep_interval(),
        }
    }
}

/// Counters maintained by the sweep task.
#[derive(Debug, Default)]
pub struct SweepMetrics {
    /// Total entries dropped since startup
    pub entries_expired: AtomicU64,
    /// Total sweep cycles completed
    pub sweep_cycles: AtomicU64,
}

impl SweepMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> SweepSnapshot {
        SweepSnapshot {
            entries_expired: self.entries_expired.load(Ordering::Relaxed),
            sweep_cycles: self.sweep_cycles.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepSnapshot {
    pub entries_expired: u64,
    pub sweep_cycles: u64,
}

/// Sweep expired tracker entries until `shutdown_rx` flips to `true` or its
/// sender is dropped.
///
/// ```ignore
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// let handle = tokio::spawn(tracker_sweep_task(tracker, config, shutdown_rx));
/// // ...
/// let _ = shutdown_tx.send(true);
/// let metrics = handle.await?;
/// ```
pub async fn tracker_sweep_task(
    tracker: Arc<InFlightTracker>,
    config: TrackerSweepConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<SweepMetrics> {
    let metrics = Arc::new(SweepMetrics::new());

    let mut sweep_interval = interval(config.interval);
    sweep_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        interval_ms = config.interval.as_millis() as u64,
        timeout_ms = tracker.timeout().as_millis() as u64,
        "Tracker sweep task started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Tracker sweep task shutting down");
                    break;
                }
            }

            _ = sweep_interval.tick() => {
                sweep_once(&tracker, &metrics);
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        entries_expired = snapshot.entries_expired,
        sweep_cycles = snapshot.sweep_cycles,
        "Tracker sweep task completed"
    );

    metrics
}

fn sweep_once(tracker: &InFlightTracker, metrics: &SweepMetrics) {
    metrics.sweep_cycles.fetch_add(1, Ordering::Relaxed);
    let swept = tracker.sweep_expired();
    if swept > 0 {
        metrics
            .entries_expired
            .fetch_add(swept as u64, Ordering::Relaxed);
        tracing::debug!(
            swept,
            outstanding = tracker.outstanding(),
            "Reclaimed expired in-flight entries"
        );
    } else {
        tracing::trace!("Tracker sweep found nothing to reclaim");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::EntityKind;

    #[tokio::test(start_paused = true)]
    async fn test_sweep_reclaims_expired_entries() {
        let tracker = Arc::new(InFlightTracker::new(Duration::from_secs(5)));
        tracker.ensure_requested(EntityKind::Organization, "org-1", || {});

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(tracker_sweep_task(
            Arc::clone(&tracker),
            TrackerSweepConfig {
                interval: Duration::from_secs(1),
            },
            shutdown_rx,
        ));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(tracker.outstanding(), 1);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(tracker.outstanding(), 0);

        shutdown_tx.send(true).unwrap();
        let metrics = handle.await.unwrap().snapshot();
        assert_eq!(metrics.entries_expired, 1);
        assert!(metrics.sweep_cycles >= 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_stops_when_sender_dropped() {
        let tracker = Arc::new(InFlightTracker::new(Duration::from_secs(5)));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(tracker_sweep_task(
            tracker,
            TrackerSweepConfig {
                interval: Duration::from_secs(1),
            },
            shutdown_rx,
        ));
        drop(shutdown_tx);
        let metrics = handle.await.unwrap();
        assert_eq!(metrics.snapshot().entries_expired, 0);
    }
}
