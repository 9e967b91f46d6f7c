//! Session-scoped cache wiring.
//!
//! A `CacheSession` owns one store, its indexes, the in-flight tracker and
//! the background sweep. Nothing here is global: two sessions never share
//! state, and teardown leaves the session's registries empty.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tether_core::{CacheConfig, EntityKind};
use tether_events::EventBus;
use tether_store::{
    tracker_sweep_task, EntityStore, IndexRegistry, InFlightTracker, Reconciler,
    RelationResolver, SecondaryIndex, StoreStats, SweepMetrics, SweepSnapshot, TrackerStats,
    TrackerSweepConfig,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::ClientResult;

/// What a session did over its lifetime, reported at teardown.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub store: StoreStats,
    pub tracker: TrackerStats,
    pub sweep: SweepSnapshot,
}

pub struct CacheSession {
    id: Uuid,
    started_at: DateTime<Utc>,
    config: CacheConfig,
    store: Arc<EntityStore>,
    indexes: Arc<IndexRegistry>,
    tracker: Arc<InFlightTracker>,
    resolver: Arc<RelationResolver>,
    reconciler: Arc<Reconciler>,
    shutdown_tx: watch::Sender<bool>,
    sweeper: JoinHandle<Arc<SweepMetrics>>,
}

impl CacheSession {
    /// Validate `config`, wire every component to `bus` and start the
    /// tracker sweep.
    pub async fn start(config: CacheConfig, bus: Arc<dyn EventBus>) -> ClientResult<Self> {
        config.validate()?;

        let store = Arc::new(EntityStore::new(&config));
        let indexes = Arc::new(IndexRegistry::new(&config));
        let tracker = Arc::new(InFlightTracker::new(config.request_timeout()));
        let resolver = Arc::new(RelationResolver::new(
            &config,
            Arc::clone(&store),
            Arc::clone(&tracker),
            Arc::clone(&bus),
        ));
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&store),
            Arc::clone(&tracker),
            Arc::clone(&indexes),
            bus,
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sweeper = tokio::spawn(tracker_sweep_task(
            Arc::clone(&tracker),
            TrackerSweepConfig::from_cache_config(&config),
            shutdown_rx,
        ));

        let id = Uuid::now_v7();
        tracing::info!(
            session_id = %id,
            request_timeout_ms = config.request_timeout_ms,
            indexes = config.indexes.len(),
            relations = config.relations.len(),
            "Cache session started"
        );

        Ok(Self {
            id,
            started_at: Utc::now(),
            config,
            store,
            indexes,
            tracker,
            resolver,
            reconciler,
            shutdown_tx,
            sweeper,
        })
    }

    /// Stop the sweep and clear the store, indexes and tracker.
    pub async fn teardown(self) -> ClientResult<SessionSummary> {
        // Receiver gone means the task already exited.
        let _ = self.shutdown_tx.send(true);
        let sweep = self.sweeper.await?.snapshot();

        let store = self.store.stats();
        let tracker = self.tracker.stats();
        self.store.clear()?;
        self.indexes.clear();
        self.tracker.clear();

        let summary = SessionSummary {
            session_id: self.id,
            started_at: self.started_at,
            ended_at: Utc::now(),
            store,
            tracker,
            sweep,
        };
        tracing::info!(
            session_id = %summary.session_id,
            entities = summary.store.entry_count,
            requests = summary.tracker.requested,
            expired = summary.tracker.expired,
            "Cache session torn down"
        );
        Ok(summary)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<EntityStore> {
        Arc::clone(&self.store)
    }

    pub fn indexes(&self) -> Arc<IndexRegistry> {
        Arc::clone(&self.indexes)
    }

    /// Look a configured index up by name.
    pub fn index(&self, name: &str) -> Option<Arc<SecondaryIndex>> {
        self.indexes.get(name)
    }

    pub fn tracker(&self) -> Arc<InFlightTracker> {
        Arc::clone(&self.tracker)
    }

    pub fn resolver(&self) -> Arc<RelationResolver> {
        Arc::clone(&self.resolver)
    }

    pub fn reconciler(&self) -> Arc<Reconciler> {
        Arc::clone(&self.reconciler)
    }

    /// Number of cached entities of `kind`.
    pub fn cached(&self, kind: EntityKind) -> usize {
        self.store.len(kind)
    }
}
