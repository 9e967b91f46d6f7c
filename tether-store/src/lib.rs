//! Tether Store - Entity Cache Core
//!
//! Holds the latest known instance of every entity the client has seen and
//! keeps everything derived from it consistent.
//!
//! # Components
//!
//! - `EntityStore`: one identity-keyed shard per entity kind, upsert-only
//! - `IndexRegistry`: secondary indexes maintained inside the store write lock
//! - `InFlightTracker`: dedup of outstanding fetches, with timeout fallback
//! - `RelationResolver`: non-blocking foreign-key accessors
//! - `Reconciler`: single ingestion point for every inbound payload
//!
//! # Data flow
//!
//! ```text
//! payload ─> Reconciler ─> EntityStore::upsert_observed ─> SecondaryIndex::on_change
//!                │                                               │
//!                └─> InFlightTracker::resolve           Changed / Arrived ─> bus
//!
//! caller ─> RelationResolver ─> EntityStore::get ─(miss)─> InFlightTracker ─> RequestInfo ─> bus
//! ```

pub mod index;
pub mod reconciler;
pub mod relation;
pub mod store;
pub mod sweeper;
pub mod tracker;

pub use index::{IndexDelta, IndexRegistry, SecondaryIndex};
pub use reconciler::{BatchReport, Reconciler};
pub use relation::RelationResolver;
pub use store::{EntityStore, StoreStats};
pub use sweeper::{tracker_sweep_task, SweepMetrics, SweepSnapshot, TrackerSweepConfig};
pub use tracker::{InFlightTracker, RequestKey, RequestOutcome, TrackerStats};
