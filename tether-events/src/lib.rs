//! Tether Events - Bus Contract and Inbound Shapes
//!
//! This crate defines the edges of the cache: what it publishes on the
//! application bus and the envelopes in which payloads arrive from the
//! transport layer.
//!
//! # Architecture
//!
//! ```text
//! pull feed ─┐                                   ┌─> RequestInfo
//!            ├─> InboundMessage ─> Reconciler ───┼─> Changed
//! push feed ─┘                                   └─> Arrived
//! ```
//!
//! # Traits
//!
//! - `EventBus`: outbound publish side, implemented by `BroadcastBus`

mod bus;
mod inbound;

pub use bus::{BroadcastBus, BusEvent, EventBus};
pub use inbound::{search_hits, InboundMessage, PushMessage};

// Re-export core types for convenience
pub use tether_core::{EntityKind, IngestError};
