//! Bus Event Types and Broadcasting
//!
//! The cache talks to the rest of the application through a publish/subscribe
//! bus. Outbound traffic is small and closed:
//!
//! - `RequestInfo`: a relation accessor missed and wants the entity fetched
//! - `Changed`: a tracked attribute flipped during an ingestion batch
//! - `Arrived`: entities that were being waited on have landed in the store
//!
//! The wire shape uses the `Type` tag and capitalised field names expected by
//! the transport collaborator.

use serde::{Deserialize, Serialize};
use tether_core::EntityKind;
use tokio::sync::broadcast;
use tracing::debug;

/// Events published by the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "Type")]
pub enum BusEvent {
    /// Ask the transport to fetch one entity.
    RequestInfo {
        #[serde(rename = "Object")]
        object: EntityKind,
        #[serde(rename = "ID")]
        id: String,
    },

    /// Membership of a secondary index changed.
    Changed {
        #[serde(rename = "Object")]
        object: EntityKind,
        /// Signal name configured on the index (e.g. `UpdateUnreadNotifications`).
        #[serde(rename = "Signal")]
        signal: String,
        /// Identities whose membership flipped, in ingestion order.
        #[serde(rename = "IDs")]
        ids: Vec<String>,
    },

    /// Requested entities arrived; relation accessors may now hit.
    Arrived {
        #[serde(rename = "Object")]
        object: EntityKind,
        #[serde(rename = "IDs")]
        ids: Vec<String>,
    },
}

impl BusEvent {
    /// Get the event type name for logging/filtering.
    pub fn event_type(&self) -> &'static str {
        match self {
            BusEvent::RequestInfo { .. } => "RequestInfo",
            BusEvent::Changed { .. } => "Changed",
            BusEvent::Arrived { .. } => "Arrived",
        }
    }

    /// Kind the event is about.
    pub fn object(&self) -> EntityKind {
        match self {
            BusEvent::RequestInfo { object, .. }
            | BusEvent::Changed { object, .. }
            | BusEvent::Arrived { object, .. } => *object,
        }
    }

    /// Build a `RequestInfo` event.
    pub fn request_info(object: EntityKind, id: impl Into<String>) -> Self {
        BusEvent::RequestInfo {
            object,
            id: id.into(),
        }
    }
}

/// Outbound side of the publish/subscribe bus.
///
/// Publishing must not block and must not call back into the cache
/// synchronously; the cache may hold no locks while publishing but makes no
/// promise about re-entrancy.
pub trait EventBus: Send + Sync {
    fn publish(&self, event: BusEvent);
}

impl<T: EventBus + ?Sized> EventBus for std::sync::Arc<T> {
    fn publish(&self, event: BusEvent) {
        (**self).publish(event)
    }
}

/// Bus backed by a tokio broadcast channel.
///
/// Subscribers that fall behind by more than the channel capacity observe a
/// lag error and miss events; the cache never waits for them.
#[derive(Clone)]
pub struct BroadcastBus {
    tx: broadcast::Sender<BusEvent>,
}

impl BroadcastBus {
    /// Create a bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl EventBus for BroadcastBus {
    fn publish(&self, event: BusEvent) {
        let event_type = event.event_type();
        match self.tx.send(event) {
            Ok(receivers) => {
                debug!(event_type, receivers, "Published bus event");
            }
            Err(_) => {
                // No subscribers - the event is dropped
                debug!(event_type, "No subscribers for bus event");
            }
        }
    }
}
