//! Lazy relation accessors.
//!
//! A relation is never stored: it is the owner's foreign-key field looked up
//! in the store on every access. A miss returns `None` straight away and asks
//! the transport for the target through the bus, at most once per outstanding
//! window thanks to the in-flight tracker. When the target is later ingested
//! the next access hits.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tether_core::{identity_from_value, validate_identity, CacheConfig, Entity, EntityKind};
use tether_events::{BusEvent, EventBus};
use tracing::{debug, trace, warn};

use crate::store::EntityStore;
use crate::tracker::InFlightTracker;

/// Resolves foreign keys against the store without ever blocking.
pub struct RelationResolver {
    store: Arc<EntityStore>,
    tracker: Arc<InFlightTracker>,
    bus: Arc<dyn EventBus>,
    catalog: HashMap<(EntityKind, String), EntityKind>,
}

impl RelationResolver {
    pub fn new(
        config: &CacheConfig,
        store: Arc<EntityStore>,
        tracker: Arc<InFlightTracker>,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        let catalog = config
            .relations
            .iter()
            .map(|rel| ((rel.owner, rel.field.clone()), rel.target))
            .collect();
        Self {
            store,
            tracker,
            bus,
            catalog,
        }
    }

    /// Follow `owner.field` to a cached `target`.
    ///
    /// An empty or missing foreign key yields `None` with no side effects. A
    /// miss yields `None` and requests the target unless a request is already
    /// in flight.
    pub fn resolve(&self, owner: &Entity, field: &str, target: EntityKind) -> Option<Entity> {
        let fk = owner.get(field).and_then(identity_from_value)?;
        self.resolve_id(target, &fk)
    }

    /// Look `target` up by identity, requesting it on a miss.
    pub fn resolve_id(&self, target: EntityKind, id: &str) -> Option<Entity> {
        if validate_identity(target, id).is_err() {
            return None;
        }
        match self.store.get(target, id) {
            Ok(Some(entity)) => Some(entity),
            Ok(None) => {
                self.request(target, id);
                None
            }
            Err(e) => {
                warn!(kind = %target, id, error = %e, "Relation lookup failed");
                None
            }
        }
    }

    /// Follow a catalogued relation. Fields missing from the catalog resolve
    /// to `None`.
    pub fn related(&self, owner: &Entity, field: &str) -> Option<Entity> {
        match self.target_of(owner.kind(), field) {
            Some(target) => self.resolve(owner, field, target),
            None => {
                debug!(owner = %owner.kind(), field, "No relation catalogued for field");
                None
            }
        }
    }

    /// Follow an array-valued foreign key.
    ///
    /// Returns the targets that are cached, in field order. Every missing
    /// identity is requested. A scalar foreign key is treated as a
    /// one-element array.
    pub fn resolve_many(&self, owner: &Entity, field: &str, target: EntityKind) -> Vec<Entity> {
        let ids: Vec<String> = match owner.get(field) {
            Some(Value::Array(values)) => values.iter().filter_map(identity_from_value).collect(),
            Some(value) => identity_from_value(value).into_iter().collect(),
            None => Vec::new(),
        };
        ids.iter()
            .filter_map(|id| self.resolve_id(target, id))
            .collect()
    }

    /// Request every catalogued relation of `owner` that is not cached yet.
    ///
    /// Returns how many requests were actually emitted.
    pub fn prefetch(&self, owner: &Entity) -> usize {
        let mut emitted = 0;
        for ((kind, field), target) in &self.catalog {
            if *kind != owner.kind() {
                continue;
            }
            let Some(fk) = owner.get(field).and_then(identity_from_value) else {
                continue;
            };
            if validate_identity(*target, &fk).is_err() || self.store.contains(*target, &fk) {
                continue;
            }
            if self.request(*target, &fk) {
                emitted += 1;
            }
        }
        emitted
    }

    /// Catalogued target kind of `owner.field`.
    pub fn target_of(&self, owner: EntityKind, field: &str) -> Option<EntityKind> {
        self.catalog.get(&(owner, field.to_string())).copied()
    }

    /// Claim `(target, id)` and publish a request for it. Returns whether a
    /// request went out.
    ///
    /// The store is checked again after the claim: an upsert that landed
    /// between the caller's miss and the claim found no entry to resolve, so
    /// the claim is released here instead.
    fn request(&self, target: EntityKind, id: &str) -> bool {
        let mut emitted = false;
        self.tracker.ensure_requested(target, id, || {
            if self.store.contains(target, id) {
                self.tracker.resolve(target, id);
                trace!(kind = %target, id, "Target arrived before claim");
            } else {
                self.bus.publish(BusEvent::request_info(target, id));
                emitted = true;
            }
        });
        emitted
    }
}
