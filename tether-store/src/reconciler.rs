//! Update reconciler: the single ingestion point for raw payloads.
//!
//! Every payload, whether it came from a fetch, a search page or the push
//! feed, goes through the same pipeline:
//!
//! 1. normalize the envelope and extract the identity
//! 2. upsert into the store, capturing tracked attributes before the merge
//! 3. update secondary indexes inside the same write lock
//! 4. clear the in-flight entry for the identity
//!
//! Broadcasts are collected per batch and published once the batch is
//! committed: one `Changed` per index signal whose membership flipped, and
//! one `Arrived` listing identities that were being waited on.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tether_core::{
    identity_from_value, validate_identity, Entity, EntityKind, Fields, IngestError,
    IngestResult,
};
use tether_events::{BusEvent, EventBus, InboundMessage};
use tracing::{debug, warn};

use crate::index::{IndexDelta, IndexRegistry};
use crate::store::EntityStore;
use crate::tracker::InFlightTracker;

/// Outcome of ingesting a batch of payloads.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Entities as stored after their upsert, in ingestion order.
    pub entities: Vec<Entity>,
    /// Rejected payloads with their position in the batch.
    pub rejected: Vec<(usize, IngestError)>,
}

impl BatchReport {
    pub fn accepted(&self) -> usize {
        self.entities.len()
    }

    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Broadcasts owed by the batch in progress.
#[derive(Debug, Default)]
struct Pending {
    changed: Vec<(String, Vec<String>)>,
    seen: HashSet<(String, String)>,
    arrived: Vec<String>,
}

impl Pending {
    fn flipped(&mut self, signal: &str, id: &str) {
        if !self.seen.insert((signal.to_string(), id.to_string())) {
            return;
        }
        // Few signals per kind; the scan is over signals, not identities.
        match self.changed.iter_mut().find(|(s, _)| s == signal) {
            Some((_, ids)) => ids.push(id.to_string()),
            None => self.changed.push((signal.to_string(), vec![id.to_string()])),
        }
    }
}

pub struct Reconciler {
    store: Arc<EntityStore>,
    tracker: Arc<InFlightTracker>,
    indexes: Arc<IndexRegistry>,
    bus: Arc<dyn EventBus>,
}

impl Reconciler {
    pub fn new(
        store: Arc<EntityStore>,
        tracker: Arc<InFlightTracker>,
        indexes: Arc<IndexRegistry>,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            store,
            tracker,
            indexes,
            bus,
        }
    }

    /// Ingest one payload and publish whatever it changed.
    pub fn ingest(&self, kind: EntityKind, raw: Value) -> IngestResult<Entity> {
        let mut pending = Pending::default();
        let result = self.apply(kind, raw, &mut pending);
        self.flush(kind, pending);
        result
    }

    /// Ingest a batch. Rejected payloads are reported and skipped; the rest
    /// of the batch still lands. Broadcasts are coalesced across the batch.
    pub fn ingest_batch(&self, kind: EntityKind, raws: Vec<Value>) -> BatchReport {
        let mut pending = Pending::default();
        let mut report = BatchReport::default();
        for (position, raw) in raws.into_iter().enumerate() {
            match self.apply(kind, raw, &mut pending) {
                Ok(entity) => report.entities.push(entity),
                Err(e) => {
                    warn!(%kind, position, error = %e, "Rejected payload");
                    report.rejected.push((position, e));
                }
            }
        }
        self.flush(kind, pending);
        debug!(
            %kind,
            accepted = report.accepted(),
            rejected = report.rejected.len(),
            "Ingested batch"
        );
        report
    }

    /// Ingest an origin-tagged message.
    ///
    /// Push frames that carry no entity (`Data` missing or not an object) are
    /// control frames and produce an empty report.
    pub fn ingest_message(&self, message: InboundMessage) -> BatchReport {
        let origin = message.origin();
        match message {
            InboundMessage::Fetched { kind, payload } => self.ingest_batch(kind, vec![payload]),
            InboundMessage::SearchResults { kind, hits } => self.ingest_batch(kind, hits),
            InboundMessage::Push(push) => {
                if !push.has_entity() {
                    debug!(
                        origin,
                        kind = %push.object,
                        event_type = %push.event_type,
                        "Skipping push frame without entity"
                    );
                    return BatchReport::default();
                }
                self.ingest_batch(push.object, vec![push.data])
            }
        }
    }

    /// Strip the envelope around `raw` and return its identity and fields.
    ///
    /// Accepted shapes are a bare object, a search hit
    /// (`{"_id": .., "_source": {..}}`) and a push frame
    /// (`{"Type": .., "Object": .., "Data": {..}}`). The identity field in the
    /// returned fields is always the string form of the identity.
    pub fn normalize(&self, kind: EntityKind, raw: Value) -> IngestResult<(String, Fields)> {
        let identity_field = self.store.identity_field();
        let mut fields = unwrap_envelope(kind, identity_field, raw)?;

        let id = match fields.get(identity_field) {
            None | Some(Value::Null) => {
                return Err(IngestError::MissingIdentity {
                    kind,
                    field: identity_field.to_string(),
                })
            }
            Some(value) => identity_from_value(value).ok_or_else(|| IngestError::InvalidIdentity {
                kind,
                reason: format!("{} must be a string or integer, got {}", identity_field, value),
            })?,
        };
        validate_identity(kind, &id).map_err(|_| IngestError::InvalidIdentity {
            kind,
            reason: format!("{} is blank", identity_field),
        })?;

        fields.insert(identity_field.to_string(), Value::String(id.clone()));
        Ok((id, fields))
    }

    fn apply(&self, kind: EntityKind, raw: Value, pending: &mut Pending) -> IngestResult<Entity> {
        let (id, fields) = self.normalize(kind, raw)?;
        let indexes = self.indexes.for_kind(kind);

        let (entity, deltas) = self.store.upsert_observed(
            kind,
            &id,
            &fields,
            |previous| {
                indexes
                    .iter()
                    .map(|index| previous.and_then(|e| e.get(index.attribute()).cloned()))
                    .collect::<Vec<Option<Value>>>()
            },
            |previous, current| {
                indexes
                    .iter()
                    .zip(previous)
                    .map(|(index, before)| {
                        index.on_change(&id, before.as_ref(), current.get(index.attribute()))
                    })
                    .collect::<Vec<IndexDelta>>()
            },
        )?;

        for (index, delta) in indexes.iter().zip(deltas) {
            if delta.is_change() {
                pending.flipped(index.signal(), &id);
            }
        }
        if self.tracker.resolve(kind, &id) {
            pending.arrived.push(id);
        }
        Ok(entity)
    }

    fn flush(&self, kind: EntityKind, pending: Pending) {
        for (signal, ids) in pending.changed {
            debug!(%kind, %signal, count = ids.len(), "Broadcasting index change");
            self.bus.publish(BusEvent::Changed {
                object: kind,
                signal,
                ids,
            });
        }
        if !pending.arrived.is_empty() {
            debug!(%kind, count = pending.arrived.len(), "Broadcasting arrival");
            self.bus.publish(BusEvent::Arrived {
                object: kind,
                ids: pending.arrived,
            });
        }
    }
}

fn unwrap_envelope(kind: EntityKind, identity_field: &str, raw: Value) -> IngestResult<Fields> {
    let Value::Object(mut map) = raw else {
        return Err(IngestError::MalformedPayload {
            kind,
            reason: "payload is not an object".to_string(),
        });
    };

    if matches!(map.get("_source"), Some(Value::Object(_))) {
        let hit_id = map.remove("_id");
        let Some(Value::Object(mut source)) = map.remove("_source") else {
            return Err(IngestError::MalformedPayload {
                kind,
                reason: "search hit has no _source object".to_string(),
            });
        };
        if let Some(hit_id) = hit_id {
            if matches!(source.get(identity_field), None | Some(Value::Null)) {
                source.insert(identity_field.to_string(), hit_id);
            }
        }
        return Ok(source);
    }

    if map.contains_key("Object") && matches!(map.get("Data"), Some(Value::Object(_))) {
        if let Some(object) = map.get("Object").and_then(Value::as_str) {
            let framed: EntityKind = object.parse().map_err(|_| IngestError::UnknownKind {
                name: object.to_string(),
            })?;
            if framed != kind {
                return Err(IngestError::MalformedPayload {
                    kind,
                    reason: format!("push frame is for {}", framed),
                });
            }
        }
        if let Some(Value::Object(data)) = map.remove("Data") {
            return Ok(data);
        }
    }

    Ok(map)
}
