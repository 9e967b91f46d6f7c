//! Tether Test Utilities
//!
//! Shared test infrastructure for the Tether workspace:
//! - A recording bus that captures everything the cache publishes
//! - Proptest generators for kinds, identities and payloads
//! - Payload fixtures for common scenarios
//! - Assertions over captured bus traffic

use std::sync::Mutex;

// Re-export core types for convenience
pub use tether_core::{
    CacheConfig, Entity, EntityKind, Fields, IngestError, IndexConfig, IndexPolarity,
};
pub use tether_events::{BusEvent, EventBus};

// ============================================================================
// MOCK BUS
// ============================================================================

/// Event bus that records every published event in order.
#[derive(Debug, Default)]
pub struct RecordingBus {
    events: Mutex<Vec<BusEvent>>,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything published so far.
    pub fn events(&self) -> Vec<BusEvent> {
        self.lock().clone()
    }

    /// Drain the recorded events.
    pub fn take(&self) -> Vec<BusEvent> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// `RequestInfo` events for `(kind, id)`.
    pub fn request_count(&self, kind: EntityKind, id: &str) -> usize {
        self.lock()
            .iter()
            .filter(|event| {
                matches!(event, BusEvent::RequestInfo { object, id: requested }
                    if *object == kind && requested == id)
            })
            .count()
    }

    /// `Changed` events carrying `signal`.
    pub fn changed_count(&self, signal: &str) -> usize {
        self.lock()
            .iter()
            .filter(|event| matches!(event, BusEvent::Changed { signal: s, .. } if s == signal))
            .count()
    }

    /// `Arrived` events for `kind`.
    pub fn arrived_count(&self, kind: EntityKind) -> usize {
        self.lock()
            .iter()
            .filter(|event| matches!(event, BusEvent::Arrived { object, .. } if *object == kind))
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<BusEvent>> {
        match self.events.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl EventBus for RecordingBus {
    fn publish(&self, event: BusEvent) {
        self.lock().push(event);
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Tether payloads.

    use super::*;
    use proptest::prelude::*;
    use serde_json::{json, Value};

    /// Any entity kind.
    pub fn arb_kind() -> impl Strategy<Value = EntityKind> {
        prop::sample::select(EntityKind::ALL.to_vec())
    }

    /// A valid identity. Drawn from a small alphabet so generated batches
    /// revisit the same identities.
    pub fn arb_identity() -> impl Strategy<Value = String> {
        prop_oneof![
            "[a-e][0-9]",
            (0u32..20).prop_map(|n| format!("id-{}", n)),
        ]
    }

    /// Boolean-like attribute readings in the shapes payloads actually use.
    pub fn arb_flag_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<bool>().prop_map(Value::Bool),
            (0i64..3).prop_map(|n| json!(n)),
            prop::sample::select(vec!["true", "false", "1", "0", "TRUE", ""])
                .prop_map(|s| json!(s)),
            Just(Value::Null),
        ]
    }

    /// A bare payload with an identity and a handful of scalar fields.
    pub fn arb_payload() -> impl Strategy<Value = Value> {
        (
            arb_identity(),
            prop::collection::btree_map("[A-Z][a-z]{1,6}", any::<i32>(), 0..4),
        )
            .prop_map(|(id, extra)| {
                let mut map = serde_json::Map::new();
                for (key, value) in extra {
                    map.insert(key, json!(value));
                }
                map.insert("ID".to_string(), json!(id));
                Value::Object(map)
            })
    }

    /// A notification payload that may or may not carry `Read`.
    pub fn arb_notification_payload() -> impl Strategy<Value = Value> {
        (arb_identity(), prop::option::of(arb_flag_value())).prop_map(|(id, read)| {
            let mut map = serde_json::Map::new();
            map.insert("ID".to_string(), json!(id));
            if let Some(read) = read {
                map.insert("Read".to_string(), read);
            }
            Value::Object(map)
        })
    }

    /// A batch of notification payloads.
    pub fn arb_notification_batch() -> impl Strategy<Value = Vec<Value>> {
        prop::collection::vec(arb_notification_payload(), 0..24)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built payloads and configurations.

    use super::*;
    use serde_json::{json, Value};
    use std::time::Duration;

    /// Conventional configuration with a 30s in-flight timeout.
    pub fn standard_config() -> CacheConfig {
        CacheConfig::standard(Duration::from_secs(30))
    }

    /// Field map from a JSON object literal.
    #[track_caller]
    pub fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            other => panic!("expected a JSON object, got {}", other),
        }
    }

    pub fn organization(id: &str, title: &str) -> Value {
        json!({"ID": id, "Title": title})
    }

    pub fn notification(id: &str, read: bool) -> Value {
        json!({"ID": id, "Read": read, "Message": format!("notification {}", id)})
    }

    /// A site owned by `organization_id` and registered under `system_id`.
    pub fn site(id: &str, organization_id: &str, system_id: &str) -> Entity {
        let mut entity = Entity::new(EntityKind::Site, id);
        entity.merge(&fields(json!({
            "ID": id,
            "OrganizationID": organization_id,
            "SystemID": system_id,
        })));
        entity
    }

    /// A search response in the nested `hits.hits` envelope.
    pub fn search_response(hits: &[(&str, Value)]) -> Value {
        let hits: Vec<Value> = hits
            .iter()
            .map(|(id, source)| json!({"_id": id, "_source": source}))
            .collect();
        json!({"hits": {"total": hits.len(), "hits": hits}})
    }

    /// A push frame for `kind` carrying `data`.
    pub fn push_frame(event_type: &str, kind: EntityKind, data: Value) -> Value {
        json!({"Type": event_type, "Object": kind.as_str(), "Data": data})
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over captured bus traffic.

    use super::*;

    /// Assert exactly one `RequestInfo` was published for `(kind, id)`.
    #[track_caller]
    pub fn assert_requested_once(bus: &RecordingBus, kind: EntityKind, id: &str) {
        let count = bus.request_count(kind, id);
        assert_eq!(
            count, 1,
            "Expected one RequestInfo for {}/{}, got {}: {:?}",
            kind, id, count, bus.events()
        );
    }

    /// Assert the `IDs` of the only `Changed` event for `signal`.
    #[track_caller]
    pub fn assert_single_change(bus: &RecordingBus, signal: &str, expected: &[&str]) {
        let changes: Vec<Vec<String>> = bus
            .events()
            .into_iter()
            .filter_map(|event| match event {
                BusEvent::Changed { signal: s, ids, .. } if s == signal => Some(ids),
                _ => None,
            })
            .collect();
        assert_eq!(changes.len(), 1, "Expected one Changed for {}, got {:?}", signal, changes);
        assert_eq!(changes[0], expected);
    }

    /// Assert an ingestion error is `MissingIdentity`.
    #[track_caller]
    pub fn assert_missing_identity(err: &IngestError) {
        match err {
            IngestError::MissingIdentity { .. } => {}
            other => panic!("Expected MissingIdentity, got: {:?}", other),
        }
    }
}
