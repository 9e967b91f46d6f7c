//! The cached entity record.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::EntityKind;

/// Field map of a decoded payload.
pub type Fields = Map<String, Value>;

/// A cached entity: a kind tag, an identity and an open set of fields.
///
/// The record is intentionally schema-less. Foreign keys are ordinary fields
/// holding the identity of another entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    kind: EntityKind,
    id: String,
    fields: Fields,
}

impl Entity {
    /// Create an entity with no fields.
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            fields: Fields::new(),
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// String value of a field, if it is a string.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    /// Shallow merge: every top-level field in `partial` overwrites the
    /// current value, fields absent from `partial` are left alone.
    ///
    /// Nested objects are replaced, not merged.
    pub fn merge(&mut self, partial: &Fields) {
        for (key, value) in partial {
            self.fields.insert(key.clone(), value.clone());
        }
    }

    /// Set a single field.
    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }
}

/// Interpret a loosely typed attribute as a flag.
///
/// `Bool` maps directly, numbers are true when non-zero, strings when they
/// read `"true"` or `"1"`. Absent, null and anything else count as unset.
pub fn truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true") || s == "1",
        _ => false,
    }
}
