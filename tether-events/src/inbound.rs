//! Inbound payload envelopes.
//!
//! Payloads reach the cache from two channels: the request/response pull
//! feed (single fetches and search batches) and the real-time push feed.
//! Both are reduced to an [`InboundMessage`] before reconciliation, so the
//! reconciler never needs to know which socket a payload came from.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tether_core::{EntityKind, IngestError};

/// A push-feed frame, e.g.
/// `{"Type": "Updated", "Object": "Notification", "Data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    #[serde(rename = "Type")]
    pub event_type: String,
    #[serde(rename = "Object")]
    pub object: EntityKind,
    /// Entity payload; control frames carry none.
    #[serde(rename = "Data", default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl PushMessage {
    /// Whether the frame carries an entity payload at all.
    pub fn has_entity(&self) -> bool {
        self.data.is_object()
    }
}

/// One unit of inbound traffic, tagged with its origin.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Response to a single-object fetch.
    Fetched { kind: EntityKind, payload: Value },
    /// A page of search results; each hit may still carry its wrapper.
    SearchResults { kind: EntityKind, hits: Vec<Value> },
    /// Unsolicited push-feed frame.
    Push(PushMessage),
}

impl InboundMessage {
    /// Origin label for logging.
    pub fn origin(&self) -> &'static str {
        match self {
            InboundMessage::Fetched { .. } => "fetch",
            InboundMessage::SearchResults { .. } => "search",
            InboundMessage::Push(_) => "push",
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            InboundMessage::Fetched { kind, .. } | InboundMessage::SearchResults { kind, .. } => {
                *kind
            }
            InboundMessage::Push(push) => push.object,
        }
    }

    /// Build a `SearchResults` message from a raw search response body.
    pub fn search(kind: EntityKind, body: Value) -> Result<Self, IngestError> {
        Ok(InboundMessage::SearchResults {
            kind,
            hits: search_hits(kind, body)?,
        })
    }
}

/// Extract the hit list from a search response body.
///
/// Accepted envelopes: a bare array, `{"Hits": [...]}` and
/// `{"hits": {"hits": [...]}}`.
pub fn search_hits(kind: EntityKind, body: Value) -> Result<Vec<Value>, IngestError> {
    match body {
        Value::Array(hits) => Ok(hits),
        Value::Object(mut map) => {
            if let Some(Value::Array(hits)) = map.remove("Hits") {
                return Ok(hits);
            }
            match map.remove("hits") {
                Some(Value::Array(hits)) => Ok(hits),
                Some(Value::Object(mut inner)) => match inner.remove("hits") {
                    Some(Value::Array(hits)) => Ok(hits),
                    _ => Err(malformed(kind, "search envelope has no hit array")),
                },
                _ => Err(malformed(kind, "search envelope has no hit array")),
            }
        }
        other => Err(malformed(
            kind,
            &format!("search body must be an array or object, got {}", type_name(&other)),
        )),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn malformed(kind: EntityKind, reason: &str) -> IngestError {
    IngestError::MalformedPayload {
        kind,
        reason: reason.to_string(),
    }
}
