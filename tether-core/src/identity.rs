//! Identity types for Tether entities

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::{ConfigError, StoreError};

/// Entity type discriminator used as the store's partition key.
///
/// The cache carries no kind-specific logic: the tag only selects the shard,
/// the seed defaults, the indexes and the relation catalog entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Organization,
    Module,
    ContentType,
    Site,
    Crawler,
    Item,
    Notification,
    Counter,
}

impl EntityKind {
    /// Every kind, in declaration order.
    pub const ALL: [EntityKind; 8] = [
        EntityKind::Organization,
        EntityKind::Module,
        EntityKind::ContentType,
        EntityKind::Site,
        EntityKind::Crawler,
        EntityKind::Item,
        EntityKind::Notification,
        EntityKind::Counter,
    ];

    /// Wire name of the kind, as it appears in the `Object` field of bus events.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Organization => "Organization",
            EntityKind::Module => "Module",
            EntityKind::ContentType => "ContentType",
            EntityKind::Site => "Site",
            EntityKind::Crawler => "Crawler",
            EntityKind::Item => "Item",
            EntityKind::Notification => "Notification",
            EntityKind::Counter => "Counter",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownEntityKind {
                name: s.to_string(),
            })
    }
}

/// Validate an identity string for the given kind.
///
/// Identities are assigned by the origin system and compared exactly; the only
/// rejection is an identity that is empty or whitespace-only.
pub fn validate_identity(kind: EntityKind, id: &str) -> Result<(), StoreError> {
    if id.trim().is_empty() {
        return Err(StoreError::InvalidIdentity {
            kind,
            id: id.to_string(),
        });
    }
    Ok(())
}

/// Read an identity out of a decoded JSON value.
///
/// Strings are taken verbatim and integers are stringified. Returns `None` for
/// any other shape so the caller can decide how to classify it.
pub fn identity_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}
