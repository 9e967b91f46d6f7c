//! Error types for Tether operations

use crate::EntityKind;
use thiserror::Error;

/// Entity store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Invalid identity for {kind}: {id:?}")]
    InvalidIdentity { kind: EntityKind, id: String },

    #[error("Store lock poisoned for {kind}")]
    LockPoisoned { kind: EntityKind },
}

/// Payload ingestion errors.
///
/// Every variant is local to one payload: a batch keeps going after any of them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IngestError {
    #[error("Payload for {kind} has no identity field {field:?}")]
    MissingIdentity { kind: EntityKind, field: String },

    #[error("Payload for {kind} has an unusable identity: {reason}")]
    InvalidIdentity { kind: EntityKind, reason: String },

    #[error("Malformed payload for {kind}: {reason}")]
    MalformedPayload { kind: EntityKind, reason: String },

    #[error("Unknown entity kind in payload: {name}")]
    UnknownKind { name: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Unknown entity kind: {name}")]
    UnknownEntityKind { name: String },
}

/// Master error type for all Tether errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TetherError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for ingestion.
pub type IngestResult<T> = Result<T, IngestError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display_invalid_identity() {
        let err = StoreError::InvalidIdentity {
            kind: EntityKind::Organization,
            id: String::new(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Invalid identity"));
        assert!(msg.contains("Organization"));
    }

    #[test]
    fn test_ingest_error_display_missing_identity() {
        let err = IngestError::MissingIdentity {
            kind: EntityKind::Notification,
            field: "ID".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("no identity field"));
        assert!(msg.contains("Notification"));
        assert!(msg.contains("\"ID\""));
    }

    #[test]
    fn test_store_error_converts_into_ingest_error() {
        let err: IngestError = StoreError::LockPoisoned {
            kind: EntityKind::Site,
        }
        .into();
        assert!(matches!(err, IngestError::Store(StoreError::LockPoisoned { .. })));
    }

    #[test]
    fn test_tether_error_wraps_config_error() {
        let err: TetherError = ConfigError::MissingRequired {
            field: "request_timeout_ms".to_string(),
        }
        .into();
        let msg = format!("{}", err);
        assert!(msg.starts_with("Config error"));
        assert!(msg.contains("request_timeout_ms"));
    }
}
