//! Tether Core - Entity Types
//!
//! Pure data structures shared by every Tether crate: the entity kind tag,
//! identity validation, the schema-less entity record, the error taxonomy
//! and the cache configuration. No locking or I/O lives here.

pub mod config;
pub mod entity;
pub mod error;
pub mod identity;

pub use config::{CacheConfig, IndexConfig, IndexPolarity, KindDefaults, RelationConfig};
pub use entity::{truthy, Entity, Fields};
pub use error::{ConfigError, IngestError, IngestResult, StoreError, StoreResult, TetherError};
pub use identity::{identity_from_value, validate_identity, EntityKind};
