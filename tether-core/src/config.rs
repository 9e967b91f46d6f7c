//! Configuration types

use crate::{ConfigError, EntityKind, Fields};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Which attribute value puts an identity into a secondary index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexPolarity {
    /// Member while the attribute is false or unset (e.g. unread = `Read` false).
    MemberWhenFalse,
    /// Member while the attribute is true.
    MemberWhenTrue,
}

impl IndexPolarity {
    /// Membership for a given attribute reading.
    pub fn is_member(&self, flag: bool) -> bool {
        match self {
            IndexPolarity::MemberWhenFalse => !flag,
            IndexPolarity::MemberWhenTrue => flag,
        }
    }
}

/// Seed fields for newly created entities of one kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KindDefaults {
    pub kind: EntityKind,
    pub fields: Fields,
}

/// A secondary index over a boolean-like attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexConfig {
    pub name: String,
    pub kind: EntityKind,
    pub attribute: String,
    pub polarity: IndexPolarity,
    /// Name carried by the `Changed` broadcast when membership flips.
    pub signal: String,
}

/// A foreign-key relation: `owner.field` holds the identity of a `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelationConfig {
    pub owner: EntityKind,
    pub field: String,
    pub target: EntityKind,
}

/// Master cache configuration.
/// The timing values are required - there is no built-in in-flight timeout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// How long an in-flight request entry lives before it may be re-requested.
    pub request_timeout_ms: u64,
    /// How often the background sweep reclaims expired in-flight entries.
    pub sweep_interval_ms: u64,
    /// Capacity of the broadcast bus.
    pub bus_capacity: usize,
    /// Payload field carrying the identity.
    pub identity_field: String,
    #[serde(default)]
    pub defaults: Vec<KindDefaults>,
    #[serde(default)]
    pub indexes: Vec<IndexConfig>,
    #[serde(default)]
    pub relations: Vec<RelationConfig>,
}

impl CacheConfig {
    /// Build the conventional configuration for a client session.
    ///
    /// The caller still owns the in-flight timeout; the sweep runs at a quarter
    /// of it, never faster than every 100ms.
    pub fn standard(request_timeout: Duration) -> Self {
        let request_timeout_ms = request_timeout.as_millis() as u64;
        Self {
            request_timeout_ms,
            sweep_interval_ms: (request_timeout_ms / 4).max(100),
            bus_capacity: 1024,
            identity_field: "ID".to_string(),
            defaults: vec![],
            indexes: vec![IndexConfig {
                name: "unread_notifications".to_string(),
                kind: EntityKind::Notification,
                attribute: "Read".to_string(),
                polarity: IndexPolarity::MemberWhenFalse,
                signal: "UpdateUnreadNotifications".to_string(),
            }],
            relations: vec![
                relation(EntityKind::Module, "OrganizationID", EntityKind::Organization),
                relation(EntityKind::Site, "OrganizationID", EntityKind::Organization),
                relation(EntityKind::Site, "SystemID", EntityKind::Organization),
                relation(EntityKind::ContentType, "ModuleID", EntityKind::Module),
                relation(EntityKind::Crawler, "SiteID", EntityKind::Site),
                relation(EntityKind::Item, "ContentTypeID", EntityKind::ContentType),
                relation(EntityKind::Item, "SiteID", EntityKind::Site),
                relation(EntityKind::Notification, "SystemID", EntityKind::Organization),
                relation(EntityKind::Counter, "OrganizationID", EntityKind::Organization),
            ],
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Seed fields for a kind, if any are configured.
    pub fn defaults_for(&self, kind: EntityKind) -> Option<&Fields> {
        self.defaults
            .iter()
            .find(|d| d.kind == kind)
            .map(|d| &d.fields)
    }

    /// Target kind of a catalogued relation.
    pub fn relation_target(&self, owner: EntityKind, field: &str) -> Option<EntityKind> {
        self.relations
            .iter()
            .find(|r| r.owner == owner && r.field == field)
            .map(|r| r.target)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_ms == 0 {
            return Err(invalid("request_timeout_ms", "must be > 0"));
        }
        if self.sweep_interval_ms == 0 {
            return Err(invalid("sweep_interval_ms", "must be > 0"));
        }
        if self.bus_capacity == 0 {
            return Err(invalid("bus_capacity", "must be > 0"));
        }
        if self.identity_field.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "identity_field".to_string(),
            });
        }

        let mut seen_kinds = HashSet::new();
        for defaults in &self.defaults {
            if !seen_kinds.insert(defaults.kind) {
                return Err(invalid(
                    "defaults",
                    &format!("{} configured more than once", defaults.kind),
                ));
            }
        }

        let mut seen_names = HashSet::new();
        for index in &self.indexes {
            if index.name.trim().is_empty() {
                return Err(invalid("indexes.name", "must not be empty"));
            }
            if !seen_names.insert(index.name.as_str()) {
                return Err(invalid(
                    "indexes.name",
                    &format!("duplicate index {:?}", index.name),
                ));
            }
            if index.attribute.trim().is_empty() {
                return Err(invalid("indexes.attribute", "must not be empty"));
            }
            if index.signal.trim().is_empty() {
                return Err(invalid("indexes.signal", "must not be empty"));
            }
        }

        for rel in &self.relations {
            if rel.field.trim().is_empty() {
                return Err(invalid("relations.field", "must not be empty"));
            }
            if rel.field == self.identity_field {
                return Err(invalid(
                    "relations.field",
                    "the identity field cannot be a foreign key",
                ));
            }
        }
        Ok(())
    }
}

fn relation(owner: EntityKind, field: &str, target: EntityKind) -> RelationConfig {
    RelationConfig {
        owner,
        field: field.to_string(),
        target,
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_standard_config_is_valid() {
        let config = CacheConfig::standard(Duration::from_secs(30));
        assert!(config.validate().is_ok());
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.sweep_interval(), Duration::from_millis(7_500));
        assert_eq!(
            config.relation_target(EntityKind::Site, "SystemID"),
            Some(EntityKind::Organization)
        );
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = CacheConfig::standard(Duration::from_secs(5));
        config.request_timeout_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "request_timeout_ms"
        ));
    }

    #[test]
    fn test_duplicate_index_names_rejected() {
        let mut config = CacheConfig::standard(Duration::from_secs(5));
        let dup = config.indexes[0].clone();
        config.indexes.push(dup);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_identity_field_cannot_be_relation() {
        let mut config = CacheConfig::standard(Duration::from_secs(5));
        config.relations.push(relation(
            EntityKind::Item,
            "ID",
            EntityKind::Organization,
        ));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parses_from_toml() {
        let raw = r#"
            request_timeout_ms = 15000
            sweep_interval_ms = 1000
            bus_capacity = 64
            identity_field = "ID"

            [[defaults]]
            kind = "Notification"
            fields = { Read = false }

            [[indexes]]
            name = "unread"
            kind = "Notification"
            attribute = "Read"
            polarity = "member_when_false"
            signal = "UpdateUnreadNotifications"

            [[relations]]
            owner = "Site"
            field = "SystemID"
            target = "Organization"
        "#;
        let config: CacheConfig = toml::from_str(raw).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.defaults_for(EntityKind::Notification).and_then(|f| f.get("Read")),
            Some(&serde_json::Value::Bool(false))
        );
        assert_eq!(config.indexes[0].polarity, IndexPolarity::MemberWhenFalse);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let raw = r#"
            request_timeout_ms = 15000
            sweep_interval_ms = 1000
            bus_capacity = 64
            identity_field = "ID"
            retry_forever = true
        "#;
        assert!(toml::from_str::<CacheConfig>(raw).is_err());
    }

    proptest! {
        #[test]
        fn standard_config_valid_for_any_timeout(ms in 1u64..10_000_000) {
            let config = CacheConfig::standard(Duration::from_millis(ms));
            prop_assert!(config.validate().is_ok());
            prop_assert!(config.sweep_interval_ms >= 100);
        }

        #[test]
        fn polarity_memberships_are_complementary(flag in any::<bool>()) {
            prop_assert_ne!(
                IndexPolarity::MemberWhenFalse.is_member(flag),
                IndexPolarity::MemberWhenTrue.is_member(flag)
            );
        }
    }
}
