//! Secondary indexes over boolean-like attributes.
//!
//! An index is the set `{ id : polarity.is_member(truthy(entity[attribute])) }`
//! for one kind. It is maintained incrementally by the reconciler, inside the
//! kind's store write lock, so at any quiescent point it equals the predicate
//! evaluated over the whole store.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tether_core::{truthy, CacheConfig, Entity, EntityKind, IndexConfig, IndexPolarity};
use tracing::trace;

/// Effect of one `on_change` call on an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexDelta {
    Added,
    Removed,
    Unchanged,
}

impl IndexDelta {
    pub fn is_change(&self) -> bool {
        !matches!(self, IndexDelta::Unchanged)
    }
}

/// A derived identity set for one kind and attribute.
#[derive(Debug)]
pub struct SecondaryIndex {
    config: IndexConfig,
    members: RwLock<HashSet<String>>,
}

impl SecondaryIndex {
    pub fn new(config: IndexConfig) -> Self {
        Self {
            config,
            members: RwLock::new(HashSet::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn kind(&self) -> EntityKind {
        self.config.kind
    }

    pub fn attribute(&self) -> &str {
        &self.config.attribute
    }

    pub fn polarity(&self) -> IndexPolarity {
        self.config.polarity
    }

    /// Signal name used for the `Changed` broadcast.
    pub fn signal(&self) -> &str {
        &self.config.signal
    }

    /// Membership predicate for a stored entity.
    pub fn predicate(&self, entity: &Entity) -> bool {
        self.config
            .polarity
            .is_member(truthy(entity.get(&self.config.attribute)))
    }

    /// Bring `id`'s membership in line with the attribute's current value.
    ///
    /// `previous` is the attribute before the upsert (`None` when the entity
    /// is new or the attribute was unset). Membership is decided from
    /// `current` alone, so replaying the same value is a no-op.
    pub fn on_change(&self, id: &str, previous: Option<&Value>, current: Option<&Value>) -> IndexDelta {
        let member = self.config.polarity.is_member(truthy(current));
        let mut members = match self.members.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let delta = if member {
            if members.insert(id.to_string()) {
                IndexDelta::Added
            } else {
                IndexDelta::Unchanged
            }
        } else if members.remove(id) {
            IndexDelta::Removed
        } else {
            IndexDelta::Unchanged
        };
        if delta.is_change() {
            trace!(
                index = %self.config.name,
                id,
                previous = ?previous,
                current = ?current,
                ?delta,
                "Index membership changed"
            );
        }
        delta
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().contains(id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Copy of the current member set.
    pub fn snapshot(&self) -> HashSet<String> {
        self.read().clone()
    }

    pub fn clear(&self) {
        match self.members.write() {
            Ok(mut guard) => guard.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }

    // The set is only ever mutated by insert/remove/clear, none of which can
    // leave it half-updated, so a poisoned lock still guards a valid set.
    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashSet<String>> {
        match self.members.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// All configured indexes, grouped by kind.
#[derive(Debug, Default)]
pub struct IndexRegistry {
    by_kind: HashMap<EntityKind, Vec<Arc<SecondaryIndex>>>,
}

impl IndexRegistry {
    pub fn new(config: &CacheConfig) -> Self {
        let mut by_kind: HashMap<EntityKind, Vec<Arc<SecondaryIndex>>> = HashMap::new();
        for index in &config.indexes {
            by_kind
                .entry(index.kind)
                .or_default()
                .push(Arc::new(SecondaryIndex::new(index.clone())));
        }
        Self { by_kind }
    }

    /// Indexes tracking attributes of `kind`.
    pub fn for_kind(&self, kind: EntityKind) -> &[Arc<SecondaryIndex>] {
        self.by_kind.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Look an index up by name.
    pub fn get(&self, name: &str) -> Option<Arc<SecondaryIndex>> {
        self.by_kind
            .values()
            .flatten()
            .find(|index| index.name() == name)
            .cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<SecondaryIndex>> {
        self.by_kind.values().flatten()
    }

    pub fn clear(&self) {
        for index in self.iter() {
            index.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn unread() -> SecondaryIndex {
        SecondaryIndex::new(IndexConfig {
            name: "unread".to_string(),
            kind: EntityKind::Notification,
            attribute: "Read".to_string(),
            polarity: IndexPolarity::MemberWhenFalse,
            signal: "UpdateUnreadNotifications".to_string(),
        })
    }

    #[test]
    fn test_member_when_false_tracks_unread() {
        let index = unread();
        assert_eq!(index.on_change("n1", None, Some(&json!(false))), IndexDelta::Added);
        assert!(index.contains("n1"));
        assert_eq!(
            index.on_change("n1", Some(&json!(false)), Some(&json!(false))),
            IndexDelta::Unchanged
        );
        assert_eq!(
            index.on_change("n1", Some(&json!(false)), Some(&json!(true))),
            IndexDelta::Removed
        );
        assert!(index.is_empty());
    }

    #[test]
    fn test_unset_attribute_counts_as_false() {
        let index = unread();
        assert_eq!(index.on_change("n2", None, None), IndexDelta::Added);
    }

    #[test]
    fn test_member_when_true_polarity() {
        let index = SecondaryIndex::new(IndexConfig {
            name: "flagged".to_string(),
            kind: EntityKind::Item,
            attribute: "Flagged".to_string(),
            polarity: IndexPolarity::MemberWhenTrue,
            signal: "UpdateFlaggedItems".to_string(),
        });
        assert_eq!(index.on_change("i1", None, None), IndexDelta::Unchanged);
        assert_eq!(index.on_change("i1", None, Some(&json!(1))), IndexDelta::Added);
        assert_eq!(
            index.on_change("i1", Some(&json!(1)), Some(&json!(0))),
            IndexDelta::Removed
        );
    }

    #[test]
    fn test_predicate_matches_entity() {
        let index = unread();
        let mut entity = Entity::new(EntityKind::Notification, "n1");
        assert!(index.predicate(&entity));
        entity.set("Read", json!(true));
        assert!(!index.predicate(&entity));
    }

    #[test]
    fn test_registry_groups_by_kind() {
        let registry = IndexRegistry::new(&CacheConfig::standard(Duration::from_secs(1)));
        assert_eq!(registry.for_kind(EntityKind::Notification).len(), 1);
        assert!(registry.for_kind(EntityKind::Site).is_empty());
        let index = registry.get("unread_notifications").unwrap();
        index.on_change("n1", None, None);
        registry.clear();
        assert!(index.is_empty());
    }
}
