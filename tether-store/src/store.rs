//! Entity store: one identity-keyed shard per entity kind.
//!
//! Every kind gets its own `RwLock`, so upserts on different kinds never
//! contend and lookups only take the read side. The shard table itself is
//! built once at construction and never resized, which keeps the outer map
//! lock-free.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;
use tether_core::{
    validate_identity, CacheConfig, Entity, EntityKind, Fields, StoreError, StoreResult,
};
use tracing::trace;

#[derive(Debug, Default)]
struct Shard {
    entities: HashMap<String, Entity>,
}

/// Statistics about store usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Lookups that found an entity.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Upserts that created a new entity.
    pub creates: u64,
    /// Upserts that merged into an existing entity.
    pub merges: u64,
    /// Entities currently held, across all kinds.
    pub entry_count: u64,
}

impl StoreStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    creates: AtomicU64,
    merges: AtomicU64,
}

/// Keyed registry of the latest known instance of every entity.
///
/// Upsert is the only mutation. Entities are never removed individually;
/// [`EntityStore::clear`] drops everything at session teardown.
#[derive(Debug)]
pub struct EntityStore {
    shards: HashMap<EntityKind, RwLock<Shard>>,
    defaults: HashMap<EntityKind, Fields>,
    identity_field: String,
    counters: Counters,
}

impl EntityStore {
    /// Create an empty store with seed defaults taken from `config`.
    pub fn new(config: &CacheConfig) -> Self {
        let shards = EntityKind::ALL
            .iter()
            .map(|kind| (*kind, RwLock::new(Shard::default())))
            .collect();
        let defaults = config
            .defaults
            .iter()
            .map(|d| (d.kind, d.fields.clone()))
            .collect();
        Self {
            shards,
            defaults,
            identity_field: config.identity_field.clone(),
            counters: Counters::default(),
        }
    }

    /// Payload field that carries the identity.
    pub fn identity_field(&self) -> &str {
        &self.identity_field
    }

    /// Merge `fields` onto the entity `(kind, id)`, creating it if needed.
    ///
    /// A new entity is seeded with the kind's defaults before `fields` are
    /// applied. Returns the entity as stored after the merge.
    pub fn upsert(&self, kind: EntityKind, id: &str, fields: &Fields) -> StoreResult<Entity> {
        self.upsert_observed(kind, id, fields, |_| (), |_, _| ())
            .map(|(entity, _)| entity)
    }

    /// Upsert with hooks that run inside the kind's write lock.
    ///
    /// `before` sees the previous instance (if any), `after` receives what
    /// `before` returned plus the merged instance. Both run while the write
    /// lock is held, so anything they derive is linearized with the upsert.
    /// They must not touch the store.
    pub fn upsert_observed<B, A, P, R>(
        &self,
        kind: EntityKind,
        id: &str,
        fields: &Fields,
        before: B,
        after: A,
    ) -> StoreResult<(Entity, R)>
    where
        B: FnOnce(Option<&Entity>) -> P,
        A: FnOnce(P, &Entity) -> R,
    {
        validate_identity(kind, id)?;
        let mut shard = self.write(kind)?;

        let captured = before(shard.entities.get(id));
        let entity = match shard.entities.entry(id.to_string()) {
            Entry::Occupied(mut occupied) => {
                let existing = occupied.get_mut();
                existing.merge(fields);
                existing.set(self.identity_field.clone(), Value::String(id.to_string()));
                self.counters.merges.fetch_add(1, Ordering::Relaxed);
                trace!(%kind, id, fields = fields.len(), "Merged entity");
                existing.clone()
            }
            Entry::Vacant(vacant) => {
                let mut created = Entity::new(kind, id);
                if let Some(defaults) = self.defaults.get(&kind) {
                    created.merge(defaults);
                }
                created.merge(fields);
                created.set(self.identity_field.clone(), Value::String(id.to_string()));
                vacant.insert(created.clone());
                self.counters.creates.fetch_add(1, Ordering::Relaxed);
                trace!(%kind, id, fields = fields.len(), "Created entity");
                created
            }
        };

        let derived = after(captured, &entity);
        Ok((entity, derived))
    }

    /// Look up an entity by identity.
    pub fn get(&self, kind: EntityKind, id: &str) -> StoreResult<Option<Entity>> {
        validate_identity(kind, id)?;
        let found = self.read(kind)?.entities.get(id).cloned();
        let counter = if found.is_some() {
            &self.counters.hits
        } else {
            &self.counters.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(found)
    }

    /// Whether an entity is cached. Blank identities are never cached.
    pub fn contains(&self, kind: EntityKind, id: &str) -> bool {
        if validate_identity(kind, id).is_err() {
            return false;
        }
        self.read(kind)
            .map(|shard| shard.entities.contains_key(id))
            .unwrap_or(false)
    }

    /// Copy-on-read snapshot of every entity of a kind.
    ///
    /// The snapshot is taken under the read lock; upserts that land after it
    /// returns are not reflected in it. Order is unspecified.
    pub fn all(&self, kind: EntityKind) -> StoreResult<Vec<Entity>> {
        Ok(self.read(kind)?.entities.values().cloned().collect())
    }

    /// Number of cached entities of a kind.
    pub fn len(&self, kind: EntityKind) -> usize {
        self.read(kind).map(|s| s.entities.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        EntityKind::ALL.iter().all(|kind| self.len(*kind) == 0)
    }

    /// Drop every cached entity. Statistics are kept.
    pub fn clear(&self) -> StoreResult<()> {
        for kind in EntityKind::ALL {
            self.write(kind)?.entities.clear();
        }
        Ok(())
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            creates: self.counters.creates.load(Ordering::Relaxed),
            merges: self.counters.merges.load(Ordering::Relaxed),
            entry_count: EntityKind::ALL
                .iter()
                .map(|kind| self.len(*kind) as u64)
                .sum(),
        }
    }

    fn read(&self, kind: EntityKind) -> StoreResult<RwLockReadGuard<'_, Shard>> {
        self.shard(kind)?
            .read()
            .map_err(|_| StoreError::LockPoisoned { kind })
    }

    fn write(&self, kind: EntityKind) -> StoreResult<RwLockWriteGuard<'_, Shard>> {
        self.shard(kind)?
            .write()
            .map_err(|_| StoreError::LockPoisoned { kind })
    }

    fn shard(&self, kind: EntityKind) -> StoreResult<&RwLock<Shard>> {
        // Every kind is allocated in `new`; a miss means the table is corrupt.
        self.shards
            .get(&kind)
            .ok_or(StoreError::LockPoisoned { kind })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tether_core::KindDefaults;

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn store() -> EntityStore {
        EntityStore::new(&CacheConfig::standard(Duration::from_secs(5)))
    }

    #[test]
    fn test_upsert_creates_then_merges() {
        let store = store();
        let created = store
            .upsert(EntityKind::Organization, "org-1", &fields(json!({"Title": "Acme"})))
            .unwrap();
        assert_eq!(created.get_str("Title"), Some("Acme"));
        assert_eq!(created.get_str("ID"), Some("org-1"));

        let merged = store
            .upsert(EntityKind::Organization, "org-1", &fields(json!({"Plan": "pro"})))
            .unwrap();
        assert_eq!(merged.get_str("Title"), Some("Acme"));
        assert_eq!(merged.get_str("Plan"), Some("pro"));

        let stats = store.stats();
        assert_eq!(stats.creates, 1);
        assert_eq!(stats.merges, 1);
        assert_eq!(stats.entry_count, 1);
    }

    #[test]
    fn test_merge_cannot_rewrite_identity_field() {
        let store = store();
        store.upsert(EntityKind::Item, "a", &Fields::new()).unwrap();
        let merged = store
            .upsert(EntityKind::Item, "a", &fields(json!({"ID": "b", "Title": "x"})))
            .unwrap();
        assert_eq!(merged.get_str("ID"), Some("a"));
        assert_eq!(merged.get_str("Title"), Some("x"));

        let stored = store.get(EntityKind::Item, "a").unwrap().unwrap();
        assert_eq!(stored.id(), "a");
        assert_eq!(stored.get_str("ID"), Some("a"));
        assert!(!store.contains(EntityKind::Item, "b"));
    }

    #[test]
    fn test_blank_identity_rejected_without_mutation() {
        let store = store();
        let err = store
            .upsert(EntityKind::Site, "", &fields(json!({"Title": "x"})))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidIdentity { .. }));
        assert!(store.is_empty());
        assert!(store.get(EntityKind::Site, " ").is_err());
        assert!(!store.contains(EntityKind::Site, ""));
    }

    #[test]
    fn test_defaults_seed_only_new_entities() {
        let mut config = CacheConfig::standard(Duration::from_secs(5));
        config.defaults.push(KindDefaults {
            kind: EntityKind::Notification,
            fields: fields(json!({"Read": false, "Priority": "normal"})),
        });
        let store = EntityStore::new(&config);

        let n = store
            .upsert(EntityKind::Notification, "n1", &fields(json!({"Priority": "high"})))
            .unwrap();
        assert_eq!(n.get("Read"), Some(&json!(false)));
        assert_eq!(n.get_str("Priority"), Some("high"));

        store
            .upsert(EntityKind::Notification, "n1", &fields(json!({"Read": true})))
            .unwrap();
        let n = store.get(EntityKind::Notification, "n1").unwrap().unwrap();
        assert_eq!(n.get("Read"), Some(&json!(true)));
        assert_eq!(n.get_str("Priority"), Some("high"));
    }

    #[test]
    fn test_kinds_are_isolated() {
        let store = store();
        store
            .upsert(EntityKind::Site, "shared", &fields(json!({"Title": "site"})))
            .unwrap();
        assert!(store.contains(EntityKind::Site, "shared"));
        assert!(!store.contains(EntityKind::Item, "shared"));
        assert!(store.get(EntityKind::Item, "shared").unwrap().is_none());
    }

    #[test]
    fn test_get_counts_hits_and_misses() {
        let store = store();
        store
            .upsert(EntityKind::Counter, "c1", &fields(json!({"Value": 3})))
            .unwrap();
        store.get(EntityKind::Counter, "c1").unwrap();
        store.get(EntityKind::Counter, "c2").unwrap();
        let stats = store.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 0.5).abs() < 0.001);
    }

    #[test]
    fn test_snapshot_isolated_from_later_upserts() {
        let store = store();
        store
            .upsert(EntityKind::Item, "i1", &fields(json!({"N": 1})))
            .unwrap();
        let snapshot = store.all(EntityKind::Item).unwrap();
        store
            .upsert(EntityKind::Item, "i2", &fields(json!({"N": 2})))
            .unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(store.all(EntityKind::Item).unwrap().len(), 2);
    }

    #[test]
    fn test_observer_hooks_see_previous_and_current() {
        let store = store();
        let (_, previous) = store
            .upsert_observed(
                EntityKind::Site,
                "s1",
                &fields(json!({"Title": "a"})),
                |prev| prev.map(|e| e.get_str("Title").map(str::to_string)),
                |prev, _| prev,
            )
            .unwrap();
        assert_eq!(previous, None);

        let (_, previous) = store
            .upsert_observed(
                EntityKind::Site,
                "s1",
                &fields(json!({"Title": "b"})),
                |prev| prev.and_then(|e| e.get_str("Title").map(str::to_string)),
                |prev, current| (prev, current.get_str("Title").map(str::to_string)),
            )
            .unwrap();
        assert_eq!(previous, (Some("a".to_string()), Some("b".to_string())));
    }

    #[test]
    fn test_clear_drops_everything() {
        let store = store();
        for kind in EntityKind::ALL {
            store.upsert(kind, "x", &Fields::new()).unwrap();
        }
        assert_eq!(store.stats().entry_count, 8);
        store.clear().unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_concurrent_upserts_keep_one_instance() {
        let store = Arc::new(store());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        let mut payload = Fields::new();
                        payload.insert(format!("F{}", t), json!(i));
                        store.upsert(EntityKind::Item, "hot", &payload).unwrap();
                        let _ = store.all(EntityKind::Item).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.len(EntityKind::Item), 1);
        let entity = store.get(EntityKind::Item, "hot").unwrap().unwrap();
        for t in 0..8 {
            assert_eq!(entity.get(&format!("F{}", t)), Some(&json!(99)));
        }
    }
}
