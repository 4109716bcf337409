use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::observers::{ObserverSet, Subscription};
use crate::persist::{AggregateSnapshot, SnapshotError};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MapObjectId(pub String);

impl MapObjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for MapObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapPosition {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapObject {
    pub kind: String,
    pub position: MapPosition,
    pub remaining_uses: Option<u32>,
}

/// Declared at registration. Transient objects live in the registry but
/// never reach the save bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    Durable,
    Transient,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    Registered(MapObjectId),
    Updated(MapObjectId),
    Unregistered(MapObjectId),
}

struct Entry {
    object: MapObject,
    persistence: Persistence,
}

#[derive(Default)]
struct RegistryData {
    entries: HashMap<MapObjectId, Entry>,
    restored: HashMap<MapObjectId, MapObject>,
}

/// Registry of the spatial objects a session owns. Persisted object state
/// loaded at startup is held aside and re-applied when an object with a
/// matching id registers, so world construction order does not matter.
#[derive(Default)]
pub struct MapObjectRegistry {
    data: Mutex<RegistryData>,
    observers: ObserverSet<RegistryEvent>,
}

impl MapObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the id is already registered; the existing
    /// object is kept.
    pub fn register(&self, id: MapObjectId, object: MapObject, persistence: Persistence) -> bool {
        let registered = {
            let mut data = self.lock_data();
            if data.entries.contains_key(&id) {
                warn!(object = %id, "map_object_already_registered");
                false
            } else {
                let object = match data.restored.remove(&id) {
                    Some(restored) if restored.kind == object.kind => restored,
                    Some(restored) => {
                        warn!(
                            object = %id,
                            restored_kind = %restored.kind,
                            kind = %object.kind,
                            "restored_state_kind_mismatch"
                        );
                        object
                    }
                    None => object,
                };
                data.entries.insert(id.clone(), Entry {
                    object,
                    persistence,
                });
                true
            }
        };
        if registered {
            self.observers.emit(&RegistryEvent::Registered(id));
        }
        registered
    }

    pub fn unregister(&self, id: &MapObjectId) -> bool {
        let removed = self.lock_data().entries.remove(id).is_some();
        if removed {
            self.observers.emit(&RegistryEvent::Unregistered(id.clone()));
        }
        removed
    }

    /// Mutates a registered object in place and notifies observers.
    pub fn update(&self, id: &MapObjectId, apply: impl FnOnce(&mut MapObject)) -> bool {
        let updated = {
            let mut data = self.lock_data();
            match data.entries.get_mut(id) {
                Some(entry) => {
                    apply(&mut entry.object);
                    true
                }
                None => false,
            }
        };
        if updated {
            self.observers.emit(&RegistryEvent::Updated(id.clone()));
        }
        updated
    }

    pub fn get(&self, id: &MapObjectId) -> Option<MapObject> {
        self.lock_data().entries.get(id).map(|entry| entry.object.clone())
    }

    pub fn object_count(&self) -> usize {
        self.lock_data().entries.len()
    }

    pub fn observe(&self, callback: impl Fn(&RegistryEvent) + Send + Sync + 'static) -> Subscription {
        self.observers.observe(callback)
    }

    /// Decodes a persisted registry snapshot and holds the states for
    /// future registrations. Returns how many object states were loaded.
    pub fn load_restored(&self, serialized: &str) -> Result<usize, SnapshotError> {
        let restored: HashMap<MapObjectId, MapObject> =
            serde_json::from_str(serialized).map_err(SnapshotError::Decode)?;
        let count = restored.len();
        self.lock_data().restored = restored;
        Ok(count)
    }

    fn lock_data(&self) -> MutexGuard<'_, RegistryData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AggregateSnapshot for MapObjectRegistry {
    /// Serializes durable entries only.
    fn snapshot(&self) -> Result<String, SnapshotError> {
        let data = self.lock_data();
        let durable: HashMap<&MapObjectId, &MapObject> = data
            .entries
            .iter()
            .filter(|(_, entry)| entry.persistence == Persistence::Durable)
            .map(|(id, entry)| (id, &entry.object))
            .collect();
        serde_json::to_string(&durable).map_err(SnapshotError::Encode)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    fn pile(x: f32, uses: u32) -> MapObject {
        MapObject {
            kind: "resource_pile".to_string(),
            position: MapPosition { x, y: 0.0 },
            remaining_uses: Some(uses),
        }
    }

    fn marker() -> MapObject {
        MapObject {
            kind: "debug_marker".to_string(),
            position: MapPosition { x: 0.0, y: 0.0 },
            remaining_uses: None,
        }
    }

    #[test]
    fn register_update_unregister_notify_in_order() {
        let registry = MapObjectRegistry::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&events);
        let _subscription = registry.observe(move |event| {
            seen.lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(event.clone());
        });
        let id = MapObjectId::new("pile_1");

        assert!(registry.register(id.clone(), pile(1.0, 3), Persistence::Durable));
        assert!(registry.update(&id, |object| {
            object.remaining_uses = Some(2);
        }));
        assert!(registry.unregister(&id));

        let events = events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        assert_eq!(
            *events,
            vec![
                RegistryEvent::Registered(id.clone()),
                RegistryEvent::Updated(id.clone()),
                RegistryEvent::Unregistered(id),
            ]
        );
    }

    #[test]
    fn duplicate_register_keeps_the_existing_object() {
        let registry = MapObjectRegistry::new();
        let id = MapObjectId::new("pile_1");

        assert!(registry.register(id.clone(), pile(1.0, 3), Persistence::Durable));
        assert!(!registry.register(id.clone(), pile(9.0, 9), Persistence::Durable));

        let object = registry.get(&id).expect("object");
        assert_eq!(object.position.x, 1.0);
        assert_eq!(object.remaining_uses, Some(3));
    }

    #[test]
    fn update_on_missing_object_is_a_noop() {
        let registry = MapObjectRegistry::new();
        assert!(!registry.update(&MapObjectId::new("missing"), |object| {
            object.remaining_uses = None;
        }));
        assert!(!registry.unregister(&MapObjectId::new("missing")));
    }

    #[test]
    fn snapshot_contains_only_durable_objects() {
        let registry = MapObjectRegistry::new();
        registry.register(MapObjectId::new("pile_1"), pile(1.0, 3), Persistence::Durable);
        registry.register(MapObjectId::new("marker_1"), marker(), Persistence::Transient);

        let serialized = registry.snapshot().expect("snapshot");
        let decoded: HashMap<MapObjectId, MapObject> =
            serde_json::from_str(&serialized).expect("decode");

        assert_eq!(decoded.len(), 1);
        assert!(decoded.contains_key(&MapObjectId::new("pile_1")));
    }

    #[test]
    fn restored_state_is_applied_when_the_object_registers() {
        let saved = MapObjectRegistry::new();
        saved.register(MapObjectId::new("pile_1"), pile(4.0, 1), Persistence::Durable);
        let serialized = saved.snapshot().expect("snapshot");

        let registry = MapObjectRegistry::new();
        let loaded = registry.load_restored(&serialized).expect("load");
        assert_eq!(loaded, 1);

        // World construction registers the object with fresh defaults; the
        // persisted state must win.
        registry.register(MapObjectId::new("pile_1"), pile(0.0, 3), Persistence::Durable);
        let object = registry.get(&MapObjectId::new("pile_1")).expect("object");
        assert_eq!(object.position.x, 4.0);
        assert_eq!(object.remaining_uses, Some(1));
    }

    #[test]
    fn restored_state_with_mismatched_kind_is_ignored() {
        let registry = MapObjectRegistry::new();
        registry
            .load_restored(
                r#"{"pile_1":{"kind":"resource_pile","position":{"x":4.0,"y":0.0},"remaining_uses":1}}"#,
            )
            .expect("load");

        registry.register(MapObjectId::new("pile_1"), marker(), Persistence::Transient);
        let object = registry.get(&MapObjectId::new("pile_1")).expect("object");
        assert_eq!(object.kind, "debug_marker");
    }

    #[test]
    fn restored_state_is_consumed_by_the_first_registration() {
        let registry = MapObjectRegistry::new();
        registry
            .load_restored(
                r#"{"pile_1":{"kind":"resource_pile","position":{"x":4.0,"y":0.0},"remaining_uses":1}}"#,
            )
            .expect("load");

        registry.register(MapObjectId::new("pile_1"), pile(0.0, 3), Persistence::Durable);
        registry.unregister(&MapObjectId::new("pile_1"));
        registry.register(MapObjectId::new("pile_1"), pile(0.0, 3), Persistence::Durable);

        // Re-registration after the restore was consumed starts fresh.
        let object = registry.get(&MapObjectId::new("pile_1")).expect("object");
        assert_eq!(object.remaining_uses, Some(3));
    }

    #[test]
    fn load_restored_rejects_garbage() {
        let registry = MapObjectRegistry::new();
        let err = registry.load_restored("{bad").expect_err("garbage");
        assert!(matches!(err, SnapshotError::Decode(_)));
    }
}
