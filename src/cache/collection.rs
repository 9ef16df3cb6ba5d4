use std::collections::HashMap;

use serde_json::{Map, Value};

use super::entity::Entity;

#[derive(Debug, Clone)]
struct Slot<V> {
    value: V,
    touched: u64,
}

/// Keyed store of one entity kind.
///
/// With a limit set, inserting past the limit evicts the least recently touched entry.
/// A limit of zero disables storage entirely while still constructing values.
#[derive(Debug, Clone)]
pub struct Collection<V> {
    items: HashMap<String, Slot<V>>,
    limit: Option<usize>,
    tick: u64,
}

impl<V> Default for Collection<V> {
    fn default() -> Self {
        Self {
            items: HashMap::new(),
            limit: None,
            tick: 0,
        }
    }
}

impl<V: Entity> Collection<V> {
    /// Create a collection, optionally bounded.
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            items: HashMap::new(),
            limit,
            tick: 0,
        }
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether an entry with this id is stored.
    pub fn has(&self, id: &str) -> bool {
        self.items.contains_key(id)
    }

    /// Get a stored entry.
    pub fn get(&self, id: &str) -> Option<&V> {
        self.items.get(id).map(|slot| &slot.value)
    }

    /// Get a stored entry for modification, marking it touched.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut V> {
        self.tick += 1;
        let tick = self.tick;
        self.items.get_mut(id).map(|slot| {
            slot.touched = tick;
            &mut slot.value
        })
    }

    /// Store an entry, replacing any entry with the same id.
    pub fn add(&mut self, value: V) -> V {
        let id = value.id().to_string();
        if self.limit == Some(0) {
            return value;
        }
        if !self.items.contains_key(&id) {
            self.evict_for_insert();
        }
        self.tick += 1;
        self.items.insert(
            id,
            Slot {
                value: value.clone(),
                touched: self.tick,
            },
        );
        value
    }

    /// Merge `data` into the entry with the same id, inserting a new one if absent.
    ///
    /// Returns the current value after the update.
    pub fn update(&mut self, data: &Map<String, Value>) -> V {
        let id = data
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        match self.get_mut(&id) {
            Some(existing) => {
                existing.update(data);
                existing.clone()
            }
            None => self.add(V::from_data(data.clone())),
        }
    }

    /// Remove an entry.
    pub fn delete(&mut self, id: &str) -> Option<V> {
        self.items.remove(id).map(|slot| slot.value)
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Iterate stored entries in no particular order.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.items.values().map(|slot| &slot.value)
    }

    /// Iterate stored ids in no particular order.
    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.items.keys()
    }

    fn evict_for_insert(&mut self) {
        let Some(limit) = self.limit else {
            return;
        };
        while self.items.len() >= limit {
            let oldest = self
                .items
                .iter()
                .min_by_key(|(_, slot)| slot.touched)
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => {
                    log::trace!("Evict cached entry {}", id);
                    self.items.remove(&id);
                }
                None => break,
            }
        }
    }
}

/// Collections scoped by an owner id, such as members per guild or messages per channel.
#[derive(Debug, Clone)]
pub struct Scoped<V> {
    scopes: HashMap<String, Collection<V>>,
    limit: Option<usize>,
}

impl<V> Default for Scoped<V> {
    fn default() -> Self {
        Self {
            scopes: HashMap::new(),
            limit: None,
        }
    }
}

impl<V: Entity> Scoped<V> {
    /// Create scoped collections, each bounded by `limit`.
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            scopes: HashMap::new(),
            limit,
        }
    }

    /// Collection of an owner, if any entry was ever stored for it.
    pub fn scope(&self, owner: &str) -> Option<&Collection<V>> {
        self.scopes.get(owner)
    }

    /// Collection of an owner, created on demand.
    pub fn scope_mut(&mut self, owner: &str) -> &mut Collection<V> {
        let limit = self.limit;
        self.scopes
            .entry(owner.to_string())
            .or_insert_with(|| Collection::new(limit))
    }

    /// Get an entry of an owner.
    pub fn get(&self, owner: &str, id: &str) -> Option<&V> {
        self.scope(owner)?.get(id)
    }

    /// Get an entry of an owner for modification.
    pub fn get_mut(&mut self, owner: &str, id: &str) -> Option<&mut V> {
        self.scopes.get_mut(owner)?.get_mut(id)
    }

    /// Whether an owner holds an entry.
    pub fn has(&self, owner: &str, id: &str) -> bool {
        self.get(owner, id).is_some()
    }

    /// Remove an entry of an owner.
    pub fn delete(&mut self, owner: &str, id: &str) -> Option<V> {
        self.scopes.get_mut(owner)?.delete(id)
    }

    /// Drop everything stored for an owner.
    pub fn remove_scope(&mut self, owner: &str) -> Option<Collection<V>> {
        self.scopes.remove(owner)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cache::Record;
    use serde_json::json;

    fn data(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_update_inserts_then_merges() {
        let mut collection = Collection::<Record>::default();

        let first = collection.update(&data(json!({"id": "1", "name": "a", "position": 3})));
        assert_eq!(first.str("name"), Some("a"));

        let second = collection.update(&data(json!({"id": "1", "name": "b"})));
        assert_eq!(second.str("name"), Some("b"));
        assert_eq!(second.u64("position"), Some(3));
        assert_eq!(collection.len(), 1);
    }

    #[test]
    fn test_limit_evicts_least_recently_touched() {
        let mut collection = Collection::<Record>::new(Some(2));
        collection.update(&data(json!({"id": "1"})));
        collection.update(&data(json!({"id": "2"})));
        // touch 1 so 2 becomes the oldest
        collection.update(&data(json!({"id": "1", "x": 1})));
        collection.update(&data(json!({"id": "3"})));

        assert!(collection.has("1"));
        assert!(!collection.has("2"));
        assert!(collection.has("3"));
    }

    #[test]
    fn test_zero_limit_never_stores() {
        let mut collection = Collection::<Record>::new(Some(0));
        let value = collection.update(&data(json!({"id": "1", "a": true})));
        assert_eq!(value.id(), "1");
        assert!(collection.is_empty());
    }

    #[test]
    fn test_scoped_collections_are_independent() {
        let mut scoped = Scoped::<Record>::default();
        scoped.scope_mut("g1").update(&data(json!({"id": "u"})));

        assert!(scoped.has("g1", "u"));
        assert!(!scoped.has("g2", "u"));
        assert!(scoped.delete("g1", "u").is_some());
        assert!(!scoped.has("g1", "u"));
    }
}
