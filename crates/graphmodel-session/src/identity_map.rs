//! Identity Map pattern for tracking unique entity instances per node identity.
//!
//! The Identity Map ensures that each stored node corresponds to exactly one
//! entity instance within a session. This provides:
//!
//! - **Uniqueness**: The same identity always resolves to the same `EntityRef`
//! - **Consistency**: A load reuses the instance the caller already holds
//!
//! Entities are already shared handles, so the map simply keeps a clone of the
//! canonical `EntityRef` for each identity.

use graphmodel_core::{EntityRef, NodeId};
use std::collections::HashMap;

/// Identity Map for tracking unique entity instances.
#[derive(Debug, Default)]
pub struct IdentityMap {
    entries: HashMap<NodeId, EntityRef>,
}

impl IdentityMap {
    /// Create a new empty identity map.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register `entity` as the canonical instance for `id`.
    ///
    /// Returns the previously tracked instance, if it was a different object.
    pub fn insert(&mut self, id: NodeId, entity: EntityRef) -> Option<EntityRef> {
        self.entries
            .insert(id, entity.clone())
            .filter(|previous| !previous.ptr_eq(&entity))
    }

    /// Get the instance tracked for `id`.
    ///
    /// The returned handle is a clone of the stored one, so modifications are
    /// shared.
    pub fn get(&self, id: NodeId) -> Option<EntityRef> {
        self.entries.get(&id).cloned()
    }

    /// Check if an instance is tracked for `id`.
    pub fn contains(&self, id: NodeId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Is `entity` the instance tracked for `id`?
    pub fn is_canonical(&self, id: NodeId, entity: &EntityRef) -> bool {
        self.entries.get(&id).is_some_and(|tracked| tracked.ptr_eq(entity))
    }

    /// Remove the instance tracked for `id`.
    ///
    /// # Returns
    ///
    /// `true` if an instance was removed, `false` if none was tracked.
    pub fn remove(&mut self, id: NodeId) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Clear all entries from the identity map.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Get the number of entries in the map.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use graphmodel_core::Entity;

    fn hero(name: &str) -> EntityRef {
        EntityRef::new(Entity::new("Hero").with_property("name", name))
    }

    #[test]
    fn test_insert_and_get_returns_same_instance() {
        let mut map = IdentityMap::new();
        let spidey = hero("Spider-Man");

        assert!(map.insert(NodeId(1), spidey.clone()).is_none());

        let found = map.get(NodeId(1)).unwrap();
        assert!(found.ptr_eq(&spidey));

        found.write().set_property("name", "Peter Parker");
        assert_eq!(
            spidey.read().property("name").and_then(|v| v.as_str()),
            Some("Peter Parker")
        );
    }

    #[test]
    fn test_insert_replaces_canonical_instance() {
        let mut map = IdentityMap::new();
        let first = hero("Spider-Man");
        let second = hero("Spider-Man");

        map.insert(NodeId(1), first.clone());
        let previous = map.insert(NodeId(1), second.clone()).unwrap();

        assert!(previous.ptr_eq(&first));
        assert!(map.is_canonical(NodeId(1), &second));
        assert!(!map.is_canonical(NodeId(1), &first));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_reinsert_same_instance_reports_nothing() {
        let mut map = IdentityMap::new();
        let spidey = hero("Spider-Man");
        map.insert(NodeId(1), spidey.clone());
        assert!(map.insert(NodeId(1), spidey).is_none());
    }

    #[test]
    fn test_get_missing_returns_none() {
        let map = IdentityMap::new();
        assert!(map.get(NodeId(999)).is_none());
        assert!(!map.contains(NodeId(999)));
    }

    #[test]
    fn test_remove_and_clear() {
        let mut map = IdentityMap::new();
        map.insert(NodeId(1), hero("Spider-Man"));
        map.insert(NodeId(2), hero("Iron Man"));

        assert!(map.remove(NodeId(1)));
        assert!(!map.remove(NodeId(1)));
        assert_eq!(map.len(), 1);

        map.clear();
        assert!(map.is_empty());
    }
}
