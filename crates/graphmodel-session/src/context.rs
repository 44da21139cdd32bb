//! The mapping context: everything a session knows about the database.
//!
//! A [`MappingContext`] combines the identity map, the property snapshots and
//! the relationship registry. It is owned by exactly one session and mutated
//! only after the pipeline has confirmed a batch, so a failed operation never
//! leaves it half-updated.

use crate::change_tracker::{ChangeTracker, PropertyDiff};
use crate::identity_map::IdentityMap;
use crate::relationship_registry::{EdgeKey, RelationshipRegistry};
use graphmodel_core::{EntityRef, NodeId, Properties};

/// Session-scoped record of tracked entities and known relationships.
#[derive(Debug, Default)]
pub struct MappingContext {
    identities: IdentityMap,
    tracker: ChangeTracker,
    relationships: RelationshipRegistry,
}

/// Counts of what a context currently tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContextStats {
    pub entities: usize,
    pub snapshots: usize,
    pub relationships: usize,
}

impl MappingContext {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Identities
    // ------------------------------------------------------------------

    /// Register `entity` as the canonical instance for `id`.
    ///
    /// Replaces any previously tracked instance.
    pub fn remember(&mut self, id: NodeId, entity: &EntityRef) {
        if let Some(previous) = self.identities.insert(id, entity.clone()) {
            tracing::debug!(
                id = id.get(),
                previous = ?previous,
                "Replaced canonical instance for identity"
            );
        }
    }

    /// The instance tracked for `id`, if any.
    pub fn lookup(&self, id: NodeId) -> Option<EntityRef> {
        self.identities.get(id)
    }

    pub fn is_tracked(&self, id: NodeId) -> bool {
        self.identities.contains(id)
    }

    /// Is `entity` the instance tracked for `id`?
    pub fn is_canonical(&self, id: NodeId, entity: &EntityRef) -> bool {
        self.identities.is_canonical(id, entity)
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    /// Record `properties` as the last persisted state of `id`.
    pub fn snapshot(&mut self, id: NodeId, properties: Properties) {
        self.tracker.refresh(id, properties);
    }

    pub fn snapshot_of(&self, id: NodeId) -> Option<&Properties> {
        self.tracker.get_snapshot(id).map(|s| s.properties())
    }

    pub fn is_dirty(&self, id: NodeId, current: &Properties) -> bool {
        self.tracker.is_dirty(id, current)
    }

    pub fn changed_properties(&self, id: NodeId, current: &Properties) -> PropertyDiff {
        self.tracker.diff(id, current)
    }

    // ------------------------------------------------------------------
    // Relationships
    // ------------------------------------------------------------------

    pub fn is_known_relationship(&self, start: NodeId, end: NodeId, rel_type: &str) -> bool {
        self.relationships
            .contains(&EdgeKey::new(start, end, rel_type))
    }

    /// Find a known relationship between `a` and `b` in either orientation.
    pub fn find_relationship_either(&self, a: NodeId, b: NodeId, rel_type: &str) -> Option<EdgeKey> {
        self.relationships.find_either(a, b, rel_type)
    }

    pub fn relationship_properties(&self, key: &EdgeKey) -> Option<&Properties> {
        self.relationships.properties(key)
    }

    pub fn is_relationship_dirty(&self, key: &EdgeKey, current: &Properties) -> bool {
        self.relationships.is_dirty(key, current)
    }

    /// Record a relationship the pipeline confirmed.
    pub fn record_relationship(&mut self, key: EdgeKey, properties: Properties) {
        tracing::trace!(edge = %key, "Recording relationship");
        self.relationships.record(key, properties);
    }

    /// Forget a relationship the pipeline confirmed deleted.
    pub fn forget_relationship(&mut self, key: &EdgeKey) -> bool {
        tracing::trace!(edge = %key, "Forgetting relationship");
        self.relationships.forget(key)
    }

    /// Known relationships incident to `id`.
    pub fn relationships_of(&self, id: NodeId) -> Vec<EdgeKey> {
        self.relationships.incident(id)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Forget a deleted node: its identity, snapshot and incident
    /// relationship records.
    pub fn forget(&mut self, id: NodeId) {
        self.identities.remove(id);
        self.tracker.clear(id);
        let dropped = self.relationships.forget_node(id);
        tracing::debug!(id = id.get(), relationships = dropped, "Forgot node");
    }

    /// Drop every identity, snapshot and relationship record.
    pub fn clear(&mut self) {
        let stats = self.stats();
        self.identities.clear();
        self.tracker.clear_all();
        self.relationships.clear();
        tracing::debug!(
            entities = stats.entities,
            relationships = stats.relationships,
            "Cleared mapping context"
        );
    }

    pub fn stats(&self) -> ContextStats {
        ContextStats {
            entities: self.identities.len(),
            snapshots: self.tracker.len(),
            relationships: self.relationships.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphmodel_core::{Entity, Value};

    fn ingredient(name: &str) -> EntityRef {
        EntityRef::new(Entity::new("Ingredient").with_property("name", name))
    }

    #[test]
    fn test_lookup_absent_is_none() {
        let ctx = MappingContext::new();
        assert!(ctx.lookup(NodeId(1)).is_none());
    }

    #[test]
    fn test_remember_makes_new_instance_canonical() {
        let mut ctx = MappingContext::new();
        let first = ingredient("Chicken");
        let second = ingredient("Chicken");

        ctx.remember(NodeId(1), &first);
        ctx.remember(NodeId(1), &second);

        assert!(ctx.lookup(NodeId(1)).unwrap().ptr_eq(&second));
        assert_eq!(ctx.stats().entities, 1);
    }

    #[test]
    fn test_forget_drops_identity_snapshot_and_edges() {
        let mut ctx = MappingContext::new();
        ctx.remember(NodeId(1), &ingredient("Chicken"));
        ctx.remember(NodeId(2), &ingredient("Carrot"));
        let mut props = Properties::new();
        props.insert("name".into(), Value::Text("Chicken".into()));
        ctx.snapshot(NodeId(1), props);
        ctx.record_relationship(EdgeKey::new(NodeId(1), NodeId(2), "PAIRS_WITH"), Properties::new());

        ctx.forget(NodeId(1));

        assert!(!ctx.is_tracked(NodeId(1)));
        assert!(ctx.snapshot_of(NodeId(1)).is_none());
        assert!(!ctx.is_known_relationship(NodeId(1), NodeId(2), "PAIRS_WITH"));
        assert!(ctx.is_tracked(NodeId(2)));
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut ctx = MappingContext::new();
        ctx.remember(NodeId(1), &ingredient("Chicken"));
        ctx.snapshot(NodeId(1), Properties::new());
        ctx.record_relationship(EdgeKey::new(NodeId(1), NodeId(1), "PAIRS_WITH"), Properties::new());

        ctx.clear();

        assert_eq!(ctx.stats(), ContextStats::default());
    }

    #[test]
    fn test_relationship_lookup_in_either_orientation() {
        let mut ctx = MappingContext::new();
        ctx.record_relationship(EdgeKey::new(NodeId(4), NodeId(5), "KNOWN_BY"), Properties::new());

        assert!(ctx.is_known_relationship(NodeId(4), NodeId(5), "KNOWN_BY"));
        assert!(!ctx.is_known_relationship(NodeId(5), NodeId(4), "KNOWN_BY"));
        assert_eq!(
            ctx.find_relationship_either(NodeId(5), NodeId(4), "KNOWN_BY"),
            Some(EdgeKey::new(NodeId(4), NodeId(5), "KNOWN_BY"))
        );
        assert_eq!(ctx.relationships_of(NodeId(5)).len(), 1);
    }
}
