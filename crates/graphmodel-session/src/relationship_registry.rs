//! Registry of relationships known to exist in the database.
//!
//! Every confirmed relationship is keyed by its canonical (start, end, type)
//! triple together with its last-known property snapshot. A per-node index
//! answers "which known relationships touch this node" in O(degree), which is
//! what the save planner needs to find edges to prune.

use crate::change_tracker::same_properties;
use graphmodel_core::{NodeId, Properties};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Canonical key of a stored relationship.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeKey {
    pub start: NodeId,
    pub end: NodeId,
    pub rel_type: String,
}

impl EdgeKey {
    pub fn new(start: NodeId, end: NodeId, rel_type: impl Into<String>) -> Self {
        Self {
            start,
            end,
            rel_type: rel_type.into(),
        }
    }

    /// The endpoint opposite to `id`, if `id` is one of the endpoints.
    pub fn other(&self, id: NodeId) -> Option<NodeId> {
        if self.start == id {
            Some(self.end)
        } else if self.end == id {
            Some(self.start)
        } else {
            None
        }
    }

    /// The same relationship read in the opposite direction.
    #[must_use]
    pub fn reversed(&self) -> Self {
        Self {
            start: self.end,
            end: self.start,
            rel_type: self.rel_type.clone(),
        }
    }
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})-[:{}]->({})", self.start, self.rel_type, self.end)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RelationshipRecord {
    pub properties: Properties,
}

#[derive(Debug, Default)]
pub struct RelationshipRegistry {
    edges: HashMap<EdgeKey, RelationshipRecord>,
    by_node: HashMap<NodeId, BTreeSet<EdgeKey>>,
}

impl RelationshipRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &EdgeKey) -> bool {
        self.edges.contains_key(key)
    }

    /// Find a known relationship between `a` and `b` of `rel_type` in either
    /// orientation. The `a -> b` orientation wins when both exist.
    pub fn find_either(&self, a: NodeId, b: NodeId, rel_type: &str) -> Option<EdgeKey> {
        let forward = EdgeKey::new(a, b, rel_type);
        if self.edges.contains_key(&forward) {
            return Some(forward);
        }
        let backward = forward.reversed();
        self.edges.contains_key(&backward).then_some(backward)
    }

    pub fn properties(&self, key: &EdgeKey) -> Option<&Properties> {
        self.edges.get(key).map(|r| &r.properties)
    }

    /// Do the stored relationship properties differ from `current`?
    ///
    /// Unknown relationships are always dirty.
    pub fn is_dirty(&self, key: &EdgeKey, current: &Properties) -> bool {
        self.edges
            .get(key)
            .is_none_or(|record| !same_properties(&record.properties, current))
    }

    /// Record (or re-snapshot) a confirmed relationship.
    pub fn record(&mut self, key: EdgeKey, properties: Properties) {
        self.by_node.entry(key.start).or_default().insert(key.clone());
        self.by_node.entry(key.end).or_default().insert(key.clone());
        self.edges.insert(key, RelationshipRecord { properties });
    }

    /// Forget a relationship. Returns `true` if it was known.
    pub fn forget(&mut self, key: &EdgeKey) -> bool {
        if self.edges.remove(key).is_none() {
            return false;
        }
        for id in [key.start, key.end] {
            if let Some(keys) = self.by_node.get_mut(&id) {
                keys.remove(key);
                if keys.is_empty() {
                    self.by_node.remove(&id);
                }
            }
        }
        true
    }

    /// Known relationships incident to `id`, in key order.
    pub fn incident(&self, id: NodeId) -> Vec<EdgeKey> {
        self.by_node
            .get(&id)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Forget every relationship incident to `id`. Returns how many were known.
    pub fn forget_node(&mut self, id: NodeId) -> usize {
        let keys = self.incident(id);
        for key in &keys {
            self.forget(key);
        }
        keys.len()
    }

    pub fn clear(&mut self) {
        self.edges.clear();
        self.by_node.clear();
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphmodel_core::Value;

    fn key(start: i64, end: i64, rel_type: &str) -> EdgeKey {
        EdgeKey::new(NodeId(start), NodeId(end), rel_type)
    }

    #[test]
    fn test_record_and_incident_index() {
        let mut registry = RelationshipRegistry::new();
        registry.record(key(1, 2, "KNOWS"), Properties::new());
        registry.record(key(3, 1, "KNOWS"), Properties::new());

        assert!(registry.contains(&key(1, 2, "KNOWS")));
        assert!(!registry.contains(&key(2, 1, "KNOWS")));
        assert_eq!(registry.incident(NodeId(1)).len(), 2);
        assert_eq!(registry.incident(NodeId(2)), vec![key(1, 2, "KNOWS")]);
    }

    #[test]
    fn test_find_either_orientation() {
        let mut registry = RelationshipRegistry::new();
        registry.record(key(1, 2, "PAIRS_WITH"), Properties::new());

        assert_eq!(
            registry.find_either(NodeId(2), NodeId(1), "PAIRS_WITH"),
            Some(key(1, 2, "PAIRS_WITH"))
        );
        assert_eq!(registry.find_either(NodeId(2), NodeId(1), "KNOWS"), None);
    }

    #[test]
    fn test_forget_updates_index() {
        let mut registry = RelationshipRegistry::new();
        registry.record(key(1, 2, "KNOWS"), Properties::new());

        assert!(registry.forget(&key(1, 2, "KNOWS")));
        assert!(!registry.forget(&key(1, 2, "KNOWS")));
        assert!(registry.incident(NodeId(1)).is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_forget_node_drops_all_incident() {
        let mut registry = RelationshipRegistry::new();
        registry.record(key(1, 2, "KNOWS"), Properties::new());
        registry.record(key(2, 3, "KNOWS"), Properties::new());
        registry.record(key(3, 4, "KNOWS"), Properties::new());

        assert_eq!(registry.forget_node(NodeId(2)), 2);
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(&key(3, 4, "KNOWS")));
    }

    #[test]
    fn test_property_dirty_check() {
        let mut registry = RelationshipRegistry::new();
        let mut props = Properties::new();
        props.insert("affinity".into(), Value::Float(0.9));
        registry.record(key(1, 2, "PAIRS_WITH"), props.clone());

        assert!(!registry.is_dirty(&key(1, 2, "PAIRS_WITH"), &props));
        props.insert("affinity".into(), Value::Float(0.4));
        assert!(registry.is_dirty(&key(1, 2, "PAIRS_WITH"), &props));
        assert!(registry.is_dirty(&key(2, 1, "PAIRS_WITH"), &Properties::new()));
    }

    #[test]
    fn test_edge_key_helpers() {
        let k = key(1, 2, "KNOWS");
        assert_eq!(k.other(NodeId(1)), Some(NodeId(2)));
        assert_eq!(k.other(NodeId(9)), None);
        assert_eq!(k.reversed(), key(2, 1, "KNOWS"));
        assert_eq!(k.to_string(), "(1)-[:KNOWS]->(2)");
    }
}
