//! Domain entities and the references the session tracks them by.
//!
//! An [`Entity`] is one node of the caller's object graph: a label, an optional
//! database identity, scalar properties and named relationship fields. Entities
//! are shared through [`EntityRef`], a cheap handle whose pointer identity is
//! what the session uses to tell two objects apart during a traversal.
//!
//! # Example
//!
//! ```
//! use graphmodel_core::{Entity, EntityRef};
//!
//! let chicken = EntityRef::new(Entity::new("Ingredient").with_property("name", "Chicken"));
//! let carrot = EntityRef::new(Entity::new("Ingredient").with_property("name", "Carrot"));
//!
//! chicken.write().relate("pairings", &carrot);
//! carrot.write().relate("pairings", &chicken);
//!
//! assert_eq!(chicken.read().related("pairings").len(), 1);
//! assert!(chicken.read().is_new());
//! ```

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Property name to value map, ordered for deterministic snapshots.
pub type Properties = BTreeMap<String, Value>;

/// Database-assigned identity of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub i64);

impl NodeId {
    /// Get the raw identity value.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for NodeId {
    fn from(v: i64) -> Self {
        NodeId(v)
    }
}

/// Number of relationship hops a save or load may cover from its roots.
///
/// `Depth(0)` touches only the roots; `Depth(n)` follows at most `n` hops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Depth(u32);

impl Depth {
    /// Only the roots themselves.
    pub const ZERO: Depth = Depth(0);
    /// Roots and their direct neighbours.
    pub const ONE: Depth = Depth(1);
    /// Everything reachable.
    pub const UNBOUNDED: Depth = Depth(u32::MAX);

    #[must_use]
    pub const fn new(hops: u32) -> Self {
        Depth(hops)
    }

    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Whether an entity `hops` away from a root is inside the bound.
    #[must_use]
    pub const fn allows(self, hops: u32) -> bool {
        hops <= self.0
    }

    /// Whether an entity `hops` away may have its relationships followed.
    #[must_use]
    pub const fn can_expand(self, hops: u32) -> bool {
        hops < self.0
    }

    #[must_use]
    pub const fn is_unbounded(self) -> bool {
        self.0 == u32::MAX
    }
}

impl Default for Depth {
    fn default() -> Self {
        Depth::ONE
    }
}

impl From<u32> for Depth {
    fn from(v: u32) -> Self {
        Depth(v)
    }
}

impl fmt::Display for Depth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unbounded() {
            write!(f, "unbounded")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// One entry of a relationship field: the related entity plus any
/// properties carried by the relationship itself.
#[derive(Debug, Clone)]
pub struct Related {
    pub target: EntityRef,
    pub properties: Properties,
}

/// An in-memory node of the object graph.
#[derive(Debug, Clone)]
pub struct Entity {
    label: String,
    id: Option<NodeId>,
    properties: Properties,
    relationships: BTreeMap<String, Vec<Related>>,
}

impl Entity {
    /// Create a transient entity with the given label.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            id: None,
            properties: Properties::new(),
            relationships: BTreeMap::new(),
        }
    }

    /// Set a property (builder pattern).
    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn id(&self) -> Option<NodeId> {
        self.id
    }

    /// Has this entity never been assigned an identity?
    pub fn is_new(&self) -> bool {
        self.id.is_none()
    }

    /// Assign the database identity.
    ///
    /// Normally only the session calls this, after the database confirmed
    /// the node or while materialising a loaded record.
    pub fn set_id(&mut self, id: NodeId) {
        self.id = Some(id);
    }

    /// Drop the database identity, making the entity transient again.
    pub fn clear_id(&mut self) {
        self.id = None;
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Set a property, returning the previous value.
    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.properties.insert(name.into(), value.into())
    }

    pub fn remove_property(&mut self, name: &str) -> Option<Value> {
        self.properties.remove(name)
    }

    /// Add `target` to the relationship field `field`.
    ///
    /// Returns `false` if the same instance was already present.
    pub fn relate(&mut self, field: impl Into<String>, target: &EntityRef) -> bool {
        self.relate_with(field, target, Properties::new())
    }

    /// Add `target` to `field` with relationship properties.
    ///
    /// If the instance is already present its relationship properties are
    /// replaced and `false` is returned.
    pub fn relate_with(
        &mut self,
        field: impl Into<String>,
        target: &EntityRef,
        properties: Properties,
    ) -> bool {
        let entries = self.relationships.entry(field.into()).or_default();
        if let Some(existing) = entries.iter_mut().find(|r| r.target.ptr_eq(target)) {
            existing.properties = properties;
            return false;
        }
        entries.push(Related {
            target: target.clone(),
            properties,
        });
        true
    }

    /// Remove `target` from `field`. Returns `true` if it was present.
    pub fn unrelate(&mut self, field: &str, target: &EntityRef) -> bool {
        let Some(entries) = self.relationships.get_mut(field) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|r| !r.target.ptr_eq(target));
        before != entries.len()
    }

    /// Entries of a relationship field (empty if the field was never set).
    pub fn related(&self, field: &str) -> &[Related] {
        self.relationships.get(field).map_or(&[], Vec::as_slice)
    }

    /// All relationship fields in name order.
    pub fn relationships(&self) -> impl Iterator<Item = (&str, &[Related])> {
        self.relationships
            .iter()
            .map(|(name, entries)| (name.as_str(), entries.as_slice()))
    }

    /// Empty one relationship field.
    pub fn clear_related(&mut self, field: &str) {
        self.relationships.remove(field);
    }
}

/// Shared, interior-mutable handle to an [`Entity`].
///
/// Clones point at the same entity. Two handles are the same object exactly
/// when [`EntityRef::ptr_eq`] holds. Relationship fields hold strong handles,
/// so a cyclic object graph stays alive until the caller breaks the cycle
/// (for example with [`Entity::clear_related`]).
#[derive(Clone)]
pub struct EntityRef(Arc<RwLock<Entity>>);

impl EntityRef {
    pub fn new(entity: Entity) -> Self {
        EntityRef(Arc::new(RwLock::new(entity)))
    }

    /// Lock the entity for reading.
    ///
    /// A poisoned lock is recovered: entities hold plain data, so a panic in
    /// another holder cannot leave them half-updated in a way we could detect.
    pub fn read(&self) -> RwLockReadGuard<'_, Entity> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the entity for writing.
    pub fn write(&self) -> RwLockWriteGuard<'_, Entity> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Are both handles the same object?
    pub fn ptr_eq(&self, other: &EntityRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Reference identity hash: stable for the lifetime of the entity.
    pub fn identity_hash(&self) -> usize {
        Arc::as_ptr(&self.0).cast::<()>() as usize
    }

    pub fn id(&self) -> Option<NodeId> {
        self.read().id()
    }

    pub fn label(&self) -> String {
        self.read().label().to_string()
    }
}

impl From<Entity> for EntityRef {
    fn from(entity: Entity) -> Self {
        EntityRef::new(entity)
    }
}

impl fmt::Debug for EntityRef {
    // Never recurse into relationships: object graphs are usually cyclic.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("EntityRef");
        match self.0.try_read() {
            Ok(entity) => {
                out.field("label", &entity.label);
                out.field("id", &entity.id);
            }
            Err(_) => {
                out.field("locked", &true);
            }
        }
        out.field("addr", &format_args!("{:#x}", self.identity_hash()))
            .finish()
    }
}
