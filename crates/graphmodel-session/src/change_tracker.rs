//! Change tracking and dirty detection for graphmodel sessions.
//!
//! This module provides snapshot-based change tracking to detect when tracked
//! entities have been modified since they were last persisted or loaded. A
//! snapshot holds the persistent properties only; relationship changes are
//! detected against the relationship registry instead.

use graphmodel_core::{NodeId, Properties};
use std::collections::HashMap;
use std::time::Instant;

/// Snapshot of an entity's persistent properties at a point in time.
#[derive(Debug, Clone)]
pub struct PropertySnapshot {
    properties: Properties,
    taken_at: Instant,
}

impl PropertySnapshot {
    pub fn new(properties: Properties) -> Self {
        Self {
            properties,
            taken_at: Instant::now(),
        }
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Get the timestamp when the snapshot was taken.
    pub fn taken_at(&self) -> Instant {
        self.taken_at
    }
}

/// Difference between a snapshot and the current persistent properties.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyDiff {
    /// Keys whose value is new or changed, with the current value.
    pub set: Properties,
    /// Keys present in the snapshot but no longer on the entity.
    pub removed: Vec<String>,
}

impl PropertyDiff {
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.removed.is_empty()
    }

    /// Names of every changed key, set or removed, in sorted order.
    pub fn changed_fields(&self) -> Vec<&str> {
        let mut fields: Vec<&str> = self
            .set
            .keys()
            .map(String::as_str)
            .chain(self.removed.iter().map(String::as_str))
            .collect();
        fields.sort_unstable();
        fields
    }
}

/// Tracks property snapshots of persisted entities.
///
/// Uses snapshot comparison to detect when entities have been modified.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    snapshots: HashMap<NodeId, PropertySnapshot>,
}

impl ChangeTracker {
    /// Create a new empty change tracker.
    pub fn new() -> Self {
        Self {
            snapshots: HashMap::new(),
        }
    }

    /// Take a snapshot of an entity's persistent properties.
    #[tracing::instrument(level = "trace", skip(self, properties))]
    pub fn snapshot(&mut self, id: NodeId, properties: Properties) {
        tracing::trace!(
            id = id.get(),
            property_count = properties.len(),
            "Taking property snapshot"
        );
        self.snapshots.insert(id, PropertySnapshot::new(properties));
    }

    /// Check if an entity has changed since its snapshot.
    ///
    /// Returns `true` if:
    /// - The entity has no snapshot (treated as dirty)
    /// - The current properties differ from the snapshot
    #[tracing::instrument(level = "trace", skip(self, current))]
    pub fn is_dirty(&self, id: NodeId, current: &Properties) -> bool {
        let Some(snapshot) = self.snapshots.get(&id) else {
            tracing::trace!(id = id.get(), dirty = true, "No snapshot - treating as dirty");
            return true;
        };

        let dirty = !same_properties(&snapshot.properties, current);
        tracing::trace!(id = id.get(), dirty = dirty, "Dirty check result");
        dirty
    }

    /// Diff the current properties against the snapshot.
    ///
    /// Without a snapshot every current property counts as set.
    #[tracing::instrument(level = "debug", skip(self, current))]
    pub fn diff(&self, id: NodeId, current: &Properties) -> PropertyDiff {
        let Some(snapshot) = self.snapshots.get(&id) else {
            tracing::debug!(
                id = id.get(),
                changed_count = current.len(),
                "No snapshot - all properties considered changed"
            );
            return PropertyDiff {
                set: current.clone(),
                removed: Vec::new(),
            };
        };

        let mut diff = PropertyDiff::default();
        for (name, value) in current {
            match snapshot.properties.get(name) {
                Some(original) if original.same_as(value) => {}
                _ => {
                    diff.set.insert(name.clone(), value.clone());
                }
            }
        }
        for name in snapshot.properties.keys() {
            if !current.contains_key(name) {
                diff.removed.push(name.clone());
            }
        }

        tracing::debug!(
            id = id.get(),
            changed_count = diff.set.len() + diff.removed.len(),
            fields = ?diff.changed_fields(),
            "Detected changed properties"
        );
        diff
    }

    /// Check if a snapshot exists for the given identity.
    pub fn has_snapshot(&self, id: NodeId) -> bool {
        self.snapshots.contains_key(&id)
    }

    pub fn get_snapshot(&self, id: NodeId) -> Option<&PropertySnapshot> {
        self.snapshots.get(&id)
    }

    /// Clear the snapshot for a specific entity.
    pub fn clear(&mut self, id: NodeId) {
        self.snapshots.remove(&id);
    }

    /// Clear all snapshots.
    pub fn clear_all(&mut self) {
        self.snapshots.clear();
    }

    /// Update the snapshot after a flush or load (new baseline).
    #[tracing::instrument(level = "trace", skip(self, properties))]
    pub fn refresh(&mut self, id: NodeId, properties: Properties) {
        tracing::trace!(id = id.get(), "Refreshing snapshot");
        self.snapshot(id, properties);
    }

    /// Number of tracked snapshots.
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Check if there are no snapshots.
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

/// Snapshot equality over whole property maps.
pub(crate) fn same_properties(a: &Properties, b: &Properties) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b)
            .all(|((ka, va), (kb, vb))| ka == kb && va.same_as(vb))
}
