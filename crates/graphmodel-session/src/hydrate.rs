//! Load materialisation: turning fetched records into tracked entities.
//!
//! The pipeline returns flat node and edge records. Hydration re-applies the
//! depth bound breadth-first from the fetched roots, then reconciles every
//! record in range with the mapping context:
//! - A tracked identity reuses the caller's instance, refreshing its
//!   persistent properties and merging (never pruning) its relationships
//! - An unknown identity becomes a new entity and is remembered
//!
//! All metadata lookups happen before the first mutation, so a load that
//! fails on an unknown label leaves the context untouched.

use crate::context::MappingContext;
use crate::relationship_registry::EdgeKey;
use graphmodel_core::{
    Depth, Direction, EdgeRecord, Entity, EntityMetadata, EntityRef, NodeId, NodeRecord,
    Properties, Response, Result,
};
use std::collections::{HashMap, HashSet, VecDeque};

/// How one fetched edge lands in an entity's relationship field.
struct Attachment<'r> {
    owner: NodeId,
    field: &'static str,
    target: NodeId,
    edge: &'r EdgeRecord,
}

/// Materialises fetched records into one mapping context.
pub struct Hydrator<'a, M: EntityMetadata + ?Sized> {
    metadata: &'a M,
    context: &'a mut MappingContext,
}

impl<'a, M: EntityMetadata + ?Sized> Hydrator<'a, M> {
    pub fn new(metadata: &'a M, context: &'a mut MappingContext) -> Self {
        Self { metadata, context }
    }

    /// Materialise `response` and return the root entities in fetch order.
    #[tracing::instrument(level = "debug", skip(self, response), fields(nodes = response.nodes.len(), edges = response.edges.len()))]
    pub fn hydrate(&mut self, response: &Response, depth: Depth) -> Result<Vec<EntityRef>> {
        let records: HashMap<NodeId, &NodeRecord> =
            response.nodes.iter().map(|n| (n.id, n)).collect();

        let mut adjacency: HashMap<NodeId, Vec<usize>> = HashMap::new();
        for (index, edge) in response.edges.iter().enumerate() {
            adjacency.entry(edge.start).or_default().push(index);
            if edge.end != edge.start {
                adjacency.entry(edge.end).or_default().push(index);
            }
        }

        // Breadth-first over the records, bounded by depth.
        let mut hops: HashMap<NodeId, u32> = HashMap::new();
        let mut order: Vec<NodeId> = Vec::new();
        let mut included_edges: Vec<usize> = Vec::new();
        let mut seen_edges: HashSet<usize> = HashSet::new();
        let mut queue: VecDeque<NodeId> = VecDeque::new();

        let mut roots: Vec<NodeId> = Vec::new();
        for root in &response.roots {
            if records.contains_key(root) && !hops.contains_key(root) {
                hops.insert(*root, 0);
                order.push(*root);
                queue.push_back(*root);
                roots.push(*root);
            }
        }

        while let Some(id) = queue.pop_front() {
            let distance = hops[&id];
            if !depth.can_expand(distance) {
                continue;
            }
            for &index in adjacency.get(&id).map_or(&[][..], Vec::as_slice) {
                let edge = &response.edges[index];
                let other = if edge.start == id { edge.end } else { edge.start };
                if !records.contains_key(&other) {
                    tracing::trace!(edge = index, "Edge endpoint missing from response; skipped");
                    continue;
                }
                if seen_edges.insert(index) {
                    included_edges.push(index);
                }
                if !hops.contains_key(&other) {
                    hops.insert(other, distance + 1);
                    order.push(other);
                    queue.push_back(other);
                }
            }
        }

        // Resolve metadata for everything in range before mutating.
        let mut persistent: HashMap<NodeId, Properties> = HashMap::new();
        for id in &order {
            let record = records[id];
            self.metadata.relationships_of(&record.label)?;
            persistent.insert(
                *id,
                self.metadata
                    .persistent_properties(&record.label, &record.properties)?,
            );
        }

        let mut attachments: Vec<Attachment<'_>> = Vec::new();
        for &index in &included_edges {
            let edge = &response.edges[index];
            let start = records[&edge.start];
            let end = records[&edge.end];
            let mut attached = false;

            for info in self.metadata.relationships_of(&start.label)? {
                if info.rel_type == edge.rel_type
                    && info.target_label == end.label
                    && matches!(info.direction, Direction::Outgoing | Direction::Undirected)
                {
                    attachments.push(Attachment {
                        owner: edge.start,
                        field: info.field,
                        target: edge.end,
                        edge,
                    });
                    attached = true;
                }
            }
            for info in self.metadata.relationships_of(&end.label)? {
                let reaches_start = matches!(info.direction, Direction::Incoming)
                    || (info.direction == Direction::Undirected && edge.start != edge.end);
                if info.rel_type == edge.rel_type && info.target_label == start.label && reaches_start
                {
                    attachments.push(Attachment {
                        owner: edge.end,
                        field: info.field,
                        target: edge.start,
                        edge,
                    });
                    attached = true;
                }
            }

            if !attached {
                tracing::trace!(
                    rel_type = %edge.rel_type,
                    start = edge.start.get(),
                    end = edge.end.get(),
                    "No relationship field maps this edge"
                );
            }
        }

        // Materialise nodes.
        let mut entities: HashMap<NodeId, EntityRef> = HashMap::new();
        let mut reused = 0_usize;
        for id in &order {
            let record = records[id];
            let Some(props) = persistent.remove(id) else {
                continue;
            };
            let entity = match self.context.lookup(*id) {
                Some(existing) => {
                    self.refresh(&existing, &record.label, &props)?;
                    reused += 1;
                    existing
                }
                None => {
                    let mut entity = Entity::new(record.label.clone());
                    for (name, value) in &props {
                        entity.set_property(name.clone(), value.clone());
                    }
                    entity.set_id(*id);
                    let entity = EntityRef::new(entity);
                    self.context.remember(*id, &entity);
                    entity
                }
            };
            self.context.snapshot(*id, props);
            entities.insert(*id, entity);
        }

        // Attach relationships and record them as known.
        for attachment in &attachments {
            if let (Some(owner), Some(target)) = (
                entities.get(&attachment.owner),
                entities.get(&attachment.target),
            ) {
                owner.write().relate_with(
                    attachment.field,
                    target,
                    attachment.edge.properties.clone(),
                );
            }
        }
        for &index in &included_edges {
            let edge = &response.edges[index];
            self.context.record_relationship(
                EdgeKey::new(edge.start, edge.end, edge.rel_type.clone()),
                edge.properties.clone(),
            );
        }

        tracing::debug!(
            materialised = order.len(),
            reused = reused,
            relationships = included_edges.len(),
            "Hydrated response"
        );

        Ok(roots
            .iter()
            .filter_map(|id| entities.get(id).cloned())
            .collect())
    }

    /// Overwrite the persistent properties of a reused instance.
    ///
    /// Undeclared properties the caller set on the instance are kept.
    fn refresh(&self, entity: &EntityRef, label: &str, loaded: &Properties) -> Result<()> {
        let fields = self.metadata.fields_of(label)?;
        let mut guard = entity.write();
        for field in fields {
            match loaded.get(field.name) {
                Some(value) => {
                    guard.set_property(field.name, value.clone());
                }
                None => {
                    guard.remove_property(field.name);
                }
            }
        }
        Ok(())
    }
}
