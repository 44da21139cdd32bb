//! Save planning: traversal and diffing of an object graph.
//!
//! The Unit of Work walks the caller's object graph breadth-first from the
//! roots of a save and compares what it finds with the mapping context:
//! - Transient entities (or entities whose identity the session does not
//!   track) become node creates
//! - Tracked entities with changed persistent properties become node updates
//! - Relationships are canonicalised into (start, end, type) and become
//!   creates or property updates when they are new or changed
//! - Known relationships that an expanded entity no longer holds are deleted
//!
//! The traversal visits every instance once, so cyclic graphs converge. An
//! entity at hop distance `h` has its relationship fields followed only while
//! `h < depth`.
//!
//! # Example
//!
//! ```ignore
//! let uow = UnitOfWork::new(&registry, &context);
//! let plan = uow.plan_save(&[chicken.clone()], Depth::UNBOUNDED)?;
//! let response = plan.execute(&cx, &pipeline).await?;
//! plan.fold(&response, &mut context)?;
//! ```

use crate::change_tracker::same_properties;
use crate::context::MappingContext;
use crate::flush::{FlushPlan, PendingOp};
use crate::relationship_registry::EdgeKey;
use graphmodel_core::error::{MappingErrorKind, MetadataErrorKind};
use graphmodel_core::{
    Depth, Direction, EntityMetadata, EntityRef, Error, NodeId, NodeRef, PendingKey, Properties,
    Related, Result, check_back_reference,
};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// Plans saves against one mapping context.
pub struct UnitOfWork<'a, M: EntityMetadata + ?Sized> {
    metadata: &'a M,
    context: &'a MappingContext,
}

/// An entity reached by the traversal.
struct PlannedNode {
    entity: EntityRef,
    label: String,
    node: NodeRef,
    hops: u32,
}

/// A relationship entry found while expanding an entity, before it is
/// canonicalised.
struct EdgeDraft {
    owner: usize,
    other: usize,
    rel_type: &'static str,
    direction: Direction,
    properties: Properties,
}

#[derive(Default)]
struct Traversal {
    nodes: Vec<PlannedNode>,
    /// Reference identity -> node index.
    by_addr: HashMap<usize, usize>,
    /// Database identity -> node index, for alias detection.
    by_id: HashMap<NodeId, usize>,
    queue: VecDeque<usize>,
    drafts: Vec<EdgeDraft>,
    expanded: Vec<usize>,
    /// Known relationships the current object graph still holds.
    produced: HashSet<EdgeKey>,
    next_key: u32,
    plan: FlushPlan,
}

impl<'a, M: EntityMetadata + ?Sized> UnitOfWork<'a, M> {
    pub fn new(metadata: &'a M, context: &'a MappingContext) -> Self {
        Self { metadata, context }
    }

    /// Compute the operations needed to persist everything reachable from
    /// `roots` within `depth` hops.
    ///
    /// Metadata and mapping errors are reported before anything is
    /// submitted; the context is never mutated here.
    #[tracing::instrument(level = "debug", skip(self, roots), fields(roots = roots.len()))]
    pub fn plan_save(&self, roots: &[EntityRef], depth: Depth) -> Result<FlushPlan> {
        let mut state = Traversal::default();

        for root in roots {
            self.visit(&mut state, root, 0)?;
        }

        while let Some(index) = state.queue.pop_front() {
            if depth.can_expand(state.nodes[index].hops) {
                self.expand(&mut state, index)?;
            }
        }

        self.resolve_edges(&mut state)?;
        self.prune(&mut state)?;

        tracing::debug!(
            visited = state.nodes.len(),
            expanded = state.expanded.len(),
            operations = state.plan.len(),
            "Planned save"
        );

        Ok(state.plan)
    }

    /// Register `entity` in the traversal, returning its node index.
    fn visit(&self, state: &mut Traversal, entity: &EntityRef, hops: u32) -> Result<usize> {
        let addr = entity.identity_hash();
        if let Some(&index) = state.by_addr.get(&addr) {
            return Ok(index);
        }

        let (label, id, properties) = {
            let guard = entity.read();
            (guard.label().to_string(), guard.id(), guard.properties().clone())
        };

        if let Some(id) = id {
            if let Some(&index) = state.by_id.get(&id) {
                tracing::warn!(
                    id = id.get(),
                    label = %label,
                    "Second instance of an already visited identity; saving the first only"
                );
                state.by_addr.insert(addr, index);
                return Ok(index);
            }
        }

        if self.metadata.identity_field_of(&label)?.is_none() {
            return Err(Error::metadata(
                MetadataErrorKind::MissingIdentityField,
                label,
                "label has no identity field and cannot be saved",
            ));
        }
        let persistent = self.metadata.persistent_properties(&label, &properties)?;

        let node = match id.filter(|known| self.context.is_tracked(*known)) {
            Some(id) => {
                let diff = self.context.changed_properties(id, &persistent);
                if !diff.is_empty() {
                    state.plan.updates.push(PendingOp::UpdateNode {
                        id,
                        label: label.clone(),
                        diff,
                        snapshot: persistent,
                    });
                }
                state.plan.touched.push((id, entity.clone()));
                NodeRef::Existing(id)
            }
            None => {
                if let Some(stale) = id {
                    tracing::debug!(
                        id = stale.get(),
                        label = %label,
                        "Identity not tracked by this session; creating a new node"
                    );
                }
                let key = PendingKey(state.next_key);
                state.next_key += 1;
                state.plan.creates.push(PendingOp::CreateNode {
                    key,
                    entity: entity.clone(),
                    label: label.clone(),
                    properties: persistent,
                });
                NodeRef::Pending(key)
            }
        };

        tracing::trace!(label = %label, node = %node, hops = hops, "Visited entity");

        let index = state.nodes.len();
        state.nodes.push(PlannedNode {
            entity: entity.clone(),
            label,
            node,
            hops,
        });
        state.by_addr.insert(addr, index);
        if let Some(id) = id {
            state.by_id.insert(id, index);
        }
        state.queue.push_back(index);
        Ok(index)
    }

    /// Follow every relationship field of the node at `index`.
    fn expand(&self, state: &mut Traversal, index: usize) -> Result<()> {
        let (entity, label, hops) = {
            let node = &state.nodes[index];
            (node.entity.clone(), node.label.clone(), node.hops)
        };

        // Copy the fields out so no lock is held while visiting targets
        // (a self-reference would otherwise read-lock the same entity twice).
        let fields: Vec<(String, Vec<Related>)> = entity
            .read()
            .relationships()
            .map(|(field, related)| (field.to_string(), related.to_vec()))
            .collect();

        for (field, related) in fields {
            let info = *self.metadata.relationship(&label, &field)?;
            check_back_reference(self.metadata, &label, &info)?;

            for entry in related {
                let target_label = entry.target.label();
                if target_label != info.target_label {
                    return Err(Error::mapping(
                        MappingErrorKind::UnexpectedTarget,
                        format!(
                            "{}.{} expects {} but holds a {}",
                            label, field, info.target_label, target_label
                        ),
                    ));
                }

                let other = self.visit(state, &entry.target, hops + 1)?;
                state.drafts.push(EdgeDraft {
                    owner: index,
                    other,
                    rel_type: info.rel_type,
                    direction: info.direction,
                    properties: entry.properties,
                });
            }
        }

        state.expanded.push(index);
        Ok(())
    }

    /// Canonicalise drafts into relationship creates and updates.
    fn resolve_edges(&self, state: &mut Traversal) -> Result<()> {
        let mut directed: HashMap<(usize, usize, &'static str), Properties> = HashMap::new();
        let mut undirected: HashMap<(usize, usize, &'static str), Properties> = HashMap::new();

        for draft in std::mem::take(&mut state.drafts) {
            let (start, end) = match draft.direction {
                Direction::Outgoing | Direction::Undirected => (draft.owner, draft.other),
                Direction::Incoming => (draft.other, draft.owner),
            };
            let pair = (start.min(end), start.max(end), draft.rel_type);
            let is_undirected = draft.direction == Direction::Undirected;

            let (seen, slot) = if is_undirected {
                if directed.contains_key(&(start, end, draft.rel_type))
                    || directed.contains_key(&(end, start, draft.rel_type))
                {
                    return Err(conflict(state, start, end, draft.rel_type));
                }
                (&mut undirected, pair)
            } else {
                if undirected.contains_key(&pair) {
                    return Err(conflict(state, start, end, draft.rel_type));
                }
                (&mut directed, (start, end, draft.rel_type))
            };
            // Both endpoints may declare the same relationship; they must agree.
            if let Some(first) = seen.get(&slot) {
                if !same_properties(first, &draft.properties) {
                    return Err(disagreement(state, start, end, draft.rel_type));
                }
                continue;
            }
            seen.insert(slot, draft.properties.clone());

            let start_ref = state.nodes[start].node;
            let end_ref = state.nodes[end].node;

            if let (Some(s), Some(e)) = (start_ref.existing(), end_ref.existing()) {
                let known = if is_undirected {
                    self.context.find_relationship_either(s, e, draft.rel_type)
                } else {
                    self.context
                        .is_known_relationship(s, e, draft.rel_type)
                        .then(|| EdgeKey::new(s, e, draft.rel_type))
                };
                if let Some(edge) = known {
                    if self.context.is_relationship_dirty(&edge, &draft.properties) {
                        state.plan.relinks.push(PendingOp::UpdateRelationship {
                            edge: edge.clone(),
                            properties: draft.properties,
                        });
                    }
                    state.produced.insert(edge);
                    continue;
                }
            }

            state.plan.links.push(PendingOp::CreateRelationship {
                start: start_ref,
                end: end_ref,
                rel_type: draft.rel_type.to_string(),
                properties: draft.properties,
            });
        }

        Ok(())
    }

    /// Delete known relationships that expanded entities no longer hold.
    ///
    /// A known relationship is claimed by an entity when the entity declares
    /// a field of that type whose role matches (start for OUTGOING, end for
    /// INCOMING, either for UNDIRECTED) and whose target label matches the
    /// other endpoint.
    fn prune(&self, state: &mut Traversal) -> Result<()> {
        let mut doomed: BTreeSet<EdgeKey> = BTreeSet::new();

        for &index in &state.expanded {
            let node = &state.nodes[index];
            let Some(id) = node.node.existing() else {
                continue;
            };
            let declared = self.metadata.relationships_of(&node.label)?;

            for edge in self.context.relationships_of(id) {
                if state.produced.contains(&edge) {
                    continue;
                }
                let Some(other) = edge.other(id) else {
                    continue;
                };
                let Some(other_label) = self.context.lookup(other).map(|e| e.label()) else {
                    continue;
                };

                let claimed = declared.iter().any(|info| {
                    info.rel_type == edge.rel_type
                        && info.target_label == other_label
                        && match info.direction {
                            Direction::Outgoing => edge.start == id,
                            Direction::Incoming => edge.end == id,
                            Direction::Undirected => true,
                        }
                });
                if claimed {
                    tracing::debug!(edge = %edge, "Relationship no longer held; deleting");
                    doomed.insert(edge);
                }
            }
        }

        state.plan.unlinks.extend(
            doomed
                .into_iter()
                .map(|edge| PendingOp::DeleteRelationship { edge }),
        );
        Ok(())
    }
}

fn conflict(state: &Traversal, start: usize, end: usize, rel_type: &str) -> Error {
    Error::mapping(
        MappingErrorKind::ConflictingDirection,
        format!(
            "{} between {} {} and {} {} is declared both undirected and directed",
            rel_type,
            state.nodes[start].label,
            state.nodes[start].node,
            state.nodes[end].label,
            state.nodes[end].node
        ),
    )
}

fn disagreement(state: &Traversal, start: usize, end: usize, rel_type: &str) -> Error {
    Error::mapping(
        MappingErrorKind::ConflictingProperties,
        format!(
            "{} between {} {} and {} {} is declared by both endpoints with different properties",
            rel_type,
            state.nodes[start].label,
            state.nodes[start].node,
            state.nodes[end].label,
            state.nodes[end].node
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphmodel_core::{
        Entity, FieldInfo, NodeSchema, RelationshipInfo, ScalarType, SchemaRegistry, Statement,
        Value,
    };

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new()
            .with(
                NodeSchema::new("Ingredient")
                    .field(FieldInfo::new("name", ScalarType::Text))
                    .relationship(RelationshipInfo::new(
                        "pairings",
                        "PAIRS_WITH",
                        Direction::Undirected,
                        "Ingredient",
                    )),
            )
            .unwrap()
            .with(
                NodeSchema::new("Mortal")
                    .field(FieldInfo::new("name", ScalarType::Text))
                    .relationship(RelationshipInfo::new(
                        "knownBy",
                        "KNOWN_BY",
                        Direction::Incoming,
                        "Mortal",
                    ))
                    .relationship(RelationshipInfo::new(
                        "knows",
                        "KNOWN_BY",
                        Direction::Outgoing,
                        "Mortal",
                    ))
                    .relationship(RelationshipInfo::new(
                        "friends",
                        "KNOWN_BY",
                        Direction::Undirected,
                        "Mortal",
                    )),
            )
            .unwrap()
    }

    fn entity(label: &str, name: &str) -> EntityRef {
        EntityRef::new(Entity::new(label).with_property("name", name))
    }

    /// Track `entity` under `id` as if it had been saved before.
    fn track(ctx: &mut MappingContext, entity: &EntityRef, id: i64) {
        entity.write().set_id(NodeId(id));
        let name = entity.read().property("name").cloned().unwrap_or(Value::Null);
        let mut snapshot = Properties::new();
        snapshot.insert("name".into(), name);
        ctx.remember(NodeId(id), entity);
        ctx.snapshot(NodeId(id), snapshot);
    }

    fn kinds(plan: &FlushPlan) -> Vec<&'static str> {
        plan.to_batch().iter().map(Statement::kind).collect()
    }

    #[test]
    fn test_new_pair_creates_two_nodes_and_one_edge() {
        let registry = registry();
        let ctx = MappingContext::new();
        let chicken = entity("Ingredient", "Chicken");
        let carrot = entity("Ingredient", "Carrot");
        chicken.write().relate("pairings", &carrot);
        carrot.write().relate("pairings", &chicken);

        let plan = UnitOfWork::new(&registry, &ctx)
            .plan_save(&[chicken.clone()], Depth::UNBOUNDED)
            .unwrap();

        assert_eq!(
            kinds(&plan),
            vec!["create_node", "create_node", "create_relationship"]
        );
        chicken.write().clear_related("pairings");
    }

    #[test]
    fn test_unchanged_tracked_graph_plans_nothing() {
        let registry = registry();
        let mut ctx = MappingContext::new();
        let chicken = entity("Ingredient", "Chicken");
        let carrot = entity("Ingredient", "Carrot");
        track(&mut ctx, &chicken, 1);
        track(&mut ctx, &carrot, 2);
        chicken.write().relate("pairings", &carrot);
        ctx.record_relationship(EdgeKey::new(NodeId(2), NodeId(1), "PAIRS_WITH"), Properties::new());

        let plan = UnitOfWork::new(&registry, &ctx)
            .plan_save(&[chicken], Depth::UNBOUNDED)
            .unwrap();

        assert!(plan.is_empty());
        assert_eq!(plan.touched.len(), 2);
    }

    #[test]
    fn test_changed_property_plans_update_only() {
        let registry = registry();
        let mut ctx = MappingContext::new();
        let chicken = entity("Ingredient", "Chicken");
        track(&mut ctx, &chicken, 1);
        chicken.write().set_property("name", "Roast chicken");
        chicken.write().set_property("scratch", true);

        let plan = UnitOfWork::new(&registry, &ctx)
            .plan_save(&[chicken], Depth::ZERO)
            .unwrap();

        assert_eq!(kinds(&plan), vec!["update_node"]);
        let PendingOp::UpdateNode { diff, .. } = &plan.updates[0] else {
            panic!("expected an update");
        };
        assert_eq!(diff.changed_fields(), vec!["name"]);
    }

    #[test]
    fn test_incoming_and_outgoing_declarations_make_one_edge() {
        let registry = registry();
        let ctx = MappingContext::new();
        let adam = entity("Mortal", "Adam");
        let daniela = entity("Mortal", "Daniela");
        // Daniela knows Adam, seen from both sides.
        adam.write().relate("knownBy", &daniela);
        daniela.write().relate("knows", &adam);

        let plan = UnitOfWork::new(&registry, &ctx)
            .plan_save(&[adam.clone()], Depth::UNBOUNDED)
            .unwrap();

        assert_eq!(plan.links.len(), 1);
        let PendingOp::CreateRelationship { start, end, .. } = &plan.links[0] else {
            panic!("expected a relationship create");
        };
        // Adam was visited first (key 0); Daniela is the start node.
        assert_eq!(*start, NodeRef::Pending(PendingKey(1)));
        assert_eq!(*end, NodeRef::Pending(PendingKey(0)));
        adam.write().clear_related("knownBy");
    }

    #[test]
    fn test_undirected_and_directed_same_pair_conflicts() {
        let registry = registry();
        let ctx = MappingContext::new();
        let adam = entity("Mortal", "Adam");
        let daniela = entity("Mortal", "Daniela");
        adam.write().relate("friends", &daniela);
        adam.write().relate("knows", &daniela);

        let err = UnitOfWork::new(&registry, &ctx)
            .plan_save(&[adam], Depth::UNBOUNDED)
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_both_endpoints_must_agree_on_relationship_properties() {
        let registry = registry();
        let ctx = MappingContext::new();
        let adam = entity("Mortal", "Adam");
        let daniela = entity("Mortal", "Daniela");
        let mut close = Properties::new();
        close.insert("closeness".into(), Value::Int(9));
        let mut distant = Properties::new();
        distant.insert("closeness".into(), Value::Int(2));
        adam.write().relate_with("knows", &daniela, close.clone());
        daniela.write().relate_with("knownBy", &adam, distant);

        match UnitOfWork::new(&registry, &ctx).plan_save(&[adam.clone()], Depth::UNBOUNDED) {
            Err(Error::Mapping(e)) => assert_eq!(e.kind, MappingErrorKind::ConflictingProperties),
            other => panic!("expected a property conflict, got {other:?}"),
        }

        daniela.write().relate_with("knownBy", &adam, close);
        let plan = UnitOfWork::new(&registry, &ctx)
            .plan_save(&[adam.clone()], Depth::UNBOUNDED)
            .unwrap();
        assert_eq!(plan.links.len(), 1);
        adam.write().clear_related("knows");
    }

    #[test]
    fn test_wrong_target_label_is_mapping_error() {
        let registry = registry();
        let ctx = MappingContext::new();
        let chicken = entity("Ingredient", "Chicken");
        let adam = entity("Mortal", "Adam");
        chicken.write().relate("pairings", &adam);

        let err = UnitOfWork::new(&registry, &ctx)
            .plan_save(&[chicken], Depth::UNBOUNDED)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Mapping(ref m) if m.kind == MappingErrorKind::UnexpectedTarget
        ));
    }

    #[test]
    fn test_unknown_field_is_metadata_error() {
        let registry = registry();
        let ctx = MappingContext::new();
        let chicken = entity("Ingredient", "Chicken");
        let carrot = entity("Ingredient", "Carrot");
        chicken.write().relate("garnish", &carrot);

        let err = UnitOfWork::new(&registry, &ctx)
            .plan_save(&[chicken], Depth::ONE)
            .unwrap_err();
        assert!(err.is_metadata());
    }

    #[test]
    fn test_depth_zero_skips_relationships() {
        let registry = registry();
        let ctx = MappingContext::new();
        let chicken = entity("Ingredient", "Chicken");
        let carrot = entity("Ingredient", "Carrot");
        chicken.write().relate("pairings", &carrot);

        let plan = UnitOfWork::new(&registry, &ctx)
            .plan_save(&[chicken], Depth::ZERO)
            .unwrap();
        assert_eq!(kinds(&plan), vec!["create_node"]);
    }

    #[test]
    fn test_depth_bounds_chain() {
        let registry = registry();
        let ctx = MappingContext::new();
        let a = entity("Ingredient", "A");
        let b = entity("Ingredient", "B");
        let c = entity("Ingredient", "C");
        let d = entity("Ingredient", "D");
        a.write().relate("pairings", &b);
        b.write().relate("pairings", &c);
        c.write().relate("pairings", &d);

        let plan = UnitOfWork::new(&registry, &ctx)
            .plan_save(&[a], Depth::new(2))
            .unwrap();
        // A, B expanded; C visited at hop 2; D never reached.
        assert_eq!(plan.creates.len(), 3);
        assert_eq!(plan.links.len(), 2);
    }

    #[test]
    fn test_self_reference_and_cycle_converge() {
        let registry = registry();
        let ctx = MappingContext::new();
        let a = entity("Ingredient", "A");
        let b = entity("Ingredient", "B");
        a.write().relate("pairings", &a);
        a.write().relate("pairings", &b);
        b.write().relate("pairings", &a);

        let plan = UnitOfWork::new(&registry, &ctx)
            .plan_save(&[a.clone(), b.clone()], Depth::UNBOUNDED)
            .unwrap();

        assert_eq!(plan.creates.len(), 2);
        assert_eq!(plan.links.len(), 2);
        a.write().clear_related("pairings");
        b.write().clear_related("pairings");
    }

    #[test]
    fn test_alias_instance_is_saved_once() {
        let registry = registry();
        let mut ctx = MappingContext::new();
        let chicken = entity("Ingredient", "Chicken");
        track(&mut ctx, &chicken, 1);
        let alias = entity("Ingredient", "Chicken renamed");
        alias.write().set_id(NodeId(1));

        let plan = UnitOfWork::new(&registry, &ctx)
            .plan_save(&[chicken, alias], Depth::ZERO)
            .unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.touched.len(), 1);
    }

    #[test]
    fn test_stale_identity_is_recreated() {
        let registry = registry();
        let ctx = MappingContext::new();
        let chicken = entity("Ingredient", "Chicken");
        chicken.write().set_id(NodeId(42));

        let plan = UnitOfWork::new(&registry, &ctx)
            .plan_save(&[chicken], Depth::ZERO)
            .unwrap();
        assert_eq!(kinds(&plan), vec!["create_node"]);
    }

    #[test]
    fn test_dropped_edge_is_pruned() {
        let registry = registry();
        let mut ctx = MappingContext::new();
        let chicken = entity("Ingredient", "Chicken");
        let carrot = entity("Ingredient", "Carrot");
        let leek = entity("Ingredient", "Leek");
        track(&mut ctx, &chicken, 1);
        track(&mut ctx, &carrot, 2);
        track(&mut ctx, &leek, 3);
        ctx.record_relationship(EdgeKey::new(NodeId(1), NodeId(2), "PAIRS_WITH"), Properties::new());
        ctx.record_relationship(EdgeKey::new(NodeId(3), NodeId(1), "PAIRS_WITH"), Properties::new());
        chicken.write().relate("pairings", &carrot);

        let plan = UnitOfWork::new(&registry, &ctx)
            .plan_save(&[chicken], Depth::ONE)
            .unwrap();

        assert_eq!(kinds(&plan), vec!["delete_relationship"]);
        let PendingOp::DeleteRelationship { edge } = &plan.unlinks[0] else {
            panic!("expected a delete");
        };
        assert_eq!(*edge, EdgeKey::new(NodeId(3), NodeId(1), "PAIRS_WITH"));
    }

    #[test]
    fn test_unexpanded_entity_never_prunes() {
        let registry = registry();
        let mut ctx = MappingContext::new();
        let chicken = entity("Ingredient", "Chicken");
        let carrot = entity("Ingredient", "Carrot");
        track(&mut ctx, &chicken, 1);
        track(&mut ctx, &carrot, 2);
        ctx.record_relationship(EdgeKey::new(NodeId(1), NodeId(2), "PAIRS_WITH"), Properties::new());

        let plan = UnitOfWork::new(&registry, &ctx)
            .plan_save(&[chicken], Depth::ZERO)
            .unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_incoming_field_only_prunes_its_own_role() {
        let registry = SchemaRegistry::new()
            .with(NodeSchema::new("Person").relationship(RelationshipInfo::new(
                "knownBy",
                "KNOWN_BY",
                Direction::Incoming,
                "Person",
            )))
            .unwrap();
        let mut ctx = MappingContext::new();
        let adam = entity("Person", "Adam");
        let daniela = entity("Person", "Daniela");
        let eve = entity("Person", "Eve");
        track(&mut ctx, &adam, 1);
        track(&mut ctx, &daniela, 2);
        track(&mut ctx, &eve, 3);
        // Adam is the start of the first edge, so his knownBy never held it.
        ctx.record_relationship(EdgeKey::new(NodeId(1), NodeId(2), "KNOWN_BY"), Properties::new());
        ctx.record_relationship(EdgeKey::new(NodeId(3), NodeId(1), "KNOWN_BY"), Properties::new());

        let plan = UnitOfWork::new(&registry, &ctx)
            .plan_save(&[adam], Depth::ONE)
            .unwrap();

        let deleted: Vec<_> = plan
            .unlinks
            .iter()
            .filter_map(|op| match op {
                PendingOp::DeleteRelationship { edge } => Some(edge.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(deleted, vec![EdgeKey::new(NodeId(3), NodeId(1), "KNOWN_BY")]);
    }

    #[test]
    fn test_relationship_property_change_plans_update() {
        let registry = registry();
        let mut ctx = MappingContext::new();
        let chicken = entity("Ingredient", "Chicken");
        let carrot = entity("Ingredient", "Carrot");
        track(&mut ctx, &chicken, 1);
        track(&mut ctx, &carrot, 2);
        ctx.record_relationship(EdgeKey::new(NodeId(1), NodeId(2), "PAIRS_WITH"), Properties::new());
        let mut affinity = Properties::new();
        affinity.insert("affinity".into(), Value::Float(0.8));
        chicken.write().relate_with("pairings", &carrot, affinity);

        let plan = UnitOfWork::new(&registry, &ctx)
            .plan_save(&[chicken], Depth::ONE)
            .unwrap();
        assert_eq!(kinds(&plan), vec!["update_relationship"]);
    }

    #[test]
    fn test_label_without_identity_cannot_be_saved() {
        let registry = SchemaRegistry::new()
            .with(NodeSchema::new("Tag").without_identity())
            .unwrap();
        let ctx = MappingContext::new();
        let err = UnitOfWork::new(&registry, &ctx)
            .plan_save(&[entity("Tag", "x")], Depth::ZERO)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Metadata(ref m) if m.kind == MetadataErrorKind::MissingIdentityField
        ));
    }
}
