//! Flush operation ordering and fold-back for graphmodel sessions.
//!
//! A save is planned into a [`FlushPlan`] and submitted as one batch in this
//! order:
//! - CREATE nodes (so later relationship statements can reference them)
//! - UPDATE node properties
//! - DELETE relationships that are no longer reachable from their owner
//! - CREATE relationships
//! - UPDATE relationship properties
//!
//! Once the pipeline confirms the batch, [`FlushPlan::fold`] writes the
//! outcome back into the mapping context. Folding validates the whole response
//! before it mutates anything.

use crate::change_tracker::PropertyDiff;
use crate::context::MappingContext;
use crate::relationship_registry::EdgeKey;
use asupersync::{Cx, Outcome};
use graphmodel_core::error::PipelineErrorKind;
use graphmodel_core::{
    Batch, EntityRef, Error, NodeId, NodeRef, PendingKey, Pipeline, Properties, Response, Result,
    Statement,
};
use serde::Serialize;
use std::collections::HashMap;

/// A pending graph operation.
#[derive(Debug, Clone)]
pub enum PendingOp {
    /// Create a node for a transient entity.
    CreateNode {
        /// Batch-local handle the pipeline reports the identity under.
        key: PendingKey,
        /// The entity that receives the identity.
        entity: EntityRef,
        label: String,
        /// Persistent properties, also the snapshot after success.
        properties: Properties,
    },
    /// Update the changed properties of a tracked node.
    UpdateNode {
        id: NodeId,
        label: String,
        diff: PropertyDiff,
        /// Full persistent properties, the snapshot after success.
        snapshot: Properties,
    },
    DeleteRelationship {
        edge: EdgeKey,
    },
    CreateRelationship {
        start: NodeRef,
        end: NodeRef,
        rel_type: String,
        properties: Properties,
    },
    UpdateRelationship {
        edge: EdgeKey,
        properties: Properties,
    },
}

impl PendingOp {
    /// The statement this operation submits.
    pub fn to_statement(&self) -> Statement {
        match self {
            PendingOp::CreateNode {
                key,
                label,
                properties,
                ..
            } => Statement::CreateNode {
                key: *key,
                label: label.clone(),
                properties: properties.clone(),
            },
            PendingOp::UpdateNode { id, label, diff, .. } => Statement::UpdateNode {
                id: *id,
                label: label.clone(),
                set: diff.set.clone(),
                removed: diff.removed.clone(),
            },
            PendingOp::DeleteRelationship { edge } => Statement::DeleteRelationship {
                start: edge.start,
                end: edge.end,
                rel_type: edge.rel_type.clone(),
            },
            PendingOp::CreateRelationship {
                start,
                end,
                rel_type,
                properties,
            } => Statement::CreateRelationship {
                start: *start,
                end: *end,
                rel_type: rel_type.clone(),
                properties: properties.clone(),
            },
            PendingOp::UpdateRelationship { edge, properties } => {
                Statement::UpdateRelationship {
                    start: edge.start,
                    end: edge.end,
                    rel_type: edge.rel_type.clone(),
                    properties: properties.clone(),
                }
            }
        }
    }
}

/// A plan for executing one save.
#[derive(Debug, Default)]
pub struct FlushPlan {
    /// Node creates, in traversal order.
    pub creates: Vec<PendingOp>,
    /// Node property updates, in traversal order.
    pub updates: Vec<PendingOp>,
    /// Relationship deletes, in key order.
    pub unlinks: Vec<PendingOp>,
    /// Relationship creates, in traversal order.
    pub links: Vec<PendingOp>,
    /// Relationship property updates, in traversal order.
    pub relinks: Vec<PendingOp>,
    /// Tracked entities visited by the traversal; they become canonical for
    /// their identity once the save succeeds.
    pub touched: Vec<(NodeId, EntityRef)>,
}

impl FlushPlan {
    /// Create an empty flush plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if the plan has any operations.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of operations in the plan.
    pub fn len(&self) -> usize {
        self.creates.len()
            + self.updates.len()
            + self.unlinks.len()
            + self.links.len()
            + self.relinks.len()
    }

    /// All operations in submission order.
    pub fn ops(&self) -> impl Iterator<Item = &PendingOp> {
        self.creates
            .iter()
            .chain(&self.updates)
            .chain(&self.unlinks)
            .chain(&self.links)
            .chain(&self.relinks)
    }

    /// Build the batch submitted to the pipeline.
    pub fn to_batch(&self) -> Batch {
        self.ops().map(PendingOp::to_statement).collect::<Vec<_>>().into()
    }

    /// Submit the plan through `pipeline`.
    ///
    /// An empty plan is not submitted at all.
    #[tracing::instrument(level = "info", skip(self, cx, pipeline))]
    pub async fn execute<P: Pipeline>(&self, cx: &Cx, pipeline: &P) -> Outcome<Response, Error> {
        if self.is_empty() {
            tracing::debug!("Nothing to flush");
            return Outcome::Ok(Response::default());
        }

        tracing::info!(
            creates = self.creates.len(),
            updates = self.updates.len(),
            unlinks = self.unlinks.len(),
            links = self.links.len(),
            relinks = self.relinks.len(),
            "Executing flush plan"
        );

        let start = std::time::Instant::now();
        let batch = self.to_batch();

        let response = match pipeline.execute(cx, &batch).await {
            Outcome::Ok(response) => response,
            Outcome::Err(e) => {
                tracing::warn!(error = %e, "Flush failed; mapping context left untouched");
                return Outcome::Err(e);
            }
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        tracing::info!(
            elapsed_ms = start.elapsed().as_millis(),
            statements = batch.len(),
            "Flush complete"
        );

        Outcome::Ok(response)
    }

    /// Fold a confirmed response back into the mapping context.
    ///
    /// Fails without touching the context if any created node is missing its
    /// assigned identity.
    pub fn fold(&self, response: &Response, context: &mut MappingContext) -> Result<FlushResult> {
        let mut assigned: HashMap<PendingKey, NodeId> = HashMap::new();
        for op in &self.creates {
            if let PendingOp::CreateNode { key, label, .. } = op {
                let id = response.assigned(*key).ok_or_else(|| {
                    Error::pipeline(
                        PipelineErrorKind::MissingIdentity,
                        format!("no identity assigned to created {} node {}", label, key),
                    )
                })?;
                assigned.insert(*key, id);
            }
        }

        let mut links = Vec::with_capacity(self.links.len());
        for op in &self.links {
            if let PendingOp::CreateRelationship {
                start,
                end,
                rel_type,
                properties,
            } = op
            {
                let edge = EdgeKey::new(
                    resolve(*start, &assigned)?,
                    resolve(*end, &assigned)?,
                    rel_type.clone(),
                );
                links.push((edge, properties.clone()));
            }
        }

        // Everything resolved: from here on nothing can fail.
        let mut result = FlushResult::default();

        for (id, entity) in &self.touched {
            context.remember(*id, entity);
        }

        for op in &self.creates {
            if let PendingOp::CreateNode {
                key,
                entity,
                properties,
                ..
            } = op
            {
                let Some(&id) = assigned.get(key) else {
                    continue;
                };
                entity.write().set_id(id);
                context.remember(id, entity);
                context.snapshot(id, properties.clone());
                result.nodes_created += 1;
            }
        }

        for op in &self.updates {
            if let PendingOp::UpdateNode { id, snapshot, .. } = op {
                context.snapshot(*id, snapshot.clone());
                result.nodes_updated += 1;
            }
        }

        for op in &self.unlinks {
            if let PendingOp::DeleteRelationship { edge } = op {
                context.forget_relationship(edge);
                result.relationships_deleted += 1;
            }
        }

        for (edge, properties) in links {
            context.record_relationship(edge, properties);
            result.relationships_created += 1;
        }

        for op in &self.relinks {
            if let PendingOp::UpdateRelationship { edge, properties } = op {
                context.record_relationship(edge.clone(), properties.clone());
                result.relationships_updated += 1;
            }
        }

        tracing::debug!(
            nodes_created = result.nodes_created,
            nodes_updated = result.nodes_updated,
            relationships_created = result.relationships_created,
            relationships_deleted = result.relationships_deleted,
            "Folded flush result into mapping context"
        );

        Ok(result)
    }
}

fn resolve(node: NodeRef, assigned: &HashMap<PendingKey, NodeId>) -> Result<NodeId> {
    match node {
        NodeRef::Existing(id) => Ok(id),
        NodeRef::Pending(key) => assigned.get(&key).copied().ok_or_else(|| {
            Error::pipeline(
                PipelineErrorKind::MissingIdentity,
                format!("relationship references unknown pending node {}", key),
            )
        }),
    }
}

/// Result of a flush operation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FlushResult {
    pub nodes_created: usize,
    pub nodes_updated: usize,
    pub relationships_created: usize,
    pub relationships_updated: usize,
    pub relationships_deleted: usize,
}

impl FlushResult {
    /// Create a new empty result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of operations performed.
    pub fn total(&self) -> usize {
        self.nodes_created
            + self.nodes_updated
            + self.relationships_created
            + self.relationships_updated
            + self.relationships_deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphmodel_core::{Entity, Value};

    fn ingredient(name: &str) -> EntityRef {
        EntityRef::new(Entity::new("Ingredient").with_property("name", name))
    }

    fn props(name: &str) -> Properties {
        let mut props = Properties::new();
        props.insert("name".into(), Value::Text(name.into()));
        props
    }

    fn two_node_plan(chicken: &EntityRef, carrot: &EntityRef) -> FlushPlan {
        let mut plan = FlushPlan::new();
        plan.creates.push(PendingOp::CreateNode {
            key: PendingKey(0),
            entity: chicken.clone(),
            label: "Ingredient".into(),
            properties: props("Chicken"),
        });
        plan.creates.push(PendingOp::CreateNode {
            key: PendingKey(1),
            entity: carrot.clone(),
            label: "Ingredient".into(),
            properties: props("Carrot"),
        });
        plan.links.push(PendingOp::CreateRelationship {
            start: NodeRef::Pending(PendingKey(0)),
            end: NodeRef::Pending(PendingKey(1)),
            rel_type: "PAIRS_WITH".into(),
            properties: Properties::new(),
        });
        plan
    }

    #[test]
    fn test_batch_order_follows_categories() {
        let mut plan = FlushPlan::new();
        plan.relinks.push(PendingOp::UpdateRelationship {
            edge: EdgeKey::new(NodeId(1), NodeId(2), "PAIRS_WITH"),
            properties: Properties::new(),
        });
        plan.unlinks.push(PendingOp::DeleteRelationship {
            edge: EdgeKey::new(NodeId(1), NodeId(3), "PAIRS_WITH"),
        });
        plan.creates.push(PendingOp::CreateNode {
            key: PendingKey(0),
            entity: ingredient("Chicken"),
            label: "Ingredient".into(),
            properties: props("Chicken"),
        });

        let kinds: Vec<_> = plan.to_batch().iter().map(Statement::kind).collect();
        assert_eq!(
            kinds,
            vec!["create_node", "delete_relationship", "update_relationship"]
        );
        assert_eq!(plan.len(), 3);
    }

    #[test]
    fn test_fold_assigns_identities_and_records_edges() {
        let chicken = ingredient("Chicken");
        let carrot = ingredient("Carrot");
        let plan = two_node_plan(&chicken, &carrot);
        let response = Response {
            created: vec![(PendingKey(0), NodeId(10)), (PendingKey(1), NodeId(11))],
            ..Response::default()
        };
        let mut ctx = MappingContext::new();

        let result = plan.fold(&response, &mut ctx).unwrap();

        assert_eq!(result.nodes_created, 2);
        assert_eq!(result.relationships_created, 1);
        assert_eq!(chicken.id(), Some(NodeId(10)));
        assert!(ctx.lookup(NodeId(11)).unwrap().ptr_eq(&carrot));
        assert!(ctx.is_known_relationship(NodeId(10), NodeId(11), "PAIRS_WITH"));
        assert!(!ctx.is_dirty(NodeId(10), &props("Chicken")));
    }

    #[test]
    fn test_fold_missing_identity_leaves_context_untouched() {
        let chicken = ingredient("Chicken");
        let carrot = ingredient("Carrot");
        let plan = two_node_plan(&chicken, &carrot);
        let response = Response {
            created: vec![(PendingKey(0), NodeId(10))],
            ..Response::default()
        };
        let mut ctx = MappingContext::new();

        let err = plan.fold(&response, &mut ctx).unwrap_err();

        assert!(matches!(
            err,
            Error::Pipeline(ref p) if p.kind == PipelineErrorKind::MissingIdentity
        ));
        assert!(chicken.id().is_none());
        assert_eq!(ctx.stats().entities, 0);
        assert_eq!(ctx.stats().relationships, 0);
    }

    #[test]
    fn test_fold_forgets_deleted_relationships() {
        let mut ctx = MappingContext::new();
        let edge = EdgeKey::new(NodeId(1), NodeId(2), "KNOWS");
        ctx.record_relationship(edge.clone(), Properties::new());

        let mut plan = FlushPlan::new();
        plan.unlinks.push(PendingOp::DeleteRelationship { edge });
        let result = plan.fold(&Response::default(), &mut ctx).unwrap();

        assert_eq!(result.relationships_deleted, 1);
        assert!(!ctx.is_known_relationship(NodeId(1), NodeId(2), "KNOWS"));
    }

    #[test]
    fn test_flush_result_total() {
        let result = FlushResult {
            nodes_created: 2,
            nodes_updated: 1,
            relationships_created: 3,
            relationships_updated: 0,
            relationships_deleted: 1,
        };
        assert_eq!(result.total(), 7);
        assert_eq!(FlushResult::new().total(), 0);
    }
}
