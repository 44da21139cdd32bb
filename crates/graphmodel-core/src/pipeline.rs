//! The query/response pipeline contract.
//!
//! The session never talks to a database directly. It expresses every save,
//! load and delete as a [`Batch`] of [`Statement`]s and hands it to a
//! [`Pipeline`], which executes the batch atomically and reports back a
//! [`Response`]: identities assigned to created nodes, fetched records and
//! deleted identities.
//!
//! All operations integrate with asupersync's structured concurrency via `Cx`
//! for cancellation and timeout handling.

use crate::entity::{Depth, NodeId, Properties};
use crate::error::Result;
use crate::filter::Filters;
use asupersync::{Cx, Outcome};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Batch-local handle for a node that has no identity yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PendingKey(pub u32);

impl fmt::Display for PendingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "_{}", self.0)
    }
}

/// Endpoint of a relationship statement: a stored node, or one created
/// earlier in the same batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRef {
    Existing(NodeId),
    Pending(PendingKey),
}

impl NodeRef {
    /// The stored identity, if the node already exists.
    pub const fn existing(self) -> Option<NodeId> {
        match self {
            NodeRef::Existing(id) => Some(id),
            NodeRef::Pending(_) => None,
        }
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRef::Existing(id) => write!(f, "{}", id),
            NodeRef::Pending(key) => write!(f, "{}", key),
        }
    }
}

/// One operation against the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Statement {
    /// Create a node; its identity is reported under `key`.
    CreateNode {
        key: PendingKey,
        label: String,
        properties: Properties,
    },
    /// Set and remove properties on an existing node.
    UpdateNode {
        id: NodeId,
        label: String,
        set: Properties,
        removed: Vec<String>,
    },
    /// Detach-delete a node.
    DeleteNode { id: NodeId },
    CreateRelationship {
        start: NodeRef,
        end: NodeRef,
        rel_type: String,
        properties: Properties,
    },
    /// Replace the properties of an existing relationship.
    UpdateRelationship {
        start: NodeId,
        end: NodeId,
        rel_type: String,
        properties: Properties,
    },
    DeleteRelationship {
        start: NodeId,
        end: NodeId,
        rel_type: String,
    },
    /// Fetch one node and everything within `depth` hops of it.
    FetchById {
        id: NodeId,
        label: Option<String>,
        depth: Depth,
    },
    /// Fetch every node with `label`, plus neighbourhoods within `depth`.
    FetchAll { label: String, depth: Depth },
    /// Fetch nodes with `label` matching all `filters`, plus neighbourhoods.
    FetchByFilter {
        label: String,
        filters: Filters,
        depth: Depth,
    },
    /// Detach-delete every node with `label`.
    DeleteAll { label: String },
    /// Detach-delete every node with `label` matching all `filters`.
    DeleteByFilter { label: String, filters: Filters },
}

impl Statement {
    /// Short name of the operation, for logs.
    pub const fn kind(&self) -> &'static str {
        match self {
            Statement::CreateNode { .. } => "create_node",
            Statement::UpdateNode { .. } => "update_node",
            Statement::DeleteNode { .. } => "delete_node",
            Statement::CreateRelationship { .. } => "create_relationship",
            Statement::UpdateRelationship { .. } => "update_relationship",
            Statement::DeleteRelationship { .. } => "delete_relationship",
            Statement::FetchById { .. } => "fetch_by_id",
            Statement::FetchAll { .. } => "fetch_all",
            Statement::FetchByFilter { .. } => "fetch_by_filter",
            Statement::DeleteAll { .. } => "delete_all",
            Statement::DeleteByFilter { .. } => "delete_by_filter",
        }
    }

    pub const fn is_relationship(&self) -> bool {
        matches!(
            self,
            Statement::CreateRelationship { .. }
                | Statement::UpdateRelationship { .. }
                | Statement::DeleteRelationship { .. }
        )
    }

    pub const fn is_fetch(&self) -> bool {
        matches!(
            self,
            Statement::FetchById { .. } | Statement::FetchAll { .. } | Statement::FetchByFilter { .. }
        )
    }
}

/// An ordered list of statements executed as one unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    statements: Vec<Statement>,
}

impl Batch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, statement: Statement) {
        self.statements.push(statement);
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Statement> {
        self.statements.iter()
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Encode the batch as a JSON request body.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl From<Vec<Statement>> for Batch {
    fn from(statements: Vec<Statement>) -> Self {
        Self { statements }
    }
}

impl<'a> IntoIterator for &'a Batch {
    type Item = &'a Statement;
    type IntoIter = std::slice::Iter<'a, Statement>;

    fn into_iter(self) -> Self::IntoIter {
        self.statements.iter()
    }
}

/// A fetched node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub label: String,
    pub properties: Properties,
}

/// A fetched relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub rel_type: String,
    pub start: NodeId,
    pub end: NodeId,
    pub properties: Properties,
}

/// What the pipeline reports after executing a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Identities assigned to created nodes.
    pub created: Vec<(PendingKey, NodeId)>,
    /// Nodes that matched a fetch directly, in match order.
    pub roots: Vec<NodeId>,
    /// Fetched nodes, roots included.
    pub nodes: Vec<NodeRecord>,
    /// Fetched relationships between fetched nodes.
    pub edges: Vec<EdgeRecord>,
    /// Identities removed by delete statements.
    pub deleted: Vec<NodeId>,
}

impl Response {
    /// Identity assigned to a pending node, if the pipeline reported one.
    pub fn assigned(&self, key: PendingKey) -> Option<NodeId> {
        self.created
            .iter()
            .find_map(|(k, id)| (*k == key).then_some(*id))
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeRecord> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// Executes batches against a property-graph store.
///
/// Implementations must apply a batch atomically: either every statement
/// takes effect and `Outcome::Ok` is returned, or none does.
///
/// # Example
///
/// ```rust,ignore
/// let mut batch = Batch::new();
/// batch.push(Statement::FetchAll { label: "Ingredient".into(), depth: Depth::ONE });
/// let response = pipeline.execute(&cx, &batch).await?;
/// ```
pub trait Pipeline: Send + Sync {
    /// Execute every statement of `batch` as one unit.
    fn execute(
        &self,
        cx: &Cx,
        batch: &Batch,
    ) -> impl Future<Output = Outcome<Response, crate::Error>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_batch_json_form() {
        let mut props = Properties::new();
        props.insert("name".into(), Value::Text("Chicken".into()));
        let mut batch = Batch::new();
        batch.push(Statement::CreateNode {
            key: PendingKey(0),
            label: "Ingredient".into(),
            properties: props,
        });
        batch.push(Statement::CreateRelationship {
            start: NodeRef::Pending(PendingKey(0)),
            end: NodeRef::Existing(NodeId(4)),
            rel_type: "PAIRS_WITH".into(),
            properties: Properties::new(),
        });

        let json = batch.to_json().unwrap();
        assert!(json.contains("\"op\":\"create_node\""));
        assert!(json.contains("\"PAIRS_WITH\""));
        assert_eq!(Batch::from_json(&json).unwrap(), batch);
    }

    #[test]
    fn test_statement_classification() {
        let delete = Statement::DeleteRelationship {
            start: NodeId(1),
            end: NodeId(2),
            rel_type: "KNOWS".into(),
        };
        assert!(delete.is_relationship());
        assert!(!delete.is_fetch());
        let fetch = Statement::FetchAll {
            label: "Mortal".into(),
            depth: Depth::ZERO,
        };
        assert!(fetch.is_fetch());
        assert_eq!(fetch.kind(), "fetch_all");
    }

    #[test]
    fn test_response_assigned_lookup() {
        let response = Response {
            created: vec![(PendingKey(0), NodeId(10)), (PendingKey(1), NodeId(11))],
            ..Response::default()
        };
        assert_eq!(response.assigned(PendingKey(1)), Some(NodeId(11)));
        assert_eq!(response.assigned(PendingKey(2)), None);
    }

    #[test]
    fn test_node_ref_display() {
        assert_eq!(NodeRef::Pending(PendingKey(3)).to_string(), "_3");
        assert_eq!(NodeRef::Existing(NodeId(7)).to_string(), "7");
        assert_eq!(NodeRef::Existing(NodeId(7)).existing(), Some(NodeId(7)));
    }
}
