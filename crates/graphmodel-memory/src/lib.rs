//! In-memory property graph for graphmodel.
//!
//! [`MemoryGraph`] implements the [`Pipeline`] contract against a graph held
//! in process memory. It is the reference store used by the integration
//! tests and is handy for examples and prototyping.
//!
//! # Semantics
//!
//! - Batches are atomic: statements run against a copy of the graph, which
//!   replaces the live graph only if every statement succeeded.
//! - Identities are assigned sequentially from 0 and never reused.
//! - Relationships are keyed by (start, end, type); creating an existing one
//!   replaces its properties.
//! - Node deletes are detach-deletes.
//! - Fetches return the breadth-first neighbourhood of the matched roots,
//!   following relationships in both directions up to the requested depth.
//!
//! # Example
//!
//! ```rust,ignore
//! use graphmodel_memory::MemoryGraph;
//!
//! let graph = MemoryGraph::new();
//! let mut session = factory.open(graph.clone());
//! session.save(&cx, &chicken).await?;
//! assert_eq!(graph.node_count(), 2);
//! ```

mod store;

use asupersync::{Cx, Outcome};
use graphmodel_core::error::PipelineErrorKind;
use graphmodel_core::{Batch, Error, NodeId, NodeRecord, Pipeline, Properties, Response};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use store::GraphState;

#[derive(Debug, Default)]
struct Shared {
    graph: GraphState,
    history: Vec<Batch>,
    fail_next: Option<String>,
}

/// A property graph held in memory.
///
/// Clones share the same graph, so a test can keep one handle for inspection
/// while a session owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryGraph {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next batch fail with a transport error before it is applied.
    pub fn fail_next(&self, message: impl Into<String>) {
        self.lock().fail_next = Some(message.into());
    }

    /// Every batch submitted so far, including failed ones.
    pub fn executed(&self) -> Vec<Batch> {
        self.lock().history.clone()
    }

    /// Number of batches submitted so far.
    pub fn batch_count(&self) -> usize {
        self.lock().history.len()
    }

    pub fn node_count(&self) -> usize {
        self.lock().graph.nodes.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.lock().graph.edges.len()
    }

    /// Number of relationships of `rel_type`.
    pub fn relationship_count_of(&self, rel_type: &str) -> usize {
        self.lock()
            .graph
            .edges
            .keys()
            .filter(|(_, _, t)| t == rel_type)
            .count()
    }

    /// The stored node with identity `id`.
    pub fn node(&self, id: NodeId) -> Option<NodeRecord> {
        self.lock().graph.nodes.get(&id).map(|node| NodeRecord {
            id,
            label: node.label.clone(),
            properties: node.properties.clone(),
        })
    }

    /// Does a `(start)-[:rel_type]->(end)` relationship exist?
    pub fn has_relationship(&self, start: NodeId, end: NodeId, rel_type: &str) -> bool {
        self.lock()
            .graph
            .edges
            .contains_key(&(start, end, rel_type.to_string()))
    }

    /// Properties of the `(start)-[:rel_type]->(end)` relationship.
    pub fn relationship_properties(
        &self,
        start: NodeId,
        end: NodeId,
        rel_type: &str,
    ) -> Option<Properties> {
        self.lock()
            .graph
            .edges
            .get(&(start, end, rel_type.to_string()))
            .cloned()
    }

    /// Remove everything, keeping the history and the identity sequence.
    pub fn purge(&self) {
        let mut shared = self.lock();
        shared.graph.nodes.clear();
        shared.graph.edges.clear();
    }

    #[tracing::instrument(level = "debug", skip(self, batch), fields(statements = batch.len()))]
    fn execute_sync(&self, batch: &Batch) -> Result<Response, Error> {
        let mut shared = self.lock();
        shared.history.push(batch.clone());

        if let Some(message) = shared.fail_next.take() {
            tracing::debug!(message = %message, "Injected failure");
            return Err(Error::pipeline(PipelineErrorKind::Transport, message));
        }

        let mut working = shared.graph.clone();
        match working.apply(batch) {
            Ok(response) => {
                shared.graph = working;
                tracing::trace!(
                    created = response.created.len(),
                    fetched = response.nodes.len(),
                    deleted = response.deleted.len(),
                    "Batch applied"
                );
                Ok(response)
            }
            Err(e) => {
                tracing::debug!(error = %e, "Batch rejected, graph unchanged");
                Err(e)
            }
        }
    }
}

impl Pipeline for MemoryGraph {
    fn execute(
        &self,
        cx: &Cx,
        batch: &Batch,
    ) -> impl Future<Output = Outcome<Response, Error>> + Send {
        let result = match cx.cancel_reason() {
            Some(reason) => Outcome::Cancelled(reason),
            None => self
                .execute_sync(batch)
                .map_or_else(Outcome::Err, Outcome::Ok),
        };
        async move { result }
    }
}
