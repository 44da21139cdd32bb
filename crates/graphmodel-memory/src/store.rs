//! Graph state and statement evaluation.

use graphmodel_core::error::PipelineErrorKind;
use graphmodel_core::{
    Batch, ComparisonOperator, Depth, EdgeRecord, Error, Filter, Filters, NodeId, NodeRecord,
    NodeRef, PendingKey, PipelineError, Properties, Response, Statement,
};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

/// Key of a stored relationship: (start, end, type).
pub(crate) type EdgeSlot = (NodeId, NodeId, String);

#[derive(Debug, Clone)]
pub(crate) struct StoredNode {
    pub label: String,
    pub properties: Properties,
}

/// Everything the graph holds. Cloned before each batch so a failing
/// statement can be discarded wholesale.
#[derive(Debug, Clone, Default)]
pub(crate) struct GraphState {
    pub nodes: BTreeMap<NodeId, StoredNode>,
    pub edges: BTreeMap<EdgeSlot, Properties>,
    pub next_id: i64,
}

fn failure(kind: PipelineErrorKind, index: usize, message: impl Into<String>) -> Error {
    Error::Pipeline(PipelineError {
        kind,
        message: message.into(),
        statement: Some(index),
        source: None,
    })
}

impl GraphState {
    /// Apply every statement of `batch` in order.
    pub fn apply(&mut self, batch: &Batch) -> Result<Response, Error> {
        let mut response = Response::default();
        let mut assigned: HashMap<PendingKey, NodeId> = HashMap::new();
        let mut fetched = Fetched::default();

        for (index, statement) in batch.iter().enumerate() {
            match statement {
                Statement::CreateNode {
                    key,
                    label,
                    properties,
                } => {
                    let id = NodeId(self.next_id);
                    self.next_id += 1;
                    self.nodes.insert(
                        id,
                        StoredNode {
                            label: label.clone(),
                            properties: properties.clone(),
                        },
                    );
                    assigned.insert(*key, id);
                    response.created.push((*key, id));
                }
                Statement::UpdateNode {
                    id, set, removed, ..
                } => {
                    let node = self.nodes.get_mut(id).ok_or_else(|| {
                        failure(
                            PipelineErrorKind::UnknownNode,
                            index,
                            format!("cannot update missing node {id}"),
                        )
                    })?;
                    for name in removed {
                        node.properties.remove(name);
                    }
                    node.properties
                        .extend(set.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                Statement::DeleteNode { id } => {
                    if self.detach_delete(*id) {
                        response.deleted.push(*id);
                    }
                }
                Statement::CreateRelationship {
                    start,
                    end,
                    rel_type,
                    properties,
                } => {
                    let start = self.resolve(*start, &assigned, index)?;
                    let end = self.resolve(*end, &assigned, index)?;
                    self.edges
                        .insert((start, end, rel_type.clone()), properties.clone());
                }
                Statement::UpdateRelationship {
                    start,
                    end,
                    rel_type,
                    properties,
                } => {
                    let slot = (*start, *end, rel_type.clone());
                    let Some(current) = self.edges.get_mut(&slot) else {
                        return Err(failure(
                            PipelineErrorKind::Rejected,
                            index,
                            format!("no relationship ({start})-[:{rel_type}]->({end})"),
                        ));
                    };
                    current.clone_from(properties);
                }
                Statement::DeleteRelationship {
                    start,
                    end,
                    rel_type,
                } => {
                    self.edges.remove(&(*start, *end, rel_type.clone()));
                }
                Statement::FetchById { id, label, depth } => {
                    let matches = self
                        .nodes
                        .get(id)
                        .is_some_and(|n| label.as_ref().is_none_or(|l| n.label == *l));
                    if matches {
                        fetched.collect(self, &[*id], *depth);
                    }
                }
                Statement::FetchAll { label, depth } => {
                    let roots = self.matching(label, &Filters::new());
                    fetched.collect(self, &roots, *depth);
                }
                Statement::FetchByFilter {
                    label,
                    filters,
                    depth,
                } => {
                    let roots = self.matching(label, filters);
                    fetched.collect(self, &roots, *depth);
                }
                Statement::DeleteAll { label } => {
                    for id in self.matching(label, &Filters::new()) {
                        self.detach_delete(id);
                        response.deleted.push(id);
                    }
                }
                Statement::DeleteByFilter { label, filters } => {
                    for id in self.matching(label, filters) {
                        self.detach_delete(id);
                        response.deleted.push(id);
                    }
                }
            }
        }

        fetched.finish(self, &mut response);
        Ok(response)
    }

    fn resolve(
        &self,
        node: NodeRef,
        assigned: &HashMap<PendingKey, NodeId>,
        index: usize,
    ) -> Result<NodeId, Error> {
        let id = match node {
            NodeRef::Existing(id) => id,
            NodeRef::Pending(key) => *assigned.get(&key).ok_or_else(|| {
                failure(
                    PipelineErrorKind::UnknownNode,
                    index,
                    format!("pending node {key} was not created earlier in the batch"),
                )
            })?,
        };
        if self.nodes.contains_key(&id) {
            Ok(id)
        } else {
            Err(failure(
                PipelineErrorKind::UnknownNode,
                index,
                format!("relationship endpoint {id} does not exist"),
            ))
        }
    }

    /// Nodes with `label` matching every filter, in identity order.
    pub fn matching(&self, label: &str, filters: &Filters) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.label == label)
            .filter(|(_, node)| filters.iter().all(|f| satisfies(&node.properties, f)))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Remove a node and every relationship touching it.
    pub fn detach_delete(&mut self, id: NodeId) -> bool {
        if self.nodes.remove(&id).is_none() {
            return false;
        }
        self.edges
            .retain(|(start, end, _), _| *start != id && *end != id);
        true
    }

    fn incident(&self, id: NodeId) -> impl Iterator<Item = &EdgeSlot> {
        self.edges
            .keys()
            .filter(move |(start, end, _)| *start == id || *end == id)
    }
}

fn satisfies(properties: &Properties, filter: &Filter) -> bool {
    let Some(value) = properties.get(&filter.property) else {
        return false;
    };
    let ordering = value.compare(&filter.value);
    match filter.operator {
        ComparisonOperator::Equals => ordering == Some(Ordering::Equal),
        ComparisonOperator::GreaterThan => ordering == Some(Ordering::Greater),
        ComparisonOperator::LessThan => ordering == Some(Ordering::Less),
    }
}

/// Accumulates fetch results across the statements of one batch.
#[derive(Debug, Default)]
struct Fetched {
    roots: Vec<NodeId>,
    nodes: BTreeSet<NodeId>,
    edges: BTreeSet<EdgeSlot>,
}

impl Fetched {
    /// Breadth-first neighbourhood of `roots`, bounded by `depth`.
    fn collect(&mut self, state: &GraphState, roots: &[NodeId], depth: Depth) {
        let mut hops: HashMap<NodeId, u32> = HashMap::new();
        let mut queue = VecDeque::new();
        for root in roots {
            if !self.roots.contains(root) {
                self.roots.push(*root);
            }
            if hops.insert(*root, 0).is_none() {
                queue.push_back(*root);
            }
        }

        while let Some(id) = queue.pop_front() {
            self.nodes.insert(id);
            let hop = hops.get(&id).copied().unwrap_or_default();
            if !depth.can_expand(hop) {
                continue;
            }
            for slot in state.incident(id) {
                let other = if slot.0 == id { slot.1 } else { slot.0 };
                self.edges.insert(slot.clone());
                if !hops.contains_key(&other) {
                    hops.insert(other, hop + 1);
                    queue.push_back(other);
                }
            }
        }
    }

    fn finish(self, state: &GraphState, response: &mut Response) {
        response.roots.extend(self.roots);
        response.nodes.extend(self.nodes.into_iter().filter_map(|id| {
            state.nodes.get(&id).map(|node| NodeRecord {
                id,
                label: node.label.clone(),
                properties: node.properties.clone(),
            })
        }));
        response.edges.extend(self.edges.into_iter().filter_map(|slot| {
            let properties = state.edges.get(&slot)?.clone();
            let (start, end, rel_type) = slot;
            Some(EdgeRecord {
                rel_type,
                start,
                end,
                properties,
            })
        }));
    }
}
