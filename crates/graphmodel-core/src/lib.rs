//! Core types and traits for graphmodel.
//!
//! This crate provides the foundational abstractions for object-graph mapping:
//!
//! - `Entity` / `EntityRef` for the caller's object graph
//! - `EntityMetadata` and `SchemaRegistry` describing how labels map
//! - `Pipeline` for executing statement batches against a graph store
//! - `Filter` types for scoped fetches and deletes
//! - `Outcome` re-export from asupersync for cancel-correct operations
//! - `Cx` context for structured concurrency

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub mod entity;
pub mod error;
pub mod filter;
pub mod metadata;
pub mod pipeline;
pub mod value;

pub use entity::{Depth, Entity, EntityRef, NodeId, Properties, Related};
pub use error::{
    Error, MappingError, MappingErrorKind, MetadataError, MetadataErrorKind, PipelineError,
    PipelineErrorKind, Result,
};
pub use filter::{ComparisonOperator, Filter, Filters};
pub use metadata::{
    Direction, EntityMetadata, FieldInfo, NodeSchema, RelationshipInfo, ScalarType,
    SchemaRegistry, check_back_reference,
};
pub use pipeline::{
    Batch, EdgeRecord, NodeRecord, NodeRef, PendingKey, Pipeline, Response, Statement,
};
pub use value::Value;
