//! graphmodel - object-graph mapping for property-graph databases.
//!
//! graphmodel persists plain domain objects as nodes and relationships and
//! loads them back, providing:
//!
//! - A session that computes minimal create/update/delete batches
//! - An identity map guaranteeing one instance per node per session
//! - Depth-bounded, cycle-safe traversal for both save and load
//! - Direction-aware relationships (OUTGOING, INCOMING, UNDIRECTED), each
//!   stored exactly once however many endpoints declare it
//!
//! # Quick Start
//!
//! ```ignore
//! use graphmodel::prelude::*;
//!
//! let registry = SchemaRegistry::new().with(
//!     NodeSchema::new("Ingredient")
//!         .field(FieldInfo::new("name", ScalarType::Text))
//!         .relationship(RelationshipInfo::new(
//!             "pairings",
//!             "PAIRS_WITH",
//!             Direction::Undirected,
//!             "Ingredient",
//!         )),
//! )?;
//!
//! let factory = SessionFactory::new(registry)?;
//! let mut session = factory.open(pipeline);
//!
//! let chicken = EntityRef::new(Entity::new("Ingredient").with_property("name", "Chicken"));
//! let carrot = EntityRef::new(Entity::new("Ingredient").with_property("name", "Carrot"));
//! chicken.write().relate("pairings", &carrot);
//!
//! // Creates both nodes and one PAIRS_WITH relationship.
//! session.save(&cx, &chicken).await;
//!
//! // Nothing changed: no batch is sent.
//! session.save(&cx, &chicken).await;
//! ```
//!
//! # Features
//!
//! - **Pluggable metadata**: anything implementing `EntityMetadata`
//! - **Pluggable stores**: anything implementing `Pipeline`
//! - **Structured concurrency**: Built on asupersync for cancel-correct operations
//! - **`memory`**: re-exports the in-memory `MemoryGraph` store

pub use graphmodel_core::{
    Batch, ComparisonOperator, Cx, Depth, Direction, EdgeRecord, Entity, EntityMetadata,
    EntityRef, Error, FieldInfo, Filter, Filters, NodeId, NodeRecord, NodeRef, NodeSchema,
    Outcome, PendingKey, Pipeline, Properties, Related, RelationshipInfo, Response, Result,
    ScalarType, SchemaRegistry, Statement, Value,
};

pub use graphmodel_core::error::{
    MappingError, MappingErrorKind, MetadataError, MetadataErrorKind, PipelineError,
    PipelineErrorKind,
};

pub use graphmodel_session::{
    ContextStats, FlushResult, MappingContext, Session, SessionConfig, SessionDebugInfo,
    SessionFactory,
};

#[cfg(feature = "memory")]
pub use graphmodel_memory::MemoryGraph;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use graphmodel::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        // asupersync
        Cx,
        // Data model
        Depth,
        Direction,
        Entity,
        EntityMetadata,
        EntityRef,
        Error,
        FieldInfo,
        // Filters
        Filter,
        Filters,
        NodeId,
        NodeSchema,
        Outcome,
        // Pipeline
        Pipeline,
        Properties,
        RelationshipInfo,
        Result,
        ScalarType,
        SchemaRegistry,
        // Session
        Session,
        SessionConfig,
        SessionFactory,
        Value,
    };

    #[cfg(feature = "memory")]
    pub use crate::MemoryGraph;
}
