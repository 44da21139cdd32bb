//! Session mapping engine for graphmodel.
//!
//! `graphmodel-session` is the **unit-of-work layer**. It decides what must be
//! created, updated or deleted when an object graph is saved, and reconciles
//! fetched records back into the instances the caller already holds.
//!
//! # Role In The Architecture
//!
//! - **Identity map**: a single in-memory instance per node identity.
//! - **Change tracking**: property snapshots and known relationships, used to
//!   compute minimal diffs.
//! - **Depth-bounded traversal**: saves and loads cover a configurable number
//!   of relationship hops.
//! - **Pipeline**: every operation is one batch submitted through a
//!   [`Pipeline`]; the context changes only after the batch is confirmed.
//!
//! # Design Philosophy
//!
//! - **Explicit over implicit**: nothing is persisted until `save` is called.
//! - **Single owner**: mutating operations take `&mut self`; use one session
//!   per task.
//! - **Cancel-correct**: All async operations use `Cx` + `Outcome` via
//!   `graphmodel-core`.
//!
//! # Example
//!
//! ```ignore
//! let factory = SessionFactory::new(registry)?;
//! let mut session = factory.open(pipeline);
//!
//! chicken.write().relate("pairings", &carrot);
//! session.save(&cx, &chicken).await?;
//!
//! session.clear();
//! let all = session.load_all(&cx, "Ingredient", Depth::ZERO).await?;
//! ```

pub mod change_tracker;
pub mod context;
pub mod flush;
pub mod hydrate;
pub mod identity_map;
pub mod relationship_registry;
pub mod unit_of_work;

pub use change_tracker::{ChangeTracker, PropertyDiff, PropertySnapshot};
pub use context::{ContextStats, MappingContext};
pub use flush::{FlushPlan, FlushResult, PendingOp};
pub use hydrate::Hydrator;
pub use identity_map::IdentityMap;
pub use relationship_registry::{EdgeKey, RelationshipRecord, RelationshipRegistry};
pub use unit_of_work::UnitOfWork;

use asupersync::{Cx, Outcome};
use graphmodel_core::{
    Batch, Depth, EntityMetadata, EntityRef, Error, Filters, NodeId, Pipeline, Response, Result,
    SchemaRegistry, Statement,
};
use serde::Serialize;
use std::sync::Arc;

// ============================================================================
// Session Configuration
// ============================================================================

/// Configuration for Session behavior.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Depth used by `save` and `save_all`.
    pub default_save_depth: Depth,
    /// Depth used by `load`.
    pub default_load_depth: Depth,
    /// Whether a factory cross-checks `back_populates` declarations when it
    /// is created.
    pub verify_back_references: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_save_depth: Depth::UNBOUNDED,
            default_load_depth: Depth::ONE,
            verify_back_references: true,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn save_depth(mut self, depth: Depth) -> Self {
        self.default_save_depth = depth;
        self
    }

    #[must_use]
    pub fn load_depth(mut self, depth: Depth) -> Self {
        self.default_load_depth = depth;
        self
    }

    #[must_use]
    pub fn verify_back_references(mut self, value: bool) -> Self {
        self.verify_back_references = value;
        self
    }
}

// ============================================================================
// Session Factory
// ============================================================================

/// Opens sessions that share one metadata registry and configuration.
#[derive(Debug)]
pub struct SessionFactory<M: EntityMetadata = SchemaRegistry> {
    metadata: Arc<M>,
    config: SessionConfig,
}

impl<M: EntityMetadata> SessionFactory<M> {
    /// Create a factory with the default configuration.
    pub fn new(metadata: M) -> Result<Self> {
        Self::with_config(metadata, SessionConfig::default())
    }

    /// Create a factory, verifying the metadata if the config asks for it.
    pub fn with_config(metadata: M, config: SessionConfig) -> Result<Self> {
        let metadata = Arc::new(metadata);
        if config.verify_back_references {
            metadata.verify()?;
        }
        Ok(Self { metadata, config })
    }

    /// Open a new session over `pipeline`, with an empty mapping context.
    pub fn open<P: Pipeline>(&self, pipeline: P) -> Session<P, M> {
        Session::with_config(pipeline, Arc::clone(&self.metadata), self.config.clone())
    }

    pub fn metadata(&self) -> &Arc<M> {
        &self.metadata
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

// ============================================================================
// Session
// ============================================================================

/// The Session is the central unit-of-work manager.
///
/// It tracks entities saved through or loaded by it and computes the minimal
/// set of graph operations for each save.
pub struct Session<P: Pipeline, M: EntityMetadata = SchemaRegistry> {
    pipeline: P,
    metadata: Arc<M>,
    context: MappingContext,
    config: SessionConfig,
    batches_executed: u64,
}

impl<P: Pipeline, M: EntityMetadata> Session<P, M> {
    /// Create a new session with default configuration.
    pub fn new(pipeline: P, metadata: Arc<M>) -> Self {
        Self::with_config(pipeline, metadata, SessionConfig::default())
    }

    /// Create a new session with custom configuration.
    pub fn with_config(pipeline: P, metadata: Arc<M>, config: SessionConfig) -> Self {
        Self {
            pipeline,
            metadata,
            context: MappingContext::new(),
            config,
            batches_executed: 0,
        }
    }

    pub fn pipeline(&self) -> &P {
        &self.pipeline
    }

    pub fn metadata(&self) -> &M {
        &self.metadata
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Read-only view of what the session tracks.
    pub fn context(&self) -> &MappingContext {
        &self.context
    }

    // ========================================================================
    // Save
    // ========================================================================

    /// Save `entity` and everything reachable from it within the default
    /// save depth.
    pub async fn save(&mut self, cx: &Cx, entity: &EntityRef) -> Outcome<FlushResult, Error> {
        let depth = self.config.default_save_depth;
        self.save_roots(cx, std::slice::from_ref(entity), depth)
            .await
    }

    /// Save `entity` and everything within `depth` hops of it.
    ///
    /// Depth 0 persists the entity's own properties only.
    pub async fn save_with_depth(
        &mut self,
        cx: &Cx,
        entity: &EntityRef,
        depth: Depth,
    ) -> Outcome<FlushResult, Error> {
        self.save_roots(cx, std::slice::from_ref(entity), depth)
            .await
    }

    /// Save several roots in one batch.
    pub async fn save_all(
        &mut self,
        cx: &Cx,
        entities: &[EntityRef],
    ) -> Outcome<FlushResult, Error> {
        let depth = self.config.default_save_depth;
        self.save_roots(cx, entities, depth).await
    }

    #[tracing::instrument(level = "debug", skip(self, cx, roots), fields(roots = roots.len()))]
    async fn save_roots(
        &mut self,
        cx: &Cx,
        roots: &[EntityRef],
        depth: Depth,
    ) -> Outcome<FlushResult, Error> {
        let plan = match UnitOfWork::new(&*self.metadata, &self.context).plan_save(roots, depth) {
            Ok(plan) => plan,
            Err(e) => return Outcome::Err(e),
        };

        if !plan.is_empty() {
            self.batches_executed += 1;
        }

        let response = match plan.execute(cx, &self.pipeline).await {
            Outcome::Ok(response) => response,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        match plan.fold(&response, &mut self.context) {
            Ok(result) => Outcome::Ok(result),
            Err(e) => Outcome::Err(e),
        }
    }

    // ========================================================================
    // Load
    // ========================================================================

    /// Load the `label` node with identity `id`, with the default load depth.
    ///
    /// Returns `None` if no such node exists.
    pub async fn load(
        &mut self,
        cx: &Cx,
        label: &str,
        id: impl Into<NodeId>,
    ) -> Outcome<Option<EntityRef>, Error> {
        let depth = self.config.default_load_depth;
        self.load_with_depth(cx, label, id, depth).await
    }

    /// Load one node and everything within `depth` hops of it.
    ///
    /// A tracked identity reuses the instance the session already holds.
    /// Relationship collections of reused instances are merged, never
    /// pruned: call [`Session::clear`] first to load a smaller neighbourhood
    /// than before.
    pub async fn load_with_depth(
        &mut self,
        cx: &Cx,
        label: &str,
        id: impl Into<NodeId>,
        depth: Depth,
    ) -> Outcome<Option<EntityRef>, Error> {
        let id = id.into();
        let statement = Statement::FetchById {
            id,
            label: Some(label.to_string()),
            depth,
        };
        match self.fetch(cx, label, statement, depth).await {
            Outcome::Ok(mut roots) => {
                if roots.is_empty() {
                    tracing::debug!(label = label, id = id.get(), "No node with that identity");
                    Outcome::Ok(None)
                } else {
                    Outcome::Ok(Some(roots.swap_remove(0)))
                }
            }
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Load every node with `label`.
    pub async fn load_all(
        &mut self,
        cx: &Cx,
        label: &str,
        depth: Depth,
    ) -> Outcome<Vec<EntityRef>, Error> {
        let statement = Statement::FetchAll {
            label: label.to_string(),
            depth,
        };
        self.fetch(cx, label, statement, depth).await
    }

    /// Load every node with `label` whose properties match all `filters`.
    pub async fn load_by_filter(
        &mut self,
        cx: &Cx,
        label: &str,
        filters: &Filters,
        depth: Depth,
    ) -> Outcome<Vec<EntityRef>, Error> {
        let statement = Statement::FetchByFilter {
            label: label.to_string(),
            filters: filters.clone(),
            depth,
        };
        self.fetch(cx, label, statement, depth).await
    }

    #[tracing::instrument(level = "debug", skip(self, cx, statement))]
    async fn fetch(
        &mut self,
        cx: &Cx,
        label: &str,
        statement: Statement,
        depth: Depth,
    ) -> Outcome<Vec<EntityRef>, Error> {
        if let Err(e) = self.metadata.fields_of(label) {
            return Outcome::Err(e);
        }

        let response = match self.submit(cx, Batch::from(vec![statement])).await {
            Outcome::Ok(response) => response,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        match Hydrator::new(&*self.metadata, &mut self.context).hydrate(&response, depth) {
            Ok(roots) => Outcome::Ok(roots),
            Err(e) => Outcome::Err(e),
        }
    }

    // ========================================================================
    // Delete
    // ========================================================================

    /// Detach-delete the node behind `entity`.
    ///
    /// The session forgets the identity and its relationships, and the entity
    /// becomes transient again. Returns `false` without touching the graph
    /// for an entity whose identity this session does not track (never
    /// persisted, or held across [`Session::clear`]), and `false` when the
    /// node no longer existed.
    pub async fn delete(&mut self, cx: &Cx, entity: &EntityRef) -> Outcome<bool, Error> {
        let (label, id) = {
            let guard = entity.read();
            (guard.label().to_string(), guard.id())
        };
        let Some(id) = id.filter(|known| self.context.is_tracked(*known)) else {
            tracing::debug!(label = %label, "Delete of an untracked entity ignored");
            return Outcome::Ok(false);
        };
        if let Err(e) = self.metadata.fields_of(&label) {
            return Outcome::Err(e);
        }

        let response = match self
            .submit(cx, Batch::from(vec![Statement::DeleteNode { id }]))
            .await
        {
            Outcome::Ok(response) => response,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        self.context.forget(id);
        entity.write().clear_id();
        Outcome::Ok(response.deleted.contains(&id))
    }

    /// Detach-delete every node with `label`. Returns how many were deleted.
    pub async fn delete_all(&mut self, cx: &Cx, label: &str) -> Outcome<usize, Error> {
        let statement = Statement::DeleteAll {
            label: label.to_string(),
        };
        self.delete_matching(cx, label, statement).await
    }

    /// Detach-delete every node with `label` matching all `filters`.
    pub async fn delete_by_filter(
        &mut self,
        cx: &Cx,
        label: &str,
        filters: &Filters,
    ) -> Outcome<usize, Error> {
        let statement = Statement::DeleteByFilter {
            label: label.to_string(),
            filters: filters.clone(),
        };
        self.delete_matching(cx, label, statement).await
    }

    async fn delete_matching(
        &mut self,
        cx: &Cx,
        label: &str,
        statement: Statement,
    ) -> Outcome<usize, Error> {
        if let Err(e) = self.metadata.fields_of(label) {
            return Outcome::Err(e);
        }

        let response = match self.submit(cx, Batch::from(vec![statement])).await {
            Outcome::Ok(response) => response,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        for id in &response.deleted {
            if let Some(entity) = self.context.lookup(*id) {
                entity.write().clear_id();
            }
            self.context.forget(*id);
        }
        tracing::debug!(label = label, deleted = response.deleted.len(), "Deleted nodes");
        Outcome::Ok(response.deleted.len())
    }

    // ========================================================================
    // Context
    // ========================================================================

    /// Forget every tracked identity, snapshot and relationship.
    ///
    /// Entities the caller still holds keep their identity fields but are
    /// treated as transient by the next save and ignored by [`Session::delete`],
    /// and the next load builds fresh instances.
    pub fn clear(&mut self) {
        self.context.clear();
    }

    /// Is `entity` tracked by this session with its current identity?
    pub fn contains(&self, entity: &EntityRef) -> bool {
        entity
            .id()
            .is_some_and(|id| self.context.is_canonical(id, entity))
    }

    /// Would a save of `entity` at depth 0 emit anything?
    pub fn is_modified(&self, entity: &EntityRef) -> bool {
        let guard = entity.read();
        let Some(id) = guard.id() else {
            return true;
        };
        if !self.context.is_tracked(id) {
            return true;
        }
        match self
            .metadata
            .persistent_properties(guard.label(), guard.properties())
        {
            Ok(current) => self.context.is_dirty(id, &current),
            Err(e) => {
                tracing::debug!(error = %e, "Metadata lookup failed; reporting entity as modified");
                true
            }
        }
    }

    /// Dump session state for debugging.
    pub fn debug_state(&self) -> SessionDebugInfo {
        let stats = self.context.stats();
        SessionDebugInfo {
            tracked: stats.entities,
            snapshots: stats.snapshots,
            relationships: stats.relationships,
            batches_executed: self.batches_executed,
        }
    }

    async fn submit(&mut self, cx: &Cx, batch: Batch) -> Outcome<Response, Error> {
        self.batches_executed += 1;
        tracing::debug!(statements = batch.len(), "Submitting batch");
        self.pipeline.execute(cx, &batch).await
    }
}

impl<P: Pipeline + std::fmt::Debug, M: EntityMetadata> std::fmt::Debug for Session<P, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("pipeline", &self.pipeline)
            .field("config", &self.config)
            .field("state", &self.debug_state())
            .finish_non_exhaustive()
    }
}

/// Debug information about session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionDebugInfo {
    /// Tracked identities.
    pub tracked: usize,
    /// Property snapshots held.
    pub snapshots: usize,
    /// Known relationships.
    pub relationships: usize,
    /// Batches submitted to the pipeline so far.
    pub batches_executed: u64,
}

// ============================================================================
// Unit Tests
// ============================================================================
