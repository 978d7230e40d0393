//! Cross-store entity remapping & reconciliation engine.
//!
//! One transform session moves graph-shaped entity data from a source store
//! to a target store while keeping a stable identity mapping between the
//! two. The hard part is identity: source ids are ephemeral and
//! store-local, so every entity must be deterministically recognized as
//! new, unchanged, changed, or deleted in the target — across millions of
//! entities, schema versions, link-table relationships whose endpoints are
//! themselves cross-referenced, and process restarts.
//!
//! ```text
//!  traversal walker (external)
//!        │ per visited entity
//!        ▼
//!  ┌────────────────┐   resolved refs   ┌──────────────────┐
//!  │ TransformContext│ ───────────────► │  EntityImporter  │
//!  │  remap tables   │                  │  insert/update/  │
//!  │  ref-type cache │ ◄─────────────── │  skip/delete     │
//!  └────────────────┘   new target ids  └──────────────────┘
//! ```
//!
//! The context clones one entity into target-shaped props, substituting
//! every cross-reference through its remap tables and the schema
//! reference-type cache; the importer reconciles the result against current
//! target content and feeds newly assigned target ids back into the tables,
//! where subsequent clones see them.

pub mod context;
pub mod delete;
pub mod diff;
pub mod importer;
pub mod postpass;

pub use context::{CloneOptions, ContextOptions, TransformContext};
pub use delete::{DeleteStats, Deleter};
pub use diff::{aspect_changed, element_changed, model_changed, props_differ, relationship_changed};
pub use importer::{
    DefaultHooks, EntityImporter, ImportEvent, ImportEventHandler, ImportOptions, ImporterHooks,
};
pub use postpass::{compute_project_extent, inline_unshared_geometry, ComputedExtent, ExtentOptions};

use graphport_model::EntityId;
use graphport_schema::SchemaCacheError;
use graphport_store::{GraphStore, StateStore, StoreError};
use parking_lot::RwLock;
use std::sync::Arc;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error(transparent)]
    InvalidIdentifier(#[from] graphport_model::ParseIdError),

    #[error("malformed entity: {0}")]
    MalformedEntity(String),

    /// Surfaced only when duplicate-code deferral is disabled or the retry
    /// itself collides.
    #[error("duplicate code value `{value}` on element {element}")]
    DuplicateCodeConflict { element: EntityId, value: String },

    /// A relationship endpoint resolved to the relationship's own
    /// reference. This cycle must never occur; it signals corrupt source
    /// data, not a recoverable condition.
    #[error("relationship {0} resolves to itself; source data is corrupt")]
    SelfReferentialRelationship(EntityId),

    /// Resuming against the wrong target store or a differently-typed
    /// importer. Always fatal; never best-effort.
    #[error("resumed state does not match this session: {0}")]
    StateMismatch(String),

    #[error(transparent)]
    Schema(#[from] SchemaCacheError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("state serialization failed: {0}")]
    State(#[from] serde_json::Error),
}

pub type TransformResult<T> = Result<T, TransformError>;

// ============================================================================
// Shared Store Handle
// ============================================================================

/// A store handle the context and importer can both hold. One logical
/// thread of control per session; the lock is for ownership plumbing, not
/// for concurrent mutation.
pub type SharedStore = Arc<RwLock<Box<dyn GraphStore>>>;

pub fn shared(store: impl GraphStore + 'static) -> SharedStore {
    Arc::new(RwLock::new(Box::new(store)))
}

// ============================================================================
// Session
// ============================================================================

/// One transform session: a clone context plus an importer, sharing the
/// target. Everything it owns dies with it except the state checkpoint.
pub struct TransformSession {
    pub context: TransformContext,
    pub importer: EntityImporter,
}

impl TransformSession {
    pub fn new(context: TransformContext, importer: EntityImporter) -> Self {
        Self { context, importer }
    }

    /// Checkpoint everything resumable: the aspect remap table and the
    /// importer state, into the side-store.
    pub fn save_state(&self, state_store: &StateStore) -> TransformResult<()> {
        let importer_json = self.importer.state_to_json()?;
        self.context.save_state(state_store, importer_json)
    }

    /// Rehydrate a checkpoint. Fails hard on target-identity or
    /// importer-type mismatch, before any table is touched.
    pub fn load_state(&mut self, state_store: &StateStore) -> TransformResult<()> {
        let state = state_store.load()?;
        self.importer.load_state_json(&state.importer_json)?;
        for (source, target) in state.aspect_remap {
            self.context
                .remap_aspect(EntityId::from_raw(source), EntityId::from_raw(target));
        }
        Ok(())
    }
}
