//! Backing-store contract and reference implementation.
//!
//! The transform core needs exactly two capabilities from a store: ad hoc
//! lookups (does entity X exist, find a relationship by class+endpoints,
//! who is scoped to element Y) and a typed CRUD surface for models,
//! elements, aspects, relationships, and code specs. [`GraphStore`] is that
//! contract; [`MemoryStore`] is a complete in-memory implementation used by
//! tests and as a scratch target. Query execution, transactions, and on-disk
//! format belong to real store backends, not here.

pub mod memory;
pub mod state_store;

pub use memory::MemoryStore;
pub use state_store::{SavedState, StateStore};

use graphport_model::{
    AspectProps, ClassKey, Code, CodeSpecProps, ElementProps, EntityId, EntityReference,
    FederationGuid, ModelProps, RelationshipProps,
};
use uuid::Uuid;

// ============================================================================
// Errors
// ============================================================================

/// Store-level failures the transform core routes control flow on.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("entity {0} not found")]
    NotFound(EntityReference),

    /// A code value collision inside one `(spec, scope)` uniqueness bucket.
    #[error("code value `{value}` is already held by another element in the same scope")]
    DuplicateCode { value: String },

    /// Raised with the class name so the caller sees which schema import is
    /// missing instead of a bare constraint failure.
    #[error("class `{class}` does not exist in the target store's schema; import its schema first")]
    MissingClass { class: ClassKey },

    #[error("malformed entity props: {0}")]
    InvalidProps(String),

    #[error("resumable-state file is corrupt: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

// ============================================================================
// Store Contract
// ============================================================================

/// The two-capability collaborator contract: ad hoc lookups plus typed CRUD.
pub trait GraphStore: Send {
    /// Stable identity of this store, validated when resuming a transform.
    fn store_id(&self) -> Uuid;

    fn has_class(&self, class: &ClassKey) -> bool;

    // ---- elements ----------------------------------------------------------

    /// Insert, honoring `props.id` when valid and free, else assigning the
    /// next id. Returns the id actually used.
    fn insert_element(&mut self, props: ElementProps) -> StoreResult<EntityId>;
    fn update_element(&mut self, props: &ElementProps) -> StoreResult<()>;
    fn delete_element(&mut self, id: EntityId) -> StoreResult<()>;
    fn element(&self, id: EntityId) -> StoreResult<Option<ElementProps>>;
    fn element_ids(&self) -> StoreResult<Vec<EntityId>>;
    fn element_by_code(&self, code: &Code) -> StoreResult<Option<EntityId>>;
    fn element_by_federation_guid(&self, guid: &FederationGuid) -> StoreResult<Option<EntityId>>;
    fn element_children(&self, parent: EntityId) -> StoreResult<Vec<EntityId>>;
    /// Elements whose code scope (a non-parent dependency) is `scope`.
    fn elements_scoped_to(&self, scope: EntityId) -> StoreResult<Vec<EntityId>>;

    // ---- models ------------------------------------------------------------

    fn insert_model(&mut self, props: ModelProps) -> StoreResult<EntityId>;
    fn update_model(&mut self, props: &ModelProps) -> StoreResult<()>;
    fn delete_model(&mut self, id: EntityId) -> StoreResult<()>;
    fn model(&self, id: EntityId) -> StoreResult<Option<ModelProps>>;

    // ---- aspects -----------------------------------------------------------

    fn insert_aspect(&mut self, props: AspectProps) -> StoreResult<EntityId>;
    fn update_aspect(&mut self, props: &AspectProps) -> StoreResult<()>;
    fn delete_aspect(&mut self, id: EntityId) -> StoreResult<()>;
    fn aspect(&self, id: EntityId) -> StoreResult<Option<AspectProps>>;
    /// Aspects owned by `element`, optionally narrowed to one class, in
    /// insertion order (positional alignment depends on stable order).
    fn aspects_of_element(
        &self,
        element: EntityId,
        class: Option<&ClassKey>,
    ) -> StoreResult<Vec<AspectProps>>;

    // ---- link-table relationships ------------------------------------------

    fn insert_relationship(&mut self, props: RelationshipProps) -> StoreResult<EntityId>;
    fn update_relationship(&mut self, props: &RelationshipProps) -> StoreResult<()>;
    fn delete_relationship(&mut self, id: EntityId) -> StoreResult<()>;
    fn relationship(&self, id: EntityId) -> StoreResult<Option<RelationshipProps>>;
    /// The relationship's endpoints, each tagged with its concrete root kind.
    fn relationship_endpoints(
        &self,
        id: EntityId,
    ) -> StoreResult<(EntityReference, EntityReference)>;
    fn find_relationship(
        &self,
        class: &ClassKey,
        source: EntityReference,
        target: EntityReference,
    ) -> StoreResult<Option<EntityId>>;

    // ---- code specs --------------------------------------------------------

    fn insert_code_spec(&mut self, props: CodeSpecProps) -> StoreResult<EntityId>;
    fn code_spec(&self, id: EntityId) -> StoreResult<Option<CodeSpecProps>>;
    fn code_spec_by_name(&self, name: &str) -> StoreResult<Option<CodeSpecProps>>;
}
