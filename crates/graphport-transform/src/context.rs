//! Clone/remap context.
//!
//! Owns the source→target id tables for one session and produces
//! target-shaped clones of source entities, substituting every
//! cross-reference through those tables and the schema reference-type
//! cache. Lookups never fail: an unresolved reference degrades to the
//! invalid sentinel. The two exceptions are fatal by design — the
//! relationship self-reference cycle guard and query execution failures.

use crate::{SharedStore, TransformError, TransformResult};
use ahash::AHashMap;
use graphport_model::{
    well_known, Code, ElementProps, EntityId, EntityKind, EntityReference, NavValue, PropValue,
};
use graphport_remap::{
    DeferredId, RemapTable, RunCompressedRemapTable, ShardPolicy, ShardedRemapTable,
};
use graphport_schema::RefTypeCache;
use graphport_store::{GraphStore, StateStore, StoreError};
use std::sync::Arc;

// ============================================================================
// Options
// ============================================================================

/// How the context's tables are backed.
#[derive(Debug, Clone, Copy)]
pub struct ContextOptions {
    /// Use the range-compressed element table. Right for bulk whole-store
    /// transforms whose remaps are overwhelmingly monotonic; incremental
    /// transforms want the sharded table.
    pub bulk_element_table: bool,
    pub shard_policy: ShardPolicy,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            bulk_element_table: false,
            shard_policy: ShardPolicy::default(),
        }
    }
}

/// Per-clone switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct CloneOptions {
    /// Keep the source id on the clone instead of the remapped target id.
    /// Only meaningful for id-preserving filter transforms.
    pub preserve_ids: bool,
}

// ============================================================================
// Context
// ============================================================================

/// The identifier-remap context of one transform session.
pub struct TransformContext {
    source: SharedStore,
    target: SharedStore,
    schema_cache: Arc<RefTypeCache>,
    /// element source id → target id
    elements: Box<dyn RemapTable>,
    /// aspects + link-table relationships (they share the non-element id space)
    instances: Box<dyn RemapTable>,
    code_specs: Box<dyn RemapTable>,
    /// imported font numbers
    fonts: Box<dyn RemapTable>,
    /// elements whose target id is promised but not yet assigned
    deferred_elements: AHashMap<u64, DeferredId>,
    same_store: bool,
}

impl TransformContext {
    pub fn new(
        source: SharedStore,
        target: SharedStore,
        schema_cache: Arc<RefTypeCache>,
        options: ContextOptions,
    ) -> Self {
        let elements: Box<dyn RemapTable> = if options.bulk_element_table {
            Box::new(RunCompressedRemapTable::new())
        } else {
            Box::new(ShardedRemapTable::new(options.shard_policy))
        };
        let same_store = source.read().store_id() == target.read().store_id();
        Self {
            source,
            target,
            schema_cache,
            elements,
            instances: Box::new(ShardedRemapTable::new(options.shard_policy)),
            code_specs: Box::new(ShardedRemapTable::new(options.shard_policy)),
            fonts: Box::new(ShardedRemapTable::new(options.shard_policy)),
            deferred_elements: AHashMap::new(),
            same_store,
        }
    }

    pub fn schema_cache(&self) -> &Arc<RefTypeCache> {
        &self.schema_cache
    }

    pub fn is_same_store(&self) -> bool {
        self.same_store
    }

    // ========================================================================
    // Remap Rules
    // ========================================================================

    pub fn remap_element(&mut self, source: EntityId, target: EntityId) {
        self.elements.set(source, target);
        if let Some(deferred) = self.deferred_elements.remove(&source.raw()) {
            if let Err(conflict) = deferred.resolve(target) {
                // the table overwrote an earlier rule; promise holders keep
                // the id they already observed
                tracing::warn!(source = %source, %conflict, "deferred element re-mapped");
            }
        }
    }

    /// Promise a target id for `source` before it is known. The promise is
    /// fulfilled by the eventual [`remap_element`] call.
    pub fn remap_element_deferred(&mut self, source: EntityId) -> DeferredId {
        let mapped = self.elements.get(source);
        if mapped.is_valid() {
            return DeferredId::resolved(mapped);
        }
        self.deferred_elements
            .entry(source.raw())
            .or_default()
            .clone()
    }

    /// Bulk rule for a contiguous block of element ids, the monotonic fast
    /// path of whole-store copies.
    pub fn remap_element_range(&mut self, source_start: EntityId, target_start: EntityId, len: u64) {
        for offset in 0..len {
            self.elements.set(
                EntityId::from_raw(source_start.raw() + offset),
                EntityId::from_raw(target_start.raw() + offset),
            );
        }
    }

    pub fn unmap_element(&mut self, source: EntityId) {
        self.elements.remove(source);
        self.deferred_elements.remove(&source.raw());
    }

    pub fn remap_aspect(&mut self, source: EntityId, target: EntityId) {
        self.instances.set(source, target);
    }

    pub fn unmap_aspect(&mut self, source: EntityId) {
        self.instances.remove(source);
    }

    /// Link-table relationships share the aspect table's id space.
    pub fn remap_relationship(&mut self, source: EntityId, target: EntityId) {
        self.instances.set(source, target);
    }

    /// Register a code-spec rule by name; both specs must already exist in
    /// their stores.
    pub fn remap_code_spec(&mut self, source_name: &str, target_name: &str) -> TransformResult<()> {
        let source_spec = self
            .source
            .read()
            .code_spec_by_name(source_name)?
            .ok_or_else(|| {
                TransformError::MalformedEntity(format!(
                    "code spec `{source_name}` does not exist in the source store"
                ))
            })?;
        let target_spec = self
            .target
            .read()
            .code_spec_by_name(target_name)?
            .ok_or_else(|| {
                TransformError::MalformedEntity(format!(
                    "code spec `{target_name}` does not exist in the target store"
                ))
            })?;
        self.code_specs.set(source_spec.id, target_spec.id);
        Ok(())
    }

    pub fn unmap_code_spec(&mut self, source: EntityId) {
        self.code_specs.remove(source);
    }

    pub fn remap_font(&mut self, source_number: u64, target_number: u64) {
        self.fonts
            .set(EntityId::from_raw(source_number), EntityId::from_raw(target_number));
    }

    // ========================================================================
    // Lookups (pure; never fail)
    // ========================================================================

    pub fn find_target_element_id(&self, source: EntityId) -> EntityId {
        let mapped = self.elements.get(source);
        if mapped.is_valid() {
            return mapped;
        }
        if let Some(resolved) = self
            .deferred_elements
            .get(&source.raw())
            .and_then(DeferredId::try_get)
        {
            return resolved;
        }
        // same-store transforms default to identity for unmapped ids
        if self.same_store {
            return source;
        }
        EntityId::INVALID
    }

    pub fn find_target_code_spec_id(&self, source: EntityId) -> EntityId {
        let mapped = self.code_specs.get(source);
        if mapped.is_valid() {
            mapped
        } else if self.same_store {
            source
        } else {
            EntityId::INVALID
        }
    }

    pub fn find_target_aspect_id(&self, source: EntityId) -> EntityId {
        let mapped = self.instances.get(source);
        if mapped.is_valid() {
            mapped
        } else if self.same_store {
            source
        } else {
            EntityId::INVALID
        }
    }

    pub fn find_target_font(&self, source_number: u64) -> Option<u64> {
        let mapped = self.fonts.get(EntityId::from_raw(source_number));
        mapped.is_valid().then(|| mapped.raw())
    }

    /// The general case: resolve a tagged reference to its target-store
    /// counterpart. Dispatches on kind; relationships resolve recursively
    /// through their endpoints.
    pub fn find_target_entity_id(
        &self,
        reference: EntityReference,
    ) -> TransformResult<EntityReference> {
        let mut in_progress = Vec::new();
        self.resolve_entity(reference, &mut in_progress)
    }

    fn resolve_entity(
        &self,
        reference: EntityReference,
        in_progress: &mut Vec<EntityReference>,
    ) -> TransformResult<EntityReference> {
        match reference.kind {
            EntityKind::Element => Ok(EntityReference::element(
                self.find_target_element_id(reference.id),
            )),
            EntityKind::ElementAspect => Ok(EntityReference::new(
                EntityKind::ElementAspect,
                self.find_target_aspect_id(reference.id),
            )),
            EntityKind::CodeSpec => Ok(EntityReference::new(
                EntityKind::CodeSpec,
                self.find_target_code_spec_id(reference.id),
            )),
            EntityKind::Model => {
                // A model rides its modeled element's id, but a mapped
                // modeled element does not mean the sub-model was imported.
                let mapped = self.find_target_element_id(reference.id);
                if !mapped.is_valid() {
                    return Ok(EntityReference::invalid(EntityKind::Model));
                }
                let exists = self.target.read().model(mapped)?.is_some();
                Ok(EntityReference::model(if exists {
                    mapped
                } else {
                    EntityId::INVALID
                }))
            }
            EntityKind::Relationship => self.resolve_relationship(reference, in_progress),
        }
    }

    fn resolve_relationship(
        &self,
        reference: EntityReference,
        in_progress: &mut Vec<EntityReference>,
    ) -> TransformResult<EntityReference> {
        if in_progress.contains(&reference) {
            return Err(TransformError::SelfReferentialRelationship(reference.id));
        }

        let (source_end, target_end) = self.source.read().relationship_endpoints(reference.id)?;
        if source_end == reference || target_end == reference {
            return Err(TransformError::SelfReferentialRelationship(reference.id));
        }

        in_progress.push(reference);
        let resolved_source = self.resolve_entity(source_end, in_progress)?;
        let resolved_target = self.resolve_entity(target_end, in_progress)?;
        in_progress.pop();

        // an endpoint with no target counterpart makes the relationship
        // not-applicable, not an error
        if !resolved_source.is_valid() || !resolved_target.is_valid() {
            return Ok(EntityReference::invalid(EntityKind::Relationship));
        }

        let rel = self
            .source
            .read()
            .relationship(reference.id)?
            .ok_or(StoreError::NotFound(reference))?;
        let found = self
            .target
            .read()
            .find_relationship(&rel.class, resolved_source, resolved_target)?;
        Ok(EntityReference::new(
            EntityKind::Relationship,
            found.unwrap_or(EntityId::INVALID),
        ))
    }

    // ========================================================================
    // Cloning
    // ========================================================================

    /// Clone one source element into target-shaped props, substituting
    /// every cross-reference. The clone's `id` is the already-remapped
    /// target id, or invalid when the element is new to the target.
    pub fn clone_element(
        &self,
        source_id: EntityId,
        options: CloneOptions,
    ) -> TransformResult<ElementProps> {
        let src = self
            .source
            .read()
            .element(source_id)?
            .ok_or(StoreError::NotFound(EntityReference::element(source_id)))?;

        let mut out = src.clone();
        // the low-level clone primitive strips store-assigned identity
        out.id = EntityId::INVALID;
        out.federation_guid = None;

        out.id = if options.preserve_ids {
            source_id
        } else {
            self.find_target_element_id(source_id)
        };
        out.model = self.find_target_element_id(src.model);
        out.parent = src.parent.as_ref().and_then(|p| {
            let mapped = self.find_target_element_id(p.id);
            mapped.is_valid().then(|| NavValue {
                id: mapped,
                rel_class: p.rel_class.clone(),
            })
        });
        out.code = self.remap_code(&src.code)?;

        if self.same_store {
            // identity stripped above is real on a same-store clone
            out.federation_guid = src.federation_guid;
        }

        out.props.clear();
        for (name, value) in &src.props {
            out.props
                .insert(name.clone(), self.remap_prop(&src, name, value)?);
        }
        Ok(out)
    }

    /// A code cannot legally dangle in the target: if its spec or scope has
    /// no counterpart, the whole code degrades to the empty code.
    fn remap_code(&self, code: &Code) -> TransformResult<Code> {
        let spec = self.find_target_code_spec_id(code.spec);
        let scope = self.find_target_element_id(code.scope);
        if !spec.is_valid() || !scope.is_valid() {
            return Ok(Code::empty());
        }

        let mut out = Code {
            spec,
            scope,
            value: code.value.clone(),
        };
        if self.same_store {
            // repository-scoped codes re-root to the root subject
            let repository_scoped = self
                .target
                .read()
                .code_spec(spec)?
                .map(|s| s.is_repository_scoped)
                .unwrap_or(false);
            if repository_scoped {
                out.scope = well_known::ROOT_SUBJECT;
            }
        }
        Ok(out)
    }

    fn remap_prop(
        &self,
        src: &ElementProps,
        name: &str,
        value: &PropValue,
    ) -> TransformResult<PropValue> {
        match value {
            PropValue::Nav(nav) => {
                let kind = self.schema_cache.nav_prop_ref_kind(
                    &src.class.schema,
                    &src.class.class,
                    name,
                )?;
                match kind {
                    Some(kind) => {
                        let resolved =
                            self.find_target_entity_id(EntityReference::new(kind, nav.id))?;
                        Ok(PropValue::Nav(NavValue {
                            id: resolved.id,
                            rel_class: nav.rel_class.clone(),
                        }))
                    }
                    // rooted in a reference pseudo-entity: no mapping needed
                    None => Ok(value.clone()),
                }
            }
            PropValue::Id(id) => {
                // id-extended-type integers default to the element family
                // when the schema says nothing about them
                let kind = self
                    .schema_cache
                    .nav_prop_ref_kind(&src.class.schema, &src.class.class, name)?
                    .unwrap_or(EntityKind::Element);
                let resolved = self.find_target_entity_id(EntityReference::new(kind, *id))?;
                Ok(PropValue::Id(resolved.id))
            }
            _ => Ok(value.clone()),
        }
    }

    // ========================================================================
    // Resumability
    // ========================================================================

    /// Persist the aspect/relationship table (the element and code-spec
    /// tables ride the lower-level store snapshot mechanism) together with
    /// the importer's state blob.
    pub fn save_state(
        &self,
        state_store: &StateStore,
        importer_json: String,
    ) -> TransformResult<()> {
        let mut aspect_remap = Vec::with_capacity(self.instances.len() as usize);
        self.instances.for_each(&mut |source, target| {
            aspect_remap.push((source.raw(), target.raw()));
        });
        state_store.save(&graphport_store::SavedState {
            aspect_remap,
            importer_json,
        })?;
        Ok(())
    }

    /// Rehydrate the aspect/relationship table; hands the importer blob
    /// back for the importer to validate and load.
    pub fn load_state(&mut self, state_store: &StateStore) -> TransformResult<String> {
        let state = state_store.load()?;
        for (source, target) in state.aspect_remap {
            self.instances
                .set(EntityId::from_raw(source), EntityId::from_raw(target));
        }
        Ok(state.importer_json)
    }
}
