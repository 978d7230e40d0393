//! Importer reconciliation engine.
//!
//! Given a cloned entity whose references are already resolved, decide how
//! it lands in the target store. The state machine is the same for every
//! kind, decided independently per entity:
//!
//! ```text
//! Absent            ──► Insert
//! Present ∧ Unchanged ─► Skip
//! Present ∧ Changed ──► Update
//! ExplicitDelete    ──► Delete
//! ```
//!
//! "Present" is a target id on the cloned props plus an existence check;
//! "Changed" is the property diff in [`crate::diff`]. Built-in anchors are
//! short-circuited before any diff runs. The importer never races two
//! reconciliation decisions; everything here is sequential.

use crate::diff::{aspect_changed, element_changed, model_changed, relationship_changed};
use crate::{SharedStore, TransformError, TransformResult};
use chrono::{DateTime, Utc};
use graphport_model::{
    well_known, AspectProps, ClassKey, ElementProps, EntityId, EntityKind, EntityReference,
    ModelProps, RelationshipProps,
};
use graphport_store::{GraphStore, StoreError};
use roaring::RoaringTreemap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

// ============================================================================
// Options & Events
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportOptions {
    /// Park colliding code values and retry with a cleared code instead of
    /// failing the update.
    pub defer_duplicate_codes: bool,
    /// Emit a progress event every N entity operations (0 disables).
    pub progress_interval: u64,
    /// Bag properties expected to diverge spuriously (store-computed
    /// checksums and the like); excluded from every diff.
    pub ignore_props: BTreeSet<String>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            defer_duplicate_codes: true,
            progress_interval: 1000,
            ignore_props: BTreeSet::new(),
        }
    }
}

/// Events emitted while reconciling.
#[derive(Debug, Clone)]
pub enum ImportEvent {
    Inserted { reference: EntityReference },
    Updated { reference: EntityReference },
    Skipped { reference: EntityReference },
    Deleted { reference: EntityReference },
    DuplicateCodeDeferred { element: EntityId, value: String },
    Progress { processed: u64 },
}

/// Callback for import events.
pub type ImportEventHandler = Box<dyn Fn(&ImportEvent) + Send>;

// ============================================================================
// Hooks
// ============================================================================

/// Overridable per-kind write hooks. Default bodies go straight to the
/// store; concrete importers override only what they customize.
pub trait ImporterHooks: Send {
    /// Name validated on resume: a checkpoint written by one importer type
    /// must not be loaded into another.
    fn importer_type(&self) -> &'static str;

    fn on_insert_element(
        &mut self,
        store: &mut dyn GraphStore,
        props: ElementProps,
    ) -> TransformResult<EntityId> {
        Ok(store.insert_element(props)?)
    }

    fn on_update_element(
        &mut self,
        store: &mut dyn GraphStore,
        props: &ElementProps,
    ) -> TransformResult<()> {
        Ok(store.update_element(props)?)
    }

    fn on_delete_element(&mut self, store: &mut dyn GraphStore, id: EntityId) -> TransformResult<()> {
        Ok(store.delete_element(id)?)
    }

    fn on_insert_model(
        &mut self,
        store: &mut dyn GraphStore,
        props: ModelProps,
    ) -> TransformResult<EntityId> {
        Ok(store.insert_model(props)?)
    }

    fn on_update_model(
        &mut self,
        store: &mut dyn GraphStore,
        props: &ModelProps,
    ) -> TransformResult<()> {
        Ok(store.update_model(props)?)
    }

    fn on_delete_model(&mut self, store: &mut dyn GraphStore, id: EntityId) -> TransformResult<()> {
        Ok(store.delete_model(id)?)
    }

    fn on_insert_aspect(
        &mut self,
        store: &mut dyn GraphStore,
        props: AspectProps,
    ) -> TransformResult<EntityId> {
        Ok(store.insert_aspect(props)?)
    }

    fn on_update_aspect(
        &mut self,
        store: &mut dyn GraphStore,
        props: &AspectProps,
    ) -> TransformResult<()> {
        Ok(store.update_aspect(props)?)
    }

    fn on_delete_aspect(&mut self, store: &mut dyn GraphStore, id: EntityId) -> TransformResult<()> {
        Ok(store.delete_aspect(id)?)
    }

    fn on_insert_relationship(
        &mut self,
        store: &mut dyn GraphStore,
        props: RelationshipProps,
    ) -> TransformResult<EntityId> {
        Ok(store.insert_relationship(props)?)
    }

    fn on_update_relationship(
        &mut self,
        store: &mut dyn GraphStore,
        props: &RelationshipProps,
    ) -> TransformResult<()> {
        Ok(store.update_relationship(props)?)
    }

    fn on_delete_relationship(
        &mut self,
        store: &mut dyn GraphStore,
        id: EntityId,
    ) -> TransformResult<()> {
        Ok(store.delete_relationship(id)?)
    }

    /// Extra state a concrete importer wants in the checkpoint.
    fn subclass_state(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    fn load_subclass_state(&mut self, _state: &serde_json::Value) -> TransformResult<()> {
        Ok(())
    }
}

/// The stock hooks: every write goes straight to the store.
pub struct DefaultHooks;

impl ImporterHooks for DefaultHooks {
    fn importer_type(&self) -> &'static str {
        "EntityImporter"
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Serialized checkpoint shape; see `state_to_json`/`load_state_json`.
#[derive(Serialize, Deserialize)]
struct ImporterStateJson {
    importer_type: String,
    options: ImportOptions,
    target_store_id: Uuid,
    /// Compressed id-set bytes (roaring treemap).
    do_not_update_ids: Vec<u8>,
    duplicate_code_values: BTreeMap<EntityId, String>,
    subclass_state: serde_json::Value,
    saved_at: DateTime<Utc>,
}

pub struct EntityImporter {
    target: SharedStore,
    options: ImportOptions,
    hooks: Box<dyn ImporterHooks>,
    /// Elements permanently exempt from update.
    do_not_update: RoaringTreemap,
    /// Parked code values awaiting the resolution pass.
    duplicate_codes: BTreeMap<EntityId, String>,
    processed: u64,
    handlers: Vec<ImportEventHandler>,
}

impl EntityImporter {
    pub fn new(target: SharedStore, options: ImportOptions) -> Self {
        Self::with_hooks(target, options, Box::new(DefaultHooks))
    }

    pub fn with_hooks(
        target: SharedStore,
        options: ImportOptions,
        hooks: Box<dyn ImporterHooks>,
    ) -> Self {
        Self {
            target,
            options,
            hooks,
            do_not_update: RoaringTreemap::new(),
            duplicate_codes: BTreeMap::new(),
            processed: 0,
            handlers: Vec::new(),
        }
    }

    pub fn options(&self) -> &ImportOptions {
        &self.options
    }

    pub fn on_event(&mut self, handler: ImportEventHandler) {
        self.handlers.push(handler);
    }

    fn emit(&self, event: &ImportEvent) {
        for handler in &self.handlers {
            handler(event);
        }
    }

    fn tick(&mut self) {
        self.processed += 1;
        let interval = self.options.progress_interval;
        if interval > 0 && self.processed % interval == 0 {
            self.emit(&ImportEvent::Progress {
                processed: self.processed,
            });
        }
    }

    pub fn entities_processed(&self) -> u64 {
        self.processed
    }

    /// Permanently exempt an element from update/delete.
    pub fn exclude_from_update(&mut self, id: EntityId) {
        self.do_not_update.insert(id.raw());
    }

    pub fn duplicate_code_values(&self) -> &BTreeMap<EntityId, String> {
        &self.duplicate_codes
    }

    // ========================================================================
    // Elements
    // ========================================================================

    /// Reconcile one cloned element. Returns the target id it ended up
    /// under.
    pub fn import_element(&mut self, props: ElementProps) -> TransformResult<EntityId> {
        if props.id.is_valid() {
            let reference = EntityReference::element(props.id);

            // anchors and exempted elements short-circuit before any diff
            if well_known::is_reserved(props.id) || self.do_not_update.contains(props.id.raw()) {
                self.emit(&ImportEvent::Skipped { reference });
                self.tick();
                return Ok(props.id);
            }

            let current = self.target.read().element(props.id)?;
            if let Some(current) = current {
                if element_changed(&current, &props, &self.options.ignore_props) {
                    self.update_element_deferring_duplicates(&props)?;
                    self.emit(&ImportEvent::Updated { reference });
                } else {
                    self.emit(&ImportEvent::Skipped { reference });
                }
                self.tick();
                return Ok(props.id);
            }
            // the mapped id points at nothing: recover locally by inserting
            tracing::debug!(element = %props.id, "update target missing; falling back to insert");
        }

        let id = {
            let mut store = self.target.write();
            self.hooks.on_insert_element(&mut **store, props)?
        };
        self.emit(&ImportEvent::Inserted {
            reference: EntityReference::element(id),
        });
        self.tick();
        Ok(id)
    }

    /// Update, recovering a duplicate-code collision by clearing the value
    /// (null is always unique), retrying once, and parking the original for
    /// the resolution pass.
    fn update_element_deferring_duplicates(&mut self, props: &ElementProps) -> TransformResult<()> {
        let result = {
            let mut store = self.target.write();
            self.hooks.on_update_element(&mut **store, props)
        };
        match result {
            Ok(()) => Ok(()),
            Err(TransformError::Store(StoreError::DuplicateCode { value }))
                if self.options.defer_duplicate_codes && props.code.value.is_some() =>
            {
                let mut cleared = props.clone();
                cleared.code = props.code.cleared();
                {
                    let mut store = self.target.write();
                    self.hooks.on_update_element(&mut **store, &cleared)?;
                }
                tracing::warn!(
                    element = %props.id,
                    value = %value,
                    "code value collides in target; cleared and deferred"
                );
                self.duplicate_codes.insert(props.id, value.clone());
                self.emit(&ImportEvent::DuplicateCodeDeferred {
                    element: props.id,
                    value,
                });
                Ok(())
            }
            Err(TransformError::Store(StoreError::DuplicateCode { value })) => {
                Err(TransformError::DuplicateCodeConflict {
                    element: props.id,
                    value,
                })
            }
            Err(other) => Err(other),
        }
    }

    /// Re-apply every parked code value. Returns the elements that still
    /// conflict; the caller decides whether to retry later.
    pub fn resolve_duplicate_code_values(&mut self) -> TransformResult<Vec<EntityId>> {
        let parked = std::mem::take(&mut self.duplicate_codes);
        let mut unresolved = Vec::new();

        for (id, value) in parked {
            let Some(mut props) = self.target.read().element(id)? else {
                // holder is gone; the conflict resolved itself
                continue;
            };
            props.code.value = Some(value.clone());
            let result = {
                let mut store = self.target.write();
                self.hooks.on_update_element(&mut **store, &props)
            };
            match result {
                Ok(()) => self.emit(&ImportEvent::Updated {
                    reference: EntityReference::element(id),
                }),
                Err(TransformError::Store(StoreError::DuplicateCode { .. })) => {
                    self.duplicate_codes.insert(id, value);
                    unresolved.push(id);
                }
                Err(other) => return Err(other),
            }
        }
        Ok(unresolved)
    }

    pub fn delete_element(&mut self, id: EntityId) -> TransformResult<()> {
        if well_known::is_reserved(id) {
            self.emit(&ImportEvent::Skipped {
                reference: EntityReference::element(id),
            });
            return Ok(());
        }
        {
            let mut store = self.target.write();
            self.hooks.on_delete_element(&mut **store, id)?;
        }
        self.emit(&ImportEvent::Deleted {
            reference: EntityReference::element(id),
        });
        self.tick();
        Ok(())
    }

    // ========================================================================
    // Models
    // ========================================================================

    pub fn import_model(&mut self, mut props: ModelProps) -> TransformResult<EntityId> {
        let id = if props.id.is_valid() {
            props.id
        } else {
            props.modeled_element
        };
        props.id = id;
        let reference = EntityReference::model(id);

        if well_known::is_reserved(id) {
            self.emit(&ImportEvent::Skipped { reference });
            self.tick();
            return Ok(id);
        }

        let current = self.target.read().model(id)?;
        if let Some(current) = current {
            if model_changed(&current, &props, &self.options.ignore_props) {
                let mut store = self.target.write();
                self.hooks.on_update_model(&mut **store, &props)?;
                drop(store);
                self.emit(&ImportEvent::Updated { reference });
            } else {
                self.emit(&ImportEvent::Skipped { reference });
            }
            self.tick();
            return Ok(id);
        }

        let id = {
            let mut store = self.target.write();
            self.hooks.on_insert_model(&mut **store, props)?
        };
        self.emit(&ImportEvent::Inserted {
            reference: EntityReference::model(id),
        });
        self.tick();
        Ok(id)
    }

    pub fn delete_model(&mut self, id: EntityId) -> TransformResult<()> {
        if well_known::is_reserved(id) {
            self.emit(&ImportEvent::Skipped {
                reference: EntityReference::model(id),
            });
            return Ok(());
        }
        {
            let mut store = self.target.write();
            self.hooks.on_delete_model(&mut **store, id)?;
        }
        self.emit(&ImportEvent::Deleted {
            reference: EntityReference::model(id),
        });
        self.tick();
        Ok(())
    }

    // ========================================================================
    // Aspects
    // ========================================================================

    /// Reconcile the proposed aspects of one element against its current
    /// aspects, class by class.
    ///
    /// Aspects are not individually tracked across runs, so alignment is
    /// positional: pair index-for-index, insert the excess proposed, delete
    /// the excess current, update changed overlaps. `protect` excludes
    /// specific current aspects from candidacy (used to keep
    /// transform-injected provenance aspects out of user-data alignment).
    pub fn import_aspects(
        &mut self,
        element: EntityId,
        proposed: Vec<AspectProps>,
        protect: Option<&dyn Fn(&AspectProps) -> bool>,
    ) -> TransformResult<Vec<EntityId>> {
        let mut by_class: BTreeMap<ClassKey, Vec<AspectProps>> = BTreeMap::new();
        for aspect in proposed {
            by_class.entry(aspect.class.clone()).or_default().push(aspect);
        }

        let mut imported = Vec::new();
        for (class, proposed_list) in by_class {
            let current: Vec<AspectProps> = self
                .target
                .read()
                .aspects_of_element(element, Some(&class))?
                .into_iter()
                .filter(|a| !protect.map_or(false, |f| f(a)))
                .collect();

            let pairs = proposed_list.len().max(current.len());
            for i in 0..pairs {
                match (proposed_list.get(i), current.get(i)) {
                    (Some(proposed), Some(current)) => {
                        let mut aligned = proposed.clone();
                        aligned.id = current.id;
                        aligned.element = element;
                        let reference =
                            EntityReference::new(EntityKind::ElementAspect, aligned.id);
                        if aspect_changed(current, &aligned, &self.options.ignore_props) {
                            let mut store = self.target.write();
                            self.hooks.on_update_aspect(&mut **store, &aligned)?;
                            drop(store);
                            self.emit(&ImportEvent::Updated { reference });
                        } else {
                            self.emit(&ImportEvent::Skipped { reference });
                        }
                        imported.push(aligned.id);
                    }
                    (Some(proposed), None) => {
                        let mut fresh = proposed.clone();
                        fresh.id = EntityId::INVALID;
                        fresh.element = element;
                        let id = {
                            let mut store = self.target.write();
                            self.hooks.on_insert_aspect(&mut **store, fresh)?
                        };
                        self.emit(&ImportEvent::Inserted {
                            reference: EntityReference::new(EntityKind::ElementAspect, id),
                        });
                        imported.push(id);
                    }
                    (None, Some(current)) => {
                        {
                            let mut store = self.target.write();
                            self.hooks.on_delete_aspect(&mut **store, current.id)?;
                        }
                        self.emit(&ImportEvent::Deleted {
                            reference: EntityReference::new(EntityKind::ElementAspect, current.id),
                        });
                    }
                    (None, None) => unreachable!(),
                }
                self.tick();
            }
        }
        Ok(imported)
    }

    // ========================================================================
    // Relationships
    // ========================================================================

    pub fn import_relationship(&mut self, mut props: RelationshipProps) -> TransformResult<EntityId> {
        // identify the current instance: by id when the clone resolved one,
        // else by class + endpoints
        if !props.id.is_valid() {
            if let Some(found) = self.target.read().find_relationship(
                &props.class,
                EntityReference::element(props.source),
                EntityReference::element(props.target),
            )? {
                props.id = found;
            }
        }

        if props.id.is_valid() {
            let current = self.target.read().relationship(props.id)?;
            if let Some(current) = current {
                let reference = EntityReference::new(EntityKind::Relationship, props.id);
                if relationship_changed(&current, &props, &self.options.ignore_props) {
                    let mut store = self.target.write();
                    self.hooks.on_update_relationship(&mut **store, &props)?;
                    drop(store);
                    self.emit(&ImportEvent::Updated { reference });
                } else {
                    self.emit(&ImportEvent::Skipped { reference });
                }
                self.tick();
                return Ok(props.id);
            }
        }

        let id = {
            let mut store = self.target.write();
            self.hooks.on_insert_relationship(&mut **store, props)?
        };
        self.emit(&ImportEvent::Inserted {
            reference: EntityReference::new(EntityKind::Relationship, id),
        });
        self.tick();
        Ok(id)
    }

    pub fn delete_relationship(&mut self, id: EntityId) -> TransformResult<()> {
        {
            let mut store = self.target.write();
            self.hooks.on_delete_relationship(&mut **store, id)?;
        }
        self.emit(&ImportEvent::Deleted {
            reference: EntityReference::new(EntityKind::Relationship, id),
        });
        self.tick();
        Ok(())
    }

    // ========================================================================
    // Resumability
    // ========================================================================

    pub fn state_to_json(&self) -> TransformResult<String> {
        let mut id_set = Vec::new();
        self.do_not_update
            .serialize_into(&mut id_set)
            .map_err(StoreError::Io)?;

        let state = ImporterStateJson {
            importer_type: self.hooks.importer_type().to_string(),
            options: self.options.clone(),
            target_store_id: self.target.read().store_id(),
            do_not_update_ids: id_set,
            duplicate_code_values: self.duplicate_codes.clone(),
            subclass_state: self.hooks.subclass_state(),
            saved_at: Utc::now(),
        };
        Ok(serde_json::to_string(&state)?)
    }

    /// Load a checkpoint. The target store identity and importer type must
    /// match exactly; silently-incompatible resumption is a hard error.
    pub fn load_state_json(&mut self, json: &str) -> TransformResult<()> {
        let state: ImporterStateJson = serde_json::from_str(json)?;

        if state.importer_type != self.hooks.importer_type() {
            return Err(TransformError::StateMismatch(format!(
                "checkpoint was written by importer `{}`, this session runs `{}`",
                state.importer_type,
                self.hooks.importer_type()
            )));
        }
        let target_id = self.target.read().store_id();
        if state.target_store_id != target_id {
            return Err(TransformError::StateMismatch(format!(
                "checkpoint targets store {}, this session targets {}",
                state.target_store_id, target_id
            )));
        }

        self.options = state.options;
        self.do_not_update = RoaringTreemap::deserialize_from(&state.do_not_update_ids[..])
            .map_err(StoreError::Io)?;
        self.duplicate_codes = state.duplicate_code_values;
        self.hooks.load_subclass_state(&state.subclass_state)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared;
    use graphport_model::{Code, CodeSpecProps, PropValue};
    use graphport_store::MemoryStore;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn pump_class() -> ClassKey {
        ClassKey::new("Plant", "Pump")
    }

    fn target_store() -> SharedStore {
        let mut store = MemoryStore::new();
        store.register_classes([pump_class(), ClassKey::new("Plant", "Health")]);
        shared(store)
    }

    fn recording_importer(target: &SharedStore) -> (EntityImporter, Arc<Mutex<Vec<String>>>) {
        let mut importer = EntityImporter::new(target.clone(), ImportOptions::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        importer.on_event(Box::new(move |event| {
            let tag = match event {
                ImportEvent::Inserted { .. } => "insert",
                ImportEvent::Updated { .. } => "update",
                ImportEvent::Skipped { .. } => "skip",
                ImportEvent::Deleted { .. } => "delete",
                ImportEvent::DuplicateCodeDeferred { .. } => "defer",
                ImportEvent::Progress { .. } => "progress",
            };
            sink.lock().push(tag.to_string());
        }));
        (importer, log)
    }

    fn count(log: &Arc<Mutex<Vec<String>>>, tag: &str) -> usize {
        log.lock().iter().filter(|t| t.as_str() == tag).count()
    }

    fn pump(label: &str) -> ElementProps {
        let mut props = ElementProps::new(pump_class(), well_known::ROOT_SUBJECT, Code::empty());
        props.user_label = Some(label.to_string());
        props
    }

    #[test]
    fn absent_inserts_then_unchanged_skips_then_changed_updates() {
        let target = target_store();
        let (mut importer, log) = recording_importer(&target);

        let mut props = pump("compressor");
        props.props.insert("a".to_string(), PropValue::Int(1));
        props
            .props
            .insert("b".to_string(), PropValue::Text("x".to_string()));

        let id = importer.import_element(props.clone()).unwrap();
        assert_eq!(count(&log, "insert"), 1);

        // identical content: skip, no update
        props.id = id;
        importer.import_element(props.clone()).unwrap();
        assert_eq!(count(&log, "update"), 0);
        assert_eq!(count(&log, "skip"), 1);

        // ignored divergence: still a skip
        importer.options.ignore_props.insert("b".to_string());
        let mut diverged = props.clone();
        diverged
            .props
            .insert("b".to_string(), PropValue::Text("y".to_string()));
        importer.import_element(diverged).unwrap();
        assert_eq!(count(&log, "update"), 0);

        // real change: exactly one update with the new value
        let mut changed = props.clone();
        changed.props.insert("a".to_string(), PropValue::Int(2));
        importer.import_element(changed).unwrap();
        assert_eq!(count(&log, "update"), 1);
        let stored = target.read().element(id).unwrap().unwrap();
        assert_eq!(stored.props.get("a"), Some(&PropValue::Int(2)));
    }

    #[test]
    fn reserved_anchors_short_circuit() {
        let target = target_store();
        let (mut importer, log) = recording_importer(&target);

        let mut props = pump("root impostor");
        props.id = well_known::ROOT_SUBJECT;
        let id = importer.import_element(props).unwrap();
        assert_eq!(id, well_known::ROOT_SUBJECT);
        assert_eq!(count(&log, "skip"), 1);
        assert_eq!(count(&log, "update"), 0);

        importer.delete_element(well_known::ROOT_SUBJECT).unwrap();
        assert_eq!(count(&log, "delete"), 0);
        assert!(target
            .read()
            .element(well_known::ROOT_SUBJECT)
            .unwrap()
            .is_some());
    }

    #[test]
    fn do_not_update_set_is_honored() {
        let target = target_store();
        let (mut importer, log) = recording_importer(&target);

        let id = importer.import_element(pump("original")).unwrap();
        importer.exclude_from_update(id);

        let mut changed = pump("renamed");
        changed.id = id;
        importer.import_element(changed).unwrap();
        assert_eq!(count(&log, "update"), 0);
        assert_eq!(
            target.read().element(id).unwrap().unwrap().user_label.as_deref(),
            Some("original")
        );
    }

    #[test]
    fn missing_update_target_falls_back_to_insert() {
        let target = target_store();
        let (mut importer, log) = recording_importer(&target);

        let mut props = pump("ghost");
        props.id = EntityId::from_raw(0xdead);
        let id = importer.import_element(props).unwrap();
        assert_eq!(count(&log, "insert"), 1);
        assert!(target.read().element(id).unwrap().is_some());
    }

    #[test]
    fn multi_aspect_alignment_is_positional() {
        let health = ClassKey::new("Plant", "Health");
        let target = target_store();
        let (mut importer, log) = recording_importer(&target);
        let owner = importer.import_element(pump("owner")).unwrap();

        let aspect = |status: &str| AspectProps {
            id: EntityId::INVALID,
            class: health.clone(),
            element: owner,
            props: [("status".to_string(), PropValue::Text(status.to_string()))]
                .into_iter()
                .collect(),
        };

        // current [A, B, C]
        importer
            .import_aspects(owner, vec![aspect("a"), aspect("b"), aspect("c")], None)
            .unwrap();
        assert_eq!(count(&log, "insert"), 4); // owner + 3 aspects
        log.lock().clear();

        // proposed [A', C']: 1 delete, up to 2 updates, never an insert
        importer
            .import_aspects(owner, vec![aspect("a"), aspect("c'")], None)
            .unwrap();
        assert_eq!(count(&log, "insert"), 0);
        assert_eq!(count(&log, "delete"), 1);
        assert_eq!(count(&log, "update"), 1); // position 0 unchanged, 1 changed
        assert_eq!(
            target
                .read()
                .aspects_of_element(owner, Some(&health))
                .unwrap()
                .len(),
            2
        );
        log.lock().clear();

        // proposed [A', B', C']: exactly 1 insert
        importer
            .import_aspects(owner, vec![aspect("a"), aspect("b'"), aspect("x")], None)
            .unwrap();
        assert_eq!(count(&log, "insert"), 1);
        assert_eq!(count(&log, "delete"), 0);
    }

    #[test]
    fn protected_aspects_are_not_alignment_candidates() {
        let health = ClassKey::new("Plant", "Health");
        let target = target_store();
        let (mut importer, _log) = recording_importer(&target);
        let owner = importer.import_element(pump("owner")).unwrap();

        // a provenance aspect injected by the transform itself
        let provenance = AspectProps {
            id: EntityId::INVALID,
            class: health.clone(),
            element: owner,
            props: [("provenance".to_string(), PropValue::Bool(true))]
                .into_iter()
                .collect(),
        };
        target.write().insert_aspect(provenance).unwrap();

        let proposed = AspectProps {
            id: EntityId::INVALID,
            class: health.clone(),
            element: owner,
            props: [("status".to_string(), PropValue::Text("ok".to_string()))]
                .into_iter()
                .collect(),
        };
        let protect = |aspect: &AspectProps| aspect.props.contains_key("provenance");
        importer
            .import_aspects(owner, vec![proposed], Some(&protect))
            .unwrap();

        // provenance untouched, user aspect inserted beside it
        let all = target.read().aspects_of_element(owner, Some(&health)).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().any(|a| a.props.contains_key("provenance")));
    }

    #[test]
    fn duplicate_code_is_deferred_and_resolved() {
        let target = target_store();
        let spec = target
            .write()
            .insert_code_spec(CodeSpecProps {
                id: EntityId::INVALID,
                name: "Tags".to_string(),
                is_repository_scoped: false,
                props: Default::default(),
            })
            .unwrap();
        let (mut importer, log) = recording_importer(&target);

        // the collision holder
        let mut holder = pump("holder");
        holder.code = Code::new(spec, well_known::ROOT_SUBJECT, "P-9");
        let holder_id = importer.import_element(holder).unwrap();

        // victim wants the same code
        let victim_id = importer.import_element(pump("victim")).unwrap();
        let mut victim = target.read().element(victim_id).unwrap().unwrap();
        victim.code = Code::new(spec, well_known::ROOT_SUBJECT, "P-9");
        importer.import_element(victim).unwrap();

        assert_eq!(count(&log, "defer"), 1);
        assert_eq!(
            importer.duplicate_code_values().get(&victim_id).map(String::as_str),
            Some("P-9")
        );
        // value parked, code cleared in the target
        assert!(target
            .read()
            .element(victim_id)
            .unwrap()
            .unwrap()
            .code
            .is_empty());

        // first pass: holder still owns the code, so it stays unresolved
        let unresolved = importer.resolve_duplicate_code_values().unwrap();
        assert_eq!(unresolved, vec![victim_id]);

        // free the code, then resolution succeeds
        let mut holder = target.read().element(holder_id).unwrap().unwrap();
        holder.code = Code::empty();
        target.write().update_element(&holder).unwrap();

        let unresolved = importer.resolve_duplicate_code_values().unwrap();
        assert!(unresolved.is_empty());
        assert_eq!(
            target
                .read()
                .element(victim_id)
                .unwrap()
                .unwrap()
                .code
                .value
                .as_deref(),
            Some("P-9")
        );
    }

    #[test]
    fn progress_fires_at_the_configured_cadence() {
        let target = target_store();
        let mut importer = EntityImporter::new(
            target.clone(),
            ImportOptions {
                progress_interval: 2,
                ..Default::default()
            },
        );
        let ticks = Arc::new(Mutex::new(0u64));
        let sink = ticks.clone();
        importer.on_event(Box::new(move |event| {
            if matches!(event, ImportEvent::Progress { .. }) {
                *sink.lock() += 1;
            }
        }));

        for i in 0..5 {
            importer.import_element(pump(&format!("p{i}"))).unwrap();
        }
        assert_eq!(*ticks.lock(), 2); // after the 2nd and 4th operation
    }

    #[test]
    fn state_round_trip_reproduces_both_fields() {
        let target = target_store();
        let mut importer = EntityImporter::new(target.clone(), ImportOptions::default());
        importer.exclude_from_update(EntityId::from_raw(0x1));
        importer.exclude_from_update(EntityId::from_raw(0x20));
        importer
            .duplicate_codes
            .insert(EntityId::from_raw(0x99), "Duct-7".to_string());

        let json = importer.state_to_json().unwrap();

        let mut fresh = EntityImporter::new(target, ImportOptions::default());
        fresh.load_state_json(&json).unwrap();
        assert!(fresh.do_not_update.contains(0x1));
        assert!(fresh.do_not_update.contains(0x20));
        assert_eq!(fresh.do_not_update.len(), 2);
        assert_eq!(
            fresh
                .duplicate_code_values()
                .get(&EntityId::from_raw(0x99))
                .map(String::as_str),
            Some("Duct-7")
        );
    }

    #[test]
    fn resume_against_different_target_is_fatal() {
        let target = target_store();
        let importer = EntityImporter::new(target, ImportOptions::default());
        let json = importer.state_to_json().unwrap();

        let other = shared(MemoryStore::new());
        let mut resumed = EntityImporter::new(other, ImportOptions::default());
        let err = resumed.load_state_json(&json).unwrap_err();
        assert!(matches!(err, TransformError::StateMismatch(_)));
    }

    #[test]
    fn resume_with_different_importer_type_is_fatal() {
        struct CustomHooks;
        impl ImporterHooks for CustomHooks {
            fn importer_type(&self) -> &'static str {
                "CustomImporter"
            }
        }

        let target = target_store();
        let importer = EntityImporter::new(target.clone(), ImportOptions::default());
        let json = importer.state_to_json().unwrap();

        let mut resumed =
            EntityImporter::with_hooks(target, ImportOptions::default(), Box::new(CustomHooks));
        let err = resumed.load_state_json(&json).unwrap_err();
        assert!(matches!(err, TransformError::StateMismatch(_)));
    }
}
