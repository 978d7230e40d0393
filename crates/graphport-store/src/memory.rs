//! In-memory reference store.
//!
//! Complete enough to stand in for a real backend in tests: monotonic id
//! assignment, code uniqueness enforcement, class-existence checks, and the
//! parent/scope indexes cascading deletion leans on. Every store is born
//! with the root subject, the repository and dictionary models, and a null
//! code spec, exactly like a freshly provisioned target.

use crate::{GraphStore, StoreError, StoreResult};
use graphport_model::{
    well_known, AspectProps, ClassKey, Code, CodeSpecProps, ElementProps, EntityId,
    EntityKind, EntityReference, FederationGuid, ModelProps, RelationshipProps,
};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// First id handed out to user entities; everything below is reserved.
const FIRST_USER_ID: u64 = well_known::RESERVED_CEILING;

#[derive(Debug)]
pub struct MemoryStore {
    id: Uuid,
    classes: BTreeSet<ClassKey>,
    elements: BTreeMap<EntityId, ElementProps>,
    models: BTreeMap<EntityId, ModelProps>,
    aspects: BTreeMap<EntityId, AspectProps>,
    relationships: BTreeMap<EntityId, RelationshipProps>,
    code_specs: BTreeMap<EntityId, CodeSpecProps>,
    /// `(spec, scope, value)` → holder, for non-null code values only.
    code_index: BTreeMap<(EntityId, EntityId, String), EntityId>,
    guid_index: BTreeMap<Uuid, EntityId>,
    next_element_id: u64,
    /// Aspects and link-table relationships share one id space.
    next_instance_id: u64,
    next_code_spec_id: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4())
    }

    /// A store with a caller-chosen identity (resume tests need two stores
    /// that agree or disagree on identity deterministically).
    pub fn with_id(id: Uuid) -> Self {
        let mut store = Self {
            id,
            classes: BTreeSet::new(),
            elements: BTreeMap::new(),
            models: BTreeMap::new(),
            aspects: BTreeMap::new(),
            relationships: BTreeMap::new(),
            code_specs: BTreeMap::new(),
            code_index: BTreeMap::new(),
            guid_index: BTreeMap::new(),
            next_element_id: FIRST_USER_ID,
            next_instance_id: FIRST_USER_ID,
            next_code_spec_id: FIRST_USER_ID,
        };
        store.seed();
        store
    }

    pub fn register_class(&mut self, class: ClassKey) {
        self.classes.insert(class);
    }

    pub fn register_classes<I: IntoIterator<Item = ClassKey>>(&mut self, classes: I) {
        self.classes.extend(classes);
    }

    /// Built-in anchors present in every store.
    fn seed(&mut self) {
        let element = ClassKey::new("Core", "Element");
        let model = ClassKey::new("Core", "Model");
        self.register_classes([
            element.clone(),
            model.clone(),
            ClassKey::new("Core", "ElementAspect"),
            ClassKey::new("Core", "ElementRefersToElements"),
        ]);

        self.code_specs.insert(
            well_known::ROOT_SUBJECT,
            CodeSpecProps {
                id: well_known::ROOT_SUBJECT,
                name: "NullCodeSpec".to_string(),
                is_repository_scoped: false,
                props: Default::default(),
            },
        );

        let mut root = ElementProps::new(element.clone(), well_known::ROOT_SUBJECT, Code::empty());
        root.id = well_known::ROOT_SUBJECT;
        self.elements.insert(root.id, root);
        self.models.insert(
            well_known::ROOT_SUBJECT,
            ModelProps {
                id: well_known::ROOT_SUBJECT,
                class: model.clone(),
                modeled_element: well_known::ROOT_SUBJECT,
                is_private: false,
                props: Default::default(),
            },
        );

        let mut dictionary =
            ElementProps::new(element, well_known::ROOT_SUBJECT, Code::empty());
        dictionary.id = well_known::DICTIONARY_MODEL;
        self.elements.insert(dictionary.id, dictionary);
        self.models.insert(
            well_known::DICTIONARY_MODEL,
            ModelProps {
                id: well_known::DICTIONARY_MODEL,
                class: model,
                modeled_element: well_known::DICTIONARY_MODEL,
                is_private: true,
                props: Default::default(),
            },
        );
    }

    fn check_class(&self, class: &ClassKey) -> StoreResult<()> {
        if self.classes.contains(class) {
            Ok(())
        } else {
            Err(StoreError::MissingClass {
                class: class.clone(),
            })
        }
    }

    fn code_key(code: &Code) -> Option<(EntityId, EntityId, String)> {
        code.value
            .as_ref()
            .map(|v| (code.spec, code.scope, v.clone()))
    }

    /// Uniqueness check excluding `holder` itself (updates re-assert their
    /// own code).
    fn check_code_free(&self, code: &Code, holder: EntityId) -> StoreResult<()> {
        if let Some(key) = Self::code_key(code) {
            if let Some(&owner) = self.code_index.get(&key) {
                if owner != holder {
                    return Err(StoreError::DuplicateCode {
                        value: key.2,
                    });
                }
            }
        }
        Ok(())
    }

    fn index_element(&mut self, props: &ElementProps) {
        if let Some(key) = Self::code_key(&props.code) {
            self.code_index.insert(key, props.id);
        }
        if let Some(guid) = &props.federation_guid {
            self.guid_index.insert(guid.0, props.id);
        }
    }

    fn unindex_element(&mut self, props: &ElementProps) {
        if let Some(key) = Self::code_key(&props.code) {
            self.code_index.remove(&key);
        }
        if let Some(guid) = &props.federation_guid {
            self.guid_index.remove(&guid.0);
        }
    }

    fn tag_endpoint(&self, id: EntityId) -> StoreResult<EntityReference> {
        if self.elements.contains_key(&id) {
            Ok(EntityReference::element(id))
        } else if self.models.contains_key(&id) {
            Ok(EntityReference::model(id))
        } else if self.relationships.contains_key(&id) {
            // shared instance id space: corrupt data can point an endpoint
            // at a relationship row, and callers must be able to see that
            Ok(EntityReference::new(EntityKind::Relationship, id))
        } else {
            Err(StoreError::NotFound(EntityReference::element(id)))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphStore for MemoryStore {
    fn store_id(&self) -> Uuid {
        self.id
    }

    fn has_class(&self, class: &ClassKey) -> bool {
        self.classes.contains(class)
    }

    // ---- elements ----------------------------------------------------------

    fn insert_element(&mut self, mut props: ElementProps) -> StoreResult<EntityId> {
        self.check_class(&props.class)?;
        self.check_code_free(&props.code, EntityId::INVALID)?;

        let id = if props.id.is_valid() && !self.elements.contains_key(&props.id) {
            props.id
        } else {
            let id = EntityId::from_raw(self.next_element_id);
            self.next_element_id += 1;
            id
        };
        props.id = id;
        self.index_element(&props);
        self.elements.insert(id, props);
        Ok(id)
    }

    fn update_element(&mut self, props: &ElementProps) -> StoreResult<()> {
        let existing = self
            .elements
            .get(&props.id)
            .cloned()
            .ok_or(StoreError::NotFound(EntityReference::element(props.id)))?;
        self.check_class(&props.class)?;
        self.check_code_free(&props.code, props.id)?;

        self.unindex_element(&existing);
        self.index_element(props);
        self.elements.insert(props.id, props.clone());
        Ok(())
    }

    fn delete_element(&mut self, id: EntityId) -> StoreResult<()> {
        let props = self
            .elements
            .remove(&id)
            .ok_or(StoreError::NotFound(EntityReference::element(id)))?;
        self.unindex_element(&props);
        // owned aspects go with the element
        self.aspects.retain(|_, a| a.element != id);
        Ok(())
    }

    fn element(&self, id: EntityId) -> StoreResult<Option<ElementProps>> {
        Ok(self.elements.get(&id).cloned())
    }

    fn element_ids(&self) -> StoreResult<Vec<EntityId>> {
        Ok(self.elements.keys().copied().collect())
    }

    fn element_by_code(&self, code: &Code) -> StoreResult<Option<EntityId>> {
        Ok(Self::code_key(code).and_then(|key| self.code_index.get(&key).copied()))
    }

    fn element_by_federation_guid(&self, guid: &FederationGuid) -> StoreResult<Option<EntityId>> {
        Ok(self.guid_index.get(&guid.0).copied())
    }

    fn element_children(&self, parent: EntityId) -> StoreResult<Vec<EntityId>> {
        Ok(self
            .elements
            .values()
            .filter(|e| e.parent.as_ref().is_some_and(|p| p.id == parent))
            .map(|e| e.id)
            .collect())
    }

    fn elements_scoped_to(&self, scope: EntityId) -> StoreResult<Vec<EntityId>> {
        Ok(self
            .elements
            .values()
            .filter(|e| e.code.scope == scope && e.id != scope)
            .map(|e| e.id)
            .collect())
    }

    // ---- models ------------------------------------------------------------

    fn insert_model(&mut self, mut props: ModelProps) -> StoreResult<EntityId> {
        self.check_class(&props.class)?;
        if !props.modeled_element.is_valid() {
            return Err(StoreError::InvalidProps(
                "a model must name its modeled element".to_string(),
            ));
        }
        if !self.elements.contains_key(&props.modeled_element) {
            return Err(StoreError::NotFound(EntityReference::element(
                props.modeled_element,
            )));
        }
        // a model shares its id with the element it models
        props.id = props.modeled_element;
        let id = props.id;
        self.models.insert(id, props);
        Ok(id)
    }

    fn update_model(&mut self, props: &ModelProps) -> StoreResult<()> {
        if !self.models.contains_key(&props.id) {
            return Err(StoreError::NotFound(EntityReference::model(props.id)));
        }
        self.check_class(&props.class)?;
        self.models.insert(props.id, props.clone());
        Ok(())
    }

    fn delete_model(&mut self, id: EntityId) -> StoreResult<()> {
        self.models
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(EntityReference::model(id)))
    }

    fn model(&self, id: EntityId) -> StoreResult<Option<ModelProps>> {
        Ok(self.models.get(&id).cloned())
    }

    // ---- aspects -----------------------------------------------------------

    fn insert_aspect(&mut self, mut props: AspectProps) -> StoreResult<EntityId> {
        self.check_class(&props.class)?;
        if !self.elements.contains_key(&props.element) {
            return Err(StoreError::NotFound(EntityReference::element(props.element)));
        }
        let id = EntityId::from_raw(self.next_instance_id);
        self.next_instance_id += 1;
        props.id = id;
        self.aspects.insert(id, props);
        Ok(id)
    }

    fn update_aspect(&mut self, props: &AspectProps) -> StoreResult<()> {
        if !self.aspects.contains_key(&props.id) {
            return Err(StoreError::NotFound(EntityReference::new(
                EntityKind::ElementAspect,
                props.id,
            )));
        }
        self.aspects.insert(props.id, props.clone());
        Ok(())
    }

    fn delete_aspect(&mut self, id: EntityId) -> StoreResult<()> {
        self.aspects
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(EntityReference::new(
                EntityKind::ElementAspect,
                id,
            )))
    }

    fn aspect(&self, id: EntityId) -> StoreResult<Option<AspectProps>> {
        Ok(self.aspects.get(&id).cloned())
    }

    fn aspects_of_element(
        &self,
        element: EntityId,
        class: Option<&ClassKey>,
    ) -> StoreResult<Vec<AspectProps>> {
        // BTreeMap order == id order == insertion order, which positional
        // alignment depends on.
        Ok(self
            .aspects
            .values()
            .filter(|a| a.element == element && class.map_or(true, |c| &a.class == c))
            .cloned()
            .collect())
    }

    // ---- relationships -----------------------------------------------------

    fn insert_relationship(&mut self, mut props: RelationshipProps) -> StoreResult<EntityId> {
        self.check_class(&props.class)?;
        self.tag_endpoint(props.source)?;
        self.tag_endpoint(props.target)?;
        let id = EntityId::from_raw(self.next_instance_id);
        self.next_instance_id += 1;
        props.id = id;
        self.relationships.insert(id, props);
        Ok(id)
    }

    fn update_relationship(&mut self, props: &RelationshipProps) -> StoreResult<()> {
        if !self.relationships.contains_key(&props.id) {
            return Err(StoreError::NotFound(EntityReference::new(
                EntityKind::Relationship,
                props.id,
            )));
        }
        self.relationships.insert(props.id, props.clone());
        Ok(())
    }

    fn delete_relationship(&mut self, id: EntityId) -> StoreResult<()> {
        self.relationships
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(EntityReference::new(
                EntityKind::Relationship,
                id,
            )))
    }

    fn relationship(&self, id: EntityId) -> StoreResult<Option<RelationshipProps>> {
        Ok(self.relationships.get(&id).cloned())
    }

    fn relationship_endpoints(
        &self,
        id: EntityId,
    ) -> StoreResult<(EntityReference, EntityReference)> {
        let rel = self
            .relationships
            .get(&id)
            .ok_or(StoreError::NotFound(EntityReference::new(
                EntityKind::Relationship,
                id,
            )))?;
        Ok((self.tag_endpoint(rel.source)?, self.tag_endpoint(rel.target)?))
    }

    fn find_relationship(
        &self,
        class: &ClassKey,
        source: EntityReference,
        target: EntityReference,
    ) -> StoreResult<Option<EntityId>> {
        for rel in self.relationships.values() {
            if &rel.class == class && rel.source == source.id && rel.target == target.id {
                return Ok(Some(rel.id));
            }
        }
        Ok(None)
    }

    // ---- code specs --------------------------------------------------------

    fn insert_code_spec(&mut self, mut props: CodeSpecProps) -> StoreResult<EntityId> {
        if self
            .code_specs
            .values()
            .any(|cs| cs.name == props.name)
        {
            return Err(StoreError::DuplicateCode {
                value: props.name,
            });
        }
        let id = EntityId::from_raw(self.next_code_spec_id);
        self.next_code_spec_id += 1;
        props.id = id;
        self.code_specs.insert(id, props);
        Ok(id)
    }

    fn code_spec(&self, id: EntityId) -> StoreResult<Option<CodeSpecProps>> {
        Ok(self.code_specs.get(&id).cloned())
    }

    fn code_spec_by_name(&self, name: &str) -> StoreResult<Option<CodeSpecProps>> {
        Ok(self.code_specs.values().find(|cs| cs.name == name).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn physical() -> ClassKey {
        ClassKey::new("Core", "Element")
    }

    #[test]
    fn seeded_anchors_exist() {
        let store = MemoryStore::new();
        assert!(store.element(well_known::ROOT_SUBJECT).unwrap().is_some());
        assert!(store.model(well_known::ROOT_SUBJECT).unwrap().is_some());
        assert!(store.model(well_known::DICTIONARY_MODEL).unwrap().is_some());
        assert!(store
            .code_spec_by_name("NullCodeSpec")
            .unwrap()
            .is_some());
    }

    #[test]
    fn insert_assigns_ids_above_reserved_range() {
        let mut store = MemoryStore::new();
        let id = store
            .insert_element(ElementProps::new(
                physical(),
                well_known::ROOT_SUBJECT,
                Code::empty(),
            ))
            .unwrap();
        assert!(id.raw() >= FIRST_USER_ID);
    }

    #[test]
    fn duplicate_code_is_rejected_null_is_not() {
        let mut store = MemoryStore::new();
        let spec = store
            .insert_code_spec(CodeSpecProps {
                id: EntityId::INVALID,
                name: "Tags".to_string(),
                is_repository_scoped: false,
                props: Default::default(),
            })
            .unwrap();

        let code = Code::new(spec, well_known::ROOT_SUBJECT, "P-101");
        store
            .insert_element(ElementProps::new(
                physical(),
                well_known::ROOT_SUBJECT,
                code.clone(),
            ))
            .unwrap();

        let err = store
            .insert_element(ElementProps::new(
                physical(),
                well_known::ROOT_SUBJECT,
                code,
            ))
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateCode { .. }));

        // null-valued codes never collide
        for _ in 0..2 {
            store
                .insert_element(ElementProps::new(
                    physical(),
                    well_known::ROOT_SUBJECT,
                    Code::empty(),
                ))
                .unwrap();
        }
    }

    #[test]
    fn missing_class_is_named() {
        let mut store = MemoryStore::new();
        let err = store
            .insert_element(ElementProps::new(
                ClassKey::new("Plant", "Pump"),
                well_known::ROOT_SUBJECT,
                Code::empty(),
            ))
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Plant:Pump"), "got: {message}");
    }

    #[test]
    fn relationship_endpoints_are_tagged() {
        let mut store = MemoryStore::new();
        let a = store
            .insert_element(ElementProps::new(
                physical(),
                well_known::ROOT_SUBJECT,
                Code::empty(),
            ))
            .unwrap();
        let rel = store
            .insert_relationship(RelationshipProps {
                id: EntityId::INVALID,
                class: ClassKey::new("Core", "ElementRefersToElements"),
                source: a,
                target: well_known::ROOT_SUBJECT,
                props: Default::default(),
            })
            .unwrap();

        let (source, target) = store.relationship_endpoints(rel).unwrap();
        assert_eq!(source, EntityReference::element(a));
        assert_eq!(target.id, well_known::ROOT_SUBJECT);

        let found = store
            .find_relationship(
                &ClassKey::new("Core", "ElementRefersToElements"),
                source,
                target,
            )
            .unwrap();
        assert_eq!(found, Some(rel));
    }

    #[test]
    fn deleting_element_drops_owned_aspects() {
        let mut store = MemoryStore::new();
        let el = store
            .insert_element(ElementProps::new(
                physical(),
                well_known::ROOT_SUBJECT,
                Code::empty(),
            ))
            .unwrap();
        store
            .insert_aspect(AspectProps {
                id: EntityId::INVALID,
                class: ClassKey::new("Core", "ElementAspect"),
                element: el,
                props: Default::default(),
            })
            .unwrap();

        store.delete_element(el).unwrap();
        assert!(store.aspects_of_element(el, None).unwrap().is_empty());
    }
}
