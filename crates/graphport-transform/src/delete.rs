//! Cascading deletion.
//!
//! Deleting a subtree root must also delete every entity that depends on a
//! deleted entity purely through a scoping (non-parent) reference — a code
//! scope can create a dependency the parent/child tree alone would miss.
//! Definition- and container-type entities are parked and deleted only
//! after every ordinary entity of the pass, so a still-referenced scope is
//! never removed prematurely.

use crate::importer::EntityImporter;
use crate::{SharedStore, TransformResult};
use graphport_model::{well_known, ClassKey, EntityId};
use graphport_store::GraphStore;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteStats {
    pub elements: u64,
    pub models: u64,
    /// How many of the deleted elements were definition/container types
    /// parked for the late pass.
    pub definitions_deferred: u64,
}

type DeferredPredicate = Box<dyn Fn(&ClassKey) -> bool + Send>;

/// Bottom-up subtree deletion with scope-dependency chasing.
pub struct Deleter {
    is_deferred_class: DeferredPredicate,
}

impl Deleter {
    pub fn new() -> Self {
        Self {
            is_deferred_class: Box::new(|class| {
                class.class.ends_with("Definition") || class.class.ends_with("DefinitionContainer")
            }),
        }
    }

    /// Override which classes are parked for the late pass.
    pub fn with_deferred_predicate(predicate: DeferredPredicate) -> Self {
        Self {
            is_deferred_class: predicate,
        }
    }

    /// Delete `root` and everything that depends on it: descendants via the
    /// parent/child walk, plus any entity whose scoping reference points at
    /// a deleted node, recursively.
    pub fn delete_element_tree(
        &self,
        target: &SharedStore,
        importer: &mut EntityImporter,
        root: EntityId,
    ) -> TransformResult<DeleteStats> {
        // read-only collection pass first; mutation happens afterwards
        let mut visited = BTreeSet::new();
        let mut ordinary = Vec::new();
        let mut deferred = Vec::new();
        self.collect(target, root, &mut visited, &mut ordinary, &mut deferred)?;

        let mut stats = DeleteStats {
            definitions_deferred: deferred.len() as u64,
            ..Default::default()
        };
        for id in ordinary.into_iter().chain(deferred) {
            if target.read().model(id)?.is_some() {
                importer.delete_model(id)?;
                stats.models += 1;
            }
            importer.delete_element(id)?;
            stats.elements += 1;
        }
        Ok(stats)
    }

    /// Post-order collection: children first, then scope dependents, then
    /// the node itself, so every list is already bottom-up.
    fn collect(
        &self,
        target: &SharedStore,
        id: EntityId,
        visited: &mut BTreeSet<EntityId>,
        ordinary: &mut Vec<EntityId>,
        deferred: &mut Vec<EntityId>,
    ) -> TransformResult<()> {
        if !visited.insert(id) || well_known::is_reserved(id) {
            return Ok(());
        }
        let Some(props) = target.read().element(id)? else {
            return Ok(());
        };

        for child in target.read().element_children(id)? {
            self.collect(target, child, visited, ordinary, deferred)?;
        }
        for dependent in target.read().elements_scoped_to(id)? {
            self.collect(target, dependent, visited, ordinary, deferred)?;
        }

        if (self.is_deferred_class)(&props.class) {
            deferred.push(id);
        } else {
            ordinary.push(id);
        }
        Ok(())
    }
}

impl Default for Deleter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::importer::{ImportEvent, ImportOptions};
    use crate::shared;
    use graphport_model::{Code, ElementProps, NavValue};
    use graphport_store::{GraphStore, MemoryStore};
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn store() -> SharedStore {
        let mut s = MemoryStore::new();
        s.register_classes([
            ClassKey::new("Plant", "Pump"),
            ClassKey::new("Plant", "PumpDefinition"),
        ]);
        shared(s)
    }

    fn element(
        store: &SharedStore,
        class: &str,
        parent: Option<EntityId>,
        scope: EntityId,
        label: &str,
    ) -> EntityId {
        let mut props = ElementProps::new(
            ClassKey::new("Plant", class),
            well_known::ROOT_SUBJECT,
            Code {
                spec: well_known::ROOT_SUBJECT,
                scope,
                value: Some(label.to_string()),
            },
        );
        props.parent = parent.map(NavValue::new);
        props.user_label = Some(label.to_string());
        store.write().insert_element(props).unwrap()
    }

    #[test]
    fn scope_dependents_go_with_the_subtree() {
        let target = store();
        let mut importer = EntityImporter::new(target.clone(), ImportOptions::default());

        let p = element(&target, "Pump", None, well_known::ROOT_SUBJECT, "P");
        let q = element(&target, "Pump", Some(p), well_known::ROOT_SUBJECT, "Q");
        let sibling = element(&target, "Pump", None, well_known::ROOT_SUBJECT, "S");
        // unrelated element whose code scope is Q
        let r = element(&target, "Pump", None, q, "R");

        let stats = Deleter::new()
            .delete_element_tree(&target, &mut importer, p)
            .unwrap();

        assert_eq!(stats.elements, 3);
        for gone in [p, q, r] {
            assert!(target.read().element(gone).unwrap().is_none());
        }
        assert!(target.read().element(sibling).unwrap().is_some());
    }

    #[test]
    fn definitions_are_deleted_last() {
        let target = store();
        let mut importer = EntityImporter::new(target.clone(), ImportOptions::default());

        let deletions = Arc::new(Mutex::new(Vec::new()));
        let sink = deletions.clone();
        importer.on_event(Box::new(move |event| {
            if let ImportEvent::Deleted { reference } = event {
                sink.lock().push(reference.id);
            }
        }));

        let root = element(&target, "Pump", None, well_known::ROOT_SUBJECT, "root");
        let definition = element(&target, "PumpDefinition", Some(root), well_known::ROOT_SUBJECT, "def");
        // ordinary element scoped to the definition
        let user = element(&target, "Pump", None, definition, "user");

        let stats = Deleter::new()
            .delete_element_tree(&target, &mut importer, root)
            .unwrap();
        assert_eq!(stats.elements, 3);
        assert_eq!(stats.definitions_deferred, 1);

        let order = deletions.lock().clone();
        assert_eq!(order.last(), Some(&definition));
        assert!(order.contains(&user));
    }

    #[test]
    fn reserved_anchors_survive_even_as_dependents() {
        let target = store();
        let mut importer = EntityImporter::new(target.clone(), ImportOptions::default());

        let p = element(&target, "Pump", None, well_known::ROOT_SUBJECT, "P");
        Deleter::new()
            .delete_element_tree(&target, &mut importer, p)
            .unwrap();

        assert!(target
            .read()
            .element(well_known::ROOT_SUBJECT)
            .unwrap()
            .is_some());
    }

    #[test]
    fn submodels_are_deleted_with_their_modeled_element() {
        let target = store();
        let mut importer = EntityImporter::new(target.clone(), ImportOptions::default());

        let p = element(&target, "Pump", None, well_known::ROOT_SUBJECT, "P");
        target
            .write()
            .insert_model(graphport_model::ModelProps {
                id: EntityId::INVALID,
                class: ClassKey::new("Core", "Model"),
                modeled_element: p,
                is_private: false,
                props: Default::default(),
            })
            .unwrap();

        let stats = Deleter::new()
            .delete_element_tree(&target, &mut importer, p)
            .unwrap();
        assert_eq!(stats.models, 1);
        assert!(target.read().model(p).unwrap().is_none());
    }
}
