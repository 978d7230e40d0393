//! Reference-type cache: what kind of entity does a typed reference point at?
//!
//! Cloning an entity's properties requires knowing, for every
//! navigation-typed property and every relationship endpoint, which concrete
//! entity kind the reference names — element, model, aspect, relationship —
//! so the right remap table can be consulted. That answer lives in the
//! schema's class hierarchy, and walking it per property per entity would
//! dominate a large transform. The cache resolves everything once per schema
//! version and answers lookups from flat maps.
//!
//! One cache instance may serve several source stores whose schema versions
//! drift; [`RefTypeCache::consider_init_schema`] guarantees a later call
//! with an older schema never regresses a cache built from a newer one.

pub mod meta;

pub use meta::{
    roots, ClassDef, NavDirection, NavPropDef, RelConstraints, SchemaDef, SchemaVersion,
};

use dashmap::DashMap;
use graphport_model::{ClassKey, EntityKind};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Class/property resolutions are independent reads; they are issued
/// concurrently in batches of this size to bound peak concurrency.
const INIT_BATCH: usize = 64;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaCacheError {
    /// Lookup before the owning schema was initialized — a caller bug, never
    /// answered with stale or default data.
    #[error("schema `{schema}` has not been initialized in the reference-type cache")]
    NotInitialized { schema: String },

    #[error("class `{class}` is not defined in any initialized schema")]
    UnknownClass { class: ClassKey },

    /// The base-class walk ended somewhere that is not a well-known root.
    /// Signals a cache or schema bug; never silently ignored.
    #[error("class `{class}` does not resolve to a well-known root (walk stopped at `{stopped_at}`)")]
    UnknownRootClass {
        class: ClassKey,
        stopped_at: ClassKey,
    },
}

// ============================================================================
// Cache
// ============================================================================

/// Resolved kinds of a relationship class's two ends. `None` means the end
/// is rooted in a reference pseudo-entity and needs no remapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndKinds {
    pub source: Option<EntityKind>,
    pub target: Option<EntityKind>,
}

#[derive(Clone)]
struct SchemaEntry {
    version: SchemaVersion,
    classes: Arc<BTreeMap<String, ClassDef>>,
}

type NavKey = (String, String, String);

/// The reference-type cache. Cheap to share; all maps are concurrent.
#[derive(Default)]
pub struct RefTypeCache {
    schemas: DashMap<String, SchemaEntry>,
    nav_kinds: DashMap<NavKey, Option<EntityKind>>,
    end_kinds: DashMap<(String, String), EndKinds>,
}

enum Resolved {
    Nav(NavKey, Option<EntityKind>),
    Ends((String, String), EndKinds),
}

impl RefTypeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialize (or re-initialize at a different version) one schema.
    /// Idempotent for the version already cached.
    pub fn init_schema(&self, schema: &SchemaDef) -> Result<(), SchemaCacheError> {
        if let Some(entry) = self.schemas.get(&schema.name) {
            if entry.version == schema.version {
                return Ok(());
            }
        }

        let resolver = Resolver {
            incoming: schema,
            cache: self,
            root_memo: DashMap::new(),
        };

        // Gather every independent resolution this schema needs.
        let mut work: Vec<WorkItem<'_>> = Vec::new();
        for class in schema.classes.values() {
            if class.constraints.is_some() {
                work.push(WorkItem::Relationship(class));
            }
            for nav in &class.nav_props {
                work.push(WorkItem::NavProp(class, nav));
            }
        }

        // Bounded fan-out: each batch runs concurrently, batches run in
        // sequence. Results are staged and published only on full success.
        let mut resolved: Vec<Resolved> = Vec::with_capacity(work.len());
        for batch in work.chunks(INIT_BATCH) {
            let outcomes: Result<Vec<Resolved>, SchemaCacheError> = batch
                .par_iter()
                .map(|item| resolver.resolve(item))
                .collect();
            resolved.extend(outcomes?);
        }

        self.publish(schema, resolved);
        Ok(())
    }

    /// No-op unless `schema` is strictly newer than what is cached under the
    /// same name. This is what keeps a multi-store session from downgrading
    /// a cache built from a newer schema.
    pub fn consider_init_schema(&self, schema: &SchemaDef) -> Result<(), SchemaCacheError> {
        if let Some(entry) = self.schemas.get(&schema.name) {
            if schema.version <= entry.version {
                tracing::debug!(
                    schema = %schema.name,
                    incoming = %schema.version,
                    cached = %entry.version,
                    "skipping schema init; cached version is not older"
                );
                return Ok(());
            }
        }
        self.init_schema(schema)
    }

    pub fn is_initialized(&self, schema: &str) -> bool {
        self.schemas.contains_key(schema)
    }

    pub fn cached_version(&self, schema: &str) -> Option<SchemaVersion> {
        self.schemas.get(schema).map(|e| e.version)
    }

    /// Entity kind a navigation property points at, or `None` when the
    /// property needs no remapping (not navigation-typed, or rooted in a
    /// reference pseudo-entity). Inherited properties resolve through the
    /// base chain.
    pub fn nav_prop_ref_kind(
        &self,
        schema: &str,
        class: &str,
        prop: &str,
    ) -> Result<Option<EntityKind>, SchemaCacheError> {
        self.ensure_initialized(schema)?;

        let mut current = ClassKey::new(schema, class);
        loop {
            let key = (
                current.schema.clone(),
                current.class.clone(),
                prop.to_string(),
            );
            if let Some(kind) = self.nav_kinds.get(&key) {
                return Ok(*kind);
            }
            let Some(def) = self.class_def(&current) else {
                return Err(SchemaCacheError::UnknownClass { class: current });
            };
            let next = if def.is_mixin {
                def.applies_to.clone()
            } else {
                def.primary_base().cloned()
            };
            match next {
                Some(base) => current = base,
                None => return Ok(None),
            }
        }
    }

    /// Resolved end kinds of a relationship class, `None` if the class is
    /// not a (known) relationship class.
    pub fn relationship_end_kinds(
        &self,
        schema: &str,
        rel_class: &str,
    ) -> Result<Option<EndKinds>, SchemaCacheError> {
        self.ensure_initialized(schema)?;

        let mut current = ClassKey::new(schema, rel_class);
        loop {
            if let Some(ends) = self
                .end_kinds
                .get(&(current.schema.clone(), current.class.clone()))
            {
                return Ok(Some(*ends));
            }
            let Some(def) = self.class_def(&current) else {
                return Err(SchemaCacheError::UnknownClass { class: current });
            };
            match def.primary_base().cloned() {
                Some(base) => current = base,
                None => return Ok(None),
            }
        }
    }

    fn ensure_initialized(&self, schema: &str) -> Result<(), SchemaCacheError> {
        if self.is_initialized(schema) {
            Ok(())
        } else {
            Err(SchemaCacheError::NotInitialized {
                schema: schema.to_string(),
            })
        }
    }

    fn class_def(&self, key: &ClassKey) -> Option<ClassDef> {
        self.schemas
            .get(&key.schema)
            .and_then(|entry| entry.classes.get(&key.class).cloned())
    }

    /// Swap in the freshly resolved schema, dropping entries of the version
    /// it supersedes.
    fn publish(&self, schema: &SchemaDef, resolved: Vec<Resolved>) {
        let superseded = self.schemas.get(&schema.name).map(|e| e.version);
        if let Some(old) = superseded {
            tracing::info!(
                schema = %schema.name,
                from = %old,
                to = %schema.version,
                "superseding reference-type cache entries"
            );
            self.nav_kinds.retain(|(s, _, _), _| s != &schema.name);
            self.end_kinds.retain(|(s, _), _| s != &schema.name);
        }

        for item in resolved {
            match item {
                Resolved::Nav(key, kind) => {
                    self.nav_kinds.insert(key, kind);
                }
                Resolved::Ends(key, ends) => {
                    self.end_kinds.insert(key, ends);
                }
            }
        }
        self.schemas.insert(
            schema.name.clone(),
            SchemaEntry {
                version: schema.version,
                classes: Arc::new(schema.classes.clone()),
            },
        );
    }
}

// ============================================================================
// Resolution
// ============================================================================

enum WorkItem<'a> {
    Relationship(&'a ClassDef),
    NavProp(&'a ClassDef, &'a NavPropDef),
}

/// Read-only view over the incoming schema plus everything already cached.
/// Root resolutions are memoized per init pass.
struct Resolver<'a> {
    incoming: &'a SchemaDef,
    cache: &'a RefTypeCache,
    root_memo: DashMap<ClassKey, Option<EntityKind>>,
}

impl Resolver<'_> {
    fn resolve(&self, item: &WorkItem<'_>) -> Result<Resolved, SchemaCacheError> {
        match item {
            WorkItem::Relationship(class) => {
                let key = ClassKey::new(&self.incoming.name, &class.name);
                let ends = self.resolve_ends(&key)?;
                Ok(Resolved::Ends((key.schema, key.class), ends))
            }
            WorkItem::NavProp(class, nav) => {
                let ends = self.resolve_ends(&nav.relationship_class)?;
                let kind = match nav.direction {
                    NavDirection::Forward => ends.target,
                    NavDirection::Backward => ends.source,
                };
                Ok(Resolved::Nav(
                    (
                        self.incoming.name.clone(),
                        class.name.clone(),
                        nav.name.clone(),
                    ),
                    kind,
                ))
            }
        }
    }

    fn class_def(&self, key: &ClassKey) -> Option<ClassDef> {
        if key.schema == self.incoming.name {
            return self.incoming.class(&key.class).cloned();
        }
        self.cache.class_def(key)
    }

    /// Endpoint kinds of a relationship class, inheriting constraints from
    /// the nearest base that declares them.
    fn resolve_ends(&self, rel_class: &ClassKey) -> Result<EndKinds, SchemaCacheError> {
        let mut current = rel_class.clone();
        let constraints = loop {
            let Some(def) = self.class_def(&current) else {
                return Err(SchemaCacheError::UnknownClass { class: current });
            };
            if let Some(constraints) = def.constraints {
                break constraints;
            }
            match def.primary_base().cloned() {
                Some(base) => current = base,
                None => {
                    return Err(SchemaCacheError::UnknownRootClass {
                        class: rel_class.clone(),
                        stopped_at: current,
                    })
                }
            }
        };

        // Every constraint class of one end shares a root, so the first one
        // answers for all of them.
        let end_kind = |classes: &[ClassKey]| -> Result<Option<EntityKind>, SchemaCacheError> {
            match classes.first() {
                Some(first) => self.resolve_root(first),
                None => Ok(None),
            }
        };

        Ok(EndKinds {
            source: end_kind(&constraints.source)?,
            target: end_kind(&constraints.target)?,
        })
    }

    /// Walk `start` to its well-known root.
    ///
    /// Base chains are normally linear, so the walk follows only the first
    /// base at each step — lateral branches (secondary bases) are mixins and
    /// cannot change the root, so they are never materialized. A mixin on
    /// the primary chain is crossed via its applies-to class.
    fn resolve_root(&self, start: &ClassKey) -> Result<Option<EntityKind>, SchemaCacheError> {
        if let Some(hit) = self.root_memo.get(start) {
            return Ok(*hit);
        }

        let mut path = vec![start.clone()];
        let mut current = start.clone();
        let result = loop {
            if let Some(kind) = well_known_root(&current) {
                break kind;
            }
            if let Some(hit) = self.root_memo.get(&current) {
                break *hit;
            }
            let Some(def) = self.class_def(&current) else {
                return Err(SchemaCacheError::UnknownClass { class: current });
            };
            let next = if def.is_mixin {
                def.applies_to.clone()
            } else {
                def.primary_base().cloned()
            };
            let Some(next) = next else {
                return Err(SchemaCacheError::UnknownRootClass {
                    class: start.clone(),
                    stopped_at: current,
                });
            };
            if path.contains(&next) {
                // cyclic hierarchy: schema corruption
                return Err(SchemaCacheError::UnknownRootClass {
                    class: start.clone(),
                    stopped_at: next,
                });
            }
            path.push(next.clone());
            current = next;
        };

        // Memoize the whole walked path; deep trees collapse to one lookup.
        for visited in path {
            self.root_memo.insert(visited, result);
        }
        Ok(result)
    }
}

/// `Some(Some(kind))`-style classification of the fixed root set:
/// `Some(kind)` for the four materialized roots, `Some(None)` for the
/// reference pseudo-root, `None` for everything else (keep walking).
fn well_known_root(class: &ClassKey) -> Option<Option<EntityKind>> {
    if class.schema != roots::CORE_SCHEMA {
        return None;
    }
    match class.class.as_str() {
        roots::ELEMENT => Some(Some(EntityKind::Element)),
        roots::MODEL => Some(Some(EntityKind::Model)),
        roots::ELEMENT_ASPECT => Some(Some(EntityKind::ElementAspect)),
        roots::ELEMENT_REFERS_TO_ELEMENTS => Some(Some(EntityKind::Relationship)),
        roots::REFERENCE_STUB => Some(None),
        _ => None,
    }
}
