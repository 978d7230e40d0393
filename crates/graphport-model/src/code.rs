//! Codes: uniqueness-scoped human-readable identifiers.

use crate::id::EntityId;
use crate::props::PropMap;
use crate::well_known;
use serde::{Deserialize, Serialize};

/// A code attaches a human-readable value to an element, unique within
/// `(spec, scope)`. A null value is always legal and never collides.
///
/// Spec and scope can never legally be null in a store, which is why an
/// unresolvable code degrades to [`Code::empty`] instead of a dangling
/// reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Code {
    pub spec: EntityId,
    pub scope: EntityId,
    pub value: Option<String>,
}

impl Code {
    pub fn new(spec: EntityId, scope: EntityId, value: impl Into<String>) -> Self {
        Self {
            spec,
            scope,
            value: Some(value.into()),
        }
    }

    /// The null-valued code: default spec, root-subject scope, no value.
    pub fn empty() -> Self {
        Self {
            spec: well_known::ROOT_SUBJECT,
            scope: well_known::ROOT_SUBJECT,
            value: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }

    /// Strip the value, keeping spec and scope. Used when a value collides
    /// in the target and must be parked for later resolution.
    pub fn cleared(&self) -> Self {
        Self {
            spec: self.spec,
            scope: self.scope,
            value: None,
        }
    }
}

/// Props of a code spec row: a named policy for how its codes are scoped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeSpecProps {
    pub id: EntityId,
    pub name: String,
    /// Whether codes under this spec are scoped to the whole repository
    /// (scope re-rooted to the root subject on same-store clones).
    pub is_repository_scoped: bool,
    #[serde(default)]
    pub props: PropMap,
}
