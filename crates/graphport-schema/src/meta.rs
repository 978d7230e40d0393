//! Schema metadata model.
//!
//! These are the *inputs* to the reference-type cache: a loaded schema's
//! class definitions, already parsed by whatever loads schemas (out of
//! scope here). Base-class chains are normally linear; `bases[0]` is the
//! primary base, anything after it is a lateral branch (mixins, secondary
//! interfaces).

use graphport_model::ClassKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Versioning
// ============================================================================

/// Semantic schema version, `read.write.minor`. Ordering is total and
/// drives the cache's never-downgrade policy.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SchemaVersion {
    pub read: u32,
    pub write: u32,
    pub minor: u32,
}

impl SchemaVersion {
    pub const fn new(read: u32, write: u32, minor: u32) -> Self {
        Self { read, write, minor }
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}.{:02}.{:02}", self.read, self.write, self.minor)
    }
}

impl FromStr for SchemaVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('.').map(|p| p.parse::<u32>());
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(Ok(read)), Some(Ok(write)), Some(Ok(minor)), None) => {
                Ok(Self { read, write, minor })
            }
            _ => Err(format!("invalid schema version `{s}`")),
        }
    }
}

// ============================================================================
// Class Definitions
// ============================================================================

/// Which end of a relationship a navigation property points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NavDirection {
    /// The property holds the relationship's target.
    Forward,
    /// The property holds the relationship's source.
    Backward,
}

/// A navigation-typed property declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavPropDef {
    pub name: String,
    pub relationship_class: ClassKey,
    pub direction: NavDirection,
}

/// Endpoint constraints of a relationship class. Every constraint class of
/// one end shares the same root, so resolving the first is resolving all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelConstraints {
    pub source: Vec<ClassKey>,
    pub target: Vec<ClassKey>,
}

/// One class in a schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDef {
    pub name: String,
    /// Base classes; `bases[0]` is the primary chain, the rest are lateral.
    #[serde(default)]
    pub bases: Vec<ClassKey>,
    #[serde(default)]
    pub is_mixin: bool,
    /// For mixins: the concrete class family this mixin applies to.
    #[serde(default)]
    pub applies_to: Option<ClassKey>,
    #[serde(default)]
    pub nav_props: Vec<NavPropDef>,
    /// Present iff this class is a relationship class.
    #[serde(default)]
    pub constraints: Option<RelConstraints>,
}

impl ClassDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bases: Vec::new(),
            is_mixin: false,
            applies_to: None,
            nav_props: Vec::new(),
            constraints: None,
        }
    }

    pub fn with_base(mut self, base: ClassKey) -> Self {
        self.bases.push(base);
        self
    }

    pub fn primary_base(&self) -> Option<&ClassKey> {
        self.bases.first()
    }
}

/// A loaded schema: name, version, classes by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDef {
    pub name: String,
    pub version: SchemaVersion,
    pub classes: BTreeMap<String, ClassDef>,
}

impl SchemaDef {
    pub fn new(name: impl Into<String>, version: SchemaVersion) -> Self {
        Self {
            name: name.into(),
            version,
            classes: BTreeMap::new(),
        }
    }

    pub fn add_class(&mut self, class: ClassDef) {
        self.classes.insert(class.name.clone(), class);
    }

    pub fn class(&self, name: &str) -> Option<&ClassDef> {
        self.classes.get(name)
    }
}

// ============================================================================
// Well-Known Roots
// ============================================================================

/// Root base classes every store schema bottoms out in.
pub mod roots {
    /// Schema that declares the root classes.
    pub const CORE_SCHEMA: &str = "Core";

    pub const ELEMENT: &str = "Element";
    pub const MODEL: &str = "Model";
    pub const ELEMENT_ASPECT: &str = "ElementAspect";
    /// Root of every link-table relationship class.
    pub const ELEMENT_REFERS_TO_ELEMENTS: &str = "ElementRefersToElements";
    /// Non-materialized reference/system pseudo-root: endpoints rooted here
    /// need no remapping at all.
    pub const REFERENCE_STUB: &str = "ReferenceStub";
}
