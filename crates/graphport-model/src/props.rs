//! Property bags crossing the store seam.
//!
//! Entities travel between the clone context and a store as typed prop
//! structs wrapping an ordered property bag. The bag keeps insertion-stable
//! ordering (BTreeMap) so diffs and serialized snapshots are deterministic.

use crate::code::Code;
use crate::geometry::Placement;
use crate::id::{EntityId, FederationGuid};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Class Names
// ============================================================================

/// Fully qualified class name, `Schema:Class`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClassKey {
    pub schema: String,
    pub class: String,
}

impl ClassKey {
    pub fn new(schema: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            class: class.into(),
        }
    }
}

impl fmt::Display for ClassKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.schema, self.class)
    }
}

// ============================================================================
// Property Values
// ============================================================================

/// A navigation value: a typed pointer at another entity, optionally
/// carrying the relationship class that justifies the pointer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavValue {
    pub id: EntityId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rel_class: Option<ClassKey>,
}

impl NavValue {
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            rel_class: None,
        }
    }

    /// The normalized `{id}` form used for change detection: two nav values
    /// are the same reference iff they point at the same id.
    pub fn normalized(&self) -> EntityId {
        self.id
    }
}

/// One property value. `Id` is the raw id-typed scalar (an integer whose
/// extended type marks it as an identifier); `Nav` is a schema-declared
/// navigation property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropValue {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Text(String),
    Binary(Vec<u8>),
    Point { x: f64, y: f64, z: f64 },
    Id(EntityId),
    Nav(NavValue),
}

impl PropValue {
    pub fn nav(id: EntityId) -> Self {
        PropValue::Nav(NavValue::new(id))
    }

    pub fn as_entity_id(&self) -> Option<EntityId> {
        match self {
            PropValue::Id(id) => Some(*id),
            PropValue::Nav(nav) => Some(nav.id),
            _ => None,
        }
    }
}

/// Canonical encoding for binary property comparison. Two binary values are
/// "the same content" iff their canonical encodings match; comparing the
/// encoding rather than raw buffers tolerates representational differences
/// upstream (padding, container framing).
pub fn canonical_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// Ordered property bag.
pub type PropMap = BTreeMap<String, PropValue>;

// ============================================================================
// Entity Props
// ============================================================================

/// An element as it crosses the store seam. `id` is INVALID until the
/// target store assigns one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementProps {
    pub id: EntityId,
    pub class: ClassKey,
    pub model: EntityId,
    pub code: Code,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<NavValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub federation_guid: Option<FederationGuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placement: Option<Placement>,
    #[serde(default)]
    pub props: PropMap,
}

impl ElementProps {
    pub fn new(class: ClassKey, model: EntityId, code: Code) -> Self {
        Self {
            id: EntityId::INVALID,
            class,
            model,
            code,
            parent: None,
            federation_guid: None,
            user_label: None,
            placement: None,
            props: PropMap::new(),
        }
    }
}

/// A model: the container whose id equals its modeled element's id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelProps {
    pub id: EntityId,
    pub class: ClassKey,
    pub modeled_element: EntityId,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub props: PropMap,
}

/// An aspect owned by an element. Aspects share the non-element id space
/// with link-table relationships.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AspectProps {
    pub id: EntityId,
    pub class: ClassKey,
    pub element: EntityId,
    #[serde(default)]
    pub props: PropMap,
}

/// A link-table relationship row: its own id, a class, two endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipProps {
    pub id: EntityId,
    pub class: ClassKey,
    pub source: EntityId,
    pub target: EntityId,
    #[serde(default)]
    pub props: PropMap,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_key_display() {
        let k = ClassKey::new("Structural", "Beam");
        assert_eq!(k.to_string(), "Structural:Beam");
    }

    #[test]
    fn canonical_hex_is_lowercase_and_padded() {
        assert_eq!(canonical_hex(&[0x00, 0xAB, 0x09]), "00ab09");
        assert_eq!(canonical_hex(&[]), "");
    }

    #[test]
    fn prop_value_id_extraction() {
        assert_eq!(
            PropValue::nav(EntityId::from_raw(5)).as_entity_id(),
            Some(EntityId::from_raw(5))
        );
        assert_eq!(
            PropValue::Id(EntityId::from_raw(7)).as_entity_id(),
            Some(EntityId::from_raw(7))
        );
        assert_eq!(PropValue::Int(7).as_entity_id(), None);
    }

    #[test]
    fn element_props_serde_round_trip() {
        let mut el = ElementProps::new(
            ClassKey::new("Core", "PhysicalObject"),
            EntityId::from_raw(0x10),
            Code::empty(),
        );
        el.props
            .insert("mass".to_string(), PropValue::Double(12.5));
        let json = serde_json::to_string(&el).unwrap();
        let back: ElementProps = serde_json::from_str(&json).unwrap();
        assert_eq!(back, el);
    }
}
