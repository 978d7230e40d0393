//! Entity identifiers and tagged references.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// EntityId
// ============================================================================

/// Opaque store-local 64-bit identifier (4 bytes of briefcase + 6 of local
/// counter in the original encoding; we treat it as a single token).
///
/// Rendered as a `0x`-prefixed lowercase hex string everywhere it crosses a
/// serialization boundary, so ids survive JSON round-trips without losing
/// precision to floating-point readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct EntityId(u64);

impl EntityId {
    /// The universal "no reference" sentinel, for every entity kind.
    pub const INVALID: EntityId = EntityId(0);

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Failure to parse an id token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid id token `{token}`")]
pub struct ParseIdError {
    pub token: String,
}

impl FromStr for EntityId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseIdError {
            token: s.to_string(),
        };
        let hex = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"));
        let hex = hex.filter(|h| !h.is_empty()).ok_or_else(err)?;
        let raw = u64::from_str_radix(hex, 16).map_err(|_| err())?;
        Ok(EntityId(raw))
    }
}

// Ids serialize as their hex token, not as a bare integer.
impl Serialize for EntityId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// EntityKind / EntityReference
// ============================================================================

/// The concrete kind family an id belongs to. Aspects and link-table
/// relationships live in separate kind families even though they share the
/// non-element id space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Element,
    Model,
    ElementAspect,
    Relationship,
    CodeSpec,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityKind::Element => "element",
            EntityKind::Model => "model",
            EntityKind::ElementAspect => "aspect",
            EntityKind::Relationship => "relationship",
            EntityKind::CodeSpec => "codespec",
        };
        f.write_str(s)
    }
}

/// A kind-tagged identifier: the unit of cross-store reference resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityReference {
    pub kind: EntityKind,
    pub id: EntityId,
}

impl EntityReference {
    pub const fn new(kind: EntityKind, id: EntityId) -> Self {
        Self { kind, id }
    }

    /// The invalid reference of a given kind.
    pub const fn invalid(kind: EntityKind) -> Self {
        Self {
            kind,
            id: EntityId::INVALID,
        }
    }

    pub const fn element(id: EntityId) -> Self {
        Self::new(EntityKind::Element, id)
    }

    pub const fn model(id: EntityId) -> Self {
        Self::new(EntityKind::Model, id)
    }

    pub const fn is_valid(&self) -> bool {
        self.id.is_valid()
    }
}

impl fmt::Display for EntityReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

// ============================================================================
// Federation Identity
// ============================================================================

/// Globally unique identity that survives copying between stores,
/// independent of any store-local id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct FederationGuid(pub uuid::Uuid);

impl FederationGuid {
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for FederationGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
