//! Change detection.
//!
//! "Changed" is a property-by-property comparison against current target
//! content, with three modes: binary properties compare by canonical
//! encoding (tolerates representational differences), navigation properties
//! by their normalized `{id}` form, everything else structurally. A
//! caller-supplied ignore-set excludes bag properties expected to diverge
//! spuriously (store-computed checksums and the like).

use graphport_model::{
    props::canonical_hex, AspectProps, ElementProps, ModelProps, PropMap, PropValue,
    RelationshipProps,
};
use std::collections::BTreeSet;

fn values_differ(a: &PropValue, b: &PropValue) -> bool {
    match (a, b) {
        (PropValue::Binary(x), PropValue::Binary(y)) => canonical_hex(x) != canonical_hex(y),
        (PropValue::Nav(x), PropValue::Nav(y)) => x.normalized() != y.normalized(),
        _ => a != b,
    }
}

/// Compare two property bags. An absent property and an explicit `Null`
/// are the same thing.
pub fn props_differ(current: &PropMap, proposed: &PropMap, ignore: &BTreeSet<String>) -> bool {
    let keys: BTreeSet<&String> = current.keys().chain(proposed.keys()).collect();
    for key in keys {
        if ignore.contains(key.as_str()) {
            continue;
        }
        let a = current.get(key).unwrap_or(&PropValue::Null);
        let b = proposed.get(key).unwrap_or(&PropValue::Null);
        if values_differ(a, b) {
            return true;
        }
    }
    false
}

pub fn element_changed(
    current: &ElementProps,
    proposed: &ElementProps,
    ignore: &BTreeSet<String>,
) -> bool {
    current.class != proposed.class
        || current.model != proposed.model
        || current.code != proposed.code
        || current.parent.as_ref().map(|p| p.normalized())
            != proposed.parent.as_ref().map(|p| p.normalized())
        || current.user_label != proposed.user_label
        || current.placement != proposed.placement
        || props_differ(&current.props, &proposed.props, ignore)
}

pub fn model_changed(current: &ModelProps, proposed: &ModelProps, ignore: &BTreeSet<String>) -> bool {
    current.class != proposed.class
        || current.is_private != proposed.is_private
        || props_differ(&current.props, &proposed.props, ignore)
}

pub fn aspect_changed(
    current: &AspectProps,
    proposed: &AspectProps,
    ignore: &BTreeSet<String>,
) -> bool {
    current.class != proposed.class || props_differ(&current.props, &proposed.props, ignore)
}

pub fn relationship_changed(
    current: &RelationshipProps,
    proposed: &RelationshipProps,
    ignore: &BTreeSet<String>,
) -> bool {
    current.class != proposed.class
        || current.source != proposed.source
        || current.target != proposed.target
        || props_differ(&current.props, &proposed.props, ignore)
}
