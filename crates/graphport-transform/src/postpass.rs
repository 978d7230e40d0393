//! Post-import passes.
//!
//! Two optional cleanups run after the traversal is done: inlining shared
//! geometry definitions that ended up with a single referrer, and
//! recomputing the target's project extent from element placements,
//! optionally excluding statistical outliers while still reporting how many
//! were excluded.

use crate::{SharedStore, TransformResult};
use graphport_model::{ClassKey, EntityId, PropValue, Range3d};
use graphport_store::GraphStore;

// ============================================================================
// Geometry Inlining
// ============================================================================

fn is_geometry_part(class: &ClassKey) -> bool {
    class.class.ends_with("GeometryPart")
}

/// Inline geometry-part definitions referenced by exactly one element: the
/// part's stream moves into the referrer and the orphaned part is deleted.
/// Parts with zero or multiple referrers are left alone. Returns how many
/// parts were inlined.
pub fn inline_unshared_geometry(target: &SharedStore) -> TransformResult<u64> {
    // collection pass: part ids, then (part -> referrers) over all props
    let (parts, references) = {
        let store = target.read();
        let mut parts = Vec::new();
        let mut references: Vec<(EntityId, EntityId, String)> = Vec::new();

        for id in store.element_ids()? {
            let Some(element) = store.element(id)? else {
                continue;
            };
            if is_geometry_part(&element.class) {
                parts.push(id);
            }
            for (name, value) in &element.props {
                if let Some(referenced) = value.as_entity_id() {
                    references.push((referenced, id, name.clone()));
                }
            }
        }
        (parts, references)
    };

    let mut inlined = 0u64;
    for part_id in parts {
        let referrers: Vec<&(EntityId, EntityId, String)> = references
            .iter()
            .filter(|(referenced, _, _)| *referenced == part_id)
            .collect();
        let [single] = referrers.as_slice() else {
            continue; // shared or orphaned: leave it
        };
        let (referrer, prop_name) = (single.1, single.2.clone());

        let part = target.read().element(part_id)?;
        let Some(part) = part else { continue };
        let stream = part
            .props
            .get("geometry")
            .cloned()
            .unwrap_or(PropValue::Null);

        let Some(mut element) = target.read().element(referrer)? else {
            continue;
        };
        element.props.insert(prop_name, stream);
        target.write().update_element(&element)?;
        target.write().delete_element(part_id)?;
        tracing::debug!(part = %part_id, referrer = %referrer, "inlined single-use geometry part");
        inlined += 1;
    }
    Ok(inlined)
}

// ============================================================================
// Project Extent
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct ExtentOptions {
    /// Drop placements whose center is a statistical outlier (median
    /// absolute deviation test) before unioning.
    pub exclude_outliers: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComputedExtent {
    pub extent: Range3d,
    /// Outliers dropped from the union; still reported so callers can
    /// surface them.
    pub outliers_excluded: u64,
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = values.len();
    if n == 0 {
        0.0
    } else if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

/// Union every placed element's box into the project extent.
pub fn compute_project_extent(
    target: &SharedStore,
    options: ExtentOptions,
) -> TransformResult<ComputedExtent> {
    let placements = {
        let store = target.read();
        let mut placements = Vec::new();
        for id in store.element_ids()? {
            if let Some(element) = store.element(id)? {
                if let Some(placement) = element.placement {
                    placements.push(placement);
                }
            }
        }
        placements
    };

    if placements.is_empty() {
        return Ok(ComputedExtent {
            extent: Range3d::null(),
            outliers_excluded: 0,
        });
    }

    let included: Vec<bool> = if options.exclude_outliers && placements.len() >= 3 {
        // distance of each center from the median center, MAD-tested
        let mut xs: Vec<f64> = placements.iter().map(|p| p.center()[0]).collect();
        let mut ys: Vec<f64> = placements.iter().map(|p| p.center()[1]).collect();
        let mut zs: Vec<f64> = placements.iter().map(|p| p.center()[2]).collect();
        let pivot = [median(&mut xs), median(&mut ys), median(&mut zs)];

        let distances: Vec<f64> = placements
            .iter()
            .map(|p| {
                let c = p.center();
                ((c[0] - pivot[0]).powi(2) + (c[1] - pivot[1]).powi(2) + (c[2] - pivot[2]).powi(2))
                    .sqrt()
            })
            .collect();
        let mut sorted = distances.clone();
        let med = median(&mut sorted);
        let mut deviations: Vec<f64> = distances.iter().map(|d| (d - med).abs()).collect();
        let mad = median(&mut deviations);

        if mad == 0.0 {
            vec![true; placements.len()]
        } else {
            // 1.4826 scales MAD to a normal-consistent sigma
            let threshold = med + 3.0 * 1.4826 * mad;
            distances.iter().map(|d| *d <= threshold).collect()
        }
    } else {
        vec![true; placements.len()]
    };

    let mut extent = Range3d::null();
    let mut excluded = 0u64;
    for (placement, keep) in placements.iter().zip(&included) {
        if *keep {
            extent = extent.union(&placement.range());
        } else {
            excluded += 1;
        }
    }
    Ok(ComputedExtent {
        extent,
        outliers_excluded: excluded,
    })
}
