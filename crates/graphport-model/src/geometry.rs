//! Minimal placement/extent geometry.
//!
//! The transform never decodes geometry streams; it only needs axis-aligned
//! boxes to recompute a target's project extent after import.

use serde::{Deserialize, Serialize};

/// Where an element sits and how much space it occupies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub origin: [f64; 3],
    pub extent: [f64; 3],
}

impl Placement {
    pub fn range(&self) -> Range3d {
        Range3d {
            low: self.origin,
            high: [
                self.origin[0] + self.extent[0],
                self.origin[1] + self.extent[1],
                self.origin[2] + self.extent[2],
            ],
        }
    }

    /// Center of the occupied box, used for outlier distance scoring.
    pub fn center(&self) -> [f64; 3] {
        [
            self.origin[0] + self.extent[0] / 2.0,
            self.origin[1] + self.extent[1] / 2.0,
            self.origin[2] + self.extent[2] / 2.0,
        ]
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range3d {
    pub low: [f64; 3],
    pub high: [f64; 3],
}

impl Range3d {
    /// The empty range: unions with it are identity.
    pub fn null() -> Self {
        Self {
            low: [f64::INFINITY; 3],
            high: [f64::NEG_INFINITY; 3],
        }
    }

    pub fn is_null(&self) -> bool {
        (0..3).any(|i| self.low[i] > self.high[i])
    }

    pub fn union(&self, other: &Range3d) -> Range3d {
        let mut out = *self;
        for i in 0..3 {
            out.low[i] = out.low[i].min(other.low[i]);
            out.high[i] = out.high[i].max(other.high[i]);
        }
        out
    }

    pub fn diagonal(&self) -> f64 {
        if self.is_null() {
            return 0.0;
        }
        let dx = self.high[0] - self.low[0];
        let dy = self.high[1] - self.low[1];
        let dz = self.high[2] - self.low[2];
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_with_null_is_identity() {
        let r = Placement {
            origin: [1.0, 2.0, 3.0],
            extent: [1.0, 1.0, 1.0],
        }
        .range();
        let u = Range3d::null().union(&r);
        assert_eq!(u, r);
        assert!(!u.is_null());
    }

    #[test]
    fn diagonal_of_unit_cube() {
        let r = Range3d {
            low: [0.0; 3],
            high: [1.0; 3],
        };
        assert!((r.diagonal() - 3f64.sqrt()).abs() < 1e-12);
        assert_eq!(Range3d::null().diagonal(), 0.0);
    }
}
