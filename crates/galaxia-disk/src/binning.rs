//! Radial zone boundaries.
//!
//! A [`RadialBinning`] partitions `[0, inf)` into `n_zones` half-open
//! intervals `[edges[i], edges[i + 1])`. Radii at or beyond the last edge
//! belong to the outermost zone.

use galaxia_types::ZoneIndex;
use serde::{Deserialize, Serialize};

use crate::error::DiskError;

/// Smallest admissible outer edge, kpc.
pub const MIN_OUTER_EDGE: f64 = 30.0;

/// Sorted radius edges defining the zones of the disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct RadialBinning {
    edges: Vec<f64>,
}

impl RadialBinning {
    /// Build a binning from edges in any order.
    ///
    /// # Errors
    ///
    /// Returns [`DiskError::Domain`] if there are fewer than two edges,
    /// an edge is not finite, two edges coincide, the smallest edge is
    /// not 0 or the largest is below 30 kpc.
    pub fn new(mut edges: Vec<f64>) -> Result<Self, DiskError> {
        if edges.len() < 2 {
            return Err(DiskError::domain(format!(
                "at least two bin edges are required, got {}",
                edges.len()
            )));
        }
        if edges.iter().any(|e| !e.is_finite()) {
            return Err(DiskError::domain("bin edges must be finite"));
        }
        edges.sort_by(f64::total_cmp);

        if edges.windows(2).any(|w| w.first() == w.last()) {
            return Err(DiskError::domain("bin edges must be distinct"));
        }
        let min = edges.first().copied().unwrap_or_default();
        let max = edges.last().copied().unwrap_or_default();
        if min != 0.0 {
            return Err(DiskError::domain(format!(
                "minimum bin edge must be 0, got {min}"
            )));
        }
        if max < MIN_OUTER_EDGE {
            return Err(DiskError::domain(format!(
                "maximum bin edge must be at least {MIN_OUTER_EDGE} kpc, got {max}"
            )));
        }
        Ok(Self { edges })
    }

    /// Equal-width zones of `width` kpc out to `max_radius`.
    ///
    /// The last zone is narrower when `width` does not divide
    /// `max_radius`.
    ///
    /// # Errors
    ///
    /// Returns [`DiskError::Domain`] if `width` is not positive or the
    /// resulting edges fail [`RadialBinning::new`].
    pub fn uniform(max_radius: f64, width: f64) -> Result<Self, DiskError> {
        if !(width.is_finite() && width > 0.0) {
            return Err(DiskError::domain(format!(
                "zone width must be positive, got {width}"
            )));
        }
        if !max_radius.is_finite() {
            return Err(DiskError::domain("maximum radius must be finite"));
        }
        let mut edges = Vec::new();
        let mut k: u32 = 0;
        loop {
            let edge = f64::from(k) * width;
            // snap edges that land within rounding of the outer boundary
            if edge >= max_radius - width * 1e-9 {
                break;
            }
            edges.push(edge);
            k = k.saturating_add(1);
        }
        edges.push(max_radius);
        Self::new(edges)
    }

    /// Number of zones.
    pub fn n_zones(&self) -> usize {
        self.edges.len().saturating_sub(1)
    }

    /// The sorted edges.
    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    /// Outer edge of the last zone.
    pub fn outer_edge(&self) -> f64 {
        self.edges.last().copied().unwrap_or_default()
    }

    /// Zone containing `radius`.
    ///
    /// # Errors
    ///
    /// Returns [`DiskError::Domain`] if `radius` is negative or not finite.
    pub fn zone_of(&self, radius: f64) -> Result<ZoneIndex, DiskError> {
        if !radius.is_finite() || radius < 0.0 {
            return Err(DiskError::domain(format!(
                "radius must be finite and non-negative, got {radius}"
            )));
        }
        let above = self.edges.partition_point(|&e| e <= radius);
        let zone = above.saturating_sub(1).min(self.n_zones().saturating_sub(1));
        Ok(ZoneIndex(zone))
    }

    /// Inner and outer edge of `zone`.
    ///
    /// # Errors
    ///
    /// Returns [`DiskError::IndexOutOfRange`] if `zone` does not exist.
    pub fn bounds_of(&self, zone: ZoneIndex) -> Result<(f64, f64), DiskError> {
        let i = zone.get();
        let out_of_range = || DiskError::IndexOutOfRange {
            kind: "zone",
            index: i,
            len: self.n_zones(),
        };
        let low = *self.edges.get(i).ok_or_else(out_of_range)?;
        let high = *self.edges.get(i.saturating_add(1)).ok_or_else(out_of_range)?;
        Ok((low, high))
    }

    /// Radius at which populations born in `zone` are placed: the zone
    /// midpoint.
    ///
    /// # Errors
    ///
    /// Returns [`DiskError::IndexOutOfRange`] if `zone` does not exist.
    pub fn birth_radius(&self, zone: ZoneIndex) -> Result<f64, DiskError> {
        let (low, high) = self.bounds_of(zone)?;
        Ok(0.5 * (low + high))
    }
}

impl TryFrom<Vec<f64>> for RadialBinning {
    type Error = DiskError;

    fn try_from(edges: Vec<f64>) -> Result<Self, Self::Error> {
        Self::new(edges)
    }
}

impl From<RadialBinning> for Vec<f64> {
    fn from(binning: RadialBinning) -> Self {
        binning.edges
    }
}
