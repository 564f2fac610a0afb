//! Default result-size policy.
//!
//! When a caller does not cap a query, the cap comes from a
//! [`ResultSizePolicy`]. The shipped [`LinearScalePolicy`] grows the cap with
//! the outer query distance up to a ceiling and shrinks it when the query is
//! restricted to a single coarse sector:
//!
//! ```text
//! limit = base + (ceiling - base) * min(1, max_dist / full_scale)
//! limit = max(floor, limit / divisor)        when a sector is selected
//! ```
//!
//! Both steps truncate toward zero.

use crate::error::{CatalogError, Result};
use serde::Deserialize;

/// Maps `(max_dist, sector selected?)` to a default `max_results`.
pub trait ResultSizePolicy: Send + Sync {
    fn default_max_results(&self, max_dist_ly: f64, sector_selected: bool) -> usize;
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LinearScalePolicy {
    /// Cap at zero distance.
    pub base: usize,
    /// Cap at and beyond `full_scale_distance_ly`.
    pub ceiling: usize,
    pub full_scale_distance_ly: f64,
    /// Divisor applied when one coarse sector is selected.
    pub sector_divisor: usize,
    /// Lower bound after the sector division.
    pub sector_floor: usize,
}

impl Default for LinearScalePolicy {
    fn default() -> Self {
        Self {
            base: 18_000,
            ceiling: 100_000,
            full_scale_distance_ly: 17_000.0,
            sector_divisor: 4,
            sector_floor: 5_000,
        }
    }
}

impl LinearScalePolicy {
    pub fn validate(&self) -> Result<()> {
        if self.ceiling < self.base {
            return Err(CatalogError::Config(format!(
                "result_size.ceiling ({}) is below result_size.base ({})",
                self.ceiling, self.base
            )));
        }
        if !(self.full_scale_distance_ly.is_finite() && self.full_scale_distance_ly > 0.0) {
            return Err(CatalogError::Config(format!(
                "result_size.full_scale_distance_ly must be positive, got {}",
                self.full_scale_distance_ly
            )));
        }
        if self.sector_divisor == 0 {
            return Err(CatalogError::Config(
                "result_size.sector_divisor must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl ResultSizePolicy for LinearScalePolicy {
    fn default_max_results(&self, max_dist_ly: f64, sector_selected: bool) -> usize {
        let fraction = if max_dist_ly.is_nan() {
            0.0
        } else {
            (max_dist_ly / self.full_scale_distance_ly).clamp(0.0, 1.0)
        };
        let span = self.ceiling.saturating_sub(self.base) as f64;
        let limit = (self.base as f64 + span * fraction) as usize;
        if sector_selected {
            (limit / self.sector_divisor.max(1)).max(self.sector_floor)
        } else {
            limit
        }
    }
}
