//! Partition pruning.
//!
//! Decides, from partition keys alone, which partitions can hold a match.
//! Distance bins are kept on interval overlap with the query's distance band;
//! sector keys are kept when they fall in the selected coarse sector's fine
//! range. Pruning is conservative: it may keep a partition with no match but
//! never drops one that has a match.

use crate::query::spec::{DistanceBand, QuerySpec};
use crate::store::{PartitionKey, PartitionRef, StoreHandle};
use std::ops::RangeInclusive;
use tracing::{debug, warn};

/// Interval-overlap test for the bin `[start, start + width)`.
#[inline]
pub fn bin_overlaps(start: u32, width: f64, band: &DistanceBand) -> bool {
    band.overlaps_bin(f64::from(start), width)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartitionIndex {
    pub bin_width_ly: f64,
    pub sector_refinement: u32,
}

impl PartitionIndex {
    pub fn new(bin_width_ly: f64, sector_refinement: u32) -> Self {
        Self {
            bin_width_ly,
            sector_refinement,
        }
    }

    /// True if a partition with this key may hold a match.
    pub fn admits(
        &self,
        key: &PartitionKey,
        band: &DistanceBand,
        sectors: Option<&RangeInclusive<u32>>,
    ) -> bool {
        let bin_ok = key
            .distance_bin
            .is_none_or(|b| bin_overlaps(b, self.bin_width_ly, band));
        let sector_ok = match (key.sector, sectors) {
            (Some(s), Some(range)) => range.contains(&s),
            _ => true,
        };
        bin_ok && sector_ok
    }

    /// Bin width to prune `store` with. When the partition headers record a
    /// different width than the configured one, the wider of the two is used.
    pub fn pruning_width(&self, store: &StoreHandle) -> f64 {
        match store.bin_width_ly() {
            Some(stored) if stored != self.bin_width_ly => {
                warn!(
                    configured = self.bin_width_ly,
                    stored,
                    "store bin width differs from configuration, pruning with the wider"
                );
                self.bin_width_ly.max(stored)
            }
            _ => self.bin_width_ly,
        }
    }

    /// Candidate partitions for `spec`, in ascending key order. Empty is a valid answer.
    pub fn candidates(&self, store: &StoreHandle, spec: &QuerySpec) -> Vec<PartitionRef> {
        let index = Self {
            bin_width_ly: self.pruning_width(store),
            ..*self
        };
        let band = spec.region.distance_band();
        let sectors = spec.region.fine_sector_range(self.sector_refinement);
        let selected: Vec<PartitionRef> = store
            .partitions()
            .iter()
            .filter(|p| index.admits(&p.key, &band, sectors.as_ref()))
            .cloned()
            .collect();
        debug!(
            band_min = band.min,
            band_max = band.max,
            kept = selected.len(),
            pruned = store.partitions().len() - selected.len(),
            "pruned partitions"
        );
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::healpix::CoarseSector;
    use proptest::prelude::*;

    #[test]
    fn test_admits_distance_bin() {
        let index = PartitionIndex::new(50.0, 16);
        let band = DistanceBand::new(100.0, 200.0);
        assert!(!index.admits(&PartitionKey::distance_bin(50), &band, None));
        assert!(index.admits(&PartitionKey::distance_bin(100), &band, None));
        assert!(index.admits(&PartitionKey::distance_bin(150), &band, None));
        assert!(!index.admits(&PartitionKey::distance_bin(200), &band, None));
    }

    #[test]
    fn test_bin_width_is_not_hard_coded() {
        let index = PartitionIndex::new(100.0, 16);
        let band = DistanceBand::new(120.0, 130.0);
        assert!(index.admits(&PartitionKey::distance_bin(100), &band, None));
        assert!(!index.admits(&PartitionKey::distance_bin(0), &band, None));
    }

    #[test]
    fn test_admits_sector() {
        let index = PartitionIndex::new(50.0, 16);
        let band = DistanceBand::new(0.0, 1e9);
        let range = CoarseSector::new(3).map(|s| s.fine_range(16));
        assert!(index.admits(&PartitionKey::sector(32), &band, range.as_ref()));
        assert!(index.admits(&PartitionKey::sector(47), &band, range.as_ref()));
        assert!(!index.admits(&PartitionKey::sector(48), &band, range.as_ref()));
        assert!(index.admits(&PartitionKey::sector(48), &band, None));
        // Composite keys must satisfy both axes.
        assert!(!index.admits(&PartitionKey::composite(5000, 40), &DistanceBand::new(0.0, 100.0), range.as_ref()));
        assert!(index.admits(&PartitionKey::composite(50, 40), &DistanceBand::new(0.0, 100.0), range.as_ref()));
    }

    proptest! {
        #[test]
        fn prop_overlap_matches_brute_force(
            bin in 0u32..400,
            width in 1u32..200,
            min in 0.0f64..20_000.0,
            span in 0.0f64..5_000.0,
        ) {
            let start = bin * width;
            let band = DistanceBand::new(min, min + span);
            let expected = f64::from(start) < band.max && band.min < f64::from(start + width);
            prop_assert_eq!(bin_overlaps(start, f64::from(width), &band), expected);
        }

        #[test]
        fn prop_pruned_bins_hold_no_matching_distance(
            bin in 0u32..200,
            min in 0.0f64..12_000.0,
            span in 0.0f64..3_000.0,
            frac in 0.0f64..1.0,
        ) {
            let width = 50.0;
            let start = bin * 50;
            let band = DistanceBand::new(min, min + span);
            let d = f64::from(start) + frac * width;
            if band.contains(d) {
                prop_assert!(bin_overlaps(start, width, &band));
            }
        }
    }
}
