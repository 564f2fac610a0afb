//! Query specifications.
//!
//! A [`QuerySpec`] is a plain value: a geometric [`Region`], a target epoch,
//! an optional result cap and a [`SamplingPolicy`]. It is built with
//! [`QueryBuilder`], which only accumulates predicates; nothing touches the
//! store until the terminal [`QueryBuilder::collect`].

use crate::query::engine::{QueryEngine, ResultSet};
use crate::query::healpix::CoarseSector;
use crate::record::StarRecord;
use crate::store::StoreHandle;
use std::ops::RangeInclusive;
use stellar_core::constants::CATALOG_EPOCH;
use stellar_core::Vector3;

/// Half-open distance interval `[min, max)` in light-years.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceBand {
    pub min: f64,
    pub max: f64,
}

impl DistanceBand {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Band that also admits `max` itself, by moving the bound one ULP up.
    pub fn closed(min: f64, max: f64) -> Self {
        Self {
            min,
            max: max.next_up(),
        }
    }

    #[inline]
    pub fn contains(&self, distance_ly: f64) -> bool {
        self.min <= distance_ly && distance_ly < self.max
    }

    /// Interval-overlap test against the bin `[start, start + width)`.
    #[inline]
    pub fn overlaps_bin(&self, start: f64, width: f64) -> bool {
        start < self.max && self.min < start + width
    }
}

/// Axis-aligned box in light-year space, bounds inclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vector3,
    pub max: Vector3,
}

impl Aabb {
    /// Builds a box from per-axis `(low, high)` ranges; swapped bounds are reordered.
    pub fn from_ranges(x: (f64, f64), y: (f64, f64), z: (f64, f64)) -> Self {
        let order = |(a, b): (f64, f64)| if a <= b { (a, b) } else { (b, a) };
        let (x, y, z) = (order(x), order(y), order(z));
        Self {
            min: Vector3::new(x.0, y.0, z.0),
            max: Vector3::new(x.1, y.1, z.1),
        }
    }

    #[inline]
    pub fn contains(&self, p: Vector3) -> bool {
        self.min.x <= p.x
            && p.x <= self.max.x
            && self.min.y <= p.y
            && p.y <= self.max.y
            && self.min.z <= p.z
            && p.z <= self.max.z
    }

    /// Distances from the origin to the nearest and farthest points of the box.
    pub fn radius_band(&self) -> DistanceBand {
        let nearest = |lo: f64, hi: f64| {
            if lo > 0.0 {
                lo
            } else if hi < 0.0 {
                hi
            } else {
                0.0
            }
        };
        let farthest = |lo: f64, hi: f64| lo.abs().max(hi.abs());
        let near = Vector3::new(
            nearest(self.min.x, self.max.x),
            nearest(self.min.y, self.max.y),
            nearest(self.min.z, self.max.z),
        );
        let far = Vector3::new(
            farthest(self.min.x, self.max.x),
            farthest(self.min.y, self.max.y),
            farthest(self.min.z, self.max.z),
        );
        DistanceBand::closed(near.magnitude(), far.magnitude())
    }

    /// Finite bounds with `min <= max` on every axis.
    fn is_valid(&self) -> bool {
        self.min.is_finite()
            && self.max.is_finite()
            && self.min.x <= self.max.x
            && self.min.y <= self.max.y
            && self.min.z <= self.max.z
    }
}

/// Geometric predicate of a range query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Region {
    Sphere { center: Vector3, radius: f64 },
    Box(Aabb),
    /// Distance band, optionally restricted to one coarse sky sector.
    Shell {
        band: DistanceBand,
        sector: Option<CoarseSector>,
    },
}

impl Region {
    /// Conservative bounding box for sphere and box regions.
    pub fn bounding_box(&self) -> Option<Aabb> {
        match *self {
            Region::Sphere { center, radius } => {
                let r = Vector3::new(radius, radius, radius);
                Some(Aabb {
                    min: center - r,
                    max: center + r,
                })
            }
            Region::Box(aabb) => Some(aabb),
            Region::Shell { .. } => None,
        }
    }

    /// Distance band any match must fall in.
    pub fn distance_band(&self) -> DistanceBand {
        match *self {
            Region::Shell { band, .. } => band,
            _ => match self.bounding_box() {
                Some(aabb) if aabb.is_valid() => aabb.radius_band(),
                _ => DistanceBand::new(0.0, 0.0),
            },
        }
    }

    pub fn sector(&self) -> Option<CoarseSector> {
        match *self {
            Region::Shell { sector, .. } => sector,
            _ => None,
        }
    }

    /// Inclusive fine-sector range the region is restricted to, if any.
    pub fn fine_sector_range(&self, refinement: u32) -> Option<RangeInclusive<u32>> {
        self.sector().map(|s| s.fine_range(refinement))
    }

    /// Exact predicate against the record's catalog-epoch position.
    pub fn contains(&self, record: &StarRecord, refinement: u32) -> bool {
        match *self {
            Region::Sphere { center, radius } => {
                let p = record.position();
                if !self.bounding_box().is_some_and(|b| b.contains(p)) {
                    return false;
                }
                (p - center).magnitude_squared() <= radius * radius
            }
            Region::Box(aabb) => aabb.contains(record.position()),
            Region::Shell { band, sector } => {
                band.contains(record.distance_ly)
                    && sector.is_none_or(|s| s.fine_range(refinement).contains(&record.healpix_sector))
            }
        }
    }
}

/// How matches are reduced to `max_results`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SamplingPolicy {
    /// Ascending magnitude (brightest first), ties by source id.
    Brightest,
    /// Uniform sample without replacement, reproducible for a given seed.
    Uniform { seed: u64 },
}

/// A complete range query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuerySpec {
    pub region: Region,
    /// `None` defers to the engine's result-size policy.
    pub max_results: Option<usize>,
    /// Julian year to project the results to.
    pub target_epoch: f64,
    pub sampling: SamplingPolicy,
}

/// Bit-exact identity of a [`QuerySpec`], usable as a hash key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpecKey(Vec<u64>);

impl QuerySpec {
    pub fn sphere(center: Vector3, radius: f64) -> QueryBuilder {
        QueryBuilder::new(Region::Sphere { center, radius })
    }

    pub fn aabb(x: (f64, f64), y: (f64, f64), z: (f64, f64)) -> QueryBuilder {
        QueryBuilder::new(Region::Box(Aabb::from_ranges(x, y, z)))
    }

    pub fn shell(min_dist: f64, max_dist: f64, sector: Option<CoarseSector>) -> QueryBuilder {
        QueryBuilder::new(Region::Shell {
            band: DistanceBand::new(min_dist, max_dist),
            sector,
        })
    }

    /// Key covering every field, including epoch and sampling seed.
    pub fn cache_key(&self) -> SpecKey {
        let mut words = Vec::with_capacity(12);
        match self.region {
            Region::Sphere { center, radius } => {
                words.push(0);
                words.extend(center.to_array().map(f64::to_bits));
                words.push(radius.to_bits());
            }
            Region::Box(aabb) => {
                words.push(1);
                words.extend(aabb.min.to_array().map(f64::to_bits));
                words.extend(aabb.max.to_array().map(f64::to_bits));
            }
            Region::Shell { band, sector } => {
                words.push(2);
                words.push(band.min.to_bits());
                words.push(band.max.to_bits());
                words.push(sector.map_or(0, |s| u64::from(s.get())));
            }
        }
        words.push(self.max_results.map_or(u64::MAX, |n| n as u64));
        words.push(self.target_epoch.to_bits());
        match self.sampling {
            SamplingPolicy::Brightest => words.push(0),
            SamplingPolicy::Uniform { seed } => {
                words.push(1);
                words.push(seed);
            }
        }
        SpecKey(words)
    }
}

/// Accumulates a query; executes only on [`collect`](Self::collect).
#[derive(Debug, Clone, Copy)]
pub struct QueryBuilder {
    spec: QuerySpec,
}

impl QueryBuilder {
    pub fn new(region: Region) -> Self {
        Self {
            spec: QuerySpec {
                region,
                max_results: None,
                target_epoch: CATALOG_EPOCH,
                sampling: SamplingPolicy::Brightest,
            },
        }
    }

    pub fn epoch(mut self, year: f64) -> Self {
        self.spec.target_epoch = year;
        self
    }

    pub fn limit(mut self, max_results: usize) -> Self {
        self.spec.max_results = Some(max_results);
        self
    }

    pub fn brightest(mut self) -> Self {
        self.spec.sampling = SamplingPolicy::Brightest;
        self
    }

    pub fn uniform(mut self, seed: u64) -> Self {
        self.spec.sampling = SamplingPolicy::Uniform { seed };
        self
    }

    pub fn build(self) -> QuerySpec {
        self.spec
    }

    /// Terminal step: runs the accumulated query.
    pub fn collect(self, engine: &QueryEngine, store: &StoreHandle) -> ResultSet {
        engine.execute(store, &self.spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_at(position: Vector3, sector: u32) -> StarRecord {
        let distance_ly = position.magnitude();
        StarRecord {
            source_id: 1,
            direction: position.normalize(),
            distance_ly,
            velocity: Vector3::zeros(),
            magnitude: 1.0,
            healpix_sector: sector,
            distance_bin: 0,
        }
    }

    #[test]
    fn test_band_half_open() {
        let band = DistanceBand::new(10.0, 20.0);
        assert!(band.contains(10.0));
        assert!(band.contains(19.999));
        assert!(!band.contains(20.0));
        assert!(DistanceBand::closed(10.0, 20.0).contains(20.0));
    }

    #[test]
    fn test_overlaps_bin() {
        let band = DistanceBand::new(100.0, 200.0);
        assert!(!band.overlaps_bin(50.0, 50.0));
        assert!(band.overlaps_bin(100.0, 50.0));
        assert!(band.overlaps_bin(150.0, 50.0));
        assert!(!band.overlaps_bin(200.0, 50.0));
    }

    #[test]
    fn test_box_radius_band_containing_origin() {
        let aabb = Aabb::from_ranges((-10.0, 10.0), (-5.0, 5.0), (0.0, 2.0));
        let band = aabb.radius_band();
        assert_eq!(band.min, 0.0);
        let far = (100.0f64 + 25.0 + 4.0).sqrt();
        assert!(band.contains(far));
    }

    #[test]
    fn test_box_radius_band_offset() {
        let aabb = Aabb::from_ranges((30.0, 40.0), (-1.0, 1.0), (-1.0, 1.0));
        let band = aabb.radius_band();
        assert_eq!(band.min, 30.0);
        assert!(band.max > (1600.0f64 + 2.0).sqrt());
    }

    #[test]
    fn test_from_ranges_reorders() {
        let aabb = Aabb::from_ranges((5.0, -5.0), (0.0, 1.0), (2.0, 1.0));
        assert_eq!(aabb.min, Vector3::new(-5.0, 0.0, 1.0));
        assert_eq!(aabb.max, Vector3::new(5.0, 1.0, 2.0));
    }

    #[test]
    fn test_sphere_contains_boundary() {
        let region = Region::Sphere {
            center: Vector3::zeros(),
            radius: 20.0,
        };
        assert!(region.contains(&record_at(Vector3::new(20.0, 0.0, 0.0), 0), 16));
        assert!(!region.contains(&record_at(Vector3::new(20.5, 0.0, 0.0), 0), 16));
        // Inside the bounding box corner, outside the sphere.
        assert!(!region.contains(&record_at(Vector3::new(15.0, 15.0, 0.0), 0), 16));
    }

    #[test]
    fn test_sphere_distance_band_spans_center() {
        let region = Region::Sphere {
            center: Vector3::new(100.0, 0.0, 0.0),
            radius: 10.0,
        };
        let band = region.distance_band();
        assert_eq!(band.min, 90.0);
        assert!(band.contains(110.0));
    }

    #[test]
    fn test_negative_radius_matches_nothing() {
        let region = Region::Sphere {
            center: Vector3::new(5.0, 0.0, 0.0),
            radius: -1.0,
        };
        assert!(!region.contains(&record_at(Vector3::new(5.0, 0.0, 0.0), 0), 16));
        let band = region.distance_band();
        assert!(!band.overlaps_bin(0.0, 50.0));
    }

    #[test]
    fn test_shell_with_sector() {
        let region = Region::Shell {
            band: DistanceBand::new(0.0, 100.0),
            sector: CoarseSector::new(2),
        };
        assert!(region.contains(&record_at(Vector3::new(50.0, 0.0, 0.0), 16), 16));
        assert!(region.contains(&record_at(Vector3::new(50.0, 0.0, 0.0), 31), 16));
        assert!(!region.contains(&record_at(Vector3::new(50.0, 0.0, 0.0), 32), 16));
        assert!(!region.contains(&record_at(Vector3::new(150.0, 0.0, 0.0), 16), 16));
    }

    #[test]
    fn test_builder_defaults() {
        let spec = QuerySpec::shell(0.0, 100.0, None).build();
        assert_eq!(spec.target_epoch, 2016.0);
        assert_eq!(spec.max_results, None);
        assert_eq!(spec.sampling, SamplingPolicy::Brightest);
    }

    #[test]
    fn test_cache_key_distinguishes_seed_and_epoch() {
        let base = QuerySpec::sphere(Vector3::zeros(), 10.0).limit(5);
        let a = base.uniform(1).build().cache_key();
        let b = base.uniform(2).build().cache_key();
        let c = base.uniform(1).epoch(2020.0).build().cache_key();
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, base.uniform(1).build().cache_key());
        assert_ne!(base.build().cache_key(), base.limit(6).build().cache_key());
    }
}
