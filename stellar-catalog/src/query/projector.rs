//! Proper-motion projection.
//!
//! Positions are extrapolated linearly from the catalog epoch:
//! `pos(t) = pos(2016.0) + v * (t - 2016.0)`. There is no acceleration term,
//! no relativistic correction and no light-time correction; the light-cone
//! search does its own light-delay reasoning on top of [`displaced`].
//!
//! Every function here is pure and safe to call from parallel scans.

use crate::record::StarRecord;
use stellar_core::constants::{CATALOG_EPOCH, MAS_TO_RAD};
use stellar_core::Vector3;

/// Converts an angular rate (mas/yr per axis) at `distance_ly` into a linear
/// velocity in light-years per year, using the small-angle approximation.
#[inline]
pub fn tangential_velocity(angular_rate_mas_yr: Vector3, distance_ly: f64) -> Vector3 {
    angular_rate_mas_yr * (MAS_TO_RAD * distance_ly)
}

/// Position after `years` of linear motion from `origin`.
#[inline]
pub fn displaced(origin: Vector3, velocity: Vector3, years: f64) -> Vector3 {
    origin + velocity * years
}

/// Position of `record` at `epoch` (Julian year).
///
/// At the catalog epoch the stored position is returned as-is, with no
/// `velocity * 0.0` term that could turn a finite position into NaN.
pub fn position_at(record: &StarRecord, epoch: f64) -> Vector3 {
    let origin = record.position();
    let dt = epoch - CATALOG_EPOCH;
    if dt == 0.0 {
        origin
    } else {
        displaced(origin, record.velocity, dt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn star(velocity: Vector3) -> StarRecord {
        StarRecord {
            source_id: 1,
            direction: Vector3::new(0.0, 0.6, 0.8),
            distance_ly: 25.0,
            velocity,
            magnitude: 4.0,
            healpix_sector: 3,
            distance_bin: 0,
        }
    }

    #[test]
    fn test_identity_at_catalog_epoch() {
        let s = star(Vector3::new(0.3, -1.1, 2.0));
        assert_eq!(position_at(&s, CATALOG_EPOCH), s.position());
    }

    #[test]
    fn test_identity_survives_infinite_velocity() {
        let s = star(Vector3::new(f64::INFINITY, 0.0, 0.0));
        assert_eq!(position_at(&s, 2016.0), s.position());
    }

    #[test]
    fn test_linear_extrapolation() {
        let s = star(Vector3::new(0.0, 1.0, 0.0));
        let p = position_at(&s, 2020.0);
        assert_eq!(p, Vector3::new(0.0, 15.0 + 4.0, 20.0));
    }

    #[test]
    fn test_past_epoch() {
        let s = star(Vector3::new(0.0, 0.0, 0.5));
        let p = position_at(&s, 2006.0);
        assert_eq!(p, Vector3::new(0.0, 15.0, 15.0));
    }

    #[test]
    fn test_tangential_velocity_scaling() {
        let v = tangential_velocity(Vector3::new(1000.0, 0.0, -2000.0), 100.0);
        let k = MAS_TO_RAD * 100.0;
        assert_eq!(v, Vector3::new(1000.0 * k, 0.0, -2000.0 * k));
    }

    #[test]
    fn test_displaced_zero_years() {
        let origin = Vector3::new(1.0, 2.0, 3.0);
        assert_eq!(displaced(origin, Vector3::new(5.0, 5.0, 5.0), 0.0), origin);
    }
}
