//! Per-star record model.
//!
//! A [`StarRecord`] is the fixed schema every partition stores: identity,
//! unit direction at the catalog epoch, distance, tangential velocity,
//! magnitude, and the two partitioning keys assigned at ingestion (fine sky
//! sector and distance bin). Rows that cannot satisfy the schema are
//! rejected by [`StarRecord::validate`] at the ingestion boundary and again,
//! defensively, when a partition is read.

use crate::error::{CatalogError, Result};
use crate::query::healpix;
use crate::query::projector;
use serde::Serialize;
use stellar_core::constants::{DEG_TO_RAD, LY_PER_PARSEC};
use stellar_core::Vector3;

/// Parallax below this (mas) is too uncertain to invert; such stars get [`FAR_DISTANCE_LY`].
pub const MIN_RELIABLE_PARALLAX_MAS: f64 = 0.2;

/// Distance assigned to stars with unreliable parallax.
pub const FAR_DISTANCE_LY: f64 = 10_000.0;

/// Allowed deviation of `‖direction‖` from 1.
pub const UNIT_TOLERANCE: f64 = 1e-6;

/// One catalog star at the catalog epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StarRecord {
    pub source_id: u64,
    /// Unit vector toward the star at the catalog epoch.
    pub direction: Vector3,
    pub distance_ly: f64,
    /// Tangential velocity in light-years per year.
    pub velocity: Vector3,
    /// Apparent magnitude (lower is brighter).
    pub magnitude: f64,
    /// Fine HEALPix sector, fixed at ingestion.
    pub healpix_sector: u32,
    /// Start of the distance bin, `floor(distance / width) * width`.
    pub distance_bin: u32,
}

/// Raw astrometry as delivered by the upstream catalog.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawAstrometry {
    pub source_id: u64,
    pub ra_deg: f64,
    pub dec_deg: f64,
    /// Parallax in milliarcseconds.
    pub parallax_mas: f64,
    /// Proper motion in RA including the cos(dec) factor, mas/yr.
    pub pmra_mas_yr: f64,
    pub pmdec_mas_yr: f64,
    pub magnitude: f64,
    /// Precomputed fine sector, if the upstream already has one.
    pub healpix_sector: Option<u32>,
}

impl StarRecord {
    /// Heliocentric Cartesian position at the catalog epoch, in light-years.
    #[inline]
    pub fn position(&self) -> Vector3 {
        self.direction * self.distance_ly
    }

    /// Derives the stored columns from raw astrometry.
    ///
    /// Distance comes from the inverted parallax; proper motion is turned
    /// into a Cartesian angular rate on the tangent plane and scaled to a
    /// linear velocity at that distance.
    pub fn from_astrometry(raw: &RawAstrometry, bin_width_ly: f64) -> Result<Self> {
        let anomaly = |field| CatalogError::NumericAnomaly {
            source_id: raw.source_id,
            field,
        };

        if !(raw.ra_deg.is_finite() && raw.dec_deg.is_finite()) {
            return Err(anomaly("ra/dec"));
        }
        if !(raw.parallax_mas.is_finite() && raw.parallax_mas > 0.0) {
            return Err(anomaly("parallax"));
        }
        if !(raw.pmra_mas_yr.is_finite() && raw.pmdec_mas_yr.is_finite()) {
            return Err(anomaly("proper motion"));
        }

        let distance_ly = parallax_to_light_years(raw.parallax_mas);
        let ra = raw.ra_deg * DEG_TO_RAD;
        let dec = raw.dec_deg * DEG_TO_RAD;
        let direction = Vector3::from_spherical(ra, dec);
        let angular_rate = tangent_plane_rate(ra, dec, raw.pmra_mas_yr, raw.pmdec_mas_yr);
        let velocity = projector::tangential_velocity(angular_rate, distance_ly);
        let healpix_sector = raw
            .healpix_sector
            .unwrap_or_else(|| healpix::fine_sector(raw.ra_deg, raw.dec_deg));

        let record = Self {
            source_id: raw.source_id,
            direction,
            distance_ly,
            velocity,
            magnitude: raw.magnitude,
            healpix_sector,
            distance_bin: distance_bin(distance_ly, bin_width_ly),
        };
        record.validate()?;
        Ok(record)
    }

    /// Checks the schema invariants: finite fields, unit direction, positive distance.
    pub fn validate(&self) -> Result<()> {
        let anomaly = |field| CatalogError::NumericAnomaly {
            source_id: self.source_id,
            field,
        };
        if !self.direction.is_finite() || (self.direction.magnitude() - 1.0).abs() > UNIT_TOLERANCE
        {
            return Err(anomaly("direction"));
        }
        if !(self.distance_ly.is_finite() && self.distance_ly > 0.0) {
            return Err(anomaly("distance"));
        }
        if !self.velocity.is_finite() {
            return Err(anomaly("velocity"));
        }
        if !self.magnitude.is_finite() {
            return Err(anomaly("magnitude"));
        }
        Ok(())
    }
}

/// Bin start for a distance: `floor(distance / width) * width`.
pub fn distance_bin(distance_ly: f64, bin_width_ly: f64) -> u32 {
    (libm::floor(distance_ly / bin_width_ly) * bin_width_ly) as u32
}

/// Inverts a parallax (mas) into light-years, capping unreliable parallaxes at [`FAR_DISTANCE_LY`].
pub fn parallax_to_light_years(parallax_mas: f64) -> f64 {
    if parallax_mas < MIN_RELIABLE_PARALLAX_MAS {
        FAR_DISTANCE_LY
    } else {
        1000.0 / parallax_mas * LY_PER_PARSEC
    }
}

/// Proper motion as a Cartesian rate (mas/yr) along the east and north tangent vectors.
fn tangent_plane_rate(ra: f64, dec: f64, pmra: f64, pmdec: f64) -> Vector3 {
    let (sin_ra, cos_ra) = libm::sincos(ra);
    let (sin_dec, cos_dec) = libm::sincos(dec);
    Vector3::new(
        -pmra * sin_ra - pmdec * sin_dec * cos_ra,
        pmra * cos_ra - pmdec * sin_dec * sin_ra,
        pmdec * cos_dec,
    )
}
