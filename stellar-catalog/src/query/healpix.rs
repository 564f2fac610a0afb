//! HEALPix sky sectors.
//!
//! The catalog tags every star with a fine sector: its nested HEALPix pixel
//! at order 2 (nside 4, 192 pixels). In the nested scheme each of the 12
//! base pixels owns a contiguous block of `4^order` descendants, so a coarse
//! sector `p ∈ [1, 12]` is exactly the fine range `[(p-1)*16, p*16 - 1]`.
//! Sector filters are therefore inclusive integer ranges and never touch
//! trigonometry at query time.

use std::ops::RangeInclusive;
use stellar_core::constants::{DEG_TO_RAD, PI};

/// HEALPix order of the fine sector stored with each record.
pub const FINE_SECTOR_ORDER: u32 = 2;

/// Number of coarse (base) HEALPix sectors.
pub const COARSE_SECTORS: u8 = 12;

/// A coarse sky sector, numbered `1..=12` as callers see it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CoarseSector(u8);

impl CoarseSector {
    /// Returns `None` outside `1..=12`.
    pub fn new(sector: u8) -> Option<Self> {
        (1..=COARSE_SECTORS).contains(&sector).then_some(Self(sector))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// Inclusive fine-sector range covered by this coarse sector.
    pub fn fine_range(self, refinement: u32) -> RangeInclusive<u32> {
        let p0 = u32::from(self.0 - 1);
        (p0 * refinement)..=((p0 + 1) * refinement - 1)
    }

    /// Coarse sector containing a fine sector, or `None` past the last one.
    pub fn from_fine(fine: u32, refinement: u32) -> Option<Self> {
        if refinement == 0 {
            return None;
        }
        let p0 = fine / refinement;
        u8::try_from(p0 + 1).ok().and_then(Self::new)
    }

    pub fn all() -> impl Iterator<Item = Self> {
        (1..=COARSE_SECTORS).map(Self)
    }
}

/// Nested HEALPix pixel of a sky position, with RA/Dec in degrees.
///
/// Gorski et al. (2005) nested-scheme projection. Result is in `[0, 12 * 4^order)`.
pub fn ang2pix_nest(order: u32, ra_deg: f64, dec_deg: f64) -> u64 {
    let phi = ra_deg * DEG_TO_RAD;
    let z = libm::sin(dec_deg * DEG_TO_RAD);
    let nside = 1u64 << order;
    let (face, ix, iy) = face_and_position(phi, z, nside);
    face as u64 * nside * nside + xy2pix_nest(ix, iy, order)
}

/// Fine sector of a sky position at [`FINE_SECTOR_ORDER`].
pub fn fine_sector(ra_deg: f64, dec_deg: f64) -> u32 {
    ang2pix_nest(FINE_SECTOR_ORDER, ra_deg, dec_deg) as u32
}

fn face_and_position(phi: f64, z: f64, nside: u64) -> (u32, u64, u64) {
    let tt = phi_to_tt(phi);
    let z_abs = libm::fabs(z);
    if z_abs <= 2.0 / 3.0 {
        equatorial_face(tt, z, nside)
    } else {
        polar_face(tt, z, z_abs, nside)
    }
}

/// Maps phi onto `[0, 4)`, one unit per quadrant.
fn phi_to_tt(phi: f64) -> f64 {
    let two_pi = 2.0 * PI;
    let wrapped = phi % two_pi;
    let phi_norm = if wrapped < 0.0 { wrapped + two_pi } else { wrapped };
    let tt = phi_norm * 2.0 / PI;
    if tt >= 4.0 {
        0.0
    } else {
        tt
    }
}

fn equatorial_face(tt: f64, z: f64, nside: u64) -> (u32, u64, u64) {
    let nside_i = nside as i64;
    let temp1 = nside as f64 * (0.5 + tt);
    let temp2 = nside as f64 * z * 0.75;
    let jp = (temp1 - temp2) as i64;
    let jm = (temp1 + temp2) as i64;
    let ifp = jp / nside_i;
    let ifm = jm / nside_i;
    let face = match (ifp, ifm) {
        (4, _) => ((ifm + 4) % 4) as u32,
        (_, 4) => ((ifp + 4) % 4 + 4) as u32,
        _ if ifp == ifm => (ifp + 4) as u32,
        _ if ifp < ifm => ifp as u32,
        _ => (ifm + 8) as u32,
    };
    let ix = (jm - (face as i64 % 4) * nside_i).clamp(0, nside_i - 1);
    let iy = (nside_i - 1 - (jp - (face as i64 / 4) * nside_i)).clamp(0, nside_i - 1);
    (face, ix as u64, iy as u64)
}

fn polar_face(tt: f64, z: f64, z_abs: f64, nside: u64) -> (u32, u64, u64) {
    let nside_i = nside as i64;
    let tp = tt - libm::floor(tt);
    let tmp = nside as f64 * libm::sqrt(3.0 * (1.0 - z_abs));
    let jp = ((tp * tmp) as i64).min(nside_i - 1);
    let jm = (((1.0 - tp) * tmp) as i64).min(nside_i - 1);
    let ntt = libm::floor(tt) as u32;
    let face = (ntt % 4) + if z > 0.0 { 0 } else { 8 };
    let (ix, iy) = if z > 0.0 {
        (nside_i - jm - 1, nside_i - jp - 1)
    } else {
        (jp, jm)
    };
    (face, ix as u64, iy as u64)
}

/// Interleaves `(ix, iy)` bits into a Z-order index within a base face.
fn xy2pix_nest(ix: u64, iy: u64, order: u32) -> u64 {
    let mut result: u64 = 0;
    for i in 0..order {
        let bit_x = (ix >> i) & 1;
        let bit_y = (iy >> i) & 1;
        result |= (bit_x << (2 * i)) | (bit_y << (2 * i + 1));
    }
    result
}
