//! Physical and astrometric constants.

#[allow(clippy::excessive_precision)]
#[allow(clippy::approx_constant)]
pub const PI: f64 = 3.141592653589793238462643;

#[allow(clippy::excessive_precision)]
pub const DEG_TO_RAD: f64 = 1.745329251994329576923691e-2;

#[allow(clippy::excessive_precision)]
pub const RAD_TO_DEG: f64 = 57.29577951308232087679815;

/// Milliarcseconds per degree.
pub const MAS_PER_DEGREE: f64 = 3_600_000.0;

/// Radians per milliarcsecond, written as `π / 180 / 3.6e6`.
///
/// Multiplying a proper motion in mas/yr by this factor and by a distance in
/// light-years gives a linear velocity in light-years per year.
pub const MAS_TO_RAD: f64 = PI / 180.0 / MAS_PER_DEGREE;

/// Reference epoch of the stored positions (Gaia DR3), as a Julian year.
pub const CATALOG_EPOCH: f64 = 2016.0;

/// Days in a Julian year. Also the light-travel time, in days, across one light-year.
pub const DAYS_PER_JULIAN_YEAR: f64 = 365.25;

pub const SECONDS_PER_DAY: f64 = 86_400.0;

pub const SECONDS_PER_JULIAN_YEAR: f64 = DAYS_PER_JULIAN_YEAR * SECONDS_PER_DAY;

/// Light-years per parsec.
pub const LY_PER_PARSEC: f64 = 3.26156;

/// Speed of light in light-years per year. Upper bound for any physical transverse velocity.
pub const SPEED_OF_LIGHT_LY_PER_YEAR: f64 = 1.0;
