//! Shared math for the stellar catalog engine.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`constants`] | Catalog epoch, unit conversions, light-travel factors |
//! | [`vector3`] | [`Vector3`] Cartesian vectors in light-year space |
//!
//! Everything here is pure and allocation-free, so it can be called from
//! parallel partition scans without coordination.

pub mod constants;
pub mod vector3;

pub use vector3::Vector3;
