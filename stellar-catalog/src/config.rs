//! Engine configuration.
//!
//! Every tunable constant of the engine lives here with its documented
//! default, so nothing downstream inlines a magic number. Configuration is
//! read from TOML; missing sections and fields fall back to the defaults.
//!
//! ```toml
//! [store]
//! root = "/data/gaia_ly"
//! bin_width_ly = 50.0
//! sector_refinement = 16
//!
//! [result_size]
//! base = 18000
//! ceiling = 100000
//! full_scale_distance_ly = 17000.0
//! sector_divisor = 4
//! sector_floor = 5000
//!
//! [causality]
//! step_years = 0.5
//! horizon_years = 1000.0
//! tolerance_deg = 0.6
//! max_results = 10
//! early_stop = true
//!
//! [cache]
//! capacity = 64
//! ttl_secs = 300
//!
//! [parallel]
//! threads = 0
//! ```

use crate::error::{CatalogError, Result};
use crate::query::policy::LinearScalePolicy;
use crate::store::PartitionLayout;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default distance-bin width in light-years.
pub const DEFAULT_BIN_WIDTH_LY: f64 = 50.0;
/// Fine sectors per coarse sector (HEALPix order 0 → order 2).
pub const DEFAULT_SECTOR_REFINEMENT: u32 = 16;
pub const DEFAULT_STEP_YEARS: f64 = 0.5;
pub const DEFAULT_HORIZON_YEARS: f64 = 1000.0;
pub const DEFAULT_TOLERANCE_DEG: f64 = 0.6;
pub const DEFAULT_LIGHT_CONE_RESULTS: usize = 10;
pub const DEFAULT_SAMPLING_SEED: u64 = 0x5EED;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub store: StoreConfig,
    pub query: QueryConfig,
    pub result_size: LinearScalePolicy,
    pub causality: LightConeConfig,
    pub cache: CacheConfig,
    pub parallel: ParallelConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the partition files.
    pub root: Option<PathBuf>,
    /// Width of each distance bin. Must match the width used when the store was written.
    pub bin_width_ly: f64,
    /// Number of fine sectors inside one coarse sector.
    pub sector_refinement: u32,
    /// Expected partition layout. `None` infers it from the first partition found.
    pub layout: Option<PartitionLayout>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: None,
            bin_width_ly: DEFAULT_BIN_WIDTH_LY,
            sector_refinement: DEFAULT_SECTOR_REFINEMENT,
            layout: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Seed used for uniform sampling when the caller does not pick one.
    pub default_seed: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_seed: DEFAULT_SAMPLING_SEED,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LightConeConfig {
    /// Spacing of the forward time offsets probed for each star.
    pub step_years: f64,
    /// Offsets are probed while strictly below this horizon.
    pub horizon_years: f64,
    /// Angular tolerance between line of sight and event direction.
    pub tolerance_deg: f64,
    pub max_results: usize,
    /// Stop scanning once `max_results` stars are accepted (first-K, not best-K).
    pub early_stop: bool,
    /// Skip distance bins that provably cannot contain a match.
    pub prune_by_distance: bool,
}

impl Default for LightConeConfig {
    fn default() -> Self {
        Self {
            step_years: DEFAULT_STEP_YEARS,
            horizon_years: DEFAULT_HORIZON_YEARS,
            tolerance_deg: DEFAULT_TOLERANCE_DEG,
            max_results: DEFAULT_LIGHT_CONE_RESULTS,
            early_stop: true,
            prune_by_distance: true,
        }
    }
}

impl LightConeConfig {
    /// Cosine of the alignment tolerance; alignments at or above it are accepted.
    pub fn cos_tolerance(&self) -> f64 {
        libm::cos(self.tolerance_deg * stellar_core::constants::DEG_TO_RAD)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.step_years.is_finite() && self.step_years > 0.0) {
            return Err(CatalogError::Config(format!(
                "causality.step_years must be positive, got {}",
                self.step_years
            )));
        }
        if !(self.horizon_years.is_finite() && self.horizon_years >= 0.0) {
            return Err(CatalogError::Config(format!(
                "causality.horizon_years must be non-negative, got {}",
                self.horizon_years
            )));
        }
        if !(self.tolerance_deg > 0.0 && self.tolerance_deg < 180.0) {
            return Err(CatalogError::Config(format!(
                "causality.tolerance_deg must be in (0, 180), got {}",
                self.tolerance_deg
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub capacity: usize,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            ttl_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ParallelConfig {
    /// Worker threads for partition scans (0 = all cores).
    pub threads: usize,
}

impl CatalogConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| CatalogError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| CatalogError::Config(format!("cannot read {:?}: {}", path, e)))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.store.bin_width_ly.is_finite() && self.store.bin_width_ly > 0.0) {
            return Err(CatalogError::Config(format!(
                "store.bin_width_ly must be positive, got {}",
                self.store.bin_width_ly
            )));
        }
        if self.store.sector_refinement == 0 {
            return Err(CatalogError::Config(
                "store.sector_refinement must be at least 1".into(),
            ));
        }
        self.causality.validate()?;
        self.result_size.validate()
    }
}
