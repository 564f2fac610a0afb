//! Partitioned stellar catalog with epoch-projected range queries.
//!
//! The catalog lives on disk as a directory of immutable columnar partition
//! files, keyed by distance bin, by HEALPix sky sector, or by both. Keys are
//! encoded in the filenames, so queries prune partitions without opening
//! them. Surviving partitions are memory-mapped and scanned in parallel;
//! matching stars are projected along their proper motion to the requested
//! epoch.
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`record`] | [`StarRecord`] schema, derivation from raw astrometry, validation |
//! | [`store`] | Partition filenames, file format, [`StoreHandle`] and [`StoreWriter`](store::StoreWriter) |
//! | [`query`] | [`QuerySpec`](query::QuerySpec) builder, partition pruning, [`QueryEngine`](query::QueryEngine), result cache |
//! | [`lightcone`] | Light-cone causality search ([`QueryEngine::light_cone`](query::QueryEngine::light_cone)) |
//! | [`config`] | [`CatalogConfig`] loaded from TOML |
//! | [`error`] | [`CatalogError`] and its containment policy |
//!
//! # Quick Start
//!
//! ```ignore
//! use stellar_catalog::query::{QueryEngine, QuerySpec};
//! use stellar_catalog::{CatalogConfig, StoreHandle};
//! use stellar_core::Vector3;
//!
//! let engine = QueryEngine::new(CatalogConfig::default())?;
//! let store = StoreHandle::open("/data/gaia_ly", None)?;
//!
//! let nearby = QuerySpec::sphere(Vector3::zeros(), 20.0)
//!     .epoch(2100.0)
//!     .limit(100)
//!     .collect(&engine, &store);
//! ```
//!
//! # Features
//!
//! - **`cli`**: Enables the `stellar-query` binary.

pub mod config;
pub mod error;
pub mod lightcone;
pub mod query;
pub mod record;
pub mod store;

pub use config::CatalogConfig;
pub use error::{CatalogError, Result};
pub use record::{RawAstrometry, StarRecord};
pub use store::StoreHandle;
