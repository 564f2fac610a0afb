//! Range queries over the partitioned store.
//!
//! - [`healpix`]: sky sectors and the coarse/fine mapping
//! - [`projector`]: linear proper-motion projection
//! - [`spec`]: regions, [`QuerySpec`] and its builder
//! - [`index`]: key-only partition pruning
//! - [`policy`]: default result-size policy
//! - [`engine`]: parallel scan, exact filter, sampling
//! - [`cache`]: read-through result cache

pub mod cache;
pub mod engine;
pub mod healpix;
pub mod index;
pub mod policy;
pub mod projector;
pub mod spec;

pub use cache::{Clock, QueryCache, SystemClock};
pub use engine::{ProjectedStar, QueryEngine, ResultSet, ScanReport};
pub use healpix::CoarseSector;
pub use index::PartitionIndex;
pub use policy::{LinearScalePolicy, ResultSizePolicy};
pub use spec::{Aabb, DistanceBand, QueryBuilder, QuerySpec, Region, SamplingPolicy, SpecKey};
