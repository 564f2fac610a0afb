//! On-disk partitioned store.
//!
//! - [`naming`]: filename ↔ [`PartitionKey`] contract
//! - [`partition`]: columnar file format, memory-mapped reader and writer
//! - [`handle`]: [`StoreHandle`] partition discovery, [`StoreWriter`]

pub mod handle;
pub mod naming;
pub mod partition;

pub use handle::{PartitionRef, StoreHandle, StoreWriter, WriteSummary};
pub use naming::{PartitionKey, PartitionLayout};
pub use partition::{Partition, PartitionHeader};
