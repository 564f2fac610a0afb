//! Store-level access: discovering partitions under a root directory and
//! writing new stores.
//!
//! [`StoreHandle`] is an explicit value passed to every query; there is no
//! global store state. Opening a handle lists the partition files and parses
//! their keys from the filenames. Partitions are only mapped when a query
//! actually scans them.

use crate::error::{CatalogError, Result};
use crate::record::StarRecord;
use crate::store::naming::{PartitionKey, PartitionLayout, PARTITION_EXTENSION};
use crate::store::partition::{self, Partition};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// A partition known by key and path, not yet opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionRef {
    pub key: PartitionKey,
    pub path: PathBuf,
}

impl PartitionRef {
    pub fn open(&self) -> Result<Partition> {
        Partition::open(&self.path, self.key)
    }

    /// Opens the partition for a scan. Failures are logged and yield `None`
    /// so the scan moves on; contained failures log at warn, others at error.
    pub fn open_for_scan(&self) -> Option<Partition> {
        match self.open() {
            Ok(p) => Some(p),
            Err(e) if e.is_contained() => {
                warn!("{}", e);
                None
            }
            Err(e) => {
                error!(partition = %self.key, "{}", e);
                None
            }
        }
    }
}

/// Read-only view of a partitioned store.
#[derive(Debug, Clone)]
pub struct StoreHandle {
    root: PathBuf,
    layout: Option<PartitionLayout>,
    partitions: Vec<PartitionRef>,
    skipped: usize,
    bin_width_ly: Option<f64>,
}

impl StoreHandle {
    /// Lists the partitions under `root`.
    ///
    /// `layout` pins the expected layout; `None` adopts the layout of the
    /// first partition in key order. Files with a malformed name or a
    /// different layout are skipped with a warning.
    ///
    /// # Errors
    /// [`CatalogError::StoreUnavailable`] when `root` is missing or not a
    /// readable directory.
    pub fn open(root: impl AsRef<Path>, layout: Option<PartitionLayout>) -> Result<Self> {
        let root = root.as_ref();
        let unavailable = || CatalogError::StoreUnavailable {
            path: root.to_path_buf(),
        };
        if !root.is_dir() {
            return Err(unavailable());
        }
        let entries = fs::read_dir(root).map_err(|_| unavailable())?;

        let mut found = Vec::new();
        let mut skipped = 0usize;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(PARTITION_EXTENSION) {
                debug!("ignoring non-partition file {:?}", path);
                continue;
            }
            match PartitionKey::from_path(&path) {
                Ok(key) => found.push(PartitionRef { key, path }),
                Err(reason) => {
                    warn!("{}", CatalogError::malformed(&path, reason));
                    skipped += 1;
                }
            }
        }
        found.sort_by(|a, b| a.key.cmp(&b.key).then_with(|| a.path.cmp(&b.path)));

        let layout = layout.or_else(|| found.first().and_then(|p| p.key.layout()));
        let partitions: Vec<PartitionRef> = found
            .into_iter()
            .filter(|p| {
                let keep = p.key.layout() == layout;
                if !keep {
                    warn!(
                        "skipping partition {:?}: layout {:?} does not match store layout {:?}",
                        p.path,
                        p.key.layout(),
                        layout
                    );
                    skipped += 1;
                }
                keep
            })
            .collect();

        let bin_width_ly = stored_bin_width(&partitions);

        info!(
            root = ?root,
            partitions = partitions.len(),
            skipped,
            bin_width_ly,
            "opened store"
        );

        Ok(Self {
            root: root.to_path_buf(),
            layout,
            partitions,
            skipped,
            bin_width_ly,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Layout of the store, `None` for an empty store.
    pub fn layout(&self) -> Option<PartitionLayout> {
        self.layout
    }

    /// Partitions in ascending key order.
    pub fn partitions(&self) -> &[PartitionRef] {
        &self.partitions
    }

    /// Files that looked like partitions but were skipped at open.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Widest distance-bin width recorded in the partition headers, `None`
    /// when no distance-keyed partition has a readable header.
    pub fn bin_width_ly(&self) -> Option<f64> {
        self.bin_width_ly
    }
}

/// Reads the headers of distance-keyed partitions. Unreadable headers are
/// left for the scan to report.
fn stored_bin_width(partitions: &[PartitionRef]) -> Option<f64> {
    let mut widest: Option<f64> = None;
    for p in partitions.iter().filter(|p| p.key.distance_bin.is_some()) {
        match partition::read_header(&p.path) {
            Ok(header) if header.bin_width_ly.is_finite() && header.bin_width_ly > 0.0 => {
                if widest.is_some_and(|w| w != header.bin_width_ly) {
                    warn!(
                        "partition {:?} records bin width {} ly, differing from other partitions",
                        p.path, header.bin_width_ly
                    );
                }
                widest = Some(widest.map_or(header.bin_width_ly, |w| w.max(header.bin_width_ly)));
            }
            Ok(header) => debug!(
                "partition {:?} has unusable bin width {}",
                p.path, header.bin_width_ly
            ),
            Err(e) => debug!("{}", e),
        }
    }
    widest
}

/// Outcome of [`StoreWriter::write`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub partitions: usize,
    pub records: usize,
    /// Records refused at the ingestion boundary.
    pub rejected: usize,
}

/// Writes records into a new store, one file per partition key.
#[derive(Debug, Clone)]
pub struct StoreWriter {
    root: PathBuf,
    layout: PartitionLayout,
    bin_width_ly: f64,
}

impl StoreWriter {
    pub fn new(root: impl Into<PathBuf>, layout: PartitionLayout, bin_width_ly: f64) -> Self {
        Self {
            root: root.into(),
            layout,
            bin_width_ly,
        }
    }

    /// Key a record belongs to under this writer's layout.
    pub fn key_for(&self, record: &StarRecord) -> PartitionKey {
        match self.layout {
            PartitionLayout::DistanceBin => PartitionKey::distance_bin(record.distance_bin),
            PartitionLayout::Sector => PartitionKey::sector(record.healpix_sector),
            PartitionLayout::Composite => {
                PartitionKey::composite(record.distance_bin, record.healpix_sector)
            }
        }
    }

    /// Groups `records` by partition key and writes each group.
    ///
    /// Records failing validation, or whose stored bin disagrees with the
    /// writer's bin width, are rejected and counted rather than written.
    pub fn write(&self, records: impl IntoIterator<Item = StarRecord>) -> Result<WriteSummary> {
        fs::create_dir_all(&self.root)?;

        let mut groups: BTreeMap<PartitionKey, Vec<StarRecord>> = BTreeMap::new();
        let mut summary = WriteSummary::default();
        for record in records {
            let expected_bin = crate::record::distance_bin(record.distance_ly, self.bin_width_ly);
            if let Err(e) = record.validate() {
                debug!("rejecting record: {}", e);
                summary.rejected += 1;
                continue;
            }
            if record.distance_bin != expected_bin {
                debug!(
                    "rejecting record {}: bin {} does not match width {}",
                    record.source_id, record.distance_bin, self.bin_width_ly
                );
                summary.rejected += 1;
                continue;
            }
            groups.entry(self.key_for(&record)).or_default().push(record);
        }

        for (key, group) in &groups {
            partition::write_partition(&self.root, *key, group, self.bin_width_ly)?;
            summary.partitions += 1;
            summary.records += group.len();
        }
        info!(
            root = ?self.root,
            partitions = summary.partitions,
            records = summary.records,
            rejected = summary.rejected,
            "wrote store"
        );
        Ok(summary)
    }
}
