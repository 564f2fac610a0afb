//! Range query execution.
//!
//! [`QueryEngine::execute`] runs a [`QuerySpec`] against a [`StoreHandle`]:
//!
//! 1. prune partitions from their keys ([`PartitionIndex`])
//! 2. scan the survivors in parallel on the engine's rayon pool
//! 3. filter each row exactly, in catalog-epoch coordinates
//! 4. reduce to `max_results` with the requested [`SamplingPolicy`]
//! 5. project the kept rows to the target epoch
//!
//! Filtering happens before projection, so a star is selected by where it
//! was at the catalog epoch, not where it is at the target epoch.
//! Magnitude and source id do not depend on the epoch, so shaping before
//! projecting returns the same rows as projecting first.

use crate::config::CatalogConfig;
use crate::error::{CatalogError, Result};
use crate::query::index::PartitionIndex;
use crate::query::policy::ResultSizePolicy;
use crate::query::projector;
use crate::query::spec::{QuerySpec, SamplingPolicy};
use crate::record::StarRecord;
use crate::store::{PartitionLayout, PartitionRef, StoreHandle};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::ser::{SerializeStruct, Serializer};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// One result row at the query's target epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProjectedStar {
    pub source_id: u64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub magnitude: f64,
    /// Catalog-epoch distance.
    pub distance_ly: f64,
}

/// Partition and row accounting for one query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub partitions_scanned: usize,
    /// Dropped by key pruning without being opened.
    pub partitions_pruned: usize,
    /// Candidates that failed to open, plus files skipped when the store was listed.
    pub partitions_skipped: usize,
    /// Rows that failed validation or projected to a non-finite position.
    pub rows_rejected: usize,
}

/// Serializes as `{count, stars, epoch, report}`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet {
    pub stars: Vec<ProjectedStar>,
    /// Echo of the requested epoch.
    pub epoch: f64,
    pub report: ScanReport,
}

impl ResultSet {
    pub fn empty(epoch: f64) -> Self {
        Self {
            stars: Vec::new(),
            epoch,
            report: ScanReport::default(),
        }
    }

    pub fn count(&self) -> usize {
        self.stars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stars.is_empty()
    }
}

impl Serialize for ResultSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut out = serializer.serialize_struct("ResultSet", 4)?;
        out.serialize_field("count", &self.count())?;
        out.serialize_field("stars", &self.stars)?;
        out.serialize_field("epoch", &self.epoch)?;
        out.serialize_field("report", &self.report)?;
        out.end()
    }
}

/// Matches from one partition before the global merge.
#[derive(Default)]
struct PartitionScan {
    matches: Vec<StarRecord>,
    rejected: usize,
    failed: bool,
}

/// Brightness order: ascending magnitude, then source id.
#[derive(Clone, Copy)]
struct ByBrightness(StarRecord);

impl PartialEq for ByBrightness {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ByBrightness {}

impl PartialOrd for ByBrightness {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ByBrightness {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .magnitude
            .total_cmp(&other.0.magnitude)
            .then_with(|| self.0.source_id.cmp(&other.0.source_id))
    }
}

/// Keeps the `limit` smallest items seen; the heap top is the largest kept.
pub(crate) fn push_bounded<T: Ord>(heap: &mut BinaryHeap<T>, item: T, limit: usize) {
    if limit == 0 {
        return;
    }
    if heap.len() < limit {
        heap.push(item);
    } else if heap.peek().is_some_and(|top| item < *top) {
        heap.pop();
        heap.push(item);
    }
}

pub(crate) fn resolve_threads(threads: usize) -> usize {
    if threads == 0 {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    } else {
        threads
    }
}

/// Executes range queries with a fixed configuration and worker pool.
#[derive(Clone)]
pub struct QueryEngine {
    config: CatalogConfig,
    index: PartitionIndex,
    policy: Arc<dyn ResultSizePolicy>,
    pool: Arc<ThreadPool>,
}

impl QueryEngine {
    /// Validates `config` and builds the worker pool.
    pub fn new(config: CatalogConfig) -> Result<Self> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(resolve_threads(config.parallel.threads))
            .thread_name(|i| format!("stellar-scan-{}", i))
            .build()
            .map_err(|e| CatalogError::Config(format!("failed to build thread pool: {}", e)))?;
        Ok(Self {
            index: PartitionIndex::new(config.store.bin_width_ly, config.store.sector_refinement),
            policy: Arc::new(config.result_size.clone()),
            pool: Arc::new(pool),
            config,
        })
    }

    /// Replaces the default result-size policy.
    pub fn with_policy(mut self, policy: impl ResultSizePolicy + 'static) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    pub fn index(&self) -> &PartitionIndex {
        &self.index
    }

    pub(crate) fn pool(&self) -> &ThreadPool {
        &self.pool
    }

    /// Cap applied to `spec`: its own `max_results`, or the policy default.
    pub fn effective_limit(&self, spec: &QuerySpec) -> usize {
        spec.max_results.unwrap_or_else(|| {
            let band = spec.region.distance_band();
            self.policy
                .default_max_results(band.max, spec.region.sector().is_some())
        })
    }

    /// Opens the store at `root` and runs `spec`. A missing root yields an
    /// empty result and a warning instead of an error.
    pub fn execute_at(
        &self,
        root: impl AsRef<Path>,
        layout: Option<PartitionLayout>,
        spec: &QuerySpec,
    ) -> ResultSet {
        match StoreHandle::open(root, layout) {
            Ok(store) => self.execute(&store, spec),
            Err(e) => {
                warn!("{}; returning empty result", e);
                ResultSet::empty(spec.target_epoch)
            }
        }
    }

    pub fn execute(&self, store: &StoreHandle, spec: &QuerySpec) -> ResultSet {
        let limit = self.effective_limit(spec);
        let candidates = self.index.candidates(store, spec);
        let mut report = ScanReport {
            partitions_pruned: store.partitions().len() - candidates.len(),
            partitions_skipped: store.skipped(),
            ..ScanReport::default()
        };

        let scans: Vec<PartitionScan> = self.pool.install(|| {
            candidates
                .par_iter()
                .map(|p| self.scan_partition(p, spec, limit))
                .collect()
        });

        let mut matches = Vec::new();
        for scan in scans {
            if scan.failed {
                report.partitions_skipped += 1;
            } else {
                report.partitions_scanned += 1;
            }
            report.rows_rejected += scan.rejected;
            matches.extend(scan.matches);
        }

        let kept = shape(matches, limit, spec.sampling);
        let mut stars = Vec::with_capacity(kept.len());
        for record in &kept {
            let p = projector::position_at(record, spec.target_epoch);
            if !p.is_finite() {
                debug!(
                    "{}",
                    CatalogError::NumericAnomaly {
                        source_id: record.source_id,
                        field: "projected position"
                    }
                );
                report.rows_rejected += 1;
                continue;
            }
            stars.push(ProjectedStar {
                source_id: record.source_id,
                x: p.x,
                y: p.y,
                z: p.z,
                magnitude: record.magnitude,
                distance_ly: record.distance_ly,
            });
        }

        debug!(
            matches = stars.len(),
            limit,
            scanned = report.partitions_scanned,
            pruned = report.partitions_pruned,
            skipped = report.partitions_skipped,
            rejected = report.rows_rejected,
            "range query complete"
        );
        ResultSet {
            stars,
            epoch: spec.target_epoch,
            report,
        }
    }

    fn scan_partition(&self, part: &PartitionRef, spec: &QuerySpec, limit: usize) -> PartitionScan {
        let Some(partition) = part.open_for_scan() else {
            return PartitionScan {
                failed: true,
                ..PartitionScan::default()
            };
        };
        let refinement = self.index.sector_refinement;
        let mut rejected = 0usize;
        let rows = partition
            .valid_records(&mut rejected)
            .filter(|r| spec.region.contains(r, refinement));

        let matches: Vec<StarRecord> = match spec.sampling {
            SamplingPolicy::Brightest => {
                let mut heap = BinaryHeap::with_capacity(limit.min(partition.len()) + 1);
                for record in rows {
                    push_bounded(&mut heap, ByBrightness(record), limit);
                }
                heap.into_iter().map(|b| b.0).collect()
            }
            SamplingPolicy::Uniform { .. } => rows.collect(),
        };
        PartitionScan {
            matches,
            rejected,
            failed: false,
        }
    }
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("index", &self.index)
            .field("threads", &self.pool.current_num_threads())
            .finish()
    }
}

/// Reduces merged matches to at most `limit` rows.
fn shape(mut matches: Vec<StarRecord>, limit: usize, sampling: SamplingPolicy) -> Vec<StarRecord> {
    match sampling {
        SamplingPolicy::Brightest => {
            matches.sort_unstable_by(|a, b| ByBrightness(*a).cmp(&ByBrightness(*b)));
            matches.truncate(limit);
            matches
        }
        SamplingPolicy::Uniform { seed } => {
            matches.sort_unstable_by_key(|r| r.source_id);
            if matches.len() <= limit {
                return matches;
            }
            let mut rng = StdRng::seed_from_u64(seed);
            let mut picked = rand::seq::index::sample(&mut rng, matches.len(), limit).into_vec();
            picked.sort_unstable();
            picked.into_iter().map(|i| matches[i]).collect()
        }
    }
}
