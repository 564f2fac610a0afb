//! Light-cone causality search.
//!
//! Finds stars that could register, within a time window starting now, the
//! light of an event that happened on Earth at `event_time`. Each star is
//! moved forward along its linear track in fixed steps; at each step the
//! light delay to its displaced position gives an arrival time, and the
//! star qualifies when that arrival falls in `[now, now + window]` and its
//! line of sight lines up with the event direction:
//!
//! ```text
//! pos(τ)        = pos0 + v τ                     τ = 0, Δ, 2Δ, … < τ_max
//! arrival(τ)    = event_time + ‖pos(τ)‖ · 365.25 days
//! line_of_sight = -pos(τ) / ‖pos(τ)‖
//! accept        ⇔ now ≤ arrival ≤ now + window  ∧  line_of_sight · event_dir ≥ cos(tolerance)
//! ```
//!
//! The first accepted offset ends a star's search. Partitions are visited in
//! ascending key order; with early stop on (the default) the search returns
//! once `K` stars have been accepted, which makes the answer the first `K`
//! found rather than the best `K`. Turning early stop off scans every
//! candidate and returns the true top `K` by wait.

use crate::config::LightConeConfig;
use crate::error::CatalogError;
use crate::query::engine::{push_bounded, QueryEngine, ScanReport};
use crate::query::projector;
use crate::record::StarRecord;
use crate::store::StoreHandle;
use chrono::{DateTime, TimeDelta, Utc};
use rayon::prelude::*;
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use stellar_core::constants::{
    DAYS_PER_JULIAN_YEAR, DEG_TO_RAD, SECONDS_PER_DAY, SECONDS_PER_JULIAN_YEAR,
    SPEED_OF_LIGHT_LY_PER_YEAR,
};
use stellar_core::Vector3;
use tracing::{debug, trace, warn};

/// Slack added to the reachable-distance bounds used for bin pruning, in
/// light-years. Absorbs rounding in the delay arithmetic.
const PRUNE_MARGIN_LY: f64 = 1.0;

const MICROS_PER_SECOND: f64 = 1e6;
const MAX_DELAY_MICROS: f64 = i64::MAX as f64;

/// Unit vector pointing from Earth's centre toward the event location.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventDirection(Vector3);

impl EventDirection {
    /// Direction of a geographic location, latitude and longitude in degrees:
    /// `(cos φ cos λ, cos φ sin λ, sin φ)`.
    pub fn from_geographic(lat_deg: f64, lon_deg: f64) -> Self {
        let (sin_lat, cos_lat) = libm::sincos(lat_deg * DEG_TO_RAD);
        let (sin_lon, cos_lon) = libm::sincos(lon_deg * DEG_TO_RAD);
        Self(Vector3::new(cos_lat * cos_lon, cos_lat * sin_lon, sin_lat))
    }

    /// Normalizes `v`. Returns `None` for a zero or non-finite vector.
    pub fn from_vector(v: Vector3) -> Option<Self> {
        let n = v.magnitude();
        (n.is_finite() && n > 0.0).then(|| Self(v / n))
    }

    pub fn vector(&self) -> Vector3 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightConeRequest {
    pub direction: EventDirection,
    pub event_time: DateTime<Utc>,
    /// Reference present; arrivals before it are missed.
    pub now: DateTime<Utc>,
    /// Length of the acceptance window after `now`.
    pub window: TimeDelta,
}

impl LightConeRequest {
    /// Light-years travelled by the event's light up to `now`.
    pub fn elapsed_years(&self) -> f64 {
        seconds(self.now - self.event_time) / SECONDS_PER_JULIAN_YEAR
    }

    pub fn window_years(&self) -> f64 {
        seconds(self.window) / SECONDS_PER_JULIAN_YEAR
    }
}

fn seconds(delta: TimeDelta) -> f64 {
    delta.num_seconds() as f64 + f64::from(delta.subsec_nanos()) * 1e-9
}

fn serialize_wait<S: Serializer>(wait: &TimeDelta, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(seconds(*wait))
}

/// A star that can see the event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sighting {
    pub source_id: u64,
    /// Distance from Earth at the accepted offset.
    pub distance_ly: f64,
    /// Forward offset `τ` at which the star was accepted, in years.
    pub offset_years: f64,
    pub arrival: DateTime<Utc>,
    /// `arrival - now`, serialized as seconds.
    #[serde(rename = "wait_seconds", serialize_with = "serialize_wait")]
    pub wait: TimeDelta,
    /// Cosine between line of sight and event direction.
    pub alignment: f64,
}

impl Sighting {
    pub fn wait_breakdown(&self) -> WaitBreakdown {
        WaitBreakdown::from_delta(self.wait)
    }
}

/// Ranking order: ascending wait, then source id.
#[derive(Clone, Copy)]
struct ByWait(Sighting);

impl PartialEq for ByWait {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ByWait {}

impl PartialOrd for ByWait {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ByWait {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .wait
            .cmp(&other.0.wait)
            .then_with(|| self.0.source_id.cmp(&other.0.source_id))
    }
}

fn merge_shortest(
    mut a: BinaryHeap<ByWait>,
    b: BinaryHeap<ByWait>,
    limit: usize,
) -> BinaryHeap<ByWait> {
    for s in b {
        push_bounded(&mut a, s, limit);
    }
    a
}

/// Wait split into 365-day years, days, hours and whole minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WaitBreakdown {
    pub years: i64,
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
}

impl WaitBreakdown {
    const MINUTES_PER_DAY: i64 = 24 * 60;
    const MINUTES_PER_YEAR: i64 = 365 * Self::MINUTES_PER_DAY;

    pub fn from_delta(wait: TimeDelta) -> Self {
        let total = wait.num_minutes().max(0);
        let years = total / Self::MINUTES_PER_YEAR;
        let rest = total % Self::MINUTES_PER_YEAR;
        let days = rest / Self::MINUTES_PER_DAY;
        let rest = rest % Self::MINUTES_PER_DAY;
        Self {
            years,
            days,
            hours: rest / 60,
            minutes: rest % 60,
        }
    }
}

impl fmt::Display for WaitBreakdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}y {}d {}h {}m", self.years, self.days, self.hours, self.minutes)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LightConeResult {
    /// Ascending wait, ties by source id.
    pub sightings: Vec<Sighting>,
    pub report: ScanReport,
    /// True when the scan ended at the result cap before visiting every candidate.
    pub stopped_early: bool,
}

/// Alignment test at the tolerance boundary. Equality is accepted.
#[inline]
pub fn is_aligned(alignment: f64, cos_tolerance: f64) -> bool {
    alignment >= cos_tolerance
}

/// Light-travel time across `distance_ly`. `None` when it is not representable.
fn light_delay(distance_ly: f64) -> Option<TimeDelta> {
    let micros = distance_ly * DAYS_PER_JULIAN_YEAR * SECONDS_PER_DAY * MICROS_PER_SECOND;
    if !(micros.is_finite() && micros >= 0.0 && micros < MAX_DELAY_MICROS) {
        return None;
    }
    Some(TimeDelta::microseconds(micros.round() as i64))
}

/// Earliest offset at which `record` can see the event, if any.
///
/// Returns `None` for a star with a non-finite position or velocity, and
/// for a step or horizon that cannot bound the probing.
pub fn star_sighting(
    record: &StarRecord,
    request: &LightConeRequest,
    config: &LightConeConfig,
) -> Option<Sighting> {
    let bounded = config.step_years.is_finite()
        && config.step_years > 0.0
        && config.horizon_years.is_finite();
    if !bounded {
        return None;
    }
    let origin = record.position();
    if !(origin.is_finite() && record.velocity.is_finite()) {
        return None;
    }
    let cos_tolerance = config.cos_tolerance();
    let event = request.direction.vector();

    let mut step = 0u64;
    loop {
        let tau = step as f64 * config.step_years;
        if !(tau < config.horizon_years) {
            return None;
        }
        step += 1;

        let pos = projector::displaced(origin, record.velocity, tau);
        let distance = pos.magnitude();
        if !(distance.is_finite() && distance > 0.0) {
            continue;
        }
        let Some(arrival) =
            light_delay(distance).and_then(|delay| request.event_time.checked_add_signed(delay))
        else {
            trace!(
                source_id = record.source_id,
                tau,
                "{}",
                CatalogError::OverflowGuard {
                    context: "light arrival time"
                }
            );
            continue;
        };

        let wait = arrival - request.now;
        if wait < TimeDelta::zero() || wait > request.window {
            continue;
        }

        let line_of_sight = -pos / distance;
        let alignment = line_of_sight.dot(&event);
        if is_aligned(alignment, cos_tolerance) {
            return Some(Sighting {
                source_id: record.source_id,
                distance_ly: distance,
                offset_years: tau,
                arrival,
                wait,
                alignment,
            });
        }
    }
}

/// Whether a distance bin can hold a star that sees the event.
///
/// Over the probed offsets a physical star moves at most `c · τ_max`, so
/// its distance stays in `[start - c·τ_max, start + width + c·τ_max]`. The
/// light must not have passed it yet (`distance ≥ elapsed`) and must reach
/// it within the window (`distance ≤ elapsed + window`).
pub fn bin_may_match(
    start: u32,
    width: f64,
    horizon_years: f64,
    elapsed_years: f64,
    window_years: f64,
) -> bool {
    let reach = SPEED_OF_LIGHT_LY_PER_YEAR * horizon_years + PRUNE_MARGIN_LY;
    let nearest = f64::from(start) - reach;
    let farthest = f64::from(start) + width + reach;
    farthest >= elapsed_years && nearest <= elapsed_years + window_years
}

fn is_superluminal(record: &StarRecord) -> bool {
    record.velocity.magnitude() > SPEED_OF_LIGHT_LY_PER_YEAR
}

impl QueryEngine {
    /// Runs the light-cone search over `store` with the engine's causality settings.
    pub fn light_cone(&self, store: &StoreHandle, request: &LightConeRequest) -> LightConeResult {
        self.light_cone_with(store, request, &self.config().causality)
    }

    /// Runs the light-cone search with explicit causality settings.
    ///
    /// Invalid settings are logged and yield an empty result.
    pub fn light_cone_with(
        &self,
        store: &StoreHandle,
        request: &LightConeRequest,
        config: &LightConeConfig,
    ) -> LightConeResult {
        let mut report = ScanReport {
            partitions_skipped: store.skipped(),
            ..ScanReport::default()
        };
        if let Err(e) = config.validate() {
            warn!("{}; returning empty light-cone result", e);
            return LightConeResult {
                sightings: Vec::new(),
                report,
                stopped_early: false,
            };
        }

        let width = self.index().pruning_width(store);
        let elapsed = request.elapsed_years();
        let window = request.window_years();
        let limit = config.max_results;

        // First found in scan order when stopping early, otherwise the
        // `limit` shortest waits.
        let mut first_found: Vec<Sighting> = Vec::new();
        let mut shortest: BinaryHeap<ByWait> = BinaryHeap::new();
        let mut stopped_early = false;

        debug!(elapsed_ly = elapsed, window_years = window, "starting light-cone search");

        let partitions = store.partitions();
        for (i, part) in partitions.iter().enumerate() {
            if config.early_stop && first_found.len() >= limit {
                stopped_early = true;
                break;
            }
            if config.prune_by_distance {
                if let Some(start) = part.key.distance_bin {
                    if !bin_may_match(start, width, config.horizon_years, elapsed, window) {
                        debug!(partition = %part.key, "pruned by reachable distance");
                        report.partitions_pruned += 1;
                        continue;
                    }
                }
            }

            let Some(partition) = part.open_for_scan() else {
                report.partitions_skipped += 1;
                continue;
            };
            report.partitions_scanned += 1;

            let mut rejected = 0usize;
            let rows: Vec<StarRecord> = partition.valid_records(&mut rejected).collect();
            let (physical, superluminal): (Vec<StarRecord>, Vec<StarRecord>) =
                rows.into_iter().partition(|r| !is_superluminal(r));
            if !superluminal.is_empty() {
                debug!(
                    partition = %part.key,
                    count = superluminal.len(),
                    "skipping records faster than light"
                );
            }
            report.rows_rejected += rejected + superluminal.len();

            if config.early_stop {
                let found: Vec<Sighting> = self.pool().install(|| {
                    physical
                        .par_iter()
                        .filter_map(|r| star_sighting(r, request, config))
                        .collect()
                });
                first_found.extend(found);
                if first_found.len() >= limit {
                    first_found.truncate(limit);
                    stopped_early = i + 1 < partitions.len();
                    break;
                }
            } else {
                let found = self.pool().install(|| {
                    physical
                        .par_iter()
                        .filter_map(|r| star_sighting(r, request, config))
                        .fold(BinaryHeap::new, |mut heap, s| {
                            push_bounded(&mut heap, ByWait(s), limit);
                            heap
                        })
                        .reduce(BinaryHeap::new, |a, b| merge_shortest(a, b, limit))
                });
                shortest = merge_shortest(shortest, found, limit);
            }
        }

        let mut sightings = if config.early_stop {
            first_found
        } else {
            shortest.into_iter().map(|w| w.0).collect()
        };
        sightings.sort_by(|a, b| ByWait(*a).cmp(&ByWait(*b)));
        sightings.truncate(limit);

        debug!(
            found = sightings.len(),
            scanned = report.partitions_scanned,
            pruned = report.partitions_pruned,
            stopped_early,
            "light-cone search complete"
        );
        LightConeResult {
            sightings,
            report,
            stopped_early,
        }
    }
}
