//! Property-based tests for pruning, sector mapping, projection and the
//! light-cone search.

mod common;

use chrono::{TimeDelta, TimeZone, Utc};
use proptest::prelude::*;
use stellar_catalog::config::LightConeConfig;
use stellar_catalog::lightcone::{bin_may_match, star_sighting, EventDirection, LightConeRequest};
use stellar_catalog::query::healpix::{fine_sector, CoarseSector};
use stellar_catalog::query::index::bin_overlaps;
use stellar_catalog::query::projector::position_at;
use stellar_catalog::query::DistanceBand;
use stellar_catalog::record::distance_bin;
use stellar_catalog::StarRecord;
use stellar_core::Vector3;

fn record(ra: f64, dec: f64, distance_ly: f64, velocity: Vector3) -> StarRecord {
    let direction = Vector3::from_spherical(ra.to_radians(), dec.to_radians());
    StarRecord {
        source_id: 1,
        direction,
        distance_ly,
        velocity,
        magnitude: 8.0,
        healpix_sector: fine_sector(ra, dec),
        distance_bin: distance_bin(distance_ly, common::BIN_WIDTH),
    }
}

#[test]
fn sector_round_trip_is_exact() {
    for coarse in CoarseSector::all() {
        let range = coarse.fine_range(16);
        for fine in 0..192u32 {
            let maps_back = CoarseSector::from_fine(fine, 16) == Some(coarse);
            assert_eq!(maps_back, range.contains(&fine), "fine {} coarse {}", fine, coarse.get());
        }
    }
}

proptest! {
    /// Pruning keeps a bin exactly when it overlaps the queried band.
    #[test]
    fn overlap_prune_matches_brute_force(
        bin in 0u32..300,
        width in prop::sample::select(vec![10u32, 25, 50, 100]),
        min in 0.0f64..20_000.0,
        span in 0.0f64..2_000.0,
    ) {
        let start = bin * width;
        let band = DistanceBand::new(min, min + span);
        let included = bin_overlaps(start, f64::from(width), &band);
        prop_assert_eq!(
            included,
            f64::from(start) < min + span && min < f64::from(start + width)
        );
    }

    /// Any refinement factor keeps the coarse/fine mapping consistent.
    #[test]
    fn sector_round_trip_any_refinement(coarse in 1u8..=12, refinement in 1u32..64, offset in 0u32..64) {
        let sector = CoarseSector::new(coarse).unwrap();
        let range = sector.fine_range(refinement);
        let fine = range.start() + offset % refinement;
        prop_assert_eq!(CoarseSector::from_fine(fine, refinement), Some(sector));
        prop_assert_ne!(CoarseSector::from_fine(range.end() + 1, refinement), Some(sector));
    }

    #[test]
    fn fine_sector_stays_in_range(ra in -720.0f64..720.0, dec in -90.0f64..=90.0) {
        prop_assert!(fine_sector(ra, dec) < 192);
    }

    #[test]
    fn projection_identity_at_catalog_epoch(
        ra in 0.0f64..360.0,
        dec in -90.0f64..90.0,
        distance in 0.1f64..20_000.0,
        vx in -1.0f64..1.0,
        vy in -1.0f64..1.0,
        vz in -1.0f64..1.0,
    ) {
        let r = record(ra, dec, distance, Vector3::new(vx, vy, vz));
        prop_assert_eq!(position_at(&r, 2016.0), r.position());
    }

    #[test]
    fn projection_is_linear(
        ra in 0.0f64..360.0,
        dec in -90.0f64..90.0,
        distance in 0.1f64..20_000.0,
        vx in -1.0f64..1.0,
        vy in -1.0f64..1.0,
        vz in -1.0f64..1.0,
        t1 in -5_000.0f64..5_000.0,
        t2 in -5_000.0f64..5_000.0,
    ) {
        let v = Vector3::new(vx, vy, vz);
        let r = record(ra, dec, distance, v);
        let delta = position_at(&r, t2) - position_at(&r, t1);
        let expected = v * (t2 - t1);
        let scale = distance + 10_000.0;
        prop_assert!((delta - expected).magnitude() <= 1e-12 * scale);
    }

    /// A bin the light-cone search prunes never holds a star it would accept.
    #[test]
    fn light_cone_prune_is_conservative(
        distance in 1.0f64..400.0,
        speed in 0.0f64..1.0,
        heading in 0.0f64..std::f64::consts::TAU,
        elapsed_days in 0i64..120_000,
        window_days in 0i64..4_000,
    ) {
        let config = LightConeConfig {
            horizon_years: 20.0,
            ..LightConeConfig::default()
        };
        let velocity = Vector3::new(-speed * heading.cos(), speed * heading.sin() * 0.01, 0.0);
        let star = common::star(1, Vector3::new(-distance, 0.0, 0.0), velocity, 5.0);
        let event_time = Utc.with_ymd_and_hms(1700, 1, 1, 0, 0, 0).unwrap();
        let request = LightConeRequest {
            direction: EventDirection::from_vector(Vector3::x_axis()).unwrap(),
            event_time,
            now: event_time + TimeDelta::days(elapsed_days),
            window: TimeDelta::days(window_days),
        };
        if star_sighting(&star, &request, &config).is_some() {
            prop_assert!(bin_may_match(
                star.distance_bin,
                common::BIN_WIDTH,
                config.horizon_years,
                request.elapsed_years(),
                request.window_years(),
            ));
        }
    }
}
