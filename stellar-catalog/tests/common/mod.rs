#![allow(dead_code)]

use stellar_catalog::query::QueryEngine;
use stellar_catalog::store::{PartitionLayout, StoreWriter};
use stellar_catalog::{CatalogConfig, StarRecord, StoreHandle};
use stellar_core::Vector3;
use tempfile::TempDir;

pub const BIN_WIDTH: f64 = 50.0;

pub fn star(source_id: u64, position: Vector3, velocity: Vector3, magnitude: f64) -> StarRecord {
    let distance_ly = position.magnitude();
    StarRecord {
        source_id,
        direction: position / distance_ly,
        distance_ly,
        velocity,
        magnitude,
        healpix_sector: 0,
        distance_bin: stellar_catalog::record::distance_bin(distance_ly, BIN_WIDTH),
    }
}

pub fn build_store(layout: PartitionLayout, records: Vec<StarRecord>) -> (TempDir, StoreHandle) {
    let dir = TempDir::new().unwrap();
    StoreWriter::new(dir.path(), layout, BIN_WIDTH)
        .write(records)
        .unwrap();
    let store = StoreHandle::open(dir.path(), Some(layout)).unwrap();
    (dir, store)
}

pub fn engine() -> QueryEngine {
    let mut config = CatalogConfig::default();
    config.parallel.threads = 2;
    QueryEngine::new(config).unwrap()
}
