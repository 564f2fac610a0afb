//! Memory-mapped columnar partition files.
//!
//! A partition file has two sections:
//!
//! 1. **Header** (64 bytes): magic, version, row count, catalog epoch, bin width
//! 2. **Columns**: one contiguous little-endian array per field, each `rows` long:
//!    `source_id u64`, `dir_x/dir_y/dir_z f64`, `distance f64`,
//!    `vel_x/vel_y/vel_z f64`, `magnitude f64`, `healpix_sector u32`, `distance_bin u32`
//!
//! Null float values are stored as NaN; rows carrying them fail
//! [`StarRecord::validate`] and are skipped on read. Open a partition with
//! [`Partition::open`]; the file stays mapped for the lifetime of the value
//! and rows are decoded on demand.

use crate::error::{CatalogError, Result};
use crate::record::StarRecord;
use crate::store::naming::PartitionKey;
use memmap2::Mmap;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use stellar_core::constants::CATALOG_EPOCH;
use stellar_core::Vector3;

const PARTITION_MAGIC: &[u8; 4] = b"SPRT";
const PARTITION_VERSION: u32 = 1;
pub(crate) const HEADER_SIZE: usize = 64;

const WIDE_COLUMNS: usize = 9;
const NARROW_COLUMNS: usize = 2;
const ROW_SIZE: usize = WIDE_COLUMNS * 8 + NARROW_COLUMNS * 4;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Column {
    SourceId,
    DirX,
    DirY,
    DirZ,
    Distance,
    VelX,
    VelY,
    VelZ,
    Magnitude,
    Sector,
    DistanceBin,
}

impl Column {
    /// Byte offset of the column start, relative to the end of the header.
    fn offset(self, rows: usize) -> usize {
        let index = self as usize;
        if index < WIDE_COLUMNS {
            index * rows * 8
        } else {
            WIDE_COLUMNS * rows * 8 + (index - WIDE_COLUMNS) * rows * 4
        }
    }
}

/// Metadata parsed from the first 64 bytes of a partition file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartitionHeader {
    pub rows: u64,
    /// Julian year of the stored positions.
    pub epoch: f64,
    /// Distance-bin width the writer used.
    pub bin_width_ly: f64,
}

impl fmt::Display for PartitionHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rows={} epoch=J{:.1} bin_width={:.1} ly",
            self.rows, self.epoch, self.bin_width_ly
        )
    }
}

/// Read-only handle to one partition file.
pub struct Partition {
    path: PathBuf,
    key: PartitionKey,
    header: PartitionHeader,
    mmap: Mmap,
}

impl Partition {
    /// Maps a partition and validates its header and size.
    ///
    /// Every failure is reported as [`CatalogError::MalformedPartition`] so
    /// scans can log it and move on.
    pub fn open(path: impl AsRef<Path>, key: PartitionKey) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| CatalogError::malformed(path, format!("cannot open: {}", e)))?;
        // The store is read-only while queries run.
        let mmap = unsafe { Mmap::map(&file) }
            .map_err(|e| CatalogError::malformed(path, format!("cannot map: {}", e)))?;

        let header = parse_header(&mmap).map_err(|reason| CatalogError::malformed(path, reason))?;

        let expected = usize::try_from(header.rows)
            .ok()
            .and_then(|rows| rows.checked_mul(ROW_SIZE))
            .and_then(|body| body.checked_add(HEADER_SIZE))
            .ok_or_else(|| CatalogError::malformed(path, "row count overflows"))?;
        if mmap.len() != expected {
            return Err(CatalogError::malformed(
                path,
                format!(
                    "size mismatch: {} bytes, header implies {}",
                    mmap.len(),
                    expected
                ),
            ));
        }
        if header.epoch != CATALOG_EPOCH {
            return Err(CatalogError::malformed(
                path,
                format!("epoch J{} differs from catalog epoch", header.epoch),
            ));
        }

        Ok(Self {
            path: path.to_path_buf(),
            key,
            header,
            mmap,
        })
    }

    pub fn key(&self) -> PartitionKey {
        self.key
    }

    pub fn header(&self) -> &PartitionHeader {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.header.rows as usize
    }

    pub fn is_empty(&self) -> bool {
        self.header.rows == 0
    }

    /// Decodes row `index` without validating it. Out-of-range rows yield `None`.
    pub fn row(&self, index: usize) -> Option<StarRecord> {
        if index >= self.len() {
            return None;
        }
        let f = |column| self.read_f64(column, index);
        Some(StarRecord {
            source_id: self.read_u64(Column::SourceId, index),
            direction: Vector3::new(f(Column::DirX), f(Column::DirY), f(Column::DirZ)),
            distance_ly: f(Column::Distance),
            velocity: Vector3::new(f(Column::VelX), f(Column::VelY), f(Column::VelZ)),
            magnitude: f(Column::Magnitude),
            healpix_sector: self.read_u32(Column::Sector, index),
            distance_bin: self.read_u32(Column::DistanceBin, index),
        })
    }

    /// Iterates over rows that pass [`StarRecord::validate`], in file order.
    ///
    /// Rejected rows are counted into `rejected` and logged at trace level.
    pub fn valid_records<'a>(
        &'a self,
        rejected: &'a mut usize,
    ) -> impl Iterator<Item = StarRecord> + 'a {
        (0..self.len()).filter_map(move |i| {
            let record = self.row(i)?;
            match record.validate() {
                Ok(()) => Some(record),
                Err(e) => {
                    tracing::trace!(partition = %self.key, "skipping row {}: {}", i, e);
                    *rejected += 1;
                    None
                }
            }
        })
    }

    fn slot(&self, column: Column, index: usize, width: usize) -> usize {
        HEADER_SIZE + column.offset(self.len()) + index * width
    }

    fn read_u64(&self, column: Column, index: usize) -> u64 {
        let start = self.slot(column, index, 8);
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.mmap[start..start + 8]);
        u64::from_le_bytes(buf)
    }

    fn read_f64(&self, column: Column, index: usize) -> f64 {
        f64::from_bits(self.read_u64(column, index))
    }

    fn read_u32(&self, column: Column, index: usize) -> u32 {
        let start = self.slot(column, index, 4);
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&self.mmap[start..start + 4]);
        u32::from_le_bytes(buf)
    }
}

impl fmt::Debug for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Partition")
            .field("path", &self.path)
            .field("key", &self.key)
            .field("header", &self.header)
            .finish()
    }
}

/// Reads and validates only the header of the partition at `path`.
pub fn read_header(path: impl AsRef<Path>) -> Result<PartitionHeader> {
    let path = path.as_ref();
    let mut bytes = [0u8; HEADER_SIZE];
    File::open(path)
        .and_then(|mut f| f.read_exact(&mut bytes))
        .map_err(|e| CatalogError::malformed(path, format!("cannot read header: {}", e)))?;
    parse_header(&bytes).map_err(|reason| CatalogError::malformed(path, reason))
}

fn parse_header(bytes: &[u8]) -> std::result::Result<PartitionHeader, String> {
    if bytes.len() < HEADER_SIZE {
        return Err(format!("file too small: {} bytes", bytes.len()));
    }
    let magic = &bytes[0..4];
    if magic != PARTITION_MAGIC {
        return Err(format!(
            "invalid magic: expected {:?}, got {:?}",
            PARTITION_MAGIC, magic
        ));
    }
    let word = |range: std::ops::Range<usize>| {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&bytes[range]);
        buf
    };
    let mut version = [0u8; 4];
    version.copy_from_slice(&bytes[4..8]);
    let version = u32::from_le_bytes(version);
    if version != PARTITION_VERSION {
        return Err(format!(
            "unsupported version: expected {}, got {}",
            PARTITION_VERSION, version
        ));
    }
    Ok(PartitionHeader {
        rows: u64::from_le_bytes(word(8..16)),
        epoch: f64::from_le_bytes(word(16..24)),
        bin_width_ly: f64::from_le_bytes(word(24..32)),
    })
}

/// Writes one partition file from already-validated records.
///
/// The file is written next to its final name with a `.tmp` suffix and
/// renamed into place, so readers never observe a half-written partition.
pub fn write_partition(
    dir: &Path,
    key: PartitionKey,
    records: &[StarRecord],
    bin_width_ly: f64,
) -> Result<PathBuf> {
    for record in records {
        record.validate()?;
        let bin_ok = key.distance_bin.is_none_or(|b| b == record.distance_bin);
        let sector_ok = key.sector.is_none_or(|s| s == record.healpix_sector);
        if !(bin_ok && sector_ok) {
            return Err(CatalogError::malformed(
                dir.join(key.file_name()),
                format!("record {} does not belong to partition {}", record.source_id, key),
            ));
        }
    }

    let final_path = dir.join(key.file_name());
    let temp_path = final_path.with_extension("spart.tmp");
    let mut out = BufWriter::new(File::create(&temp_path)?);

    let mut header = [0u8; HEADER_SIZE];
    header[0..4].copy_from_slice(PARTITION_MAGIC);
    header[4..8].copy_from_slice(&PARTITION_VERSION.to_le_bytes());
    header[8..16].copy_from_slice(&(records.len() as u64).to_le_bytes());
    header[16..24].copy_from_slice(&CATALOG_EPOCH.to_le_bytes());
    header[24..32].copy_from_slice(&bin_width_ly.to_le_bytes());
    out.write_all(&header)?;

    for r in records {
        out.write_all(&r.source_id.to_le_bytes())?;
    }
    let wide: [fn(&StarRecord) -> f64; 8] = [
        |r: &StarRecord| r.direction.x,
        |r: &StarRecord| r.direction.y,
        |r: &StarRecord| r.direction.z,
        |r: &StarRecord| r.distance_ly,
        |r: &StarRecord| r.velocity.x,
        |r: &StarRecord| r.velocity.y,
        |r: &StarRecord| r.velocity.z,
        |r: &StarRecord| r.magnitude,
    ];
    for field in wide {
        for r in records {
            out.write_all(&field(r).to_le_bytes())?;
        }
    }
    for r in records {
        out.write_all(&r.healpix_sector.to_le_bytes())?;
    }
    for r in records {
        out.write_all(&r.distance_bin.to_le_bytes())?;
    }

    out.flush()?;
    drop(out);
    fs::rename(&temp_path, &final_path)?;
    Ok(final_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn star(source_id: u64, distance_ly: f64, magnitude: f64) -> StarRecord {
        StarRecord {
            source_id,
            direction: Vector3::new(0.0, 0.0, 1.0),
            distance_ly,
            velocity: Vector3::new(1e-5, -2e-5, 0.0),
            magnitude,
            healpix_sector: 3,
            distance_bin: crate::record::distance_bin(distance_ly, 50.0),
        }
    }

    #[test]
    fn test_row_size() {
        assert_eq!(ROW_SIZE, 80);
    }

    #[test]
    fn test_column_offsets_are_contiguous() {
        assert_eq!(Column::SourceId.offset(10), 0);
        assert_eq!(Column::DirX.offset(10), 80);
        assert_eq!(Column::Magnitude.offset(10), 640);
        assert_eq!(Column::Sector.offset(10), 720);
        assert_eq!(Column::DistanceBin.offset(10), 760);
    }

    #[test]
    fn test_write_then_read_rows() {
        let dir = TempDir::new().unwrap();
        let key = PartitionKey::distance_bin(0);
        let stars = vec![star(1, 10.0, 5.0), star(2, 20.0, 3.5), star(3, 49.9, 9.0)];
        let path = write_partition(dir.path(), key, &stars, 50.0).unwrap();
        assert_eq!(path.file_name().unwrap(), "bin_0.spart");

        let partition = Partition::open(&path, key).unwrap();
        assert_eq!(partition.len(), 3);
        assert_eq!(partition.header().bin_width_ly, 50.0);
        assert_eq!(partition.header().epoch, 2016.0);
        for (i, expected) in stars.iter().enumerate() {
            assert_eq!(partition.row(i).unwrap(), *expected);
        }
        assert!(partition.row(3).is_none());
    }

    #[test]
    fn test_empty_partition() {
        let dir = TempDir::new().unwrap();
        let key = PartitionKey::sector(9);
        let path = write_partition(dir.path(), key, &[], 50.0).unwrap();
        let partition = Partition::open(&path, key).unwrap();
        assert!(partition.is_empty());
        let mut rejected = 0;
        assert_eq!(partition.valid_records(&mut rejected).count(), 0);
    }

    #[test]
    fn test_writer_rejects_foreign_record() {
        let dir = TempDir::new().unwrap();
        let err = write_partition(
            dir.path(),
            PartitionKey::distance_bin(100),
            &[star(1, 10.0, 5.0)],
            50.0,
        )
        .unwrap_err();
        assert!(err.to_string().contains("does not belong"));
    }

    #[test]
    fn test_nan_rows_are_skipped_on_read() {
        let dir = TempDir::new().unwrap();
        let key = PartitionKey::distance_bin(0);
        let path = write_partition(dir.path(), key, &[star(1, 10.0, 5.0), star(2, 12.0, 6.0)], 50.0)
            .unwrap();

        // Null out the magnitude of row 1 in place.
        let mut bytes = fs::read(&path).unwrap();
        let offset = HEADER_SIZE + Column::Magnitude.offset(2) + 8;
        bytes[offset..offset + 8].copy_from_slice(&f64::NAN.to_le_bytes());
        fs::write(&path, &bytes).unwrap();

        let partition = Partition::open(&path, key).unwrap();
        let mut rejected = 0;
        let ids: Vec<u64> = partition
            .valid_records(&mut rejected)
            .map(|r| r.source_id)
            .collect();
        assert_eq!(ids, vec![1]);
        assert_eq!(rejected, 1);
    }

    #[test]
    fn test_open_truncated() {
        let dir = TempDir::new().unwrap();
        let key = PartitionKey::distance_bin(0);
        let path = write_partition(dir.path(), key, &[star(1, 10.0, 5.0)], 50.0).unwrap();
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 4]).unwrap();

        let msg = Partition::open(&path, key).unwrap_err().to_string();
        assert!(msg.contains("size mismatch"), "unexpected error: {}", msg);
    }

    #[test]
    fn test_open_bad_magic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bin_0.spart");
        let mut bytes = vec![0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(b"XXXX");
        fs::write(&path, &bytes).unwrap();

        let msg = Partition::open(&path, PartitionKey::distance_bin(0))
            .unwrap_err()
            .to_string();
        assert!(msg.contains("invalid magic"), "unexpected error: {}", msg);
    }

    #[test]
    fn test_open_bad_version() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bin_0.spart");
        let mut bytes = vec![0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(PARTITION_MAGIC);
        bytes[4..8].copy_from_slice(&7u32.to_le_bytes());
        fs::write(&path, &bytes).unwrap();

        let msg = Partition::open(&path, PartitionKey::distance_bin(0))
            .unwrap_err()
            .to_string();
        assert!(msg.contains("unsupported version"), "unexpected error: {}", msg);
    }

    #[test]
    fn test_open_tiny_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bin_0.spart");
        fs::write(&path, [0u8; 10]).unwrap();
        let msg = Partition::open(&path, PartitionKey::distance_bin(0))
            .unwrap_err()
            .to_string();
        assert!(msg.contains("too small"), "unexpected error: {}", msg);
    }

    #[test]
    fn test_header_display() {
        let header = PartitionHeader {
            rows: 12,
            epoch: 2016.0,
            bin_width_ly: 50.0,
        };
        assert_eq!(header.to_string(), "rows=12 epoch=J2016.0 bin_width=50.0 ly");
    }
}
