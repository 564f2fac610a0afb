//! Partition filename contract.
//!
//! A partition's key is encoded in its filename so pruning never has to
//! open a file:
//!
//! | Layout | Filename |
//! |--------|----------|
//! | distance bin | `bin_<start>.spart` |
//! | sky sector | `sector_<fine>.spart` |
//! | both | `bin_<start>_sector_<fine>.spart` |

use serde::Deserialize;
use std::fmt;
use std::path::Path;

pub const PARTITION_EXTENSION: &str = "spart";

/// Which axes a store partitions on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PartitionLayout {
    DistanceBin,
    Sector,
    Composite,
}

/// Key of one partition, recovered from its filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey {
    /// Start of the distance bin, in light-years.
    pub distance_bin: Option<u32>,
    /// Fine HEALPix sector.
    pub sector: Option<u32>,
}

impl PartitionKey {
    pub fn distance_bin(start: u32) -> Self {
        Self {
            distance_bin: Some(start),
            sector: None,
        }
    }

    pub fn sector(fine: u32) -> Self {
        Self {
            distance_bin: None,
            sector: Some(fine),
        }
    }

    pub fn composite(start: u32, fine: u32) -> Self {
        Self {
            distance_bin: Some(start),
            sector: Some(fine),
        }
    }

    pub fn layout(&self) -> Option<PartitionLayout> {
        match (self.distance_bin, self.sector) {
            (Some(_), None) => Some(PartitionLayout::DistanceBin),
            (None, Some(_)) => Some(PartitionLayout::Sector),
            (Some(_), Some(_)) => Some(PartitionLayout::Composite),
            (None, None) => None,
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.{}", self, PARTITION_EXTENSION)
    }

    /// Parses a partition filename. Returns a reason string when the name
    /// does not follow the contract.
    pub fn parse_file_name(name: &str) -> Result<Self, String> {
        let stem = name
            .strip_suffix(PARTITION_EXTENSION)
            .and_then(|s| s.strip_suffix('.'))
            .ok_or_else(|| format!("missing .{} extension", PARTITION_EXTENSION))?;

        let (bin_part, sector_part) = match stem.split_once("_sector_") {
            Some((bin, sector)) => (Some(bin), Some(sector)),
            None if stem.starts_with("sector_") => (None, stem.strip_prefix("sector_")),
            None => (Some(stem), None),
        };

        let distance_bin = bin_part
            .map(|part| {
                part.strip_prefix("bin_")
                    .ok_or_else(|| format!("unrecognized partition prefix in {:?}", stem))
                    .and_then(|digits| parse_key(digits, "bin start"))
            })
            .transpose()?;
        let sector = sector_part
            .map(|digits| parse_key(digits, "sector"))
            .transpose()?;

        Ok(Self {
            distance_bin,
            sector,
        })
    }

    pub fn from_path(path: &Path) -> Result<Self, String> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| "non-UTF-8 file name".to_string())?;
        Self::parse_file_name(name)
    }
}

fn parse_key(digits: &str, what: &str) -> Result<u32, String> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("unparseable {} {:?}", what, digits));
    }
    digits
        .parse::<u32>()
        .map_err(|e| format!("unparseable {} {:?}: {}", what, digits, e))
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.distance_bin, self.sector) {
            (Some(bin), Some(sector)) => write!(f, "bin_{}_sector_{}", bin, sector),
            (Some(bin), None) => write!(f, "bin_{}", bin),
            (None, Some(sector)) => write!(f, "sector_{}", sector),
            (None, None) => write!(f, "unkeyed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_distance_bin() {
        let key = PartitionKey::parse_file_name("bin_1050.spart").unwrap();
        assert_eq!(key, PartitionKey::distance_bin(1050));
        assert_eq!(key.layout(), Some(PartitionLayout::DistanceBin));
    }

    #[test]
    fn test_parse_sector() {
        let key = PartitionKey::parse_file_name("sector_37.spart").unwrap();
        assert_eq!(key, PartitionKey::sector(37));
        assert_eq!(key.layout(), Some(PartitionLayout::Sector));
    }

    #[test]
    fn test_parse_composite() {
        let key = PartitionKey::parse_file_name("bin_0_sector_191.spart").unwrap();
        assert_eq!(key, PartitionKey::composite(0, 191));
        assert_eq!(key.layout(), Some(PartitionLayout::Composite));
    }

    #[test]
    fn test_file_name_round_trip() {
        for key in [
            PartitionKey::distance_bin(9950),
            PartitionKey::sector(4),
            PartitionKey::composite(150, 16),
        ] {
            assert_eq!(PartitionKey::parse_file_name(&key.file_name()), Ok(key));
        }
    }

    #[test]
    fn test_malformed_names() {
        for name in [
            "bin_.spart",
            "bin_12a.spart",
            "bin_-50.spart",
            "bin_50.parquet",
            "bin_50",
            "stars_50.spart",
            "sector_.spart",
            "bin_50_sector_x.spart",
            "bin_99999999999.spart",
            "._bin_50.spart",
        ] {
            assert!(
                PartitionKey::parse_file_name(name).is_err(),
                "{} should be rejected",
                name
            );
        }
    }

    #[test]
    fn test_ordering_follows_bin_start() {
        let mut keys = vec![
            PartitionKey::distance_bin(1000),
            PartitionKey::distance_bin(50),
            PartitionKey::distance_bin(100),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                PartitionKey::distance_bin(50),
                PartitionKey::distance_bin(100),
                PartitionKey::distance_bin(1000)
            ]
        );
    }
}
