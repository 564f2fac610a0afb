//! Error taxonomy for store access and query execution.
//!
//! | Variant | Raised by | Propagation |
//! |---------|-----------|-------------|
//! | [`StoreUnavailable`](CatalogError::StoreUnavailable) | [`StoreHandle::open`](crate::store::StoreHandle::open) | Surfaces to the caller |
//! | [`MalformedPartition`](CatalogError::MalformedPartition) | filename parsing, partition open | Logged, partition skipped |
//! | [`NumericAnomaly`](CatalogError::NumericAnomaly) | record validation | Logged, record skipped |
//! | [`OverflowGuard`](CatalogError::OverflowGuard) | light-cone time arithmetic | Search branch skipped |
//! | [`Config`](CatalogError::Config) | configuration loading | Surfaces to the caller |
//! | [`Io`](CatalogError::Io) | partition writer | Surfaces to the caller |
//!
//! A query never fails because of a single bad partition or record. An empty
//! match set is not an error either; it is an empty
//! [`ResultSet`](crate::query::ResultSet).

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("store root unavailable: {path:?}")]
    StoreUnavailable { path: PathBuf },

    #[error("malformed partition {path:?}: {reason}")]
    MalformedPartition { path: PathBuf, reason: String },

    #[error("non-finite or out-of-range {field} on source {source_id}")]
    NumericAnomaly { source_id: u64, field: &'static str },

    #[error("arithmetic overflow guarded in {context}")]
    OverflowGuard { context: &'static str },

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CatalogError {
    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::MalformedPartition {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// True for the failures a scan contains locally instead of surfacing.
    pub fn is_contained(&self) -> bool {
        matches!(
            self,
            Self::MalformedPartition { .. } | Self::NumericAnomaly { .. } | Self::OverflowGuard { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, CatalogError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_containment_policy() {
        assert!(CatalogError::malformed("bin_x.spart", "bad key").is_contained());
        assert!(CatalogError::NumericAnomaly {
            source_id: 7,
            field: "velocity"
        }
        .is_contained());
        assert!(CatalogError::OverflowGuard { context: "arrival" }.is_contained());
        assert!(!CatalogError::StoreUnavailable {
            path: PathBuf::from("/missing")
        }
        .is_contained());
    }

    #[test]
    fn test_display_mentions_path() {
        let err = CatalogError::malformed("/store/bin_abc.spart", "unparseable bin start");
        let msg = err.to_string();
        assert!(msg.contains("bin_abc.spart"), "unexpected: {}", msg);
        assert!(msg.contains("unparseable bin start"));
    }
}
