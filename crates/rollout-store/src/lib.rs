//! Artifact storage for rollout.
//!
//! This crate provides the `ObjectUploader` contract every artifact upload goes
//! through, content-derived object keys (`keys`), helpers that turn object URLs
//! into partition-qualified ARNs (`url`), and `LocalBucket`, a filesystem-backed
//! bucket with atomic writes used for dry runs and tests.

pub mod keys;
pub mod layout;
pub mod objects;
pub mod url;

pub use layout::{BucketLayout, BUCKET_FORMAT_VERSION};
pub use objects::LocalBucket;
pub use url::{format_object_arn, parse_object_url, partition_for_region};

use std::path::Path;
use thiserror::Error;

/// Fsync a directory to ensure that a preceding `rename()` is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("object not found: {bucket}/{key}")]
    ObjectNotFound { bucket: String, key: String },
    #[error("invalid object key '{0}'")]
    InvalidKey(String),
    #[error("invalid bucket name '{0}'")]
    InvalidBucket(String),
    #[error("cannot parse object URL '{0}'")]
    InvalidUrl(String),
    #[error("bucket format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("upload failed: {0}")]
    Upload(String),
}

/// Destination for every artifact the stack references.
pub trait ObjectUploader: Send + Sync {
    /// Store `data` under `key` in `bucket` and return the object's URL.
    ///
    /// Uploading identical bytes to the same key twice must leave exactly one
    /// object behind.
    fn upload(&self, bucket: &str, key: &str, data: &[u8]) -> Result<String, StoreError>;
}
