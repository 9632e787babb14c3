use crate::StoreError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tempfile::NamedTempFile;

/// Current local bucket format version. Incremented on incompatible layout changes.
pub const BUCKET_FORMAT_VERSION: u32 = 1;
const VERSION_FILE: &str = "version";

/// Directory layout of a local bucket root.
///
/// Each bucket is a directory under `buckets/`, and object keys map to nested
/// paths inside it. Subdirectories are created lazily on
/// [`initialize`](Self::initialize).
#[derive(Debug, Clone)]
pub struct BucketLayout {
    root: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct BucketVersion {
    format_version: u32,
}

impl BucketLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn buckets_dir(&self) -> PathBuf {
        self.root.join("buckets")
    }

    pub fn bucket_dir(&self, bucket: &str) -> Result<PathBuf, StoreError> {
        let valid = !bucket.is_empty()
            && bucket
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'.')
            && !bucket.starts_with('.');
        if !valid {
            return Err(StoreError::InvalidBucket(bucket.to_owned()));
        }
        Ok(self.buckets_dir().join(bucket))
    }

    /// Path of `key` inside `bucket`. Keys must be relative and must not climb
    /// out of the bucket.
    pub fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StoreError> {
        let rel = Path::new(key);
        let normal = !key.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !normal {
            return Err(StoreError::InvalidKey(key.to_owned()));
        }
        Ok(self.bucket_dir(bucket)?.join(rel))
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(self.buckets_dir())?;

        let version_path = self.root.join(VERSION_FILE);
        if version_path.exists() {
            self.verify_version()?;
        } else {
            let ver = BucketVersion {
                format_version: BUCKET_FORMAT_VERSION,
            };
            let content = serde_json::to_string_pretty(&ver)?;
            let mut tmp = NamedTempFile::new_in(&self.root)?;
            tmp.write_all(content.as_bytes())?;
            tmp.as_file().sync_all()?;
            tmp.persist(&version_path)
                .map_err(|e| StoreError::Io(e.error))?;
            crate::fsync_dir(&self.root)?;
        }

        Ok(())
    }

    pub fn verify_version(&self) -> Result<(), StoreError> {
        let version_path = self.root.join(VERSION_FILE);
        let content = fs::read_to_string(&version_path)?;
        let ver: BucketVersion = serde_json::from_str(&content)?;

        if ver.format_version != BUCKET_FORMAT_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: BUCKET_FORMAT_VERSION,
                found: ver.format_version,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths_are_correct() {
        let layout = BucketLayout::new("/tmp/rollout-test");
        assert_eq!(
            layout.buckets_dir(),
            PathBuf::from("/tmp/rollout-test/buckets")
        );
        assert_eq!(
            layout.object_path("artifacts", "manual/env-files/a.env").unwrap(),
            PathBuf::from("/tmp/rollout-test/buckets/artifacts/manual/env-files/a.env")
        );
    }

    #[test]
    fn rejects_escaping_keys() {
        let layout = BucketLayout::new("/tmp/rollout-test");
        assert!(layout.object_path("artifacts", "../etc/passwd").is_err());
        assert!(layout.object_path("artifacts", "/abs").is_err());
        assert!(layout.object_path("artifacts", "a/./b").is_ok());
        assert!(layout.object_path("artifacts", "").is_err());
    }

    #[test]
    fn rejects_bad_bucket_names() {
        let layout = BucketLayout::new("/tmp/rollout-test");
        assert!(layout.bucket_dir("Upper").is_err());
        assert!(layout.bucket_dir("a/b").is_err());
        assert!(layout.bucket_dir("..").is_err());
        assert!(layout.bucket_dir("app-artifacts.v1").is_ok());
    }

    #[test]
    fn initialize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let layout = BucketLayout::new(dir.path());
        layout.initialize().unwrap();
        layout.initialize().unwrap();
        layout.verify_version().unwrap();
        assert!(layout.buckets_dir().is_dir());
    }

    #[test]
    fn version_mismatch_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let layout = BucketLayout::new(dir.path());
        layout.initialize().unwrap();
        fs::write(dir.path().join(VERSION_FILE), r#"{"format_version": 9}"#).unwrap();
        assert!(matches!(
            layout.verify_version(),
            Err(StoreError::VersionMismatch { found: 9, .. })
        ));
    }
}
