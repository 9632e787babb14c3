use crate::layout::BucketLayout;
use crate::{fsync_dir, ObjectUploader, StoreError};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Filesystem-backed bucket.
///
/// Objects are written atomically via `NamedTempFile`, and an upload of bytes
/// identical to what is already stored under the key is skipped. Uploads return
/// `s3://<bucket>/<key>` URLs so the rest of the pipeline resolves them exactly
/// like remote object URLs.
pub struct LocalBucket {
    layout: BucketLayout,
}

impl LocalBucket {
    /// Open (and initialize if needed) a local bucket root.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let layout = BucketLayout::new(root);
        layout.initialize()?;
        Ok(Self { layout })
    }

    pub fn layout(&self) -> &BucketLayout {
        &self.layout
    }

    pub fn put(&self, bucket: &str, key: &str, data: &[u8]) -> Result<bool, StoreError> {
        let dest = self.layout.object_path(bucket, key)?;

        if dest.exists() && fs::read(&dest)? == data {
            debug!("object {bucket}/{key} unchanged, skipping write");
            return Ok(false);
        }

        let dir = dest
            .parent()
            .ok_or_else(|| StoreError::InvalidKey(key.to_owned()))?
            .to_path_buf();
        fs::create_dir_all(&dir)?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&dest).map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(&dir)?;

        debug!("wrote object {bucket}/{key} ({} bytes)", data.len());
        Ok(true)
    }

    pub fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.layout.object_path(bucket, key)?;
        if !path.is_file() {
            return Err(StoreError::ObjectNotFound {
                bucket: bucket.to_owned(),
                key: key.to_owned(),
            });
        }
        Ok(fs::read(path)?)
    }

    pub fn exists(&self, bucket: &str, key: &str) -> bool {
        self.layout
            .object_path(bucket, key)
            .is_ok_and(|p| p.is_file())
    }

    /// All keys in `bucket`, sorted.
    pub fn list(&self, bucket: &str) -> Result<Vec<String>, StoreError> {
        let dir = self.layout.bucket_dir(bucket)?;
        let mut keys = Vec::new();
        if dir.exists() {
            collect_keys(&dir, &dir, &mut keys)?;
        }
        keys.sort();
        Ok(keys)
    }
}

fn collect_keys(base: &Path, current: &Path, keys: &mut Vec<String>) -> Result<(), StoreError> {
    for entry in fs::read_dir(current)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_keys(base, &path, keys)?;
            continue;
        }
        let name = entry.file_name();
        // Leftover temp files from an interrupted write.
        if name.to_string_lossy().starts_with(".tmp") {
            continue;
        }
        if let Ok(rel) = path.strip_prefix(base) {
            let key = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            keys.push(key);
        }
    }
    Ok(())
}

impl ObjectUploader for LocalBucket {
    fn upload(&self, bucket: &str, key: &str, data: &[u8]) -> Result<String, StoreError> {
        self.put(bucket, key, data)?;
        Ok(format!("s3://{bucket}/{key}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_bucket() -> (tempfile::TempDir, LocalBucket) {
        let dir = tempfile::tempdir().unwrap();
        let bucket = LocalBucket::open(dir.path()).unwrap();
        (dir, bucket)
    }

    #[test]
    fn put_and_get_roundtrip() {
        let (_dir, store) = test_bucket();
        store.put("artifacts", "manual/a.env", b"A=1").unwrap();
        assert_eq!(store.get("artifacts", "manual/a.env").unwrap(), b"A=1");
    }

    #[test]
    fn identical_put_is_skipped() {
        let (_dir, store) = test_bucket();
        assert!(store.put("artifacts", "k", b"same").unwrap());
        assert!(!store.put("artifacts", "k", b"same").unwrap());
        assert!(store.put("artifacts", "k", b"changed").unwrap());
        assert_eq!(store.get("artifacts", "k").unwrap(), b"changed");
    }

    #[test]
    fn upload_returns_s3_url() {
        let (_dir, store) = test_bucket();
        let url = store.upload("artifacts", "manual/x/y.zip", b"zip").unwrap();
        assert_eq!(url, "s3://artifacts/manual/x/y.zip");
    }

    #[test]
    fn get_nonexistent_fails() {
        let (_dir, store) = test_bucket();
        assert!(matches!(
            store.get("artifacts", "missing"),
            Err(StoreError::ObjectNotFound { .. })
        ));
    }

    #[test]
    fn list_returns_nested_keys() {
        let (_dir, store) = test_bucket();
        store.put("artifacts", "b/2", b"2").unwrap();
        store.put("artifacts", "a/1", b"1").unwrap();
        store.put("other", "c", b"3").unwrap();
        assert_eq!(store.list("artifacts").unwrap(), vec!["a/1", "b/2"]);
        assert!(store.list("empty").unwrap().is_empty());
    }

    #[test]
    fn exists_rejects_invalid_keys() {
        let (_dir, store) = test_bucket();
        assert!(!store.exists("artifacts", "../outside"));
        store.put("artifacts", "inside", b"").unwrap();
        assert!(store.exists("artifacts", "inside"));
    }
}
