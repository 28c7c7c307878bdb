use super::fs::{key_digest, list_with_extension, read_optional, remove_if_exists, write_atomic};
use super::StorageBackend;
use crate::entry::{CacheEntry, EntryRecord};
use crate::error::CacheError;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicU64;

/// Large-capacity layout: raw body blobs plus small metadata files.
///
/// ```text
/// <dir>/entries/<sha256(key)>.data   body bytes, as stored
/// <dir>/entries/<sha256(key)>.meta   EntryRecord as JSON
/// ```
///
/// Index recovery reads only `.meta` files. The body is written before its
/// metadata, so a crash between the two leaves an orphan blob, never a record
/// pointing at missing data.
pub struct IndexedBackend {
    entries_dir: PathBuf,
    tmp_seq: AtomicU64,
}

impl IndexedBackend {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            entries_dir: dir.as_ref().join("entries"),
            tmp_seq: AtomicU64::new(0),
        }
    }

    fn paths_for(&self, key: &str) -> (PathBuf, PathBuf) {
        let digest = key_digest(key);
        (
            self.entries_dir.join(format!("{digest}.data")),
            self.entries_dir.join(format!("{digest}.meta")),
        )
    }

    fn parse_meta(path: &Path, raw: &[u8]) -> Result<EntryRecord, CacheError> {
        serde_json::from_slice(raw).map_err(|e| CacheError::CorruptRecord {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl StorageBackend for IndexedBackend {
    fn name(&self) -> &'static str {
        "indexed"
    }

    async fn load(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let (data_path, meta_path) = self.paths_for(key);
        let Some(raw_meta) = read_optional(&meta_path).await? else {
            return Ok(None);
        };
        let record = Self::parse_meta(&meta_path, &raw_meta)?;
        if record.key != key {
            return Ok(None);
        }

        let Some(data) = read_optional(&data_path).await? else {
            return Err(CacheError::CorruptRecord {
                path: data_path.display().to_string(),
                reason: "body missing for indexed record".into(),
            });
        };
        if data.len() as u64 != record.size_bytes {
            return Err(CacheError::CorruptRecord {
                path: data_path.display().to_string(),
                reason: format!(
                    "body is {} bytes, metadata says {}",
                    data.len(),
                    record.size_bytes
                ),
            });
        }

        Ok(Some(CacheEntry::from_record(record, data)))
    }

    async fn store(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        let (data_path, meta_path) = self.paths_for(&entry.key);
        let meta = serde_json::to_vec(&entry.record())?;

        write_atomic(&data_path, entry.data.clone(), &self.tmp_seq).await?;
        write_atomic(&meta_path, Bytes::from(meta), &self.tmp_seq).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        let (data_path, meta_path) = self.paths_for(key);
        // Metadata first: once it is gone the record is invisible.
        remove_if_exists(&meta_path).await?;
        remove_if_exists(&data_path).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        for ext in ["meta", "data"] {
            for path in list_with_extension(&self.entries_dir, ext).await? {
                remove_if_exists(&path).await?;
            }
        }
        Ok(())
    }

    async fn recover(&self) -> Result<Vec<EntryRecord>, CacheError> {
        let mut records = Vec::new();
        for path in list_with_extension(&self.entries_dir, "meta").await? {
            let parsed = match read_optional(&path).await {
                Ok(Some(raw)) => Self::parse_meta(&path, &raw),
                Ok(None) => continue,
                Err(e) => Err(e.into()),
            };
            match parsed {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable cache metadata");
                }
            }
        }
        Ok(records)
    }
}
