use super::fs::{key_digest, list_with_extension, read_optional, remove_if_exists, write_atomic};
use super::StorageBackend;
use crate::entry::{CacheEntry, EntryRecord};
use crate::error::CacheError;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicU64;

const RECORD_VERSION: u32 = 1;

/// One JSON document per key, body base64-encoded.
///
/// Layout: `<dir>/<sha256(key)>.json`. Each file is self-describing, so the
/// store can be rebuilt from the directory alone.
pub struct PersistentBackend {
    dir: PathBuf,
    tmp_seq: AtomicU64,
}

#[derive(Serialize, Deserialize)]
struct PersistedEntry {
    version: u32,
    #[serde(flatten)]
    record: EntryRecord,
    data: String,
}

impl PersistentBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            tmp_seq: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key_digest(key)))
    }

    fn decode(path: &Path, raw: &[u8]) -> Result<CacheEntry, CacheError> {
        let persisted: PersistedEntry = serde_json::from_slice(raw)?;
        if persisted.version != RECORD_VERSION {
            return Err(CacheError::CorruptRecord {
                path: path.display().to_string(),
                reason: format!("unsupported record version {}", persisted.version),
            });
        }
        let data = STANDARD
            .decode(persisted.data.as_bytes())
            .map_err(|e| CacheError::CorruptRecord {
                path: path.display().to_string(),
                reason: format!("invalid body encoding: {e}"),
            })?;
        Ok(CacheEntry::from_record(persisted.record, Bytes::from(data)))
    }
}

#[async_trait]
impl StorageBackend for PersistentBackend {
    fn name(&self) -> &'static str {
        "persistent"
    }

    async fn load(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let path = self.path_for(key);
        let Some(raw) = read_optional(&path).await? else {
            return Ok(None);
        };
        let entry = Self::decode(&path, &raw)?;
        // Digest collision or a hand-edited file.
        if entry.key != key {
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn store(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        let persisted = PersistedEntry {
            version: RECORD_VERSION,
            record: entry.record(),
            data: STANDARD.encode(&entry.data),
        };
        let json = serde_json::to_vec(&persisted)?;
        write_atomic(&self.path_for(&entry.key), Bytes::from(json), &self.tmp_seq).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        remove_if_exists(&self.path_for(key)).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        for path in list_with_extension(&self.dir, "json").await? {
            remove_if_exists(&path).await?;
        }
        Ok(())
    }

    async fn recover(&self) -> Result<Vec<EntryRecord>, CacheError> {
        let mut records = Vec::new();
        for path in list_with_extension(&self.dir, "json").await? {
            let decoded = match read_optional(&path).await {
                Ok(Some(raw)) => Self::decode(&path, &raw),
                Ok(None) => continue,
                Err(e) => Err(e.into()),
            };
            match decoded {
                Ok(entry) => records.push(entry.record()),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable cache record");
                }
            }
        }
        Ok(records)
    }
}
