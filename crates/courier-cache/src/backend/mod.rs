//! Storage backends for cache bodies.
//!
//! The store keeps its index in memory and calls a backend for the bytes:
//! - [`MemoryBackend`]: process memory, lost on restart
//! - [`PersistentBackend`]: one self-contained JSON record per key
//! - [`IndexedBackend`]: raw `.data` blobs with separate `.meta` files, so
//!   recovery only reads metadata

mod fs;
mod indexed;
mod memory;
mod persistent;

pub use indexed::IndexedBackend;
pub use memory::MemoryBackend;
pub use persistent::PersistentBackend;

use crate::entry::{CacheEntry, EntryRecord};
use crate::error::CacheError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

/// Common interface for all storage backends.
///
/// Backends hold no eviction logic and no statistics; the store decides what
/// lives and what goes. All methods must be safe to call concurrently.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Human-readable backend name.
    fn name(&self) -> &'static str;

    /// Read a full entry. `Ok(None)` when the record does not exist.
    async fn load(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;

    /// Write or overwrite the record for `entry.key`.
    async fn store(&self, entry: &CacheEntry) -> Result<(), CacheError>;

    /// Delete a record. Deleting a missing record is not an error.
    async fn remove(&self, key: &str) -> Result<(), CacheError>;

    /// Delete every record.
    async fn clear(&self) -> Result<(), CacheError>;

    /// Metadata of every readable record, used to rebuild the index on open.
    async fn recover(&self) -> Result<Vec<EntryRecord>, CacheError>;
}

/// Which backend a store is built on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Memory,
    Persistent,
    Indexed,
}

impl StorageKind {
    pub fn is_durable(&self) -> bool {
        !matches!(self, StorageKind::Memory)
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StorageKind::Memory => "memory",
            StorageKind::Persistent => "persistent",
            StorageKind::Indexed => "indexed",
        })
    }
}

impl FromStr for StorageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageKind::Memory),
            "persistent" => Ok(StorageKind::Persistent),
            "indexed" => Ok(StorageKind::Indexed),
            other => Err(format!("unknown storage backend: {other}")),
        }
    }
}

/// Build a backend of the given kind. `dir` is ignored for memory storage.
pub fn build_backend(kind: StorageKind, dir: &Path) -> Arc<dyn StorageBackend> {
    match kind {
        StorageKind::Memory => Arc::new(MemoryBackend::new()),
        StorageKind::Persistent => Arc::new(PersistentBackend::new(dir)),
        StorageKind::Indexed => Arc::new(IndexedBackend::new(dir)),
    }
}
