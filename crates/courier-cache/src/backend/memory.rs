use super::StorageBackend;
use crate::entry::{CacheEntry, EntryRecord};
use crate::error::CacheError;
use ahash::AHashMap;
use async_trait::async_trait;
use parking_lot::Mutex;

/// In-process storage. Bodies are `Bytes`, so handing out clones is cheap.
#[derive(Default)]
pub struct MemoryBackend {
    records: Mutex<AHashMap<String, CacheEntry>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn load(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.records.lock().get(key).cloned())
    }

    async fn store(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        self.records.lock().insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.records.lock().remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.records.lock().clear();
        Ok(())
    }

    async fn recover(&self) -> Result<Vec<EntryRecord>, CacheError> {
        Ok(self.records.lock().values().map(CacheEntry::record).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::test_support::entry;

    #[tokio::test]
    async fn store_load_remove() {
        let backend = MemoryBackend::new();
        let e = entry("k", b"body");

        backend.store(&e).await.unwrap();
        assert_eq!(backend.load("k").await.unwrap(), Some(e));

        backend.remove("k").await.unwrap();
        backend.remove("k").await.unwrap();
        assert_eq!(backend.load("k").await.unwrap(), None);
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn clear_drops_everything() {
        let backend = MemoryBackend::new();
        backend.store(&entry("a", b"1")).await.unwrap();
        backend.store(&entry("b", b"2")).await.unwrap();
        assert_eq!(backend.recover().await.unwrap().len(), 2);

        backend.clear().await.unwrap();
        assert_eq!(backend.len(), 0);
    }
}
