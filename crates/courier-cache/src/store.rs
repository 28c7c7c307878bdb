use crate::backend::{build_backend, MemoryBackend, StorageBackend, StorageKind};
use crate::clock::{Clock, SystemClock};
use crate::entry::{CacheEntry, EntryRecord};
use crate::error::CacheError;
use crate::eviction::{AccessMeta, EvictionPolicy};
use crate::stats::{hit_rate, CacheStats};
use ahash::AHashMap;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;

/// Eviction frees space until the store is at or below this share of
/// `max_size`, so an insert at the boundary does not evict again next time.
const EVICTION_TARGET_NUM: u128 = 7;
const EVICTION_TARGET_DEN: u128 = 10;

/// Size-bounded, eviction-aware cache store.
///
/// The index (sizes, timestamps, access counters) and the hit/miss counters
/// live behind a single `Mutex` that is held only for in-memory mutation.
/// Backend I/O happens after the lock is released, which leaves a narrow
/// window where an entry is evicted from the index but still on disk.
///
/// Storage failures never reach callers: a failed read is a miss, a failed
/// write is logged and the entry dropped from the index.
pub struct CacheStore {
    state: Mutex<StoreState>,
    backend: Arc<dyn StorageBackend>,
    clock: Arc<dyn Clock>,
    max_size: u64,
    policy: EvictionPolicy,
}

enum Lookup {
    Absent,
    Expired,
    Indexed(u64),
}

#[derive(Default)]
struct StoreState {
    index: AHashMap<String, AccessMeta>,
    current_size: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    next_seq: u64,
    /// Keys with a backend write in flight, and the sequence of that write.
    writing: AHashMap<String, u64>,
}

impl StoreState {
    fn attach(&mut self, key: String, mut meta: AccessMeta) -> u64 {
        meta.seq = self.next_seq;
        self.next_seq += 1;
        self.current_size += meta.size_bytes;
        self.index.insert(key, meta);
        meta.seq
    }

    fn detach(&mut self, key: &str) -> Option<AccessMeta> {
        let meta = self.index.remove(key)?;
        self.current_size -= meta.size_bytes;
        Some(meta)
    }

    /// Remove `key` only if it is still the write identified by `seq`.
    fn detach_if_seq(&mut self, key: &str, seq: u64) -> bool {
        if self.index.get(key).is_some_and(|m| m.seq == seq) {
            self.detach(key);
            true
        } else {
            false
        }
    }

    /// Settle a backend write for `key` that has just returned. Returns
    /// whether the record it left behind belongs to no live entry and must
    /// be removed from the backend.
    fn finish_write(&mut self, key: &str, seq: u64, stored: bool) -> bool {
        if self.writing.get(key) == Some(&seq) {
            self.writing.remove(key);
        }
        let newer_in_flight = self.writing.contains_key(key);
        match self.index.get(key).map(|m| m.seq) {
            Some(owner) if owner == seq => {
                if !stored {
                    self.detach(key);
                }
                !stored
            }
            // A later write is still running and lands over this one.
            Some(_) if newer_in_flight => false,
            // A later write already landed and this one overwrote it.
            Some(_) => {
                self.detach(key);
                true
            }
            // Deleted, evicted or cleared while the write was running.
            None => !newer_in_flight,
        }
    }

    /// Evict until `incoming` fits under the hysteresis target and at least
    /// `incoming` bytes were freed. Returns the evicted keys.
    fn make_room(&mut self, incoming: u64, max_size: u64, policy: EvictionPolicy) -> Vec<String> {
        if self.current_size.saturating_add(incoming) <= max_size {
            return Vec::new();
        }

        let target = (max_size as u128 * EVICTION_TARGET_NUM / EVICTION_TARGET_DEN) as u64;
        let order: Vec<String> = policy
            .eviction_order(self.index.iter().map(|(k, m)| (k.as_str(), m)))
            .into_iter()
            .map(String::from)
            .collect();

        let mut freed = 0u64;
        let mut evicted = Vec::new();
        for key in order {
            if self.current_size.saturating_add(incoming) <= target && freed >= incoming {
                break;
            }
            if let Some(meta) = self.detach(&key) {
                freed += meta.size_bytes;
                self.evictions += 1;
                evicted.push(key);
            }
        }
        evicted
    }
}

impl CacheStore {
    /// Store over an explicit backend with an empty index.
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        max_size: u64,
        policy: EvictionPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            backend,
            clock,
            max_size,
            policy,
        }
    }

    /// Volatile store using the system clock.
    pub fn in_memory(max_size: u64, policy: EvictionPolicy) -> Self {
        Self::new(
            Arc::new(MemoryBackend::new()),
            max_size,
            policy,
            Arc::new(SystemClock),
        )
    }

    /// Build a store of the given kind and rebuild its index from whatever
    /// the backend already holds.
    pub async fn open(
        kind: StorageKind,
        dir: &Path,
        max_size: u64,
        policy: EvictionPolicy,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CacheError> {
        if max_size == 0 {
            return Err(CacheError::InvalidConfig("max_size must be > 0".into()));
        }
        let store = Self::new(build_backend(kind, dir), max_size, policy, clock);
        store.recover().await?;
        tracing::info!(
            backend = store.backend.name(),
            policy = %policy,
            max_size,
            entries = store.len(),
            "cache store opened"
        );
        Ok(store)
    }

    async fn recover(&self) -> Result<(), CacheError> {
        let mut records: Vec<EntryRecord> = self.backend.recover().await?;
        // Oldest first, so insertion sequence follows creation order.
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.key.cmp(&b.key)));

        let evicted = {
            let mut state = self.state.lock();
            for record in records {
                let meta = AccessMeta {
                    seq: 0,
                    created_at: record.created_at,
                    expires_at: record.expires_at,
                    last_access: record.created_at,
                    access_count: 0,
                    size_bytes: record.size_bytes,
                };
                state.detach(&record.key);
                state.attach(record.key, meta);
            }
            if state.current_size > self.max_size {
                state.make_room(0, self.max_size, self.policy)
            } else {
                Vec::new()
            }
        };

        self.discard(evicted).await;
        Ok(())
    }

    /// Look up a fresh entry. Absent, expired or unreadable entries count as
    /// misses; expired ones are deleted on the way.
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        let now = self.clock.now_ms();
        let lookup = {
            let mut state = self.state.lock();
            match state.index.get(key).copied() {
                None => {
                    state.misses += 1;
                    Lookup::Absent
                }
                Some(meta) if meta.is_expired_at(now) => {
                    state.detach(key);
                    state.misses += 1;
                    Lookup::Expired
                }
                Some(meta) => Lookup::Indexed(meta.seq),
            }
        };

        let seq = match lookup {
            Lookup::Absent => return None,
            Lookup::Expired => {
                tracing::debug!(key, "cache entry expired");
                self.discard(vec![key.to_string()]).await;
                return None;
            }
            Lookup::Indexed(seq) => seq,
        };

        let loaded = match self.backend.load(key).await {
            Ok(Some(entry)) if !entry.is_expired_at(now) => Some(entry),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(key, backend = self.backend.name(), error = %e, "cache read failed, treating as miss");
                None
            }
        };

        let mut state = self.state.lock();
        match loaded {
            Some(entry) => {
                state.hits += 1;
                if let Some(meta) = state.index.get_mut(key) {
                    meta.last_access = now;
                    meta.access_count += 1;
                }
                Some(entry)
            }
            None => {
                state.misses += 1;
                // A record that is still being written is not missing.
                if !state.writing.contains_key(key) {
                    state.detach_if_seq(key, seq);
                }
                None
            }
        }
    }

    /// Insert or overwrite `key`. `size_bytes` is recomputed from the body.
    ///
    /// If the insert would overflow `max_size`, entries are evicted in policy
    /// order first. An entry larger than `max_size` on its own is still
    /// admitted after everything else has been evicted.
    pub async fn put(&self, key: &str, mut entry: CacheEntry) {
        entry.key = key.to_string();
        entry.recompute_size();

        let meta = AccessMeta {
            seq: 0,
            created_at: entry.created_at,
            expires_at: entry.expires_at,
            last_access: entry.created_at,
            access_count: 0,
            size_bytes: entry.size_bytes,
        };

        let (seq, evicted) = {
            let mut state = self.state.lock();
            state.detach(key);
            let evicted = state.make_room(entry.size_bytes, self.max_size, self.policy);
            let seq = state.attach(entry.key.clone(), meta);
            state.writing.insert(entry.key.clone(), seq);
            (seq, evicted)
        };

        if !evicted.is_empty() {
            tracing::debug!(
                policy = %self.policy,
                count = evicted.len(),
                incoming = entry.size_bytes,
                "evicted cache entries"
            );
        }
        self.discard(evicted).await;

        let stored = match self.backend.store(&entry).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key, backend = self.backend.name(), error = %e, "cache write failed, entry dropped");
                false
            }
        };

        let orphaned = self.state.lock().finish_write(key, seq, stored);
        if orphaned {
            tracing::debug!(key, "cache entry dropped while being written, removing record");
            self.discard(vec![key.to_string()]).await;
        }
    }

    /// Remove an entry. Returns whether it was present.
    pub async fn delete(&self, key: &str) -> bool {
        let removed = self.state.lock().detach(key).is_some();
        if removed {
            self.discard(vec![key.to_string()]).await;
        }
        removed
    }

    /// Whether a fresh entry exists. Does not touch hit/miss counters or
    /// access metadata, and does not delete expired entries.
    pub fn has(&self, key: &str) -> bool {
        let now = self.clock.now_ms();
        self.state
            .lock()
            .index
            .get(key)
            .is_some_and(|m| !m.is_expired_at(now))
    }

    /// Drop every entry and reset counters.
    pub async fn clear(&self) {
        {
            let mut state = self.state.lock();
            let next_seq = state.next_seq;
            *state = StoreState {
                next_seq,
                ..StoreState::default()
            };
        }
        if let Err(e) = self.backend.clear().await {
            tracing::warn!(backend = self.backend.name(), error = %e, "cache clear failed on backend");
        }
    }

    /// All indexed keys in insertion order. Expired entries are included
    /// until a lookup or [`cleanup`](Self::cleanup) removes them.
    pub fn keys(&self) -> Vec<String> {
        let state = self.state.lock();
        let mut keys: Vec<(&String, u64)> = state.index.iter().map(|(k, m)| (k, m.seq)).collect();
        keys.sort_by_key(|(_, seq)| *seq);
        keys.into_iter().map(|(k, _)| k.clone()).collect()
    }

    /// Delete every expired entry. Returns how many were removed.
    pub async fn cleanup(&self) -> usize {
        let now = self.clock.now_ms();
        let expired: Vec<String> = {
            let mut state = self.state.lock();
            let expired: Vec<String> = state
                .index
                .iter()
                .filter(|(_, m)| m.is_expired_at(now))
                .map(|(k, _)| k.clone())
                .collect();
            for key in &expired {
                state.detach(key);
            }
            expired
        };

        let count = expired.len();
        self.discard(expired).await;
        if count > 0 {
            tracing::debug!(count, "removed expired cache entries");
        }
        count
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            total_entries: state.index.len(),
            total_size: state.current_size,
            max_size: self.max_size,
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            hit_rate: hit_rate(state.hits, state.misses),
            oldest_entry: state.index.values().map(|m| m.created_at).min(),
            newest_entry: state.index.values().map(|m| m.created_at).max(),
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().index.is_empty()
    }

    pub fn current_size(&self) -> u64 {
        self.state.lock().current_size
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Best-effort backend deletes for keys already removed from the index.
    async fn discard(&self, keys: Vec<String>) {
        for key in keys {
            if let Err(e) = self.backend.remove(&key).await {
                tracing::warn!(key = %key, backend = self.backend.name(), error = %e, "cache delete failed on backend");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::entry::EntryMetadata;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn store(max_size: u64, policy: EvictionPolicy) -> (CacheStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let store = CacheStore::new(
            Arc::new(MemoryBackend::new()),
            max_size,
            policy,
            clock.clone(),
        );
        (store, clock)
    }

    fn entry(clock: &ManualClock, size: usize, max_age: Duration) -> CacheEntry {
        CacheEntry::new(
            "",
            200,
            BTreeMap::new(),
            Bytes::from(vec![b'x'; size]),
            EntryMetadata {
                url: "https://api.test/".into(),
                method: "GET".into(),
                ..Default::default()
            },
            clock.now_ms(),
            max_age,
        )
    }

    const MINUTE: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn basic_put_and_get() {
        let (store, clock) = store(1_000, EvictionPolicy::Lru);
        store.put("a", entry(&clock, 10, MINUTE)).await;

        let hit = store.get("a").await.unwrap();
        assert_eq!(hit.key, "a");
        assert_eq!(hit.size_bytes, 10);
        assert!(store.get("missing").await.is_none());

        let stats = store.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate, 0.5);
    }

    #[tokio::test]
    async fn expired_entry_is_a_miss_and_deleted() {
        let (store, clock) = store(1_000, EvictionPolicy::Lru);
        store.put("a", entry(&clock, 10, MINUTE)).await;

        clock.advance(Duration::from_secs(61));
        assert!(store.get("a").await.is_none());
        assert_eq!(store.len(), 0);
        assert_eq!(store.current_size(), 0);
        assert_eq!(store.stats().misses, 1);
    }

    #[tokio::test]
    async fn zero_max_age_is_immediately_expired() {
        let (store, clock) = store(1_000, EvictionPolicy::Lru);
        store.put("a", entry(&clock, 10, Duration::ZERO)).await;

        clock.advance(Duration::from_millis(1));
        assert!(store.get("a").await.is_none());
    }

    #[tokio::test]
    async fn size_is_recomputed_on_write() {
        let (store, clock) = store(1_000, EvictionPolicy::Lru);
        let mut e = entry(&clock, 10, MINUTE);
        e.size_bytes = 9_999;
        store.put("a", e).await;

        assert_eq!(store.current_size(), 10);
        assert_eq!(store.get("a").await.unwrap().size_bytes, 10);
    }

    #[tokio::test]
    async fn overwrite_replaces_size() {
        let (store, clock) = store(1_000, EvictionPolicy::Lru);
        store.put("a", entry(&clock, 100, MINUTE)).await;
        store.put("a", entry(&clock, 40, MINUTE)).await;

        assert_eq!(store.len(), 1);
        assert_eq!(store.current_size(), 40);
    }

    #[tokio::test]
    async fn lru_evicts_in_access_order() {
        let (store, clock) = store(300, EvictionPolicy::Lru);
        for key in ["a", "b", "c"] {
            store.put(key, entry(&clock, 100, MINUTE)).await;
            clock.advance(Duration::from_millis(10));
        }
        // Access order: a (oldest), b, c (newest).
        for key in ["a", "b", "c"] {
            store.get(key).await.unwrap();
            clock.advance(Duration::from_millis(10));
        }

        // Needs 100 bytes and the store down to 210: evicts a, then b.
        store.put("d", entry(&clock, 100, MINUTE)).await;
        assert!(!store.has("a"));
        assert!(!store.has("b"));
        assert!(store.has("c"));
        assert!(store.has("d"));
        assert_eq!(store.stats().evictions, 2);
    }

    #[tokio::test]
    async fn lru_promotion_protects_recent_entry() {
        let (store, clock) = store(300, EvictionPolicy::Lru);
        for key in ["a", "b", "c"] {
            store.put(key, entry(&clock, 100, MINUTE)).await;
            clock.advance(Duration::from_millis(10));
        }
        store.get("a").await.unwrap();

        store.put("d", entry(&clock, 100, MINUTE)).await;
        assert!(store.has("a"));
        assert!(!store.has("b"));
        assert!(!store.has("c"));
    }

    #[tokio::test]
    async fn lfu_evicts_least_used() {
        let (store, clock) = store(300, EvictionPolicy::Lfu);
        for key in ["a", "b", "c"] {
            store.put(key, entry(&clock, 100, MINUTE)).await;
        }
        for _ in 0..3 {
            store.get("a").await.unwrap();
            store.get("c").await.unwrap();
        }
        store.get("b").await.unwrap();

        // Evicting "b" alone brings 200 + 10 down to the 210 target.
        store.put("d", entry(&clock, 10, MINUTE)).await;
        assert!(!store.has("b"));
        assert!(store.has("a"));
    }

    #[tokio::test]
    async fn fifo_ignores_hits() {
        let (store, clock) = store(200, EvictionPolicy::Fifo);
        store.put("a", entry(&clock, 100, MINUTE)).await;
        clock.advance(Duration::from_millis(1));
        store.put("b", entry(&clock, 100, MINUTE)).await;
        store.get("a").await.unwrap();

        store.put("c", entry(&clock, 40, MINUTE)).await;
        assert!(!store.has("a"));
    }

    #[tokio::test]
    async fn ttl_evicts_soonest_expiry() {
        let (store, clock) = store(200, EvictionPolicy::Ttl);
        store.put("long", entry(&clock, 100, Duration::from_secs(600))).await;
        store.put("short", entry(&clock, 100, Duration::from_secs(5))).await;

        store.put("new", entry(&clock, 40, MINUTE)).await;
        assert!(!store.has("short"));
        assert!(store.has("long"));
    }

    #[tokio::test]
    async fn eviction_reaches_seventy_percent() {
        let (store, clock) = store(1_000, EvictionPolicy::Fifo);
        for i in 0..10 {
            store.put(&format!("k{i}"), entry(&clock, 100, MINUTE)).await;
            clock.advance(Duration::from_millis(1));
        }
        assert_eq!(store.current_size(), 1_000);

        // 1000 + 10 > 1000: evict until size + 10 <= 700, i.e. four entries.
        store.put("small", entry(&clock, 10, MINUTE)).await;
        assert_eq!(store.current_size(), 610);
        assert_eq!(store.stats().evictions, 4);
        assert_eq!(store.keys().first().map(String::as_str), Some("k4"));
    }

    #[tokio::test]
    async fn size_bound_holds_across_many_puts() {
        let (store, clock) = store(1_000, EvictionPolicy::Lru);
        for i in 0..200u64 {
            let size = 17 + (i * 37 % 150) as usize;
            store.put(&format!("k{}", i % 60), entry(&clock, size, MINUTE)).await;
            clock.advance(Duration::from_millis(3));
            assert!(store.current_size() <= store.max_size());
        }
    }

    #[tokio::test]
    async fn oversized_entry_is_admitted_alone() {
        let (store, clock) = store(100, EvictionPolicy::Lru);
        store.put("a", entry(&clock, 50, MINUTE)).await;
        store.put("huge", entry(&clock, 500, MINUTE)).await;

        assert_eq!(store.keys(), vec!["huge".to_string()]);
        assert_eq!(store.current_size(), 500);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (store, clock) = store(1_000, EvictionPolicy::Lru);
        store.put("a", entry(&clock, 10, MINUTE)).await;

        assert!(store.delete("a").await);
        assert!(!store.delete("a").await);
        assert_eq!(store.current_size(), 0);
    }

    #[tokio::test]
    async fn has_does_not_count() {
        let (store, clock) = store(1_000, EvictionPolicy::Lru);
        store.put("a", entry(&clock, 10, MINUTE)).await;

        assert!(store.has("a"));
        assert!(!store.has("b"));
        let stats = store.stats();
        assert_eq!((stats.hits, stats.misses), (0, 0));

        clock.advance(Duration::from_secs(120));
        assert!(!store.has("a"));
        // Not deleted by has().
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn clear_resets_everything() {
        let (store, clock) = store(1_000, EvictionPolicy::Lru);
        store.put("a", entry(&clock, 10, MINUTE)).await;
        store.get("a").await;
        store.get("b").await;

        store.clear().await;
        store.clear().await;
        let stats = store.stats();
        assert_eq!(stats.total_entries, 0);
        assert_eq!(stats.total_size, 0);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.oldest_entry, None);
    }

    #[tokio::test]
    async fn keys_include_expired_until_cleanup() {
        let (store, clock) = store(1_000, EvictionPolicy::Lru);
        store.put("short", entry(&clock, 10, Duration::from_secs(1))).await;
        store.put("long", entry(&clock, 10, MINUTE)).await;

        clock.advance(Duration::from_secs(2));
        assert_eq!(store.keys(), vec!["short".to_string(), "long".to_string()]);

        assert_eq!(store.cleanup().await, 1);
        assert_eq!(store.keys(), vec!["long".to_string()]);
        assert_eq!(store.cleanup().await, 0);
        assert_eq!(store.current_size(), 10);
    }

    #[tokio::test]
    async fn stats_track_oldest_and_newest() {
        let (store, clock) = store(1_000, EvictionPolicy::Lru);
        let first = clock.now_ms();
        store.put("a", entry(&clock, 10, MINUTE)).await;
        clock.advance(Duration::from_secs(5));
        store.put("b", entry(&clock, 20, MINUTE)).await;

        let stats = store.stats();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.total_size, 30);
        assert_eq!(stats.oldest_entry, Some(first));
        assert_eq!(stats.newest_entry, Some(first + 5_000));
        assert_eq!(stats.hit_rate, 0.0);
    }

    struct FailingBackend;

    #[async_trait]
    impl StorageBackend for FailingBackend {
        fn name(&self) -> &'static str {
            "failing"
        }
        async fn load(&self, _key: &str) -> Result<Option<CacheEntry>, CacheError> {
            Err(std::io::Error::other("disk on fire").into())
        }
        async fn store(&self, _entry: &CacheEntry) -> Result<(), CacheError> {
            Err(std::io::Error::other("disk full").into())
        }
        async fn remove(&self, _key: &str) -> Result<(), CacheError> {
            Err(std::io::Error::other("read-only").into())
        }
        async fn clear(&self) -> Result<(), CacheError> {
            Err(std::io::Error::other("read-only").into())
        }
        async fn recover(&self) -> Result<Vec<EntryRecord>, CacheError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn storage_failures_degrade_to_misses() {
        let clock = Arc::new(ManualClock::new(0));
        let store = CacheStore::new(Arc::new(FailingBackend), 1_000, EvictionPolicy::Lru, clock.clone());

        store.put("a", entry(&clock, 10, MINUTE)).await;
        assert_eq!(store.len(), 0);
        assert_eq!(store.current_size(), 0);
        assert!(store.get("a").await.is_none());
        assert!(!store.delete("a").await);
        store.clear().await;
    }

    /// Memory backend whose writes take a while to land.
    struct SlowBackend {
        inner: Arc<MemoryBackend>,
        delay: Duration,
    }

    #[async_trait]
    impl StorageBackend for SlowBackend {
        fn name(&self) -> &'static str {
            "slow"
        }
        async fn load(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
            self.inner.load(key).await
        }
        async fn store(&self, entry: &CacheEntry) -> Result<(), CacheError> {
            tokio::time::sleep(self.delay).await;
            self.inner.store(entry).await
        }
        async fn remove(&self, key: &str) -> Result<(), CacheError> {
            self.inner.remove(key).await
        }
        async fn clear(&self) -> Result<(), CacheError> {
            self.inner.clear().await
        }
        async fn recover(&self) -> Result<Vec<EntryRecord>, CacheError> {
            self.inner.recover().await
        }
    }

    fn slow_store() -> (Arc<CacheStore>, Arc<MemoryBackend>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let inner = Arc::new(MemoryBackend::new());
        let backend = SlowBackend {
            inner: Arc::clone(&inner),
            delay: Duration::from_millis(50),
        };
        let store = Arc::new(CacheStore::new(
            Arc::new(backend),
            1_000,
            EvictionPolicy::Lru,
            clock.clone(),
        ));
        (store, inner, clock)
    }

    fn spawn_put(
        store: &Arc<CacheStore>,
        clock: &ManualClock,
        key: &'static str,
    ) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(store);
        let e = entry(clock, 10, MINUTE);
        tokio::spawn(async move { store.put(key, e).await })
    }

    #[tokio::test]
    async fn read_during_write_keeps_entry() {
        let (store, backend, clock) = slow_store();
        let put = spawn_put(&store, &clock, "k");
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(store.get("k").await.is_none());
        assert!(store.has("k"));

        put.await.unwrap();
        assert!(store.get("k").await.is_some());
        assert_eq!(store.len(), 1);
        assert_eq!(backend.len(), 1);
        assert_eq!(store.current_size(), 10);
    }

    #[tokio::test]
    async fn delete_during_write_leaves_no_record() {
        let (store, backend, clock) = slow_store();
        let put = spawn_put(&store, &clock, "k");
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(store.delete("k").await);
        put.await.unwrap();
        assert_eq!(store.len(), 0);
        assert!(backend.is_empty());
        assert_eq!(store.current_size(), 0);
    }

    #[tokio::test]
    async fn clear_during_write_leaves_no_record() {
        let (store, backend, clock) = slow_store();
        let put = spawn_put(&store, &clock, "k");
        tokio::time::sleep(Duration::from_millis(10)).await;

        store.clear().await;
        put.await.unwrap();
        assert!(store.is_empty());
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn overlapping_writes_settle_on_one_record() {
        let (store, backend, clock) = slow_store();
        let first = spawn_put(&store, &clock, "k");
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = spawn_put(&store, &clock, "k");

        first.await.unwrap();
        second.await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(backend.len(), 1);
        assert_eq!(store.current_size(), 10);
        assert!(store.get("k").await.is_some());
    }

    #[tokio::test]
    async fn concurrent_access_keeps_accounting_consistent() {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(CacheStore::new(
            Arc::new(MemoryBackend::new()),
            5_000,
            EvictionPolicy::Lru,
            clock.clone(),
        ));

        let mut handles = Vec::new();
        for t in 0..8u64 {
            let store = Arc::clone(&store);
            let clock = Arc::clone(&clock);
            handles.push(tokio::spawn(async move {
                for i in 0..200u64 {
                    let key = format!("k{}", (t * 31 + i) % 40);
                    match i % 4 {
                        0 => store.put(&key, entry(&clock, 50 + (i % 7) as usize * 10, MINUTE)).await,
                        1 => {
                            store.delete(&key).await;
                        }
                        _ => {
                            store.get(&key).await;
                        }
                    }
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let stats = store.stats();
        assert_eq!(stats.hits + stats.misses, 8 * 100);
        assert!(stats.total_size <= 5_000);

        let mut recomputed = 0;
        for key in store.keys() {
            recomputed += store.get(&key).await.map(|e| e.size_bytes).unwrap_or(0);
        }
        assert_eq!(recomputed, store.current_size());
    }

    #[tokio::test]
    async fn persistent_round_trip_through_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(50_000));

        let mut original = entry(&clock, 0, MINUTE);
        original.data = Bytes::from_static(b"{\"id\":1,\"name\":\"A\"}\x00\xfe");
        original.headers.insert("content-type".into(), "application/json".into());
        original.metadata.etag = Some("\"v7\"".into());

        for kind in [StorageKind::Persistent, StorageKind::Indexed] {
            let path = dir.path().join(kind.to_string());
            let store = CacheStore::open(kind, &path, 10_000, EvictionPolicy::Lru, clock.clone())
                .await
                .unwrap();
            store.put("GET:https://api.test/users/1", original.clone()).await;
            drop(store);

            let reopened = CacheStore::open(kind, &path, 10_000, EvictionPolicy::Lru, clock.clone())
                .await
                .unwrap();
            assert_eq!(reopened.len(), 1, "{kind}");
            let loaded = reopened.get("GET:https://api.test/users/1").await.unwrap();
            assert_eq!(loaded.data, original.data);
            assert_eq!(loaded.headers, original.headers);
            assert_eq!(loaded.status, original.status);
            assert_eq!(loaded.metadata, original.metadata);
        }
    }

    #[tokio::test]
    async fn reopen_trims_to_smaller_budget() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(0));

        let store = CacheStore::open(StorageKind::Indexed, dir.path(), 1_000, EvictionPolicy::Fifo, clock.clone())
            .await
            .unwrap();
        for i in 0..5 {
            store.put(&format!("k{i}"), entry(&clock, 100, MINUTE)).await;
            clock.advance(Duration::from_millis(1));
        }
        drop(store);

        let smaller = CacheStore::open(StorageKind::Indexed, dir.path(), 300, EvictionPolicy::Fifo, clock.clone())
            .await
            .unwrap();
        assert!(smaller.current_size() <= 300);
        assert!(smaller.has("k4"));
        assert!(!smaller.has("k0"));
    }

    #[tokio::test]
    async fn open_rejects_zero_budget() {
        let dir = tempfile::tempdir().unwrap();
        let result = CacheStore::open(
            StorageKind::Memory,
            dir.path(),
            0,
            EvictionPolicy::Lru,
            Arc::new(SystemClock),
        )
        .await;
        assert!(matches!(result, Err(CacheError::InvalidConfig(_))));
    }
}
