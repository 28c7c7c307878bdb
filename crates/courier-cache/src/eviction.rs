use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Access bookkeeping the store keeps for every indexed entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccessMeta {
    /// Insertion sequence number, unique within a store. Breaks ties.
    pub seq: u64,
    pub created_at: u64,
    pub expires_at: u64,
    pub last_access: u64,
    pub access_count: u64,
    pub size_bytes: u64,
}

impl AccessMeta {
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        now_ms > self.expires_at
    }
}

/// Order in which entries are reclaimed when the store runs out of room.
///
/// - `Lru`: least recently accessed first (`last_access` ascending)
/// - `Lfu`: least frequently accessed first (`access_count` ascending)
/// - `Fifo`: oldest insertion first (`created_at` ascending), no promotion on hit
/// - `Ttl`: soonest to expire first (`expires_at` ascending)
///
/// Exact ties fall back to insertion order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    #[default]
    Lru,
    Lfu,
    Fifo,
    Ttl,
}

impl EvictionPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            EvictionPolicy::Lru => "LRU",
            EvictionPolicy::Lfu => "LFU",
            EvictionPolicy::Fifo => "FIFO",
            EvictionPolicy::Ttl => "TTL",
        }
    }

    fn rank(&self, meta: &AccessMeta) -> u64 {
        match self {
            EvictionPolicy::Lru => meta.last_access,
            EvictionPolicy::Lfu => meta.access_count,
            EvictionPolicy::Fifo => meta.created_at,
            EvictionPolicy::Ttl => meta.expires_at,
        }
    }

    /// Keys in eviction order, earliest-to-evict first.
    pub fn eviction_order<'a, I>(&self, entries: I) -> Vec<&'a str>
    where
        I: IntoIterator<Item = (&'a str, &'a AccessMeta)>,
    {
        let mut candidates: Vec<(&'a str, &'a AccessMeta)> = entries.into_iter().collect();
        candidates.sort_by_key(|(_, meta)| (self.rank(meta), meta.seq));
        candidates.into_iter().map(|(key, _)| key).collect()
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EvictionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lru" => Ok(EvictionPolicy::Lru),
            "lfu" => Ok(EvictionPolicy::Lfu),
            "fifo" => Ok(EvictionPolicy::Fifo),
            "ttl" => Ok(EvictionPolicy::Ttl),
            other => Err(format!("unknown eviction policy: {other}")),
        }
    }
}
