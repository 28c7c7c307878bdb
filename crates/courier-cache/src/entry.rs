use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// How the stored body bytes are encoded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyEncoding {
    #[default]
    Identity,
    Gzip,
}

/// Provenance of a cached exchange, kept for conditional revalidation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub url: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

/// One cached HTTP exchange.
///
/// Timestamps are milliseconds since the Unix epoch. `size_bytes` always
/// mirrors `data.len()`; the store recomputes it on every write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub data: Bytes,
    pub encoding: BodyEncoding,
    pub headers: BTreeMap<String, String>,
    pub status: u16,
    pub created_at: u64,
    pub expires_at: u64,
    pub size_bytes: u64,
    pub metadata: EntryMetadata,
}

impl CacheEntry {
    pub fn new(
        key: impl Into<String>,
        status: u16,
        headers: BTreeMap<String, String>,
        data: Bytes,
        metadata: EntryMetadata,
        created_at: u64,
        max_age: Duration,
    ) -> Self {
        let size_bytes = data.len() as u64;
        Self {
            key: key.into(),
            data,
            encoding: BodyEncoding::Identity,
            headers,
            status,
            created_at,
            expires_at: created_at.saturating_add(max_age.as_millis() as u64),
            size_bytes,
            metadata,
        }
    }

    pub fn with_encoding(mut self, encoding: BodyEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// An entry is expired strictly after `expires_at`; with `max_age = 0`
    /// it expires on the first millisecond after creation.
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        now_ms > self.expires_at
    }

    pub fn ttl_remaining(&self, now_ms: u64) -> Option<Duration> {
        if self.is_expired_at(now_ms) {
            None
        } else {
            Some(Duration::from_millis(self.expires_at - now_ms))
        }
    }

    pub fn recompute_size(&mut self) {
        self.size_bytes = self.data.len() as u64;
    }

    /// Everything except the body, as persisted in index and metadata files.
    pub fn record(&self) -> EntryRecord {
        EntryRecord {
            key: self.key.clone(),
            status: self.status,
            headers: self.headers.clone(),
            encoding: self.encoding,
            created_at: self.created_at,
            expires_at: self.expires_at,
            size_bytes: self.size_bytes,
            metadata: self.metadata.clone(),
        }
    }

    pub fn from_record(record: EntryRecord, data: Bytes) -> Self {
        Self {
            key: record.key,
            data,
            encoding: record.encoding,
            headers: record.headers,
            status: record.status,
            created_at: record.created_at,
            expires_at: record.expires_at,
            size_bytes: record.size_bytes,
            metadata: record.metadata,
        }
    }
}

/// Serializable description of a [`CacheEntry`] without its body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRecord {
    pub key: String,
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub encoding: BodyEncoding,
    pub created_at: u64,
    pub expires_at: u64,
    pub size_bytes: u64,
    pub metadata: EntryMetadata,
}
