//! Response cache store used by the courier request pipeline.
//!
//! A [`CacheStore`] keeps a size-bounded index of [`CacheEntry`] records in
//! memory and delegates body storage to a [`StorageBackend`]. When an insert
//! would overflow the budget, entries are reclaimed in the order chosen by the
//! configured [`EvictionPolicy`].

pub mod backend;
pub mod clock;
pub mod entry;
pub mod error;
pub mod eviction;
pub mod stats;
pub mod store;

pub use backend::{build_backend, StorageBackend, StorageKind};
pub use clock::{Clock, ManualClock, SystemClock};
pub use entry::{BodyEncoding, CacheEntry, EntryMetadata, EntryRecord};
pub use error::CacheError;
pub use eviction::{AccessMeta, EvictionPolicy};
pub use stats::CacheStats;
pub use store::CacheStore;
