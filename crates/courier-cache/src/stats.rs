use serde::Serialize;

/// Snapshot of store statistics.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub total_size: u64,
    pub max_size: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
    /// `created_at` of the oldest indexed entry.
    pub oldest_entry: Option<u64>,
    /// `created_at` of the newest indexed entry.
    pub newest_entry: Option<u64>,
}

/// `hits / (hits + misses)`, or 0 before any lookup.
pub fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total > 0 {
        hits as f64 / total as f64
    } else {
        0.0
    }
}
