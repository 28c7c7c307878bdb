use thiserror::Error;

/// Failures raised by storage backends and store construction.
///
/// Request paths never see these directly: the store degrades a failed read
/// to a miss and logs failed writes.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt cache record {path}: {reason}")]
    CorruptRecord { path: String, reason: String },

    #[error("invalid cache configuration: {0}")]
    InvalidConfig(String),
}
