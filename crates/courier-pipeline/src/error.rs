use std::time::Duration;
use thiserror::Error;

/// Failure of the network leg, reported by a [`Transport`](crate::Transport).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NetworkError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Why a request through the pipeline failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// `cache-only` strategy and nothing fresh in the cache.
    #[error("cache miss in cache-only mode: {key}")]
    CacheOnlyMiss { key: String },

    /// A hook failed. Not retried by the pipeline.
    #[error("interceptor {name} failed: {message}")]
    Interceptor { name: String, message: String },
}

impl RequestError {
    pub fn interceptor(name: impl Into<String>, message: impl Into<String>) -> Self {
        RequestError::Interceptor {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn is_network(&self) -> bool {
        matches!(self, RequestError::Network(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_only_miss_message() {
        let err = RequestError::CacheOnlyMiss {
            key: "GET:https://api.test/users/1".into(),
        };
        assert_eq!(
            err.to_string(),
            "cache miss in cache-only mode: GET:https://api.test/users/1"
        );
        assert!(!err.is_network());
    }

    #[test]
    fn network_errors_are_transparent() {
        let err: RequestError = NetworkError::Connect("refused".into()).into();
        assert!(err.is_network());
        assert_eq!(err.to_string(), "connection failed: refused");
    }
}
