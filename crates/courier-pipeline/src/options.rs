use crate::keying::{CacheKeying, ExcludeRules, KeyGenerator};
use courier_cache::{CacheError, EvictionPolicy, StorageKind};
use http::Method;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// How a cacheable request is served.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheStrategy {
    /// Network, then cache on failure. Fresh responses refresh the cache.
    #[default]
    NetworkFirst,
    /// Fresh cache entry if present, otherwise network.
    CacheFirst,
    /// Never read or write the cache.
    NetworkOnly,
    /// Fresh cache entry or [`RequestError::CacheOnlyMiss`](crate::RequestError).
    CacheOnly,
    /// Serve a fresh cache entry and refresh it in the background.
    StaleWhileRevalidate,
}

impl CacheStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStrategy::NetworkFirst => "network-first",
            CacheStrategy::CacheFirst => "cache-first",
            CacheStrategy::NetworkOnly => "network-only",
            CacheStrategy::CacheOnly => "cache-only",
            CacheStrategy::StaleWhileRevalidate => "stale-while-revalidate",
        }
    }
}

impl fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "network-first" => Ok(CacheStrategy::NetworkFirst),
            "cache-first" => Ok(CacheStrategy::CacheFirst),
            "network-only" => Ok(CacheStrategy::NetworkOnly),
            "cache-only" => Ok(CacheStrategy::CacheOnly),
            "stale-while-revalidate" | "swr" => Ok(CacheStrategy::StaleWhileRevalidate),
            other => Err(format!("unknown cache strategy: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExcludeOptions {
    #[serde(default = "default_excluded_methods")]
    pub methods: Vec<String>,
    /// Regular expressions matched anywhere in the full request URL.
    #[serde(default)]
    pub paths: Vec<String>,
}

impl Default for ExcludeOptions {
    fn default() -> Self {
        Self {
            methods: default_excluded_methods(),
            paths: Vec::new(),
        }
    }
}

/// Caching configuration, usually the `[cache]` table of a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheOptions {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub strategy: CacheStrategy,
    #[serde(default = "default_max_age_ms")]
    pub max_age_ms: u64,
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: u64,
    #[serde(default)]
    pub eviction: EvictionPolicy,
    #[serde(default)]
    pub storage: StorageKind,
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,
    #[serde(default)]
    pub compress: bool,
    #[serde(default)]
    pub exclude_query: bool,
    #[serde(default)]
    pub exclude: ExcludeOptions,
    /// Pipeline priority of the cache interceptor.
    #[serde(default)]
    pub priority: i32,
    #[serde(skip)]
    pub key_generator: Option<KeyGenerator>,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            strategy: CacheStrategy::default(),
            max_age_ms: default_max_age_ms(),
            max_size_bytes: default_max_size_bytes(),
            eviction: EvictionPolicy::default(),
            storage: StorageKind::default(),
            storage_dir: default_storage_dir(),
            compress: false,
            exclude_query: false,
            exclude: ExcludeOptions::default(),
            priority: 0,
            key_generator: None,
        }
    }
}

impl CacheOptions {
    pub fn with_strategy(mut self, strategy: CacheStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age_ms = max_age.as_millis() as u64;
        self
    }

    pub fn with_key_generator(mut self, generator: KeyGenerator) -> Self {
        self.key_generator = Some(generator);
        self
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_millis(self.max_age_ms)
    }

    pub fn validate(&self) -> Result<(), CacheError> {
        if self.max_size_bytes == 0 {
            return Err(CacheError::InvalidConfig(
                "max_size_bytes must be greater than zero".into(),
            ));
        }
        if self.storage.is_durable() && self.storage_dir.as_os_str().is_empty() {
            return Err(CacheError::InvalidConfig(format!(
                "storage_dir is required for {} storage",
                self.storage
            )));
        }
        self.exclude_rules().map(|_| ())
    }

    pub fn keying(&self) -> CacheKeying {
        let keying = CacheKeying::new(self.exclude_query);
        match &self.key_generator {
            Some(generator) => keying.with_generator(generator.clone()),
            None => keying,
        }
    }

    pub fn exclude_rules(&self) -> Result<ExcludeRules, CacheError> {
        let methods = self
            .exclude
            .methods
            .iter()
            .map(|m| {
                Method::from_bytes(m.to_ascii_uppercase().as_bytes())
                    .map_err(|_| CacheError::InvalidConfig(format!("invalid HTTP method: {m}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let paths = self
            .exclude
            .paths
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    CacheError::InvalidConfig(format!("invalid exclude pattern {p:?}: {e}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ExcludeRules::new(methods, paths))
    }
}

fn default_enabled() -> bool {
    true
}

fn default_max_age_ms() -> u64 {
    5 * 60 * 1000
}

fn default_max_size_bytes() -> u64 {
    50 * 1024 * 1024
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from(".courier-cache")
}

fn default_excluded_methods() -> Vec<String> {
    ["POST", "PUT", "DELETE", "PATCH"]
        .into_iter()
        .map(String::from)
        .collect()
}
