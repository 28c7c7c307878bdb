use crate::proxy::AppState;
use courier_cache::CacheError;
use courier_pipeline::CacheOptions;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid cache settings: {0}")]
    Invalid(#[from] CacheError),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub cache: CacheOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_admin_addr")]
    pub admin_addr: String,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_url")]
    pub url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = tokio::fs::read_to_string(path).await?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.cache.validate()?;
        Ok(config)
    }

    pub fn default_config() -> Self {
        Config {
            server: ServerConfig::default(),
            upstream: UpstreamConfig::default(),
            cache: CacheOptions::default(),
        }
    }
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            admin_addr: default_admin_addr(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: default_upstream_url(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// What a reload did, mostly for logging and tests.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReloadOutcome {
    pub cache_rebuilt: bool,
    pub upstream_updated: bool,
    pub restart_required: bool,
}

/// Compare old and new config and apply what can change at runtime.
///
/// - `[cache]` changed: rebuild the client and its store (memory caches start empty)
/// - upstream URL or timeout changed: used by the next request
/// - listen/admin address changed: WARN, ignored until restart
pub async fn diff_and_apply(old: &Config, new: &Config, state: &AppState) -> ReloadOutcome {
    let mut outcome = ReloadOutcome::default();

    if old.server != new.server {
        tracing::warn!(
            old_listen = %old.server.listen_addr,
            new_listen = %new.server.listen_addr,
            old_admin = %old.server.admin_addr,
            new_admin = %new.server.admin_addr,
            "server section changed, ignoring until restart"
        );
        outcome.restart_required = true;
    }

    if old.upstream != new.upstream {
        state.set_upstream(&new.upstream);
        tracing::info!(
            url = %new.upstream.url,
            timeout_ms = new.upstream.timeout_ms,
            "config reloaded: upstream changed"
        );
        outcome.upstream_updated = true;
    }

    if cache_changed(&old.cache, &new.cache) {
        match state.rebuild_client(&new.cache).await {
            Ok(()) => {
                tracing::info!(
                    strategy = %new.cache.strategy,
                    storage = %new.cache.storage,
                    eviction = %new.cache.eviction,
                    "config reloaded: cache rebuilt"
                );
                outcome.cache_rebuilt = true;
            }
            Err(e) => {
                tracing::error!(error = %e, "cache rebuild failed, keeping previous cache");
            }
        }
    }

    outcome
}

// CacheOptions carries a closure slot, so compare through the serialized form.
fn cache_changed(old: &CacheOptions, new: &CacheOptions) -> bool {
    match (serde_json::to_value(old), serde_json::to_value(new)) {
        (Ok(a), Ok(b)) => a != b,
        _ => true,
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_admin_addr() -> String {
    "0.0.0.0:9090".to_string()
}
fn default_sweep_interval_secs() -> u64 {
    30
}
fn default_upstream_url() -> String {
    "http://127.0.0.1:3000".to_string()
}
fn default_timeout_ms() -> u64 {
    5000
}
