use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::kernel::constants::{self, env_vars};
use crate::plugin_system::scanner::ScannerConfig;
use crate::plugin_system::strategy::LoadStrategy;
use crate::plugin_system::validator;

/// Host configuration, assembled from environment variables with defaults.
///
/// Every invalid value falls back to its default with a warning; the host
/// never refuses to start over configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    pub plugins_dir: PathBuf,
    pub registry_url: Option<String>,
    #[serde(skip, default = "default_strategy")]
    pub loading_strategy: LoadStrategy,
    pub batch_size: Option<usize>,
    pub plugin_timeout_ms: u64,
    pub scan_timeout_ms: u64,
    pub max_content_size: u64,
    pub max_plugin_size: u64,
    pub validation_cache_size: usize,
    pub validation_cache_ttl_secs: u64,
}

fn default_strategy() -> LoadStrategy {
    LoadStrategy::Auto
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            plugins_dir: PathBuf::from(constants::DEFAULT_PLUGINS_DIR),
            registry_url: None,
            loading_strategy: LoadStrategy::Auto,
            batch_size: None,
            plugin_timeout_ms: constants::DEFAULT_PLUGIN_TIMEOUT_MS,
            scan_timeout_ms: 5000,
            max_content_size: 1024 * 1024,
            max_plugin_size: constants::DEFAULT_MAX_PLUGIN_SIZE,
            validation_cache_size: validator::DEFAULT_CACHE_CAPACITY,
            validation_cache_ttl_secs: validator::DEFAULT_CACHE_TTL.as_secs(),
        }
    }
}

impl HostConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var(env_vars::PLUGINS_DIR) {
            if !dir.is_empty() {
                config.plugins_dir = PathBuf::from(dir);
            }
        }
        if let Ok(url) = std::env::var(env_vars::REGISTRY_URL) {
            if !url.is_empty() {
                config.registry_url = Some(url);
            }
        }
        if let Ok(raw) = std::env::var(env_vars::LOADING_STRATEGY) {
            match LoadStrategy::from_str(&raw) {
                Ok(strategy) => config.loading_strategy = strategy,
                Err(e) => warn!("{}; using '{}'", e, config.loading_strategy),
            }
        }
        config.batch_size = parse_env(env_vars::BATCH_SIZE);
        if let Some(bound) = config.batch_size {
            // An explicit batch size pins the bounded-parallel strategy.
            config.loading_strategy = LoadStrategy::BoundedParallel(bound.max(1));
        }
        if let Some(value) = parse_env(env_vars::SCAN_TIMEOUT_MS) {
            config.scan_timeout_ms = value;
        }
        if let Some(value) = parse_env(env_vars::MAX_CONTENT_SIZE) {
            config.max_content_size = value;
        }
        if let Some(value) = parse_env(env_vars::MAX_PLUGIN_SIZE) {
            config.max_plugin_size = value;
        }
        if let Some(value) = parse_env(env_vars::VALIDATION_CACHE_SIZE) {
            config.validation_cache_size = value;
        }
        if let Some(value) = parse_env(env_vars::VALIDATION_CACHE_TTL) {
            config.validation_cache_ttl_secs = value;
        }
        config
    }

    pub fn scanner_config(&self) -> ScannerConfig {
        ScannerConfig {
            max_content_size: self.max_content_size,
            scan_timeout: Duration::from_millis(self.scan_timeout_ms),
            ..ScannerConfig::default()
        }
    }

    pub fn plugin_timeout(&self) -> Duration {
        Duration::from_millis(self.plugin_timeout_ms)
    }

    pub fn validation_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.validation_cache_ttl_secs)
    }
}

fn parse_env<T: FromStr>(name: &str) -> Option<T> {
    match std::env::var(name) {
        Ok(raw) if !raw.is_empty() => match raw.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("ignoring invalid value '{}' for {}", raw, name);
                None
            }
        },
        _ => None,
    }
}
