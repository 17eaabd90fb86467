/// Version of the host itself, used for manifest compatibility bounds.
pub const HOST_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default plugin root when `PLUGINS_DIR` is unset.
pub const DEFAULT_PLUGINS_DIR: &str = "./plugins";

/// Default per-plugin load timeout in milliseconds.
pub const DEFAULT_PLUGIN_TIMEOUT_MS: u64 = 30_000;

/// Default maximum accepted archive size in bytes (50 MiB).
pub const DEFAULT_MAX_PLUGIN_SIZE: u64 = 50 * 1024 * 1024;

/// Environment variable names understood by the host.
pub mod env_vars {
    pub const PLUGINS_DIR: &str = "PLUGINS_DIR";
    pub const REGISTRY_URL: &str = "PLUGIN_REGISTRY_URL";
    pub const LOADING_STRATEGY: &str = "PLUGIN_LOADING_STRATEGY";
    pub const BATCH_SIZE: &str = "PLUGIN_BATCH_SIZE";
    pub const SCAN_TIMEOUT_MS: &str = "PLUGIN_REGEX_TIMEOUT_MS";
    pub const MAX_CONTENT_SIZE: &str = "PLUGIN_MAX_CONTENT_SIZE";
    pub const MAX_PLUGIN_SIZE: &str = "MAX_PLUGIN_SIZE";
    pub const VALIDATION_CACHE_SIZE: &str = "PLUGIN_VALIDATION_CACHE_SIZE";
    pub const VALIDATION_CACHE_TTL: &str = "PLUGIN_VALIDATION_CACHE_TTL";
}
