#![cfg(test)]

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, OnceLock};

use crate::kernel::config::HostConfig;
use crate::kernel::constants::env_vars;
use crate::plugin_system::strategy::LoadStrategy;

// Environment variables are process-global; serialize the tests that touch
// them.
fn env_lock() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .expect("env lock poisoned")
}

struct EnvVar {
    name: &'static str,
}

impl EnvVar {
    fn set(name: &'static str, value: &str) -> Self {
        unsafe { std::env::set_var(name, value) };
        Self { name }
    }
}

impl Drop for EnvVar {
    fn drop(&mut self) {
        unsafe { std::env::remove_var(self.name) };
    }
}

#[test]
fn defaults_apply_without_environment() {
    let _guard = env_lock();
    let config = HostConfig::from_env();
    assert_eq!(config.plugins_dir, PathBuf::from("./plugins"));
    assert_eq!(config.loading_strategy, LoadStrategy::Auto);
    assert!(config.registry_url.is_none());
    assert_eq!(config.plugin_timeout_ms, 30_000);
    assert_eq!(config.validation_cache_size, 1000);
}

#[test]
fn environment_overrides_are_read() {
    let _guard = env_lock();
    let _dir = EnvVar::set(env_vars::PLUGINS_DIR, "/opt/plugins");
    let _url = EnvVar::set(env_vars::REGISTRY_URL, "http://registry.local");
    let _strategy = EnvVar::set(env_vars::LOADING_STRATEGY, "sequential");
    let _scan = EnvVar::set(env_vars::SCAN_TIMEOUT_MS, "1234");
    let _cache = EnvVar::set(env_vars::VALIDATION_CACHE_SIZE, "17");

    let config = HostConfig::from_env();
    assert_eq!(config.plugins_dir, PathBuf::from("/opt/plugins"));
    assert_eq!(config.registry_url.as_deref(), Some("http://registry.local"));
    assert_eq!(config.loading_strategy, LoadStrategy::Sequential);
    assert_eq!(config.scan_timeout_ms, 1234);
    assert_eq!(config.validation_cache_size, 17);
}

#[test]
fn invalid_values_fall_back_to_defaults() {
    let _guard = env_lock();
    let _strategy = EnvVar::set(env_vars::LOADING_STRATEGY, "warp-speed");
    let _scan = EnvVar::set(env_vars::SCAN_TIMEOUT_MS, "soon");

    let config = HostConfig::from_env();
    assert_eq!(config.loading_strategy, LoadStrategy::Auto);
    assert_eq!(config.scan_timeout_ms, 5000);
}

#[test]
fn batch_size_pins_bounded_parallel() {
    let _guard = env_lock();
    let _batch = EnvVar::set(env_vars::BATCH_SIZE, "3");
    let config = HostConfig::from_env();
    assert_eq!(config.loading_strategy, LoadStrategy::BoundedParallel(3));
    assert_eq!(config.batch_size, Some(3));
}

#[test]
fn scanner_config_carries_the_caps() {
    let _guard = env_lock();
    let _scan = EnvVar::set(env_vars::SCAN_TIMEOUT_MS, "250");
    let _size = EnvVar::set(env_vars::MAX_CONTENT_SIZE, "2048");

    let config = HostConfig::from_env();
    let scanner = config.scanner_config();
    assert_eq!(scanner.scan_timeout.as_millis(), 250);
    assert_eq!(scanner.max_content_size, 2048);
}
