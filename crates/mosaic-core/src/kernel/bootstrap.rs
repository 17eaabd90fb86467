use std::sync::Arc;

use log::info;
use tokio_util::sync::CancellationToken;

use crate::event::EventBus;
use crate::kernel::config::HostConfig;
use crate::kernel::constants;
use crate::kernel::error::Result;
use crate::plugin_system::breaker::CircuitBreakerRegistry;
use crate::plugin_system::compat::CompatibilityEngine;
use crate::plugin_system::guard::GuardRegistry;
use crate::plugin_system::loader::{LoadResult, LoaderConfig, PluginLoader};
use crate::plugin_system::scanner::UnsafeImportScanner;
use crate::plugin_system::services::ServiceManager;
use crate::plugin_system::state::PluginStateMachine;
use crate::plugin_system::traits::{LibraryModuleHost, ModuleHost};
use crate::plugin_system::validator::ManifestValidator;
use crate::plugin_system::version::PluginVersion;

/// The host application: the single long-lived owner of every component of
/// the plugin lifecycle engine. Components are passed into the loader
/// explicitly; nothing is process-global.
pub struct HostApplication {
    config: HostConfig,
    bus: Arc<EventBus>,
    states: Arc<PluginStateMachine>,
    guards: Arc<GuardRegistry>,
    services: Arc<ServiceManager>,
    breakers: Arc<CircuitBreakerRegistry>,
    loader: Arc<PluginLoader>,
    cancel: CancellationToken,
}

impl HostApplication {
    /// Build a host from configuration with the native module host.
    pub fn new(config: HostConfig) -> Result<Self> {
        Self::with_module_host(config, Arc::new(LibraryModuleHost::new()))
    }

    /// Build a host with a caller-supplied module host (static registration
    /// or tests).
    pub fn with_module_host(config: HostConfig, module_host: Arc<dyn ModuleHost>) -> Result<Self> {
        let host_version = PluginVersion::parse(constants::HOST_VERSION)
            .map_err(crate::plugin_system::error::PluginSystemError::from)?;

        let bus = Arc::new(EventBus::new());
        let states = Arc::new(PluginStateMachine::new(Arc::clone(&bus)));
        let guards = Arc::new(GuardRegistry::new());
        let services = Arc::new(ServiceManager::new());
        let breakers = Arc::new(CircuitBreakerRegistry::new(Arc::clone(&bus)));
        let validator = Arc::new(ManifestValidator::with_cache(
            config.validation_cache_size,
            config.validation_cache_ttl(),
        ));
        let scanner = Arc::new(UnsafeImportScanner::new(config.scanner_config()));
        let compat = Arc::new(CompatibilityEngine::new());

        let loader = Arc::new(PluginLoader::new(
            host_version,
            LoaderConfig {
                plugins_dir: config.plugins_dir.clone(),
                strategy: config.loading_strategy,
                plugin_timeout: config.plugin_timeout(),
            },
            Arc::clone(&bus),
            Arc::clone(&states),
            Arc::clone(&guards),
            Arc::clone(&services),
            Arc::clone(&breakers),
            validator,
            scanner,
            compat,
            module_host,
        ));

        Ok(Self {
            config,
            bus,
            states,
            guards,
            services,
            breakers,
            loader,
            cancel: CancellationToken::new(),
        })
    }

    /// Run the full load pipeline against the configured plugin directory.
    pub async fn run_load(&self) -> Result<LoadResult> {
        info!(
            "loading plugins from {} with strategy {}",
            self.config.plugins_dir.display(),
            self.config.loading_strategy
        );
        Ok(self.loader.load_all(Some(self.cancel.child_token())).await?)
    }

    /// Tear down every loaded plugin in reverse topological order.
    pub async fn shutdown(&self) -> Result<()> {
        self.cancel.cancel();
        let mut loaded = self.loader.loaded_plugins().await;
        // Dependents unload before their dependencies via force cascading;
        // reverse name order keeps the walk deterministic.
        loaded.reverse();
        for name in loaded {
            if self.loader.get_plugin(&name).await.is_some() {
                self.loader.unload(&name, true).await?;
            }
        }
        info!("host shut down");
        Ok(())
    }

    /// Request cancellation of the in-flight load run.
    pub fn cancel_load(&self) {
        self.cancel.cancel();
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn state_machine(&self) -> &Arc<PluginStateMachine> {
        &self.states
    }

    pub fn guard_registry(&self) -> &Arc<GuardRegistry> {
        &self.guards
    }

    pub fn service_manager(&self) -> &Arc<ServiceManager> {
        &self.services
    }

    pub fn circuit_breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn loader(&self) -> &Arc<PluginLoader> {
        &self.loader
    }
}
