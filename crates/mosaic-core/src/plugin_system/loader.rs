use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant, SystemTime};

use log::{info, warn};
use serde_json::Value;
use tokio::fs;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::event::{EventBus, PluginEvent};
use crate::plugin_system::breaker::CircuitBreakerRegistry;
use crate::plugin_system::compat::CompatibilityEngine;
use crate::plugin_system::dependency::DependencyGraph;
use crate::plugin_system::error::{PluginSystemError, PluginSystemErrorSource};
use crate::plugin_system::guard::{GuardRegistration, GuardRegistry, GuardScope};
use crate::plugin_system::manifest::{GuardDecl, PluginManifest, RawManifest};
use crate::plugin_system::scanner::UnsafeImportScanner;
use crate::plugin_system::services::{ServiceFactory, ServiceManager, ServiceOptions};
use crate::plugin_system::state::{PluginState, PluginStateMachine, StateTransition};
use crate::plugin_system::strategy::{
    LoadOrchestrator, LoadStrategy, OrchestratorConfig, PerformanceSample,
};
use crate::plugin_system::traits::{ComponentKind, ModuleHost};
use crate::plugin_system::validator::{ManifestValidator, ValidationSeverity};
use crate::plugin_system::version::PluginVersion;

/// Name of the manifest file inside every plugin directory.
pub const MANIFEST_FILE_NAME: &str = "plugin.manifest.json";
/// Default entry file when the manifest does not name one.
pub const DEFAULT_ENTRY_FILE: &str = "index.js";

/// Loader settings, usually derived from the host configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub plugins_dir: PathBuf,
    pub strategy: LoadStrategy,
    pub plugin_timeout: Duration,
}

/// A discovered plugin directory with its surface-parsed manifest.
#[derive(Debug, Clone)]
pub struct Discovery {
    pub directory: PathBuf,
    pub manifest: PluginManifest,
    /// Manifest document after interface migration, reserialized; the
    /// validation cache keys on these bytes.
    pub document_bytes: Vec<u8>,
    pub entry: String,
    pub warnings: Vec<String>,
}

/// Runtime twin of a loaded plugin. Exclusively owned by the loader and
/// destroyed on unload.
pub struct PluginRecord {
    pub manifest: PluginManifest,
    pub descriptor: crate::plugin_system::traits::ModuleDescriptor,
    pub provider_tokens: Vec<String>,
    pub registered_guards: Vec<String>,
    pub loaded_at: SystemTime,
    pub load_duration: Duration,
}

/// One per-plugin failure in a load result.
#[derive(Debug, Clone)]
pub struct PluginFailure {
    pub plugin: String,
    pub kind: &'static str,
    pub message: String,
}

impl PluginFailure {
    fn from_error(plugin: &str, error: &PluginSystemError) -> Self {
        Self {
            plugin: plugin.to_string(),
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Outcome of a full load run.
#[derive(Debug, Clone, Default)]
pub struct LoadResult {
    pub loaded: Vec<String>,
    pub failed: Vec<PluginFailure>,
    /// Directories skipped at discovery (no manifest, no entry file, or an
    /// unreadable document).
    pub skipped: Vec<String>,
    pub sample: PerformanceSample,
}

/// Aggregate loader statistics.
#[derive(Debug, Clone)]
pub struct LoaderStats {
    pub discovered: usize,
    pub loaded: usize,
    pub failed: usize,
    pub guards_registered: usize,
    pub services: crate::plugin_system::services::ServiceStats,
    pub validation_cache: crate::plugin_system::validator::CacheStats,
}

/// The plugin loader: discovery, validation pipeline, module instantiation,
/// registration and teardown.
pub struct PluginLoader {
    host_version: PluginVersion,
    config: LoaderConfig,
    bus: Arc<EventBus>,
    states: Arc<PluginStateMachine>,
    guards: Arc<GuardRegistry>,
    services: Arc<ServiceManager>,
    breakers: Arc<CircuitBreakerRegistry>,
    validator: Arc<ManifestValidator>,
    scanner: Arc<UnsafeImportScanner>,
    compat: Arc<CompatibilityEngine>,
    module_host: Arc<dyn ModuleHost>,
    loaded: Mutex<HashMap<String, Arc<PluginRecord>>>,
}

struct LoadContext {
    directory: PathBuf,
    entry: String,
    manifest: PluginManifest,
    document_bytes: Vec<u8>,
}

impl PluginLoader {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        host_version: PluginVersion,
        config: LoaderConfig,
        bus: Arc<EventBus>,
        states: Arc<PluginStateMachine>,
        guards: Arc<GuardRegistry>,
        services: Arc<ServiceManager>,
        breakers: Arc<CircuitBreakerRegistry>,
        validator: Arc<ManifestValidator>,
        scanner: Arc<UnsafeImportScanner>,
        compat: Arc<CompatibilityEngine>,
        module_host: Arc<dyn ModuleHost>,
    ) -> Self {
        Self {
            host_version,
            config,
            bus,
            states,
            guards,
            services,
            breakers,
            validator,
            scanner,
            compat,
            module_host,
            loaded: Mutex::new(HashMap::new()),
        }
    }

    /// Enumerate immediate subdirectories of the plugin root. Directories
    /// without a manifest or entry file are skipped with a warning; archives
    /// with a broken identity or a duplicate name become failures.
    pub async fn discover_all(
        &self,
    ) -> Result<(Vec<Discovery>, Vec<PluginFailure>, Vec<String>), PluginSystemError> {
        let root = &self.config.plugins_dir;
        let mut read_dir =
            fs::read_dir(root)
                .await
                .map_err(|e| PluginSystemError::LoadingError {
                    plugin: root.display().to_string(),
                    path: Some(root.clone()),
                    source: Box::new(PluginSystemErrorSource::Io(e)),
                })?;

        let mut directories = Vec::new();
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| PluginSystemError::LoadingError {
                plugin: root.display().to_string(),
                path: Some(root.clone()),
                source: Box::new(PluginSystemErrorSource::Io(e)),
            })?
        {
            match entry.file_type().await {
                Ok(ft) if ft.is_dir() => directories.push(entry.path()),
                _ => {}
            }
        }
        directories.sort();

        let mut discoveries: Vec<Discovery> = Vec::new();
        let mut failures: Vec<PluginFailure> = Vec::new();
        let mut skipped: Vec<String> = Vec::new();
        let mut seen: HashMap<String, PathBuf> = HashMap::new();

        for directory in directories {
            let dir_label = directory
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| directory.display().to_string());

            match self.discover_one(&directory, &dir_label).await {
                Ok(Some(mut discovery)) => {
                    let name = discovery.manifest.name.clone();
                    if let Some(first) = seen.get(&name) {
                        let error = PluginSystemError::DuplicatePlugin {
                            plugin: name.clone(),
                            first: first.clone(),
                        };
                        warn!("{}", error);
                        failures.push(PluginFailure::from_error(&name, &error));
                        continue;
                    }
                    seen.insert(name.clone(), directory.clone());
                    if name != dir_label {
                        let note = format!(
                            "manifest name '{}' differs from directory '{}'",
                            name, dir_label
                        );
                        warn!("{}", note);
                        discovery.warnings.push(note);
                    }
                    self.states
                        .transition(&name, StateTransition::Rediscover, None);
                    self.bus.publish(PluginEvent::Discovered {
                        plugin: name.clone(),
                        version: discovery.manifest.version.to_string(),
                    });
                    discoveries.push(discovery);
                }
                Ok(None) => skipped.push(dir_label),
                Err(error) => {
                    warn!("discovery failed for '{}': {}", dir_label, error);
                    failures.push(PluginFailure::from_error(&dir_label, &error));
                }
            }
        }

        Ok((discoveries, failures, skipped))
    }

    /// Discover a single plugin directory. `Ok(None)` means skip-with-warning.
    async fn discover_one(
        &self,
        directory: &PathBuf,
        dir_label: &str,
    ) -> Result<Option<Discovery>, PluginSystemError> {
        let manifest_path = directory.join(MANIFEST_FILE_NAME);
        let bytes = match fs::read(&manifest_path).await {
            Ok(bytes) => bytes,
            Err(_) => {
                warn!("skipping '{}': no {}", dir_label, MANIFEST_FILE_NAME);
                return Ok(None);
            }
        };

        let document: Value = match serde_json::from_slice(&bytes) {
            Ok(document) => document,
            Err(e) => {
                warn!("skipping '{}': unreadable manifest: {}", dir_label, e);
                return Ok(None);
            }
        };

        // Interface migration runs before any validation.
        let (document, migration_path) = self.compat.migrate_document(dir_label, document)?;
        if !migration_path.is_empty() {
            info!(
                "migrated manifest of '{}' through {:?}",
                dir_label, migration_path
            );
        }
        let document_bytes = serde_json::to_vec(&document).map_err(|e| {
            PluginSystemError::InternalError(format!("manifest reserialization failed: {}", e))
        })?;

        let raw: RawManifest = serde_json::from_value(document).map_err(|e| {
            PluginSystemError::ManifestInvalid {
                plugin: dir_label.to_string(),
                errors: vec![e.to_string()],
            }
        })?;
        let manifest =
            PluginManifest::from_raw(&raw).map_err(|errors| PluginSystemError::ManifestInvalid {
                plugin: dir_label.to_string(),
                errors,
            })?;

        let entry = manifest
            .main
            .clone()
            .unwrap_or_else(|| DEFAULT_ENTRY_FILE.to_string());
        if !fs::try_exists(directory.join(&entry)).await.unwrap_or(false) {
            warn!("skipping '{}': entry file '{}' not found", dir_label, entry);
            return Ok(None);
        }

        Ok(Some(Discovery {
            directory: directory.clone(),
            manifest,
            document_bytes,
            entry,
            warnings: Vec::new(),
        }))
    }

    /// Full pipeline: discover, build the graph, run the orchestrator, and
    /// register everything that loads.
    ///
    /// The result is `Err` only when a critical plugin failed or the root
    /// directory was unreadable; per-plugin failures are in the result.
    pub async fn load_all(
        self: &Arc<Self>,
        cancel: Option<CancellationToken>,
    ) -> Result<LoadResult, PluginSystemError> {
        let cancel = cancel.unwrap_or_default();
        let (discoveries, mut failures, skipped) = self.discover_all().await?;

        let graph = DependencyGraph::build(discoveries.iter().map(|d| &d.manifest));
        let plan = graph.plan();

        // Graph exclusions become failed plugins before anything loads.
        for cycle in &plan.cycles {
            let error = PluginSystemError::DependencyCycle {
                members: cycle.clone(),
            };
            self.bus.publish(PluginEvent::Error {
                plugin: None,
                kind: error.kind().to_string(),
                message: error.to_string(),
            });
            for member in cycle {
                self.mark_failed(member, &error, &mut failures);
                self.bus.publish(PluginEvent::DependencyFailed {
                    plugin: member.clone(),
                    reason: error.to_string(),
                });
            }
        }
        for unsatisfied in &plan.unsatisfied {
            // A dependency that was never discovered is missing; an excluded
            // one makes its dependents unsatisfied.
            let error = if graph.contains(&unsatisfied.dependency) {
                PluginSystemError::DependencyUnsatisfied {
                    plugin: unsatisfied.plugin.clone(),
                    dependency: unsatisfied.dependency.clone(),
                }
            } else {
                PluginSystemError::DependencyMissing {
                    plugin: unsatisfied.plugin.clone(),
                    dependency: unsatisfied.dependency.clone(),
                }
            };
            self.mark_failed(&unsatisfied.plugin, &error, &mut failures);
            self.bus.publish(PluginEvent::DependencyFailed {
                plugin: unsatisfied.plugin.clone(),
                reason: error.to_string(),
            });
        }

        for (batch_index, batch) in plan.batches.iter().enumerate() {
            for plugin in batch {
                self.bus.publish(PluginEvent::DependencyResolved {
                    plugin: plugin.clone(),
                    batch: batch_index,
                });
            }
        }

        let critical: HashSet<String> = discoveries
            .iter()
            .filter(|d| d.manifest.critical)
            .map(|d| d.manifest.name.clone())
            .collect();

        // A critical plugin excluded by the graph aborts before any load.
        let excluded = plan.excluded();
        if let Some(excluded_critical) = excluded.iter().find(|p| critical.contains(*p)) {
            let reason = failures
                .iter()
                .find(|f| &f.plugin == excluded_critical)
                .map(|f| f.message.clone())
                .unwrap_or_else(|| "excluded from load order".to_string());
            return Err(PluginSystemError::CriticalPluginFailed {
                plugin: excluded_critical.clone(),
                reason,
            });
        }

        let contexts: Arc<HashMap<String, LoadContext>> = Arc::new(
            discoveries
                .into_iter()
                .map(|d| {
                    (
                        d.manifest.name.clone(),
                        LoadContext {
                            directory: d.directory,
                            entry: d.entry,
                            manifest: d.manifest,
                            document_bytes: d.document_bytes,
                        },
                    )
                })
                .collect(),
        );
        let failed: Arc<StdMutex<HashSet<String>>> =
            Arc::new(StdMutex::new(excluded.into_iter().collect()));

        let orchestrator = LoadOrchestrator::new(Arc::clone(&self.breakers), Arc::clone(&self.bus));
        let orchestrator_config = OrchestratorConfig {
            strategy: self.config.strategy,
            plugin_timeout: self.config.plugin_timeout,
            critical: critical.clone(),
        };

        let loader = Arc::clone(self);
        let load_contexts = Arc::clone(&contexts);
        let load_failed = Arc::clone(&failed);
        let load_cancel = cancel.clone();
        let settled_failed = Arc::clone(&failed);
        let outcome = orchestrator
            .run(
                &plan.batches,
                &orchestrator_config,
                &cancel,
                move |name: String| {
                    let loader = Arc::clone(&loader);
                    let contexts = Arc::clone(&load_contexts);
                    let failed = Arc::clone(&load_failed);
                    let cancel = load_cancel.clone();
                    async move { loader.load_single(&name, &contexts, &failed, &cancel).await }
                },
                // Record failures between batches so dependents in later
                // batches cascade instead of loading.
                move |name, result| {
                    if result.is_err() {
                        settled_failed
                            .lock()
                            .expect("failed-set lock poisoned")
                            .insert(name.to_string());
                    }
                },
            )
            .await;

        let mut result = LoadResult {
            skipped,
            sample: outcome.sample,
            ..LoadResult::default()
        };
        let mut critical_failure: Option<(String, String)> = None;

        let mut names: Vec<&String> = outcome.results.keys().collect();
        names.sort();
        for name in names {
            match &outcome.results[name] {
                Ok(()) => result.loaded.push(name.clone()),
                Err(error) => {
                    self.cleanup_registrations(name).await;
                    self.mark_failed(name, error, &mut failures);
                    if critical.contains(name) && critical_failure.is_none() {
                        critical_failure = Some((name.clone(), error.to_string()));
                    }
                }
            }
        }

        for name in &outcome.not_dispatched {
            let error = PluginSystemError::Cancelled {
                plugin: name.clone(),
            };
            self.mark_failed(name, &error, &mut failures);
        }

        result.failed = failures;

        if let Some((plugin, reason)) = critical_failure {
            return Err(PluginSystemError::CriticalPluginFailed { plugin, reason });
        }
        Ok(result)
    }

    /// Load one plugin end to end. Runs inside the orchestrator's breaker
    /// and timeout wrapper.
    async fn load_single(
        self: &Arc<Self>,
        name: &str,
        contexts: &HashMap<String, LoadContext>,
        failed: &StdMutex<HashSet<String>>,
        cancel: &CancellationToken,
    ) -> Result<(), PluginSystemError> {
        let started = Instant::now();
        let context = contexts
            .get(name)
            .ok_or_else(|| PluginSystemError::InternalError(format!("no context for '{}'", name)))?;

        // Dependents of failed plugins cascade instead of loading.
        {
            let failed = failed.lock().expect("failed-set lock poisoned");
            for dependency in &context.manifest.dependencies {
                if failed.contains(dependency) {
                    return Err(PluginSystemError::DependencyUnsatisfied {
                        plugin: name.to_string(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }
        if cancel.is_cancelled() {
            return Err(PluginSystemError::Cancelled {
                plugin: name.to_string(),
            });
        }

        let start_transition = match self.states.current(name) {
            Some(PluginState::Failed) => StateTransition::Retry,
            Some(PluginState::Unloaded) => StateTransition::DirectLoad,
            _ => StateTransition::StartLoading,
        };
        self.states.transition(name, start_transition, None);
        self.bus.publish(PluginEvent::LoadingStarted {
            plugin: name.to_string(),
        });

        // Static security scan before anything from the archive runs.
        let findings = self.scanner.scan_dir(&context.directory).await?;
        self.bus.publish(PluginEvent::SecurityScanCompleted {
            plugin: name.to_string(),
            findings: findings.len(),
        });
        if let Some(finding) = findings.first() {
            for f in &findings {
                self.bus.publish(PluginEvent::SecurityViolation {
                    plugin: name.to_string(),
                    file: f.relative_path.clone(),
                    modules: f.disallowed_modules.clone(),
                });
            }
            return Err(PluginSystemError::UnsafeImport {
                plugin: name.to_string(),
                file: finding.relative_path.clone(),
                modules: if finding.scan_failed {
                    vec!["scan-failed".to_string()]
                } else {
                    finding.disallowed_modules.clone()
                },
            });
        }

        let report = self
            .validator
            .validate_bytes(&context.document_bytes, ValidationSeverity::Full);
        self.bus.publish(PluginEvent::ValidationCompleted {
            plugin: name.to_string(),
            valid: report.valid,
            errors: report.errors.len(),
            warnings: report.warnings.len(),
        });
        let cache = self.validator.cache_stats();
        self.bus.publish(PluginEvent::Cache {
            hits: cache.hits,
            misses: cache.misses,
        });
        if !report.valid {
            return Err(PluginSystemError::ManifestInvalid {
                plugin: name.to_string(),
                errors: report.errors,
            });
        }

        self.compat
            .check_host_bounds(&context.manifest, &self.host_version)?;

        if cancel.is_cancelled() {
            return Err(PluginSystemError::Cancelled {
                plugin: name.to_string(),
            });
        }

        let descriptor = self
            .module_host
            .instantiate(name, &context.directory, &context.entry)
            .await?;

        // Symbol resolution is case-sensitive against the descriptor table.
        for symbol in context.manifest.module.required_symbols() {
            if descriptor.symbol(symbol).is_none() {
                return Err(PluginSystemError::SymbolNotFound {
                    plugin: name.to_string(),
                    symbol: symbol.to_string(),
                });
            }
        }
        for guard in &context.manifest.module.guards {
            if let GuardDecl::Local { class, .. } = guard {
                match descriptor.symbol(class) {
                    None => {
                        return Err(PluginSystemError::SymbolNotFound {
                            plugin: name.to_string(),
                            symbol: class.clone(),
                        })
                    }
                    Some(component) if component.kind() != ComponentKind::Guard => {
                        return Err(PluginSystemError::InstantiationFailed {
                            plugin: name.to_string(),
                            message: format!("symbol '{}' is not a guard", class),
                        })
                    }
                    Some(_) => {}
                }
            }
        }

        // Guards register before resolution so local dependencies are
        // visible to the resolver.
        let mut registered_guards = Vec::new();
        for guard in &context.manifest.module.guards {
            let registration = match guard {
                GuardDecl::Local {
                    name: guard_name,
                    class,
                    dependencies,
                    exported,
                } => GuardRegistration {
                    owner: name.to_string(),
                    name: guard_name.clone(),
                    scope: GuardScope::Local,
                    class_ref: Some(class.clone()),
                    dependencies: dependencies.clone(),
                    exported: *exported,
                    source: None,
                },
                GuardDecl::External {
                    name: guard_name,
                    source,
                } => GuardRegistration {
                    owner: name.to_string(),
                    name: guard_name.clone(),
                    scope: GuardScope::External,
                    class_ref: None,
                    dependencies: Vec::new(),
                    exported: false,
                    source: Some(source.clone()),
                },
            };
            self.guards.register(registration)?;
            registered_guards.push(guard.name().to_string());
        }

        let resolution = self.guards.resolve(name, &registered_guards);
        if !resolution.is_complete() {
            return Err(PluginSystemError::GuardResolutionFailed {
                plugin: name.to_string(),
                missing: resolution.missing,
                circular: resolution.circular,
            });
        }

        // Providers named in module.exports are globally visible.
        let mut provider_tokens = Vec::new();
        for provider in &context.manifest.module.providers {
            let component = descriptor
                .symbol(provider)
                .expect("provider symbol checked above");
            if component.kind() != ComponentKind::Provider {
                return Err(PluginSystemError::InstantiationFailed {
                    plugin: name.to_string(),
                    message: format!("symbol '{}' is not a provider", provider),
                });
            }
            let instance_source = Arc::clone(component);
            let factory: ServiceFactory = Arc::new(move || instance_source.instantiate());
            let token = self.services.register(
                name,
                provider,
                factory,
                ServiceOptions {
                    global: context.manifest.module.exports.contains(provider),
                    version: Some(context.manifest.version.clone()),
                },
            )?;
            provider_tokens.push(token);
        }

        let record = PluginRecord {
            manifest: context.manifest.clone(),
            descriptor,
            provider_tokens,
            registered_guards,
            loaded_at: SystemTime::now(),
            load_duration: started.elapsed(),
        };
        self.loaded
            .lock()
            .await
            .insert(name.to_string(), Arc::new(record));

        self.states
            .transition(name, StateTransition::Complete, None);
        self.bus.publish(PluginEvent::Loaded {
            plugin: name.to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
        });
        info!("loaded plugin '{}'", name);
        Ok(())
    }

    /// Remove every registration a partially loaded plugin may have left.
    async fn cleanup_registrations(&self, name: &str) {
        self.guards.unregister_owner(name);
        self.services.unregister_owner(name);
        self.loaded.lock().await.remove(name);
    }

    /// Drive a plugin to `Failed`, emitting the failure events.
    fn mark_failed(&self, name: &str, error: &PluginSystemError, failures: &mut Vec<PluginFailure>) {
        match self.states.current(name) {
            Some(PluginState::Loading) => {
                self.states
                    .transition(name, StateTransition::Fail, Some(error.kind().to_string()));
            }
            Some(PluginState::Discovered) => {
                self.states.transition(name, StateTransition::StartLoading, None);
                self.states
                    .transition(name, StateTransition::Fail, Some(error.kind().to_string()));
            }
            _ => {}
        }
        self.bus.publish(PluginEvent::LoadFailed {
            plugin: name.to_string(),
            reason: error.to_string(),
        });
        self.bus.publish(PluginEvent::Error {
            plugin: Some(name.to_string()),
            kind: error.kind().to_string(),
            message: error.to_string(),
        });
        failures.push(PluginFailure::from_error(name, error));
    }

    /// Unload one plugin: unregister its guards and services, drop its
    /// record and transition it to `Unloaded`.
    ///
    /// Unloading a plugin that loaded dependents is rejected unless `force`,
    /// in which case the dependents unload first.
    pub async fn unload(&self, name: &str, force: bool) -> Result<(), PluginSystemError> {
        let dependents = self.loaded_dependents(name).await;
        if !dependents.is_empty() {
            if !force {
                return Err(PluginSystemError::RegistrationError {
                    plugin: name.to_string(),
                    message: format!(
                        "still required by loaded plugins: {}",
                        dependents.join(", ")
                    ),
                });
            }
            for dependent in dependents {
                Box::pin(self.unload(&dependent, true)).await?;
            }
        }

        let record = self.loaded.lock().await.remove(name);
        if record.is_none() {
            return Err(PluginSystemError::RegistrationError {
                plugin: name.to_string(),
                message: "plugin is not loaded".to_string(),
            });
        }
        self.guards.unregister_owner(name);
        self.services.unregister_owner(name);
        self.states.transition(name, StateTransition::Unload, None);
        self.bus.publish(PluginEvent::Unloaded {
            plugin: name.to_string(),
        });
        info!("unloaded plugin '{}'", name);
        Ok(())
    }

    /// Currently loaded plugins that directly depend on `name`.
    async fn loaded_dependents(&self, name: &str) -> Vec<String> {
        let loaded = self.loaded.lock().await;
        let mut dependents: Vec<String> = loaded
            .values()
            .filter(|record| record.manifest.dependencies.iter().any(|d| d == name))
            .map(|record| record.manifest.name.clone())
            .collect();
        dependents.sort();
        dependents
    }

    /// Tear everything down in reverse topological order, then run the full
    /// pipeline again. No in-flight state survives.
    pub async fn reload(self: &Arc<Self>) -> Result<LoadResult, PluginSystemError> {
        let manifests: Vec<PluginManifest> = {
            let loaded = self.loaded.lock().await;
            loaded.values().map(|r| r.manifest.clone()).collect()
        };
        let graph = DependencyGraph::build(manifests.iter());
        let plan = graph.plan();
        for name in plan.order.iter().rev() {
            if self.loaded.lock().await.contains_key(name) {
                self.unload(name, true).await?;
            }
        }
        self.load_all(None).await
    }

    pub async fn get_plugin(&self, name: &str) -> Option<Arc<PluginRecord>> {
        self.loaded.lock().await.get(name).cloned()
    }

    /// Names of all loaded plugins, sorted.
    pub async fn loaded_plugins(&self) -> Vec<String> {
        let mut names: Vec<String> = self.loaded.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn stats(&self) -> LoaderStats {
        let loaded = self.loaded.lock().await.len();
        let discovered = self.states.plugins_in(PluginState::Discovered).len() + loaded;
        LoaderStats {
            discovered,
            loaded,
            failed: self.states.plugins_in(PluginState::Failed).len(),
            guards_registered: self.guards.len(),
            services: self.services.stats(),
            validation_cache: self.validator.cache_stats(),
        }
    }
}
