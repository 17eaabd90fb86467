use std::time::SystemTime;

use crate::plugin_system::state::{PluginState, StateTransition};

/// Events published by the host over the plugin lifecycle.
///
/// The bus stamps each published event into an [`EventRecord`]; the variants
/// here carry only the payload.
#[derive(Debug, Clone)]
pub enum PluginEvent {
    /// A plugin directory was discovered and its manifest surface-parsed.
    Discovered { plugin: String, version: String },
    /// A plugin began loading.
    LoadingStarted { plugin: String },
    /// Progress within a multi-batch load run.
    LoadingProgress {
        plugin: String,
        completed: usize,
        total: usize,
    },
    /// A plugin reached the loaded state.
    Loaded { plugin: String, duration_ms: u64 },
    /// A plugin load failed terminally.
    LoadFailed { plugin: String, reason: String },
    /// A plugin was unloaded and its registrations removed.
    Unloaded { plugin: String },
    /// A lifecycle state transition.
    StateChanged {
        plugin: String,
        from: PluginState,
        to: PluginState,
        transition: StateTransition,
        context: Option<String>,
    },
    /// The dependency graph accepted this plugin into the load order.
    DependencyResolved { plugin: String, batch: usize },
    /// The dependency graph excluded this plugin.
    DependencyFailed { plugin: String, reason: String },
    /// The validator finished for a plugin.
    ValidationCompleted {
        plugin: String,
        valid: bool,
        errors: usize,
        warnings: usize,
    },
    /// The unsafe-import scanner finished for a plugin.
    SecurityScanCompleted { plugin: String, findings: usize },
    /// A denylisted import or other security violation was found.
    SecurityViolation {
        plugin: String,
        file: String,
        modules: Vec<String>,
    },
    /// One performance sample from a load run.
    Performance {
        total_load_time_ms: u64,
        plugins_attempted: usize,
        plugins_loaded: usize,
        concurrency_level: usize,
        failure_rate: f64,
    },
    /// A circuit breaker changed state for a plugin.
    CircuitBreaker { plugin: String, state: String },
    /// Validation-cache activity.
    Cache { hits: u64, misses: u64 },
    /// An error attached to a plugin, or to the host when `plugin` is None.
    Error {
        plugin: Option<String>,
        kind: String,
        message: String,
    },
}

impl PluginEvent {
    /// Dotted event-type name.
    pub fn kind(&self) -> &'static str {
        match self {
            PluginEvent::Discovered { .. } => "discovered",
            PluginEvent::LoadingStarted { .. } => "loading.started",
            PluginEvent::LoadingProgress { .. } => "loading.progress",
            PluginEvent::Loaded { .. } => "loaded",
            PluginEvent::LoadFailed { .. } => "load.failed",
            PluginEvent::Unloaded { .. } => "unloaded",
            PluginEvent::StateChanged { .. } => "state.changed",
            PluginEvent::DependencyResolved { .. } => "dependency.resolved",
            PluginEvent::DependencyFailed { .. } => "dependency.failed",
            PluginEvent::ValidationCompleted { .. } => "validation.completed",
            PluginEvent::SecurityScanCompleted { .. } => "security.scan.completed",
            PluginEvent::SecurityViolation { .. } => "security.violation",
            PluginEvent::Performance { .. } => "performance",
            PluginEvent::CircuitBreaker { .. } => "circuit-breaker",
            PluginEvent::Cache { .. } => "cache",
            PluginEvent::Error { .. } => "error",
        }
    }

    /// The plugin the event is attached to, if any.
    pub fn plugin_name(&self) -> Option<&str> {
        match self {
            PluginEvent::Discovered { plugin, .. }
            | PluginEvent::LoadingStarted { plugin }
            | PluginEvent::LoadingProgress { plugin, .. }
            | PluginEvent::Loaded { plugin, .. }
            | PluginEvent::LoadFailed { plugin, .. }
            | PluginEvent::Unloaded { plugin }
            | PluginEvent::StateChanged { plugin, .. }
            | PluginEvent::DependencyResolved { plugin, .. }
            | PluginEvent::DependencyFailed { plugin, .. }
            | PluginEvent::ValidationCompleted { plugin, .. }
            | PluginEvent::SecurityScanCompleted { plugin, .. }
            | PluginEvent::SecurityViolation { plugin, .. }
            | PluginEvent::CircuitBreaker { plugin, .. } => Some(plugin),
            PluginEvent::Error { plugin, .. } => plugin.as_deref(),
            PluginEvent::Performance { .. } | PluginEvent::Cache { .. } => None,
        }
    }
}

/// A published event with its delivery timestamp.
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub event: PluginEvent,
    pub timestamp: SystemTime,
}

impl EventRecord {
    pub fn kind(&self) -> &'static str {
        self.event.kind()
    }
}
