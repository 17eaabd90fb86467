//! Errors of the plugin lifecycle engine.
//!
//! [`PluginSystemError`] is the per-plugin error surfaced through the event
//! bus and the load result. Variants map one-to-one onto the platform's
//! failure taxonomy: manifest problems, unsafe imports, dependency-graph
//! faults, guard resolution, service tokens, orchestration and symbol
//! resolution.

use std::path::PathBuf;

use crate::plugin_system::state::{PluginState, StateTransition};
use crate::plugin_system::version::VersionError;

#[derive(Debug, thiserror::Error)]
pub enum PluginSystemError {
    #[error("Invalid manifest for '{plugin}': {}", .errors.join("; "))]
    ManifestInvalid {
        plugin: String,
        errors: Vec<String>,
    },

    #[error("Unsafe import in '{plugin}' ({file}): {}", .modules.join(", "))]
    UnsafeImport {
        plugin: String,
        file: String,
        modules: Vec<String>,
    },

    #[error("Dependency '{dependency}' of '{plugin}' was not discovered")]
    DependencyMissing {
        plugin: String,
        dependency: String,
    },

    #[error("Dependency cycle: {}", .members.join(" -> "))]
    DependencyCycle { members: Vec<String> },

    #[error("'{plugin}' excluded: dependency '{dependency}' is unsatisfied")]
    DependencyUnsatisfied {
        plugin: String,
        dependency: String,
    },

    #[error("'{plugin}' is incompatible with host {host_version}: {reason}")]
    VersionIncompatible {
        plugin: String,
        host_version: String,
        reason: String,
    },

    #[error("Guard resolution failed for '{plugin}': missing [{}], circular [{}]",
            .missing.join(", "), .circular.join(", "))]
    GuardResolutionFailed {
        plugin: String,
        missing: Vec<String>,
        circular: Vec<String>,
    },

    #[error("Service token collision for '{owner}/{service}'")]
    TokenCollision { owner: String, service: String },

    #[error("Token space exhausted registering '{owner}/{service}'")]
    TokenSpaceExhausted { owner: String, service: String },

    #[error("Loading '{plugin}' timed out after {timeout_ms} ms")]
    LoadTimeout { plugin: String, timeout_ms: u64 },

    #[error("Circuit open for '{plugin}', load rejected")]
    CircuitOpen { plugin: String },

    #[error("Instantiation of '{plugin}' failed: {message}")]
    InstantiationFailed { plugin: String, message: String },

    #[error("Load of '{plugin}' was cancelled")]
    Cancelled { plugin: String },

    #[error("Duplicate plugin '{plugin}' (already discovered at {first:?})")]
    DuplicatePlugin { plugin: String, first: PathBuf },

    #[error("Module of '{plugin}' does not export symbol '{symbol}'")]
    SymbolNotFound { plugin: String, symbol: String },

    #[error("Registration error for '{plugin}': {message}")]
    RegistrationError { plugin: String, message: String },

    #[error("Illegal state transition for '{plugin}': {transition:?} from {from:?}")]
    IllegalTransition {
        plugin: String,
        from: PluginState,
        transition: StateTransition,
    },

    #[error("Plugin loading failed for '{plugin}': {source}")]
    LoadingError {
        plugin: String,
        path: Option<PathBuf>,
        #[source]
        source: Box<PluginSystemErrorSource>,
    },

    #[error("Critical plugin '{plugin}' failed, host load aborted: {reason}")]
    CriticalPluginFailed { plugin: String, reason: String },

    #[error("Version error: {0}")]
    Version(#[from] VersionError),

    #[error("Internal plugin system error: {0}")]
    InternalError(String),
}

impl PluginSystemError {
    /// Short machine-readable kind label, used in events and load reports.
    pub fn kind(&self) -> &'static str {
        match self {
            PluginSystemError::ManifestInvalid { .. } => "manifest-invalid",
            PluginSystemError::UnsafeImport { .. } => "unsafe-import",
            PluginSystemError::DependencyMissing { .. } => "dependency-missing",
            PluginSystemError::DependencyCycle { .. } => "dependency-cycle",
            PluginSystemError::DependencyUnsatisfied { .. } => "dependency-unsatisfied",
            PluginSystemError::VersionIncompatible { .. } => "version-incompatible",
            PluginSystemError::GuardResolutionFailed { .. } => "guard-resolution-failed",
            PluginSystemError::TokenCollision { .. } => "token-collision",
            PluginSystemError::TokenSpaceExhausted { .. } => "token-space-exhausted",
            PluginSystemError::LoadTimeout { .. } => "load-timeout",
            PluginSystemError::CircuitOpen { .. } => "circuit-open",
            PluginSystemError::InstantiationFailed { .. } => "instantiation-failed",
            PluginSystemError::Cancelled { .. } => "cancelled",
            PluginSystemError::DuplicatePlugin { .. } => "duplicate-plugin",
            PluginSystemError::SymbolNotFound { .. } => "symbol-not-found",
            PluginSystemError::RegistrationError { .. } => "registration-error",
            PluginSystemError::IllegalTransition { .. } => "illegal-transition",
            PluginSystemError::LoadingError { .. } => "loading-error",
            PluginSystemError::CriticalPluginFailed { .. } => "critical-plugin-failed",
            PluginSystemError::Version(_) => "version-error",
            PluginSystemError::InternalError(_) => "internal-error",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PluginSystemErrorSource {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Other(String),
}
