pub mod event;
pub mod kernel;
pub mod plugin_system;
pub mod store;

// Re-export key public types for the binary and embedders.
pub use event::{EventBus, EventRecord, PluginEvent};
pub use kernel::{Error as KernelError, HostApplication, HostConfig};
pub use plugin_system::{
    LoadResult, LoadStrategy, PluginLoader, PluginManifest, PluginState, PluginSystemError,
    PluginVersion,
};
pub use store::{ArtifactStore, Catalog};
