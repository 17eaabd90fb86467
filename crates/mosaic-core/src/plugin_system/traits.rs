use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use libloading::{Library, Symbol};

use crate::plugin_system::error::{PluginSystemError, PluginSystemErrorSource};

/// What a plugin symbol is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    /// HTTP handler surface.
    Controller,
    /// Service exposed through the cross-plugin service manager.
    Provider,
    /// Request-time authorization predicate.
    Guard,
    /// Plain exported value.
    Export,
}

/// Interface implemented by each symbol a plugin exposes.
///
/// Providers return their service instance from [`Component::instantiate`];
/// other kinds may return a unit value.
pub trait Component: Send + Sync {
    fn name(&self) -> &str;
    fn kind(&self) -> ComponentKind;
    fn instantiate(&self) -> Arc<dyn Any + Send + Sync>;
}

/// A plain value describing a plugin module: the symbol table the loader
/// resolves `module.*` references against.
pub struct ModuleDescriptor {
    symbols: HashMap<String, Arc<dyn Component>>,
    /// Keeps the backing library loaded for as long as any symbol may run.
    /// Must be the last field so symbols drop first.
    library: Option<Library>,
}

impl ModuleDescriptor {
    pub fn new() -> Self {
        Self {
            symbols: HashMap::new(),
            library: None,
        }
    }

    pub fn with_symbol(mut self, component: Arc<dyn Component>) -> Self {
        self.symbols.insert(component.name().to_string(), component);
        self
    }

    pub fn insert(&mut self, component: Arc<dyn Component>) {
        self.symbols.insert(component.name().to_string(), component);
    }

    /// Case-sensitive symbol lookup.
    pub fn symbol(&self, name: &str) -> Option<&Arc<dyn Component>> {
        self.symbols.get(name)
    }

    pub fn symbol_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.symbols.keys().map(String::as_str).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    fn attach_library(&mut self, library: Library) {
        self.library = Some(library);
    }
}

impl Default for ModuleDescriptor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("symbols", &self.symbol_names())
            .field("native", &self.library.is_some())
            .finish()
    }
}

/// A ready-made component for descriptors assembled in process.
pub struct StaticComponent {
    name: String,
    kind: ComponentKind,
    factory: Arc<dyn Fn() -> Arc<dyn Any + Send + Sync> + Send + Sync>,
}

impl StaticComponent {
    pub fn new<F>(name: &str, kind: ComponentKind, factory: F) -> Arc<dyn Component>
    where
        F: Fn() -> Arc<dyn Any + Send + Sync> + Send + Sync + 'static,
    {
        Arc::new(Self {
            name: name.to_string(),
            kind,
            factory: Arc::new(factory),
        })
    }

    /// A component whose instances carry no state.
    pub fn marker(name: &str, kind: ComponentKind) -> Arc<dyn Component> {
        Self::new(name, kind, || Arc::new(()))
    }
}

impl Component for StaticComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ComponentKind {
        self.kind
    }

    fn instantiate(&self) -> Arc<dyn Any + Send + Sync> {
        (self.factory)()
    }
}

/// How the loader obtains module descriptors for discovered plugins.
#[async_trait]
pub trait ModuleHost: Send + Sync {
    /// Produce the descriptor for `plugin`, whose archive is rooted at
    /// `dir` with the given entry file.
    async fn instantiate(
        &self,
        plugin: &str,
        dir: &Path,
        entry: &str,
    ) -> Result<ModuleDescriptor, PluginSystemError>;
}

/// Exported constructor every native plugin entry must define.
pub const MODULE_INIT_SYMBOL: &[u8] = b"mosaic_module_init\0";

type ModuleInitFn = unsafe extern "C-unwind" fn() -> *mut ModuleDescriptor;

/// Loads native plugin entries with `libloading` and resolves the module
/// constructor symbol. The library handle travels inside the descriptor so
/// unloading the plugin drops the library last.
#[derive(Debug, Default)]
pub struct LibraryModuleHost;

impl LibraryModuleHost {
    pub fn new() -> Self {
        Self
    }

    fn load_sync(plugin: &str, path: &Path) -> Result<ModuleDescriptor, PluginSystemError> {
        let loading_error = |message: String| PluginSystemError::LoadingError {
            plugin: plugin.to_string(),
            path: Some(path.to_path_buf()),
            source: Box::new(PluginSystemErrorSource::Other(message)),
        };

        let library = unsafe { Library::new(path) }
            .map_err(|e| loading_error(format!("libloading error: {}", e)))?;
        let init: Symbol<ModuleInitFn> = unsafe { library.get(MODULE_INIT_SYMBOL) }
            .map_err(|e| loading_error(format!("missing module init symbol: {}", e)))?;

        let init_fn: ModuleInitFn = *init;
        let descriptor_ptr = panic::catch_unwind(|| unsafe { init_fn() }).map_err(|payload| {
            let message = payload
                .downcast_ref::<&'static str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic reason".to_string());
            PluginSystemError::InstantiationFailed {
                plugin: plugin.to_string(),
                message: format!("module init panicked: {}", message),
            }
        })?;

        if descriptor_ptr.is_null() {
            return Err(PluginSystemError::InstantiationFailed {
                plugin: plugin.to_string(),
                message: "module init returned a null descriptor".to_string(),
            });
        }
        let mut descriptor = *unsafe { Box::from_raw(descriptor_ptr) };
        descriptor.attach_library(library);
        Ok(descriptor)
    }
}

#[async_trait]
impl ModuleHost for LibraryModuleHost {
    async fn instantiate(
        &self,
        plugin: &str,
        dir: &Path,
        entry: &str,
    ) -> Result<ModuleDescriptor, PluginSystemError> {
        let path = dir.join(entry);
        let plugin = plugin.to_string();
        tokio::task::spawn_blocking(move || Self::load_sync(&plugin, &path))
            .await
            .map_err(|e| PluginSystemError::InternalError(format!("loader task failed: {}", e)))?
    }
}

type DescriptorFactory = Arc<dyn Fn() -> ModuleDescriptor + Send + Sync>;

/// In-process descriptor table for statically registered plugins and tests.
#[derive(Default)]
pub struct StaticModuleHost {
    factories: Mutex<HashMap<String, DescriptorFactory>>,
}

impl StaticModuleHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, plugin: &str, factory: F)
    where
        F: Fn() -> ModuleDescriptor + Send + Sync + 'static,
    {
        self.factories
            .lock()
            .expect("static module host lock poisoned")
            .insert(plugin.to_string(), Arc::new(factory));
    }
}

#[async_trait]
impl ModuleHost for StaticModuleHost {
    async fn instantiate(
        &self,
        plugin: &str,
        _dir: &Path,
        _entry: &str,
    ) -> Result<ModuleDescriptor, PluginSystemError> {
        let factory = self
            .factories
            .lock()
            .expect("static module host lock poisoned")
            .get(plugin)
            .cloned();
        match factory {
            Some(factory) => Ok(factory()),
            None => Err(PluginSystemError::InstantiationFailed {
                plugin: plugin.to_string(),
                message: "no statically registered module".to_string(),
            }),
        }
    }
}
