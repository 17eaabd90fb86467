use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::debug;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::version::PluginVersion;

/// Factory producing a service instance on demand.
pub type ServiceFactory = Arc<dyn Fn() -> Arc<dyn Any + Send + Sync> + Send + Sync>;

/// Attempts made to find a free token suffix before giving up.
const TOKEN_RETRY_LIMIT: usize = 8;

/// Lookups kept for the rolling resolution-time average.
const TIMING_WINDOW: usize = 100;

/// A provider exposed by one plugin for consumption by others.
#[derive(Clone)]
pub struct ServiceEntry {
    pub owner: String,
    pub service_name: String,
    /// Unique process-wide handle, `OWNER_SERVICE_HHHHHHHH`.
    pub token: String,
    /// Global entries are discoverable by name; local entries only by token.
    pub global: bool,
    pub version: Option<PluginVersion>,
    pub factory: ServiceFactory,
}

impl std::fmt::Debug for ServiceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceEntry")
            .field("owner", &self.owner)
            .field("service_name", &self.service_name)
            .field("token", &self.token)
            .field("global", &self.global)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Registration options.
#[derive(Debug, Clone, Default)]
pub struct ServiceOptions {
    pub global: bool,
    pub version: Option<PluginVersion>,
}

/// Counters exposed by [`ServiceManager::stats`].
#[derive(Debug, Clone, Default)]
pub struct ServiceStats {
    pub total: usize,
    pub global: usize,
    pub local: usize,
    pub per_plugin: HashMap<String, usize>,
    pub avg_resolution: Option<Duration>,
}

struct Inner {
    /// Token → entry. The single point of truth for tokens.
    entries: HashMap<String, ServiceEntry>,
    /// `{OWNER}_{SERVICE}` alias → token, global entries only.
    aliases: HashMap<String, String>,
    timings: VecDeque<Duration>,
}

/// Registry of cross-plugin services with collision-resistant tokens.
///
/// At any instant each live token is unique process-wide, and there is at
/// most one global entry per `(owner, service)`.
pub struct ServiceManager {
    inner: Mutex<Inner>,
}

impl ServiceManager {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                aliases: HashMap::new(),
                timings: VecDeque::new(),
            }),
        }
    }

    /// Register a service; returns its freshly allocated token.
    pub fn register(
        &self,
        owner: &str,
        service_name: &str,
        factory: ServiceFactory,
        options: ServiceOptions,
    ) -> Result<String, PluginSystemError> {
        let alias = stable_alias(owner, service_name);
        let mut inner = self.inner.lock().expect("service manager lock poisoned");

        // At most one global entry may live under a given alias.
        if options.global && inner.aliases.contains_key(&alias) {
            return Err(PluginSystemError::TokenCollision {
                owner: owner.to_string(),
                service: service_name.to_string(),
            });
        }

        let mut token = None;
        for _ in 0..TOKEN_RETRY_LIMIT {
            let candidate = format!("{}_{:08X}", alias, OsRng.next_u32());
            if !inner.entries.contains_key(&candidate) {
                token = Some(candidate);
                break;
            }
        }
        let Some(token) = token else {
            return Err(PluginSystemError::TokenSpaceExhausted {
                owner: owner.to_string(),
                service: service_name.to_string(),
            });
        };

        let entry = ServiceEntry {
            owner: owner.to_string(),
            service_name: service_name.to_string(),
            token: token.clone(),
            global: options.global,
            version: options.version,
            factory,
        };
        if options.global {
            inner.aliases.insert(alias, token.clone());
        }
        inner.entries.insert(token.clone(), entry);
        debug!(
            "registered {} service '{}' for '{}' as {}",
            if options.global { "global" } else { "local" },
            service_name,
            owner,
            token
        );
        Ok(token)
    }

    /// Find a global service by service name or stable alias.
    pub fn resolve_by_name(&self, name: &str) -> Option<ServiceEntry> {
        let started = Instant::now();
        let mut inner = self.inner.lock().expect("service manager lock poisoned");
        let found = match inner.aliases.get(name).cloned() {
            Some(token) => inner.entries.get(&token).cloned(),
            None => inner
                .entries
                .values()
                .filter(|e| e.global && e.service_name == name)
                .min_by(|a, b| a.owner.cmp(&b.owner))
                .cloned(),
        };
        record_timing(&mut inner, started.elapsed());
        found
    }

    /// Find any service by its token.
    pub fn resolve_by_token(&self, token: &str) -> Option<ServiceEntry> {
        let started = Instant::now();
        let mut inner = self.inner.lock().expect("service manager lock poisoned");
        let found = inner.entries.get(token).cloned();
        record_timing(&mut inner, started.elapsed());
        found
    }

    /// Remove every entry whose owner equals `owner` exactly. Substring or
    /// prefix matches never qualify.
    pub fn unregister_owner(&self, owner: &str) -> usize {
        let mut inner = self.inner.lock().expect("service manager lock poisoned");
        let removed_tokens: Vec<String> = inner
            .entries
            .values()
            .filter(|e| e.owner == owner)
            .map(|e| e.token.clone())
            .collect();
        for token in &removed_tokens {
            inner.entries.remove(token);
        }
        inner.aliases.retain(|_, token| !removed_tokens.contains(token));
        removed_tokens.len()
    }

    /// All entries, optionally filtered by visibility, sorted by token for
    /// deterministic output.
    pub fn list(&self, global: Option<bool>) -> Vec<ServiceEntry> {
        let inner = self.inner.lock().expect("service manager lock poisoned");
        let mut entries: Vec<_> = inner
            .entries
            .values()
            .filter(|e| global.map_or(true, |g| e.global == g))
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.token.cmp(&b.token));
        entries
    }

    pub fn stats(&self) -> ServiceStats {
        let inner = self.inner.lock().expect("service manager lock poisoned");
        let mut per_plugin: HashMap<String, usize> = HashMap::new();
        let mut global = 0usize;
        for entry in inner.entries.values() {
            *per_plugin.entry(entry.owner.clone()).or_default() += 1;
            if entry.global {
                global += 1;
            }
        }
        let avg_resolution = if inner.timings.is_empty() {
            None
        } else {
            let total: Duration = inner.timings.iter().sum();
            Some(total / inner.timings.len() as u32)
        };
        ServiceStats {
            total: inner.entries.len(),
            global,
            local: inner.entries.len() - global,
            per_plugin,
            avg_resolution,
        }
    }
}

impl Default for ServiceManager {
    fn default() -> Self {
        Self::new()
    }
}

fn record_timing(inner: &mut Inner, elapsed: Duration) {
    if inner.timings.len() >= TIMING_WINDOW {
        inner.timings.pop_front();
    }
    inner.timings.push_back(elapsed);
}

/// The stable `{OWNER}_{SERVICE}` alias under which global entries are also
/// indexed.
pub fn stable_alias(owner: &str, service: &str) -> String {
    format!("{}_{}", owner.to_uppercase(), service.to_uppercase())
}
