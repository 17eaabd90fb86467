use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use log::debug;

use crate::plugin_system::error::PluginSystemError;

/// Scope of a guard declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardScope {
    Local,
    External,
}

/// A guard registration, keyed by `(owner, name)`.
#[derive(Debug, Clone)]
pub struct GuardRegistration {
    pub owner: String,
    pub name: String,
    pub scope: GuardScope,
    /// Symbol implementing the guard; local guards only.
    pub class_ref: Option<String>,
    /// Names of guards this one requires, within the owning plugin.
    pub dependencies: Vec<String>,
    /// Whether other plugins may reference this guard.
    pub exported: bool,
    /// Owning plugin of the referenced guard; external entries only.
    pub source: Option<String>,
}

/// A guard reachable from a resolution request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedGuard {
    /// Plugin whose local guard ultimately backs this entry.
    pub owner: String,
    pub name: String,
    pub class_ref: Option<String>,
    pub exported: bool,
}

/// Outcome of resolving a set of guard names for a plugin.
#[derive(Debug, Clone, Default)]
pub struct GuardResolution {
    pub resolved: Vec<ResolvedGuard>,
    pub missing: Vec<String>,
    pub circular: Vec<String>,
}

impl GuardResolution {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && self.circular.is_empty()
    }
}

/// Registry of guard declarations across all loaded plugins.
///
/// Mutations are serialized; resolution operates on a snapshot taken at call
/// entry, so a concurrent registration is either fully visible or not at all.
pub struct GuardRegistry {
    entries: Mutex<HashMap<(String, String), GuardRegistration>>,
}

impl GuardRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Register a guard. A second registration under the same
    /// `(owner, name)` is rejected.
    pub fn register(&self, registration: GuardRegistration) -> Result<(), PluginSystemError> {
        let key = (registration.owner.clone(), registration.name.clone());
        let mut entries = self.entries.lock().expect("guard registry lock poisoned");
        if entries.contains_key(&key) {
            return Err(PluginSystemError::RegistrationError {
                plugin: registration.owner,
                message: format!("guard '{}' is already registered", registration.name),
            });
        }
        debug!(
            "registered {:?} guard '{}' for '{}'",
            registration.scope, registration.name, registration.owner
        );
        entries.insert(key, registration);
        Ok(())
    }

    /// Remove every guard owned by `owner` (exact name match).
    pub fn unregister_owner(&self, owner: &str) -> usize {
        let mut entries = self.entries.lock().expect("guard registry lock poisoned");
        let before = entries.len();
        entries.retain(|(entry_owner, _), _| entry_owner != owner);
        before - entries.len()
    }

    pub fn get(&self, owner: &str, name: &str) -> Option<GuardRegistration> {
        self.entries
            .lock()
            .expect("guard registry lock poisoned")
            .get(&(owner.to_string(), name.to_string()))
            .cloned()
    }

    pub fn guards_of(&self, owner: &str) -> Vec<GuardRegistration> {
        let mut guards: Vec<_> = self
            .entries
            .lock()
            .expect("guard registry lock poisoned")
            .values()
            .filter(|g| g.owner == owner)
            .cloned()
            .collect();
        guards.sort_by(|a, b| a.name.cmp(&b.name));
        guards
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("guard registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve the transitive closure of `names` as requested by
    /// `requesting`.
    ///
    /// Dependencies are visited in declaration order. External references
    /// resolve only to `exported` local guards of their source plugin;
    /// re-exporting is not transitive. Cycles are reported once each and do
    /// not fault the resolution.
    pub fn resolve(&self, requesting: &str, names: &[String]) -> GuardResolution {
        // Frozen snapshot for the duration of the walk.
        let snapshot = self
            .entries
            .lock()
            .expect("guard registry lock poisoned")
            .clone();

        let mut resolution = GuardResolution::default();
        let mut visited: HashSet<(String, String)> = HashSet::new();
        let mut reported_cycles: HashSet<Vec<String>> = HashSet::new();
        let mut path: Vec<(String, String)> = Vec::new();

        for name in names {
            resolve_guard(
                &snapshot,
                requesting,
                name,
                &mut resolution,
                &mut visited,
                &mut reported_cycles,
                &mut path,
            );
        }
        resolution
    }
}

impl Default for GuardRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve_guard(
    snapshot: &HashMap<(String, String), GuardRegistration>,
    owner: &str,
    name: &str,
    resolution: &mut GuardResolution,
    visited: &mut HashSet<(String, String)>,
    reported_cycles: &mut HashSet<Vec<String>>,
    path: &mut Vec<(String, String)>,
) {
    let key = (owner.to_string(), name.to_string());

    if let Some(pos) = path.iter().position(|k| *k == key) {
        // Cycle: report the participating names once.
        let mut members: Vec<String> = path[pos..].iter().map(|(_, n)| n.clone()).collect();
        members.sort();
        members.dedup();
        if reported_cycles.insert(members.clone()) {
            for member in members {
                if !resolution.circular.contains(&member) {
                    resolution.circular.push(member);
                }
            }
        }
        return;
    }
    if visited.contains(&key) {
        return;
    }

    let Some(entry) = snapshot.get(&key) else {
        if !resolution.missing.contains(&name.to_string()) {
            resolution.missing.push(name.to_string());
        }
        return;
    };

    match entry.scope {
        GuardScope::Local => {
            visited.insert(key.clone());
            resolution.resolved.push(ResolvedGuard {
                owner: entry.owner.clone(),
                name: entry.name.clone(),
                class_ref: entry.class_ref.clone(),
                exported: entry.exported,
            });
            path.push(key.clone());
            for dep in &entry.dependencies {
                resolve_guard(
                    snapshot,
                    owner,
                    dep,
                    resolution,
                    visited,
                    reported_cycles,
                    path,
                );
            }
            path.pop();
        }
        GuardScope::External => {
            visited.insert(key.clone());
            let Some(source) = entry.source.as_deref() else {
                if !resolution.missing.contains(&name.to_string()) {
                    resolution.missing.push(name.to_string());
                }
                return;
            };
            let source_key = (source.to_string(), name.to_string());
            // Valid only against an exported local guard of the source.
            match snapshot.get(&source_key) {
                Some(target)
                    if target.scope == GuardScope::Local && target.exported =>
                {
                    if visited.contains(&source_key) {
                        return;
                    }
                    visited.insert(source_key.clone());
                    resolution.resolved.push(ResolvedGuard {
                        owner: target.owner.clone(),
                        name: target.name.clone(),
                        class_ref: target.class_ref.clone(),
                        exported: target.exported,
                    });
                    path.push(source_key);
                    for dep in &target.dependencies {
                        resolve_guard(
                            snapshot,
                            source,
                            dep,
                            resolution,
                            visited,
                            reported_cycles,
                            path,
                        );
                    }
                    path.pop();
                }
                _ => {
                    if !resolution.missing.contains(&name.to_string()) {
                        resolution.missing.push(name.to_string());
                    }
                }
            }
        }
    }
}
