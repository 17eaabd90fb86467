use std::collections::HashMap;

use log::debug;
use serde_json::{json, Value};

use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::manifest::PluginManifest;
use crate::plugin_system::version::PluginVersion;

/// Interface tag assumed for manifests without an `apiVersion`.
pub const EARLIEST_API_VERSION: &str = "1.0";
/// Interface tag of this host.
pub const CURRENT_API_VERSION: &str = "2.0";

/// Outcome of a compatibility assessment.
#[derive(Debug, Clone, Default)]
pub struct CompatReport {
    /// The tag names a known interface version.
    pub is_valid: bool,
    /// The host can load it, directly or after migration.
    pub is_supported: bool,
    pub is_deprecated: bool,
    /// Loadable unmodified.
    pub is_compatible: bool,
    /// Interface versions to migrate through, in order, when not compatible.
    pub migration_path: Vec<String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

struct InterfaceVersion {
    /// Interface tags this version loads unmodified.
    loads_unmodified: Vec<&'static str>,
    deprecated: bool,
    migrates_to: Option<&'static str>,
}

type Migration = fn(Value) -> Value;

/// Versioned-interface compatibility matrix with migration paths.
///
/// Migrations are pure shape transforms from one interface version to the
/// next; they run on the raw JSON document before validation.
pub struct CompatibilityEngine {
    matrix: HashMap<&'static str, InterfaceVersion>,
    migrations: HashMap<(&'static str, &'static str), Migration>,
}

impl CompatibilityEngine {
    pub fn new() -> Self {
        let mut matrix = HashMap::new();
        matrix.insert(
            "1.0",
            InterfaceVersion {
                loads_unmodified: vec!["1.0"],
                deprecated: true,
                migrates_to: Some("2.0"),
            },
        );
        matrix.insert(
            "2.0",
            InterfaceVersion {
                loads_unmodified: vec!["2.0"],
                deprecated: false,
                migrates_to: None,
            },
        );

        let mut migrations: HashMap<(&'static str, &'static str), Migration> = HashMap::new();
        migrations.insert(("1.0", "2.0"), migrate_1_to_2);

        Self { matrix, migrations }
    }

    /// Assess a plugin interface tag against the current host interface.
    pub fn assess(&self, api_version: Option<&str>) -> CompatReport {
        let tag = api_version.unwrap_or(EARLIEST_API_VERSION);
        let mut report = CompatReport::default();

        let Some(entry) = self.matrix.get(tag) else {
            report.errors.push(format!(
                "unknown interface version '{}' (host speaks {})",
                tag, CURRENT_API_VERSION
            ));
            return report;
        };
        report.is_valid = true;
        report.is_deprecated = entry.deprecated;
        if entry.deprecated {
            report
                .warnings
                .push(format!("interface version '{}' is deprecated", tag));
        }

        let host = self
            .matrix
            .get(CURRENT_API_VERSION)
            .expect("current interface version present in matrix");
        if host.loads_unmodified.iter().any(|v| *v == tag) {
            report.is_compatible = true;
            report.is_supported = true;
            return report;
        }

        // Walk the migration chain toward the current version.
        let mut cursor = tag;
        let mut path = Vec::new();
        while let Some(next) = self.matrix.get(cursor).and_then(|e| e.migrates_to) {
            path.push(next.to_string());
            if next == CURRENT_API_VERSION {
                report.is_supported = true;
                report.migration_path = path;
                return report;
            }
            cursor = next;
        }
        report.errors.push(format!(
            "no migration path from interface '{}' to '{}'",
            tag, CURRENT_API_VERSION
        ));
        report
    }

    /// Migrate a raw manifest document along the assessed path. Returns the
    /// (possibly unchanged) document and the path applied.
    pub fn migrate_document(
        &self,
        plugin: &str,
        mut document: Value,
    ) -> Result<(Value, Vec<String>), PluginSystemError> {
        let tag_owned = document
            .get("apiVersion")
            .and_then(Value::as_str)
            .unwrap_or(EARLIEST_API_VERSION)
            .to_string();
        let report = self.assess(Some(&tag_owned));

        if !report.is_valid || !report.is_supported {
            return Err(PluginSystemError::VersionIncompatible {
                plugin: plugin.to_string(),
                host_version: CURRENT_API_VERSION.to_string(),
                reason: report
                    .errors
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "unsupported interface version".to_string()),
            });
        }
        if report.is_compatible {
            return Ok((document, Vec::new()));
        }

        let mut cursor = tag_owned;
        for step in &report.migration_path {
            let migration = self
                .migrations
                .iter()
                .find(|((from, to), _)| *from == cursor.as_str() && *to == step.as_str())
                .map(|(_, m)| *m);
            let Some(migration) = migration else {
                return Err(PluginSystemError::InternalError(format!(
                    "declared migration {} -> {} has no transform",
                    cursor, step
                )));
            };
            debug!("migrating manifest of '{}' {} -> {}", plugin, cursor, step);
            document = migration(document);
            cursor = step.clone();
        }
        Ok((document, report.migration_path))
    }

    /// Check the manifest's declared host bounds against the running host.
    pub fn check_host_bounds(
        &self,
        manifest: &PluginManifest,
        host_version: &PluginVersion,
    ) -> Result<(), PluginSystemError> {
        let incompatible = |reason: String| PluginSystemError::VersionIncompatible {
            plugin: manifest.name.clone(),
            host_version: host_version.to_string(),
            reason,
        };

        if let Some(min) = manifest.compatibility.host_min.as_deref() {
            let min = PluginVersion::parse(min)?;
            if host_version.compare(&min) == std::cmp::Ordering::Less {
                return Err(incompatible(format!("requires host >= {}", min)));
            }
        }
        if let Some(max) = manifest.compatibility.host_max.as_deref() {
            let max = PluginVersion::parse(max)?;
            if host_version.compare(&max) == std::cmp::Ordering::Greater {
                return Err(incompatible(format!("requires host <= {}", max)));
            }
        }
        Ok(())
    }
}

impl Default for CompatibilityEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Interface 1.0 declared guards as bare symbol names; 2.0 uses the tagged
/// local/external union. The transform rewrites each string into a local,
/// unexported guard whose class is the symbol itself.
fn migrate_1_to_2(mut document: Value) -> Value {
    if let Some(guards) = document
        .get_mut("module")
        .and_then(|m| m.get_mut("guards"))
        .and_then(Value::as_array_mut)
    {
        for guard in guards.iter_mut() {
            if let Some(name) = guard.as_str() {
                *guard = json!({
                    "name": name,
                    "scope": "local",
                    "class": name,
                    "exported": false,
                });
            }
        }
    }
    if let Some(object) = document.as_object_mut() {
        object.insert("apiVersion".to_string(), json!("2.0"));
    }
    document
}
