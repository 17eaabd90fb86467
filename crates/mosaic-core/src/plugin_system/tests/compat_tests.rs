#![cfg(test)]

use serde_json::json;

use crate::plugin_system::compat::{CompatibilityEngine, CURRENT_API_VERSION};
use crate::plugin_system::manifest::{
    Compatibility, ModuleComposition, PluginManifest, SecurityBlock,
};
use crate::plugin_system::version::PluginVersion;

#[test]
fn current_interface_is_compatible_unmodified() {
    let engine = CompatibilityEngine::new();
    let report = engine.assess(Some(CURRENT_API_VERSION));
    assert!(report.is_valid);
    assert!(report.is_supported);
    assert!(report.is_compatible);
    assert!(!report.is_deprecated);
    assert!(report.migration_path.is_empty());
}

#[test]
fn earliest_interface_is_supported_via_migration() {
    let engine = CompatibilityEngine::new();
    let report = engine.assess(Some("1.0"));
    assert!(report.is_valid);
    assert!(report.is_supported);
    assert!(!report.is_compatible);
    assert!(report.is_deprecated);
    assert_eq!(report.migration_path, vec!["2.0".to_string()]);
    assert!(!report.warnings.is_empty());
}

#[test]
fn absent_api_version_is_treated_as_earliest() {
    let engine = CompatibilityEngine::new();
    let report = engine.assess(None);
    assert!(report.is_valid);
    assert_eq!(report.migration_path, vec!["2.0".to_string()]);
}

#[test]
fn unknown_interface_is_invalid() {
    let engine = CompatibilityEngine::new();
    let report = engine.assess(Some("9.9"));
    assert!(!report.is_valid);
    assert!(!report.is_supported);
    assert!(!report.errors.is_empty());
}

#[test]
fn migration_rewrites_string_guards() {
    let engine = CompatibilityEngine::new();
    let document = json!({
        "name": "legacy",
        "version": "1.0.0",
        "module": {"guards": ["AdminGuard", "SessionGuard"]}
    });

    let (migrated, path) = engine.migrate_document("legacy", document).unwrap();
    assert_eq!(path, vec!["2.0".to_string()]);
    assert_eq!(migrated["apiVersion"], json!("2.0"));
    assert_eq!(
        migrated["module"]["guards"][0],
        json!({
            "name": "AdminGuard",
            "scope": "local",
            "class": "AdminGuard",
            "exported": false,
        })
    );
}

#[test]
fn current_documents_pass_through_unchanged() {
    let engine = CompatibilityEngine::new();
    let document = json!({
        "name": "modern",
        "version": "1.0.0",
        "apiVersion": "2.0",
        "module": {"guards": [
            {"name": "admin", "scope": "local", "class": "AdminGuard"}
        ]}
    });

    let (migrated, path) = engine.migrate_document("modern", document.clone()).unwrap();
    assert!(path.is_empty());
    assert_eq!(migrated, document);
}

#[test]
fn unknown_interface_fails_migration() {
    let engine = CompatibilityEngine::new();
    let document = json!({"name": "odd", "version": "1.0.0", "apiVersion": "9.9"});
    assert!(engine.migrate_document("odd", document).is_err());
}

fn manifest_with_bounds(min: Option<&str>, max: Option<&str>) -> PluginManifest {
    PluginManifest {
        name: "bounded".to_string(),
        version: PluginVersion::new(1, 0, 0),
        description: String::new(),
        author: String::new(),
        license: String::new(),
        api_version: "2.0".to_string(),
        load_order: 0,
        critical: false,
        dependencies: Vec::new(),
        compatibility: Compatibility {
            host_min: min.map(str::to_string),
            host_max: max.map(str::to_string),
            runtime_min: None,
        },
        security: SecurityBlock::default(),
        module: ModuleComposition::default(),
        main: None,
    }
}

#[test]
fn host_bounds_are_enforced() {
    let engine = CompatibilityEngine::new();
    let host = PluginVersion::new(1, 5, 0);

    assert!(engine
        .check_host_bounds(&manifest_with_bounds(Some("1.0.0"), Some("2.0.0")), &host)
        .is_ok());
    assert!(engine
        .check_host_bounds(&manifest_with_bounds(Some("2.0.0"), None), &host)
        .is_err());
    assert!(engine
        .check_host_bounds(&manifest_with_bounds(None, Some("1.0.0")), &host)
        .is_err());
    assert!(engine
        .check_host_bounds(&manifest_with_bounds(None, None), &host)
        .is_ok());
}
