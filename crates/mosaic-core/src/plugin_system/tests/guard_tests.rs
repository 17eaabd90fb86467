#![cfg(test)]

use crate::plugin_system::guard::{GuardRegistration, GuardRegistry, GuardScope};

fn local(owner: &str, name: &str, deps: &[&str], exported: bool) -> GuardRegistration {
    GuardRegistration {
        owner: owner.to_string(),
        name: name.to_string(),
        scope: GuardScope::Local,
        class_ref: Some(format!("{}Guard", name)),
        dependencies: deps.iter().map(|d| d.to_string()).collect(),
        exported,
        source: None,
    }
}

fn external(owner: &str, name: &str, source: &str) -> GuardRegistration {
    GuardRegistration {
        owner: owner.to_string(),
        name: name.to_string(),
        scope: GuardScope::External,
        class_ref: None,
        dependencies: Vec::new(),
        exported: false,
        source: Some(source.to_string()),
    }
}

fn names(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

#[test]
fn duplicate_registration_is_rejected() {
    let registry = GuardRegistry::new();
    registry.register(local("auth", "session", &[], false)).unwrap();
    assert!(registry.register(local("auth", "session", &[], true)).is_err());
    // Same name under another owner is fine.
    registry.register(local("api", "session", &[], false)).unwrap();
    assert_eq!(registry.len(), 2);
}

#[test]
fn resolves_local_dependency_closure() {
    let registry = GuardRegistry::new();
    registry
        .register(local("auth", "admin", &["session"], false))
        .unwrap();
    registry
        .register(local("auth", "session", &["audit"], false))
        .unwrap();
    registry.register(local("auth", "audit", &[], false)).unwrap();
    registry.register(local("auth", "unrelated", &[], false)).unwrap();

    let resolution = registry.resolve("auth", &names(&["admin"]));
    assert!(resolution.is_complete());
    let resolved: Vec<&str> = resolution.resolved.iter().map(|g| g.name.as_str()).collect();
    assert_eq!(resolved, vec!["admin", "session", "audit"]);
}

#[test]
fn missing_guards_are_reported() {
    let registry = GuardRegistry::new();
    registry
        .register(local("auth", "admin", &["nonexistent"], false))
        .unwrap();

    let resolution = registry.resolve("auth", &names(&["admin", "ghost"]));
    assert_eq!(resolution.missing, names(&["nonexistent", "ghost"]));
    assert_eq!(resolution.resolved.len(), 1);
}

#[test]
fn external_reference_requires_export() {
    let registry = GuardRegistry::new();
    registry.register(local("sec", "admin", &[], false)).unwrap();
    registry.register(external("api", "admin", "sec")).unwrap();

    // Unexported source guard: the external reference is missing.
    let resolution = registry.resolve("api", &names(&["admin"]));
    assert!(!resolution.is_complete());
    assert_eq!(resolution.missing, names(&["admin"]));

    // An exported guard of another owner resolves.
    let registry = GuardRegistry::new();
    registry.register(local("sec", "admin", &[], true)).unwrap();
    registry.register(external("api", "admin", "sec")).unwrap();
    let resolution = registry.resolve("api", &names(&["admin"]));
    assert!(resolution.is_complete());
    assert_eq!(resolution.resolved.len(), 1);
    assert_eq!(resolution.resolved[0].owner, "sec");
    assert!(resolution.resolved[0].exported);
}

#[test]
fn external_resolution_follows_source_dependencies() {
    let registry = GuardRegistry::new();
    registry
        .register(local("sec", "admin", &["session"], true))
        .unwrap();
    registry.register(local("sec", "session", &[], false)).unwrap();
    registry.register(external("api", "admin", "sec")).unwrap();

    let resolution = registry.resolve("api", &names(&["admin"]));
    assert!(resolution.is_complete());
    let resolved: Vec<(&str, &str)> = resolution
        .resolved
        .iter()
        .map(|g| (g.owner.as_str(), g.name.as_str()))
        .collect();
    assert_eq!(resolved, vec![("sec", "admin"), ("sec", "session")]);
}

#[test]
fn no_unexported_guard_escapes_resolution() {
    let registry = GuardRegistry::new();
    registry.register(local("sec", "admin", &[], true)).unwrap();
    registry.register(local("sec", "hidden", &[], false)).unwrap();
    registry.register(external("api", "admin", "sec")).unwrap();
    registry.register(external("api", "hidden", "sec")).unwrap();

    let resolution = registry.resolve("api", &names(&["admin", "hidden"]));
    assert_eq!(resolution.missing, names(&["hidden"]));
    for guard in &resolution.resolved {
        assert!(guard.owner == "api" || guard.exported);
    }
}

#[test]
fn cycles_are_reported_once_and_do_not_fault() {
    let registry = GuardRegistry::new();
    registry.register(local("auth", "a", &["b"], false)).unwrap();
    registry.register(local("auth", "b", &["a"], false)).unwrap();
    registry.register(local("auth", "c", &[], false)).unwrap();

    let resolution = registry.resolve("auth", &names(&["a", "b", "c"]));
    let mut circular = resolution.circular.clone();
    circular.sort();
    assert_eq!(circular, names(&["a", "b"]));
    // The independent guard still resolves.
    assert!(resolution.resolved.iter().any(|g| g.name == "c"));
}

#[test]
fn unregister_owner_is_exact() {
    let registry = GuardRegistry::new();
    registry.register(local("user", "session", &[], false)).unwrap();
    registry.register(local("users", "session", &[], false)).unwrap();

    assert_eq!(registry.unregister_owner("user"), 1);
    assert!(registry.get("user", "session").is_none());
    assert!(registry.get("users", "session").is_some());
}

#[test]
fn resolution_is_deterministic() {
    let registry = GuardRegistry::new();
    registry
        .register(local("auth", "root", &["b", "a", "c"], false))
        .unwrap();
    for name in ["a", "b", "c"] {
        registry.register(local("auth", name, &[], false)).unwrap();
    }

    let first = registry.resolve("auth", &names(&["root"]));
    let second = registry.resolve("auth", &names(&["root"]));
    let order: Vec<&str> = first.resolved.iter().map(|g| g.name.as_str()).collect();
    // Declaration order of dependencies, not alphabetical.
    assert_eq!(order, vec!["root", "b", "a", "c"]);
    assert_eq!(
        first.resolved, second.resolved,
        "resolution must be stable across calls"
    );
}
