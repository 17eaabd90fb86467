use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::debug;
use sha2::{Digest, Sha256};

use crate::plugin_system::manifest::{
    is_valid_plugin_name, GuardDecl, PluginManifest, RawManifest, TrustLevel,
};
use crate::plugin_system::version::PluginVersion;

/// How much of the manifest to check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationSeverity {
    /// Name and version only.
    Trusted,
    /// Required fields and shapes.
    Essential,
    /// Everything, including guard graphs and the security block.
    Full,
}

/// Outcome of one validation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    fn from_parts(errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }
}

/// Cache counters, observable for diagnostics.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct CacheEntry {
    report: ValidationReport,
    inserted: Instant,
}

/// Strict-LRU result cache keyed by the SHA-256 of the manifest bytes plus
/// the requested severity.
struct ResultCache {
    entries: HashMap<(String, ValidationSeverity), CacheEntry>,
    order: VecDeque<(String, ValidationSeverity)>,
    capacity: usize,
    ttl: Duration,
    hits: u64,
    misses: u64,
}

impl ResultCache {
    fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity,
            ttl,
            hits: 0,
            misses: 0,
        }
    }

    fn get(&mut self, key: &(String, ValidationSeverity)) -> Option<ValidationReport> {
        let expired = match self.entries.get(key) {
            Some(entry) => entry.inserted.elapsed() >= self.ttl,
            None => {
                self.misses += 1;
                return None;
            }
        };
        if expired {
            self.entries.remove(key);
            self.order.retain(|k| k != key);
            self.misses += 1;
            return None;
        }
        // Refresh recency.
        self.order.retain(|k| k != key);
        self.order.push_back(key.clone());
        self.hits += 1;
        self.entries.get(key).map(|e| e.report.clone())
    }

    fn insert(&mut self, key: (String, ValidationSeverity), report: ValidationReport) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.contains_key(&key) {
            self.order.retain(|k| k != &key);
        }
        while self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
        self.order.push_back(key.clone());
        self.entries.insert(
            key,
            CacheEntry {
                report,
                inserted: Instant::now(),
            },
        );
    }
}

/// Structural and semantic validator for plugin manifests.
///
/// Stateless across validations except for the LRU result cache.
pub struct ManifestValidator {
    cache: Mutex<ResultCache>,
}

pub const DEFAULT_CACHE_CAPACITY: usize = 1000;
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

impl ManifestValidator {
    pub fn new() -> Self {
        Self::with_cache(DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL)
    }

    pub fn with_cache(capacity: usize, ttl: Duration) -> Self {
        Self {
            cache: Mutex::new(ResultCache::new(capacity, ttl)),
        }
    }

    /// Validate raw manifest bytes, consulting the result cache.
    pub fn validate_bytes(&self, bytes: &[u8], severity: ValidationSeverity) -> ValidationReport {
        let digest = hex::encode(Sha256::digest(bytes));
        let key = (digest, severity);

        if let Some(report) = self
            .cache
            .lock()
            .expect("validator cache lock poisoned")
            .get(&key)
        {
            return report;
        }

        let report = match serde_json::from_slice::<RawManifest>(bytes) {
            Ok(raw) => self.validate(&raw, severity),
            Err(e) => ValidationReport::from_parts(
                vec![format!("manifest is not a valid JSON document: {}", e)],
                Vec::new(),
            ),
        };

        self.cache
            .lock()
            .expect("validator cache lock poisoned")
            .insert(key, report.clone());
        report
    }

    /// Validate an already-decoded manifest. Pure; never touches the cache.
    pub fn validate(&self, raw: &RawManifest, severity: ValidationSeverity) -> ValidationReport {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        check_identity(raw, &mut errors);
        if severity == ValidationSeverity::Trusted {
            return ValidationReport::from_parts(errors, warnings);
        }

        check_required_fields(raw, &mut errors);
        check_shapes(raw, &mut errors, &mut warnings);
        if severity == ValidationSeverity::Essential {
            return ValidationReport::from_parts(errors, warnings);
        }

        check_security(raw, &mut errors, &mut warnings);
        check_guard_graph(raw, &mut errors);
        check_compatibility_bounds(raw, &mut errors);
        ValidationReport::from_parts(errors, warnings)
    }

    /// Convert a raw manifest into its validated form. Runs a full
    /// validation first; the error carries every finding.
    pub fn build(&self, raw: &RawManifest) -> Result<PluginManifest, Vec<String>> {
        let report = self.validate(raw, ValidationSeverity::Full);
        if !report.valid {
            return Err(report.errors);
        }
        PluginManifest::from_raw(raw)
    }

    pub fn cache_stats(&self) -> CacheStats {
        let cache = self.cache.lock().expect("validator cache lock poisoned");
        CacheStats {
            hits: cache.hits,
            misses: cache.misses,
            entries: cache.entries.len(),
        }
    }
}

impl Default for ManifestValidator {
    fn default() -> Self {
        Self::new()
    }
}

fn check_identity(raw: &RawManifest, errors: &mut Vec<String>) {
    match raw.name.as_deref() {
        None | Some("") => errors.push("missing required field 'name'".to_string()),
        Some(name) if !is_valid_plugin_name(name) => {
            errors.push(format!("invalid plugin name '{}'", name))
        }
        Some(_) => {}
    }
    match raw.version.as_deref() {
        None | Some("") => errors.push("missing required field 'version'".to_string()),
        Some(version) => {
            if let Err(e) = PluginVersion::parse(version) {
                errors.push(e.to_string());
            }
        }
    }
}

fn check_required_fields(raw: &RawManifest, errors: &mut Vec<String>) {
    for (field, value) in [
        ("description", &raw.description),
        ("author", &raw.author),
        ("license", &raw.license),
    ] {
        if value.as_deref().map_or(true, str::is_empty) {
            errors.push(format!("missing required field '{}'", field));
        }
    }
    if raw.module.is_none() {
        errors.push("missing required field 'module'".to_string());
    }
}

fn check_shapes(raw: &RawManifest, errors: &mut Vec<String>, warnings: &mut Vec<String>) {
    for dep in &raw.dependencies {
        if !is_valid_plugin_name(dep) {
            errors.push(format!("invalid dependency name '{}'", dep));
        }
    }
    if raw
        .dependencies
        .iter()
        .collect::<HashSet<_>>()
        .len()
        != raw.dependencies.len()
    {
        warnings.push("duplicate entries in 'dependencies'".to_string());
    }

    if let Some(module) = &raw.module {
        let mut seen = HashSet::new();
        for guard in &module.guards {
            if guard.name().is_empty() {
                errors.push("guard with empty name".to_string());
            }
            if !seen.insert(guard.name().to_string()) {
                errors.push(format!("duplicate guard name '{}'", guard.name()));
            }
            match guard {
                GuardDecl::Local { class, .. } if class.is_empty() => {
                    errors.push(format!("local guard '{}' has no class", guard.name()))
                }
                GuardDecl::External { source, .. } if !is_valid_plugin_name(source) => errors
                    .push(format!(
                        "external guard '{}' has invalid source '{}'",
                        guard.name(),
                        source
                    )),
                _ => {}
            }
        }
        for symbol in module.required_symbols() {
            if symbol.is_empty() {
                errors.push("empty symbol reference in 'module'".to_string());
            }
        }
    }

    if let Some(main) = raw.main.as_deref() {
        if is_unsafe_relative_path(main) {
            errors.push(format!(
                "entry path '{}' must be relative and must not traverse upwards",
                main
            ));
        }
    }
}

/// Absolute paths and `..` components are rejected wherever the manifest
/// names a file.
fn is_unsafe_relative_path(path: &str) -> bool {
    let p = Path::new(path);
    p.is_absolute()
        || path.starts_with('/')
        || path.starts_with('\\')
        || p.components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
}

fn check_security(raw: &RawManifest, errors: &mut Vec<String>, warnings: &mut Vec<String>) {
    let Some(security) = &raw.security else {
        warnings.push("missing 'security' block; defaulting to community trust".to_string());
        return;
    };

    match security.trust_level.as_deref() {
        None => errors.push("security block missing 'trustLevel'".to_string()),
        Some(level) if TrustLevel::from_label(level).is_none() => {
            errors.push(format!("unknown trust level '{}'", level))
        }
        Some(_) => {}
    }

    if let Some(checksum) = &security.checksum {
        match checksum.algorithm.to_ascii_uppercase().as_str() {
            "SHA-256" | "SHA256" | "SHA-512" | "SHA512" => {}
            "MD5" => warnings.push("MD5 checksum is deprecated; use SHA-256".to_string()),
            other => errors.push(format!("unsupported checksum algorithm '{}'", other)),
        }
        if checksum.hash.is_empty() || !checksum.hash.chars().all(|c| c.is_ascii_hexdigit()) {
            errors.push("checksum hash must be a hex digest".to_string());
        }
    }

    if let Some(sandbox) = &security.sandbox {
        if !sandbox.is_object() {
            errors.push("'security.sandbox' must be an object".to_string());
        }
    }
}

/// Guard dependencies must form a DAG within the declaring plugin.
fn check_guard_graph(raw: &RawManifest, errors: &mut Vec<String>) {
    let Some(module) = &raw.module else {
        return;
    };
    let local: HashMap<&str, &Vec<String>> = module
        .guards
        .iter()
        .filter_map(|g| match g {
            GuardDecl::Local {
                name, dependencies, ..
            } => Some((name.as_str(), dependencies)),
            GuardDecl::External { .. } => None,
        })
        .collect();

    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }
    let mut colors: HashMap<&str, Color> = local.keys().map(|k| (*k, Color::White)).collect();

    // Iterative DFS; a gray-to-gray edge is a cycle.
    for start in local.keys() {
        if colors[start] != Color::White {
            continue;
        }
        let mut stack = vec![(*start, 0usize)];
        while let Some((node, idx)) = stack.pop() {
            if idx == 0 {
                colors.insert(node, Color::Gray);
            }
            let deps = local.get(node).copied();
            let next = deps.and_then(|d| d.get(idx));
            match next {
                Some(dep) => {
                    stack.push((node, idx + 1));
                    match colors.get(dep.as_str()) {
                        Some(Color::Gray) => {
                            errors.push(format!(
                                "guard dependency cycle involving '{}' and '{}'",
                                node, dep
                            ));
                        }
                        Some(Color::White) => stack.push((dep.as_str(), 0)),
                        Some(Color::Black) => {}
                        // External or undeclared guard names are checked at
                        // resolution time, not here.
                        None => {}
                    }
                }
                None => {
                    colors.insert(node, Color::Black);
                }
            }
        }
    }
    debug!(
        "guard graph check: {} local guards, {} errors so far",
        local.len(),
        errors.len()
    );
}

fn check_compatibility_bounds(raw: &RawManifest, errors: &mut Vec<String>) {
    for (field, value) in [
        ("hostMin", &raw.compatibility.host_min),
        ("hostMax", &raw.compatibility.host_max),
        ("runtimeMin", &raw.compatibility.runtime_min),
    ] {
        if let Some(v) = value {
            if let Err(e) = PluginVersion::parse(v) {
                errors.push(format!("compatibility.{}: {}", field, e));
            }
        }
    }
}
