use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::{Duration, Instant};

use log::{debug, warn};
use tokio::fs;

use crate::plugin_system::error::{PluginSystemError, PluginSystemErrorSource};

/// Host-platform modules a plugin must not reference. Namespaced variants
/// (`node:fs`) and subpaths (`fs/promises`) match their base entry.
pub const DENYLIST: &[&str] = &[
    "fs",
    "child_process",
    "process",
    "net",
    "http",
    "https",
    "http2",
    "dgram",
    "dns",
    "tls",
    "cluster",
    "worker_threads",
    "os",
    "vm",
    "v8",
    "repl",
    "crypto",
    "module",
    "inspector",
    "perf_hooks",
];

/// File extensions examined by the scanner.
const CODE_EXTENSIONS: &[&str] = &["js", "mjs", "cjs", "jsx", "ts", "tsx"];

/// Directory names never descended into.
const SKIPPED_DIRS: &[&str] = &["node_modules", "target", "vendor", "__pycache__"];

/// Bounds applied to every scan.
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Files larger than this are not examined.
    pub max_content_size: u64,
    /// Upper bound on extracted references per file.
    pub max_iterations: usize,
    /// Wall-clock budget per file.
    pub scan_timeout: Duration,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            max_content_size: 1024 * 1024,
            max_iterations: 10_000,
            scan_timeout: Duration::from_millis(5000),
        }
    }
}

/// One flagged file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanFinding {
    pub relative_path: String,
    pub disallowed_modules: Vec<String>,
    /// The file could not be scanned within bounds and is treated as unsafe.
    pub scan_failed: bool,
}

/// Static scanner for denylisted host-module references in plugin code.
#[derive(Debug, Clone, Default)]
pub struct UnsafeImportScanner {
    config: ScannerConfig,
}

impl UnsafeImportScanner {
    pub fn new(config: ScannerConfig) -> Self {
        Self { config }
    }

    /// Walk a plugin directory and report every file referencing a
    /// denylisted module. An empty result means the tree is clean.
    pub async fn scan_dir(&self, root: &Path) -> Result<Vec<ScanFinding>, PluginSystemError> {
        let mut findings = Vec::new();
        self.walk(root.to_path_buf(), root.to_path_buf(), &mut findings)
            .await?;
        Ok(findings)
    }

    /// Boxed recursion helper, required for the recursive async walk.
    fn walk<'a>(
        &'a self,
        dir: PathBuf,
        root: PathBuf,
        findings: &'a mut Vec<ScanFinding>,
    ) -> Pin<Box<dyn Future<Output = Result<(), PluginSystemError>> + Send + 'a>> {
        Box::pin(async move {
            let mut entries = fs::read_dir(&dir).await.map_err(|e| {
                PluginSystemError::LoadingError {
                    plugin: root.display().to_string(),
                    path: Some(dir.clone()),
                    source: Box::new(PluginSystemErrorSource::Io(e)),
                }
            })?;

            while let Some(entry) = entries.next_entry().await.map_err(|e| {
                PluginSystemError::LoadingError {
                    plugin: root.display().to_string(),
                    path: Some(dir.clone()),
                    source: Box::new(PluginSystemErrorSource::Io(e)),
                }
            })? {
                let path = entry.path();
                let name = entry.file_name().to_string_lossy().into_owned();
                let file_type = match entry.file_type().await {
                    Ok(ft) => ft,
                    Err(e) => {
                        warn!("skipping {}: {}", path.display(), e);
                        continue;
                    }
                };

                if file_type.is_dir() {
                    if name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_str()) {
                        continue;
                    }
                    self.walk(path, root.clone(), findings).await?;
                    continue;
                }

                let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
                    continue;
                };
                if !CODE_EXTENSIONS.contains(&ext) {
                    continue;
                }

                let relative = path
                    .strip_prefix(&root)
                    .unwrap_or(&path)
                    .display()
                    .to_string();

                let metadata = match fs::metadata(&path).await {
                    Ok(m) => m,
                    Err(e) => {
                        warn!("skipping {}: {}", path.display(), e);
                        continue;
                    }
                };
                if metadata.len() > self.config.max_content_size {
                    debug!(
                        "skipping {} ({} bytes over content cap)",
                        relative,
                        metadata.len()
                    );
                    continue;
                }

                let content = match fs::read_to_string(&path).await {
                    Ok(c) => c,
                    Err(e) => {
                        warn!("unreadable code file {}: {}", relative, e);
                        findings.push(ScanFinding {
                            relative_path: relative,
                            disallowed_modules: Vec::new(),
                            scan_failed: true,
                        });
                        continue;
                    }
                };

                match self.scan_content(&content) {
                    Ok(modules) if modules.is_empty() => {}
                    Ok(modules) => findings.push(ScanFinding {
                        relative_path: relative,
                        disallowed_modules: modules,
                        scan_failed: false,
                    }),
                    Err(ScanAborted) => findings.push(ScanFinding {
                        relative_path: relative,
                        disallowed_modules: Vec::new(),
                        scan_failed: true,
                    }),
                }
            }
            Ok(())
        })
    }

    /// Extract import/require references and match them against the
    /// denylist. Bounded by iteration count and wall-clock deadline.
    fn scan_content(&self, content: &str) -> Result<Vec<String>, ScanAborted> {
        let deadline = Instant::now() + self.config.scan_timeout;
        let mut hits = Vec::new();
        let mut iterations = 0usize;

        for reference in ModuleReferences::new(content) {
            iterations += 1;
            if iterations > self.config.max_iterations || Instant::now() >= deadline {
                return Err(ScanAborted);
            }
            if let Some(base) = denylisted_base(&reference) {
                if !hits.contains(&base) {
                    hits.push(base);
                }
            }
        }
        Ok(hits)
    }
}

struct ScanAborted;

/// Match a module reference against the denylist, honoring the `node:`
/// namespace and subpath imports.
fn denylisted_base(reference: &str) -> Option<String> {
    let stripped = reference.strip_prefix("node:").unwrap_or(reference);
    let base = stripped.split('/').next().unwrap_or(stripped);
    DENYLIST
        .iter()
        .find(|m| **m == base)
        .map(|_| reference.to_string())
}

/// Iterator over quoted module references that follow an import or require
/// keyword. This is a lexical pass: it extracts string literals whose
/// preceding context is `require(`, `import(`, `import` or `from`.
struct ModuleReferences<'a> {
    rest: &'a str,
}

impl<'a> ModuleReferences<'a> {
    fn new(content: &'a str) -> Self {
        Self { rest: content }
    }
}

impl<'a> Iterator for ModuleReferences<'a> {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let quote_at = self.rest.find(['\'', '"'])?;
            let quote = self.rest.as_bytes()[quote_at] as char;
            let before = self.rest[..quote_at].trim_end();
            let after = &self.rest[quote_at + 1..];

            let Some(end) = after.find(quote) else {
                self.rest = "";
                return None;
            };
            let literal = &after[..end];
            self.rest = &after[end + 1..];

            let is_import_context = before.ends_with("require(")
                || before.ends_with("import(")
                || before.ends_with("from")
                || before.ends_with("import")
                || before.ends_with("require (")
                || before.ends_with("import (");

            if is_import_context && !literal.is_empty() && !literal.contains('\n') {
                return Some(literal.to_string());
            }
        }
    }
}
