use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::plugin_system::version::PluginVersion;

/// Longest accepted plugin name, including the leading letter.
pub const MAX_NAME_LEN: usize = 50;

/// Check a plugin name against the identifier rules: a lowercase letter
/// followed by 1 to 49 of lowercase letters, digits, `_` or `-`.
pub fn is_valid_plugin_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !first.is_ascii_lowercase() {
        return false;
    }
    let rest_len = name.len() - 1;
    if rest_len < 1 || rest_len > MAX_NAME_LEN - 1 {
        return false;
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

/// Declared provenance of a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustLevel {
    Internal,
    Verified,
    Community,
}

impl TrustLevel {
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "internal" => Some(TrustLevel::Internal),
            "verified" => Some(TrustLevel::Verified),
            "community" => Some(TrustLevel::Community),
            _ => None,
        }
    }
}

impl fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TrustLevel::Internal => "internal",
            TrustLevel::Verified => "verified",
            TrustLevel::Community => "community",
        };
        write!(f, "{}", label)
    }
}

/// Declared archive checksum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumDecl {
    pub algorithm: String,
    pub hash: String,
}

/// The manifest `security` block. Sandbox hints are declarative only; the
/// host does not enforce them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityBlock {
    pub trust_level: TrustLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<ChecksumDecl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<Value>,
}

impl Default for SecurityBlock {
    fn default() -> Self {
        Self {
            trust_level: TrustLevel::Community,
            checksum: None,
            signature: None,
            sandbox: None,
        }
    }
}

/// A guard declared by a plugin: either owned locally or referenced from
/// another plugin's exported guard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "lowercase")]
pub enum GuardDecl {
    Local {
        name: String,
        class: String,
        #[serde(default)]
        dependencies: Vec<String>,
        #[serde(default)]
        exported: bool,
    },
    External {
        name: String,
        source: String,
    },
}

impl GuardDecl {
    pub fn name(&self) -> &str {
        match self {
            GuardDecl::Local { name, .. } => name,
            GuardDecl::External { name, .. } => name,
        }
    }
}

/// Host compatibility bounds declared by the plugin.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Compatibility {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_min: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_max: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_min: Option<String>,
}

/// Symbolic composition of the plugin module. Every string names a symbol
/// the plugin's entry module must export.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleComposition {
    #[serde(default)]
    pub controllers: Vec<String>,
    #[serde(default)]
    pub providers: Vec<String>,
    #[serde(default)]
    pub exports: Vec<String>,
    #[serde(default)]
    pub imports: Vec<String>,
    #[serde(default)]
    pub guards: Vec<GuardDecl>,
}

impl ModuleComposition {
    /// All symbol names the entry module must export, in declaration order.
    pub fn required_symbols(&self) -> impl Iterator<Item = &str> {
        self.controllers
            .iter()
            .chain(self.providers.iter())
            .chain(self.exports.iter())
            .chain(self.imports.iter())
            .map(String::as_str)
    }
}

/// Intermediate manifest shape, tolerant of missing fields so the validator
/// can report them as errors rather than failing deserialization.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawManifest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub load_order: Option<u32>,
    #[serde(default)]
    pub critical: bool,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub compatibility: Compatibility,
    #[serde(default)]
    pub security: Option<RawSecurityBlock>,
    #[serde(default)]
    pub module: Option<ModuleComposition>,
    /// Entry file relative to the archive root; defaults to the platform
    /// entry name when absent.
    #[serde(default)]
    pub main: Option<String>,
}

/// Security block with the trust level kept textual so an unknown literal
/// surfaces as a validation error instead of a parse failure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSecurityBlock {
    #[serde(default)]
    pub trust_level: Option<String>,
    #[serde(default)]
    pub checksum: Option<ChecksumDecl>,
    #[serde(default)]
    pub signature: Option<Value>,
    #[serde(default)]
    pub sandbox: Option<Value>,
}

/// A validated plugin manifest. Produced only by the validator; fields are
/// the typed counterparts of the raw shape.
#[derive(Debug, Clone)]
pub struct PluginManifest {
    pub name: String,
    pub version: PluginVersion,
    pub description: String,
    pub author: String,
    pub license: String,
    /// Interface-version tag; absent in the source document means the
    /// earliest known interface.
    pub api_version: String,
    pub load_order: u32,
    pub critical: bool,
    pub dependencies: Vec<String>,
    pub compatibility: Compatibility,
    pub security: SecurityBlock,
    pub module: ModuleComposition,
    pub main: Option<String>,
}

impl PluginManifest {
    /// Convert a raw manifest, requiring only a valid identity. Fields the
    /// document omits take their defaults; full validation happens
    /// separately so identity-bearing but invalid manifests can still be
    /// tracked (and fail) as graph nodes.
    pub fn from_raw(raw: &RawManifest) -> Result<Self, Vec<String>> {
        let mut errors = Vec::new();
        let name = match raw.name.as_deref() {
            Some(n) if is_valid_plugin_name(n) => n.to_string(),
            Some(n) => {
                errors.push(format!("invalid plugin name '{}'", n));
                String::new()
            }
            None => {
                errors.push("missing required field 'name'".to_string());
                String::new()
            }
        };
        let version = match raw.version.as_deref() {
            Some(v) => match PluginVersion::parse(v) {
                Ok(version) => Some(version),
                Err(e) => {
                    errors.push(e.to_string());
                    None
                }
            },
            None => {
                errors.push("missing required field 'version'".to_string());
                None
            }
        };
        if !errors.is_empty() {
            return Err(errors);
        }

        let security = raw
            .security
            .as_ref()
            .map(|s| SecurityBlock {
                trust_level: s
                    .trust_level
                    .as_deref()
                    .and_then(TrustLevel::from_label)
                    .unwrap_or(TrustLevel::Community),
                checksum: s.checksum.clone(),
                signature: s.signature.clone(),
                sandbox: s.sandbox.clone(),
            })
            .unwrap_or_default();

        Ok(Self {
            name,
            version: version.expect("version parsed above"),
            description: raw.description.clone().unwrap_or_default(),
            author: raw.author.clone().unwrap_or_default(),
            license: raw.license.clone().unwrap_or_default(),
            api_version: raw
                .api_version
                .clone()
                .unwrap_or_else(|| crate::plugin_system::compat::EARLIEST_API_VERSION.to_string()),
            load_order: raw.load_order.unwrap_or(0),
            critical: raw.critical,
            dependencies: raw.dependencies.clone(),
            compatibility: raw.compatibility.clone(),
            security,
            module: raw.module.clone().unwrap_or_default(),
            main: raw.main.clone(),
        })
    }

    /// The `name@version` identifier.
    pub fn id(&self) -> PluginId {
        PluginId {
            name: self.name.clone(),
            version: self.version.clone(),
        }
    }

    /// Local guards this plugin exports for external reference.
    pub fn exported_guards(&self) -> impl Iterator<Item = &GuardDecl> {
        self.module
            .guards
            .iter()
            .filter(|g| matches!(g, GuardDecl::Local { exported: true, .. }))
    }
}

/// `name@version` identity of a plugin archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginId {
    pub name: String,
    pub version: PluginVersion,
}

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plugin_name_rules() {
        assert!(is_valid_plugin_name("auth"));
        assert!(is_valid_plugin_name("user_svc-2"));
        assert!(!is_valid_plugin_name("a")); // too short
        assert!(!is_valid_plugin_name("Auth"));
        assert!(!is_valid_plugin_name("1auth"));
        assert!(!is_valid_plugin_name(""));
        assert!(!is_valid_plugin_name(&"a".repeat(51)));
        assert!(is_valid_plugin_name(&"a".repeat(50)));
    }

    #[test]
    fn guard_decl_tagging() {
        let json = r#"[
            {"name": "admin", "scope": "local", "class": "AdminGuard", "exported": true},
            {"name": "admin", "scope": "external", "source": "sec"}
        ]"#;
        let guards: Vec<GuardDecl> = serde_json::from_str(json).unwrap();
        assert!(matches!(guards[0], GuardDecl::Local { exported: true, .. }));
        assert!(matches!(guards[1], GuardDecl::External { .. }));
        assert_eq!(guards[1].name(), "admin");
    }

    #[test]
    fn raw_manifest_tolerates_missing_fields() {
        let raw: RawManifest = serde_json::from_str(r#"{"name": "auth"}"#).unwrap();
        assert_eq!(raw.name.as_deref(), Some("auth"));
        assert!(raw.version.is_none());
        assert!(!raw.critical);
    }
}
