use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use semver::{BuildMetadata, Prerelease, Version};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for version and range parsing.
#[derive(Debug, Clone, Error)]
pub enum VersionError {
    #[error("Invalid version '{0}': {1}")]
    InvalidVersion(String, String),
    #[error("Invalid version range '{0}': {1}")]
    InvalidRange(String, String),
}

/// A plugin version, ordered by semantic-version precedence.
///
/// Build metadata is carried but ignored for ordering and equality; a version
/// without a prerelease sorts above the same version with one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PluginVersion(Version);

impl PluginVersion {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self(Version::new(major, minor, patch))
    }

    /// Parse a version string like "1.2.3-beta.1+build.5".
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        Version::parse(input.trim())
            .map(Self)
            .map_err(|e| VersionError::InvalidVersion(input.to_string(), e.to_string()))
    }

    pub fn major(&self) -> u64 {
        self.0.major
    }

    pub fn minor(&self) -> u64 {
        self.0.minor
    }

    pub fn patch(&self) -> u64 {
        self.0.patch
    }

    pub fn prerelease(&self) -> Option<&str> {
        if self.0.pre.is_empty() {
            None
        } else {
            Some(self.0.pre.as_str())
        }
    }

    pub fn build(&self) -> Option<&str> {
        if self.0.build.is_empty() {
            None
        } else {
            Some(self.0.build.as_str())
        }
    }

    pub fn is_prerelease(&self) -> bool {
        !self.0.pre.is_empty()
    }

    /// Compare by semver precedence (build metadata ignored).
    pub fn compare(&self, other: &Self) -> Ordering {
        self.0.cmp_precedence(&other.0)
    }

    /// Check whether this version satisfies the given range.
    pub fn satisfies(&self, range: &VersionRange) -> bool {
        range.matches(self)
    }

    /// Pick the highest version by precedence from a slice.
    pub fn latest(versions: &[PluginVersion]) -> Option<&PluginVersion> {
        versions.iter().max_by(|a, b| a.compare(b))
    }

    /// Classify this version into a release channel.
    pub fn classify(&self) -> ReleaseChannel {
        if let Some(pre) = self.prerelease() {
            let first = pre.split('.').next().unwrap_or(pre);
            return match first.to_ascii_lowercase().as_str() {
                "alpha" => ReleaseChannel::Alpha,
                "beta" => ReleaseChannel::Beta,
                "rc" => ReleaseChannel::ReleaseCandidate,
                _ if self.0.major == 0 => ReleaseChannel::PreRelease,
                _ => ReleaseChannel::Prerelease,
            };
        }
        if self.0.major == 0 {
            ReleaseChannel::InitialDevelopment
        } else {
            ReleaseChannel::Stable
        }
    }

    /// Produce the next version for the given bump kind.
    ///
    /// `identifier` only applies to prerelease bumps; it replaces the current
    /// prerelease tag when the tag does not already start with it.
    pub fn increment(&self, bump: VersionBump, identifier: Option<&str>) -> Self {
        let v = &self.0;
        let next = match bump {
            VersionBump::Major => Version::new(v.major + 1, 0, 0),
            VersionBump::Minor => Version::new(v.major, v.minor + 1, 0),
            VersionBump::Patch => {
                if v.pre.is_empty() {
                    Version::new(v.major, v.minor, v.patch + 1)
                } else {
                    // A prerelease promotes to its own release on a patch bump.
                    Version::new(v.major, v.minor, v.patch)
                }
            }
            VersionBump::Prerelease => {
                let mut base = if v.pre.is_empty() {
                    Version::new(v.major, v.minor, v.patch + 1)
                } else {
                    Version::new(v.major, v.minor, v.patch)
                };
                base.pre = next_prerelease_tag(v.pre.as_str(), identifier);
                base
            }
        };
        Self(next)
    }

    pub(crate) fn as_semver(&self) -> &Version {
        &self.0
    }
}

/// Compute the next prerelease identifier sequence.
fn next_prerelease_tag(current: &str, identifier: Option<&str>) -> Prerelease {
    let tag = match identifier {
        Some(id) if !current.starts_with(id) => format!("{}.0", id),
        _ if current.is_empty() => identifier
            .map(|id| format!("{}.0", id))
            .unwrap_or_else(|| "0".to_string()),
        _ => {
            let mut parts: Vec<String> = current.split('.').map(str::to_string).collect();
            match parts.last().and_then(|p| p.parse::<u64>().ok()) {
                Some(n) => {
                    let last = parts.len() - 1;
                    parts[last] = (n + 1).to_string();
                }
                None => parts.push("0".to_string()),
            }
            parts.join(".")
        }
    };
    // The tag is assembled from valid identifiers, so this cannot fail.
    Prerelease::new(&tag).unwrap_or(Prerelease::EMPTY)
}

impl PartialEq for PluginVersion {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl Eq for PluginVersion {}

impl PartialOrd for PluginVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PluginVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl fmt::Display for PluginVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PluginVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PluginVersion::parse(s)
    }
}

/// Release channel of a version, derived from its shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseChannel {
    InitialDevelopment,
    PreRelease,
    Alpha,
    Beta,
    ReleaseCandidate,
    Prerelease,
    Stable,
}

impl fmt::Display for ReleaseChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ReleaseChannel::InitialDevelopment => "initial-development",
            ReleaseChannel::PreRelease => "pre-release",
            ReleaseChannel::Alpha => "alpha",
            ReleaseChannel::Beta => "beta",
            ReleaseChannel::ReleaseCandidate => "release-candidate",
            ReleaseChannel::Prerelease => "prerelease",
            ReleaseChannel::Stable => "stable",
        };
        write!(f, "{}", label)
    }
}

/// Kinds of version bumps accepted by [`PluginVersion::increment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionBump {
    Major,
    Minor,
    Patch,
    Prerelease,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RangeOp {
    Exact,
    Greater,
    GreaterEq,
    Less,
    LessEq,
    /// Same major, at least the given version.
    Caret,
    /// Same major and minor, at least the given version.
    Tilde,
}

#[derive(Debug, Clone)]
struct Comparator {
    op: RangeOp,
    version: Version,
}

impl Comparator {
    fn matches(&self, candidate: &Version) -> bool {
        let ord = candidate.cmp_precedence(&self.version);
        match self.op {
            RangeOp::Exact => ord == Ordering::Equal,
            RangeOp::Greater => ord == Ordering::Greater,
            RangeOp::GreaterEq => ord != Ordering::Less,
            RangeOp::Less => ord == Ordering::Less,
            RangeOp::LessEq => ord != Ordering::Greater,
            RangeOp::Caret => candidate.major == self.version.major && ord != Ordering::Less,
            RangeOp::Tilde => {
                candidate.major == self.version.major
                    && candidate.minor == self.version.minor
                    && ord != Ordering::Less
            }
        }
    }
}

/// A version requirement: a space-separated conjunction of comparators.
///
/// Grammar: `=x.y.z`, `>x.y.z`, `>=x.y.z`, `<x.y.z`, `<=x.y.z`, `^x.y.z`,
/// `~x.y.z`. An operator token may be separated from its version by
/// whitespace. All comparators must hold for a version to match.
#[derive(Debug, Clone)]
pub struct VersionRange {
    constraint: String,
    comparators: Vec<Comparator>,
}

impl VersionRange {
    /// Parse a range from its textual form.
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let invalid = |msg: &str| VersionError::InvalidRange(input.to_string(), msg.to_string());
        let mut comparators = Vec::new();
        let mut tokens = input.split_whitespace().peekable();

        if tokens.peek().is_none() {
            return Err(invalid("empty range"));
        }

        while let Some(token) = tokens.next() {
            let (op, rest) = split_operator(token);
            let version_str = if rest.is_empty() {
                // Operator and version separated by whitespace.
                tokens
                    .next()
                    .ok_or_else(|| invalid("operator without version"))?
            } else {
                rest
            };
            let version = Version::parse(version_str)
                .map_err(|e| invalid(&format!("bad version '{}': {}", version_str, e)))?;
            comparators.push(Comparator { op, version });
        }

        Ok(Self {
            constraint: input.trim().to_string(),
            comparators,
        })
    }

    /// Check whether a version satisfies every comparator in this range.
    pub fn matches(&self, version: &PluginVersion) -> bool {
        self.comparators
            .iter()
            .all(|c| c.matches(version.as_semver()))
    }

    /// The original constraint string.
    pub fn constraint(&self) -> &str {
        &self.constraint
    }

    /// An exact-match range for the given version.
    pub fn exact(version: &PluginVersion) -> Self {
        Self {
            constraint: format!("={}", version),
            comparators: vec![Comparator {
                op: RangeOp::Exact,
                version: version.as_semver().clone(),
            }],
        }
    }
}

fn split_operator(token: &str) -> (RangeOp, &str) {
    if let Some(rest) = token.strip_prefix(">=") {
        (RangeOp::GreaterEq, rest)
    } else if let Some(rest) = token.strip_prefix("<=") {
        (RangeOp::LessEq, rest)
    } else if let Some(rest) = token.strip_prefix('>') {
        (RangeOp::Greater, rest)
    } else if let Some(rest) = token.strip_prefix('<') {
        (RangeOp::Less, rest)
    } else if let Some(rest) = token.strip_prefix('^') {
        (RangeOp::Caret, rest)
    } else if let Some(rest) = token.strip_prefix('~') {
        (RangeOp::Tilde, rest)
    } else if let Some(rest) = token.strip_prefix('=') {
        (RangeOp::Exact, rest)
    } else {
        // A bare version is an exact requirement.
        (RangeOp::Exact, token)
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.constraint)
    }
}

impl FromStr for VersionRange {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VersionRange::parse(s)
    }
}

/// Convenience: strip build metadata so two builds of one release are one
/// catalog entry key.
pub fn version_key(version: &PluginVersion) -> String {
    let v = version.as_semver();
    let mut stripped = v.clone();
    stripped.build = BuildMetadata::EMPTY;
    stripped.to_string()
}
