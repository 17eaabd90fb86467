use std::path::PathBuf;

use log::debug;
use sha2::{Digest, Sha256};
use tokio::fs;

use crate::plugin_system::version::{version_key, PluginVersion};
use crate::store::error::StoreError;

/// Lowercase hex SHA-256 digest of archive bytes.
pub fn checksum_of(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// File-backed store of plugin archive bytes, keyed by `name@version`.
///
/// Layout: one directory per plugin under the base directory, one file per
/// version. Integrity is the caller's concern at the catalog level; the
/// store verifies a checksum only when asked to.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    base_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn archive_path(&self, name: &str, version: &PluginVersion) -> PathBuf {
        self.base_dir
            .join(name)
            .join(format!("{}.archive", version_key(version)))
    }

    /// Persist archive bytes; returns their checksum.
    pub async fn put(
        &self,
        name: &str,
        version: &PluginVersion,
        bytes: &[u8],
    ) -> Result<String, StoreError> {
        let path = self.archive_path(name, version);
        let parent = path
            .parent()
            .expect("archive path always has a parent")
            .to_path_buf();
        fs::create_dir_all(&parent)
            .await
            .map_err(|e| StoreError::io(e, "create_dir_all", parent))?;
        fs::write(&path, bytes)
            .await
            .map_err(|e| StoreError::io(e, "write_archive", path.clone()))?;
        let checksum = checksum_of(bytes);
        debug!(
            "stored archive {}@{} ({} bytes, {})",
            name,
            version,
            bytes.len(),
            checksum
        );
        Ok(checksum)
    }

    /// Read archive bytes, verifying them against `expected_checksum` when
    /// given.
    pub async fn get(
        &self,
        name: &str,
        version: &PluginVersion,
        expected_checksum: Option<&str>,
    ) -> Result<Vec<u8>, StoreError> {
        let path = self.archive_path(name, version);
        let bytes = fs::read(&path)
            .await
            .map_err(|_| StoreError::ArchiveNotFound {
                name: name.to_string(),
                version: version.to_string(),
            })?;
        if let Some(expected) = expected_checksum {
            let actual = checksum_of(&bytes);
            if actual != expected {
                return Err(StoreError::ChecksumMismatch {
                    name: name.to_string(),
                    version: version.to_string(),
                    expected: expected.to_string(),
                    actual,
                });
            }
        }
        Ok(bytes)
    }

    pub async fn remove(&self, name: &str, version: &PluginVersion) -> Result<(), StoreError> {
        let path = self.archive_path(name, version);
        fs::remove_file(&path)
            .await
            .map_err(|e| StoreError::io(e, "remove_archive", path))
    }

    /// Remove every stored version of a plugin.
    pub async fn remove_all(&self, name: &str) -> Result<(), StoreError> {
        let dir = self.base_dir.join(name);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(e, "remove_plugin_dir", dir)),
        }
    }
}
