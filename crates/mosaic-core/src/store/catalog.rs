use std::collections::HashMap;
use std::time::SystemTime;

use log::info;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::plugin_system::version::PluginVersion;
use crate::store::artifact::{checksum_of, ArtifactStore};
use crate::store::error::StoreError;

/// Publication state of one stored version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionStatus {
    /// The version served by default. At most one per plugin.
    Active,
    Inactive,
    /// Retired; kept on disk but never activated.
    Archived,
}

/// One catalog row.
#[derive(Debug, Clone)]
pub struct PluginRow {
    pub name: String,
    pub version: PluginVersion,
    pub uploaded_at: SystemTime,
    pub file_size: u64,
    pub checksum: String,
    pub status: VersionStatus,
    pub download_count: u64,
}

/// Upper bound on page sizes accepted by [`Catalog::list`].
pub const MAX_PAGE_LIMIT: usize = 100;

/// The registry catalog: versioned plugin rows over an artifact store.
///
/// Versions of a plugin are totally ordered by semantic-version precedence;
/// exactly one non-archived version is active. Promotion, rollback and
/// archival move the active pointer atomically.
pub struct Catalog {
    rows: Mutex<HashMap<String, Vec<PluginRow>>>,
    artifacts: ArtifactStore,
    max_archive_size: u64,
}

impl Catalog {
    pub fn new(artifacts: ArtifactStore, max_archive_size: u64) -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            artifacts,
            max_archive_size,
        }
    }

    /// Accept a new archive for `name@version`. The new version becomes
    /// active; the previous active version is demoted in the same step.
    pub async fn publish(
        &self,
        name: &str,
        version: &PluginVersion,
        bytes: &[u8],
    ) -> Result<PluginRow, StoreError> {
        if bytes.len() as u64 > self.max_archive_size {
            return Err(StoreError::ArchiveTooLarge {
                size: bytes.len() as u64,
                limit: self.max_archive_size,
            });
        }
        let checksum = checksum_of(bytes);

        let mut rows = self.rows.lock().await;
        let versions = rows.entry(name.to_string()).or_default();
        if versions.iter().any(|r| r.version == *version) {
            return Err(StoreError::VersionExists {
                name: name.to_string(),
                version: version.to_string(),
            });
        }
        if let Some(existing) = versions.iter().find(|r| r.checksum == checksum) {
            return Err(StoreError::DuplicateChecksum {
                checksum,
                existing: format!("{}@{}", existing.name, existing.version),
            });
        }

        self.artifacts.put(name, version, bytes).await?;

        for row in versions.iter_mut() {
            if row.status == VersionStatus::Active {
                row.status = VersionStatus::Inactive;
            }
        }
        let row = PluginRow {
            name: name.to_string(),
            version: version.clone(),
            uploaded_at: SystemTime::now(),
            file_size: bytes.len() as u64,
            checksum,
            status: VersionStatus::Active,
            download_count: 0,
        };
        versions.push(row.clone());
        versions.sort_by(|a, b| a.version.compare(&b.version));
        info!("published {}@{}", name, version);
        Ok(row)
    }

    /// Serve the archive bytes of a version (the active one when `version`
    /// is `None`), bumping its download counter.
    pub async fn download(
        &self,
        name: &str,
        version: Option<&PluginVersion>,
    ) -> Result<(Vec<u8>, PluginRow), StoreError> {
        let (version, checksum) = {
            let mut rows = self.rows.lock().await;
            let versions = rows
                .get_mut(name)
                .ok_or_else(|| StoreError::PluginNotFound(name.to_string()))?;
            let row = match version {
                Some(v) => versions.iter_mut().find(|r| r.version == *v),
                None => versions
                    .iter_mut()
                    .find(|r| r.status == VersionStatus::Active),
            }
            .ok_or_else(|| StoreError::ArchiveNotFound {
                name: name.to_string(),
                version: version.map(|v| v.to_string()).unwrap_or_else(|| "active".into()),
            })?;
            row.download_count += 1;
            (row.version.clone(), row.checksum.clone())
        };

        let bytes = self.artifacts.get(name, &version, Some(&checksum)).await?;
        let row = self
            .version_row(name, &version)
            .await?
            .expect("row present, was just read");
        Ok((bytes, row))
    }

    /// Make an existing, non-archived version the active one.
    pub async fn promote(&self, name: &str, version: &PluginVersion) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().await;
        let versions = rows
            .get_mut(name)
            .ok_or_else(|| StoreError::PluginNotFound(name.to_string()))?;
        let target = versions
            .iter()
            .find(|r| r.version == *version)
            .ok_or_else(|| StoreError::ArchiveNotFound {
                name: name.to_string(),
                version: version.to_string(),
            })?;
        if target.status == VersionStatus::Archived {
            return Err(StoreError::VersionArchived {
                name: name.to_string(),
                version: version.to_string(),
            });
        }
        for row in versions.iter_mut() {
            row.status = if row.version == *version {
                VersionStatus::Active
            } else if row.status == VersionStatus::Active {
                VersionStatus::Inactive
            } else {
                row.status
            };
        }
        info!("promoted {}@{}", name, version);
        Ok(())
    }

    /// Move the active pointer to the highest non-archived version below
    /// the current active one.
    pub async fn rollback(&self, name: &str) -> Result<PluginVersion, StoreError> {
        let mut rows = self.rows.lock().await;
        let versions = rows
            .get_mut(name)
            .ok_or_else(|| StoreError::PluginNotFound(name.to_string()))?;
        let active = versions
            .iter()
            .find(|r| r.status == VersionStatus::Active)
            .map(|r| r.version.clone())
            .ok_or_else(|| StoreError::NothingToRollBack {
                name: name.to_string(),
            })?;
        // Rows are kept sorted ascending by version.
        let previous = versions
            .iter()
            .rev()
            .find(|r| r.version < active && r.status != VersionStatus::Archived)
            .map(|r| r.version.clone())
            .ok_or_else(|| StoreError::NothingToRollBack {
                name: name.to_string(),
            })?;
        for row in versions.iter_mut() {
            row.status = if row.version == previous {
                VersionStatus::Active
            } else if row.status == VersionStatus::Active {
                VersionStatus::Inactive
            } else {
                row.status
            };
        }
        info!("rolled back {} to {}", name, previous);
        Ok(previous)
    }

    /// Retire a version. The active version must be moved first.
    pub async fn archive(&self, name: &str, version: &PluginVersion) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().await;
        let versions = rows
            .get_mut(name)
            .ok_or_else(|| StoreError::PluginNotFound(name.to_string()))?;
        let row = versions
            .iter_mut()
            .find(|r| r.version == *version)
            .ok_or_else(|| StoreError::ArchiveNotFound {
                name: name.to_string(),
                version: version.to_string(),
            })?;
        if row.status == VersionStatus::Active {
            return Err(StoreError::VersionArchived {
                name: name.to_string(),
                version: version.to_string(),
            });
        }
        row.status = VersionStatus::Archived;
        Ok(())
    }

    /// Remove a plugin and all its artifacts.
    pub async fn delete(&self, name: &str) -> Result<(), StoreError> {
        let removed = self.rows.lock().await.remove(name);
        if removed.is_none() {
            return Err(StoreError::PluginNotFound(name.to_string()));
        }
        self.artifacts.remove_all(name).await?;
        info!("deleted plugin '{}'", name);
        Ok(())
    }

    /// Page through the newest row of every plugin, sorted by name.
    /// `limit` is clamped to [`MAX_PAGE_LIMIT`].
    pub async fn list(&self, page: usize, limit: usize) -> Vec<PluginRow> {
        let limit = limit.clamp(1, MAX_PAGE_LIMIT);
        let rows = self.rows.lock().await;
        let mut latest: Vec<PluginRow> = rows
            .values()
            .filter_map(|versions| versions.last().cloned())
            .collect();
        latest.sort_by(|a, b| a.name.cmp(&b.name));
        latest
            .into_iter()
            .skip(page.saturating_mul(limit))
            .take(limit)
            .collect()
    }

    /// Every stored version of a plugin, ascending by version precedence.
    pub async fn versions(&self, name: &str) -> Result<Vec<PluginRow>, StoreError> {
        self.rows
            .lock()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::PluginNotFound(name.to_string()))
    }

    /// The active row of a plugin, if any.
    pub async fn active(&self, name: &str) -> Result<Option<PluginRow>, StoreError> {
        Ok(self
            .versions(name)
            .await?
            .into_iter()
            .find(|r| r.status == VersionStatus::Active))
    }

    async fn version_row(
        &self,
        name: &str,
        version: &PluginVersion,
    ) -> Result<Option<PluginRow>, StoreError> {
        Ok(self
            .versions(name)
            .await?
            .into_iter()
            .find(|r| r.version == *version))
    }
}
