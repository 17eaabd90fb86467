use std::path::PathBuf;

use thiserror::Error;

use crate::plugin_system::version::VersionError;

/// Errors of the registry store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error during '{operation}' on '{}': {source}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
        operation: String,
    },

    #[error("Plugin '{0}' is not in the catalog")]
    PluginNotFound(String),

    #[error("Archive '{name}@{version}' is not in the store")]
    ArchiveNotFound { name: String, version: String },

    #[error("Version '{version}' of '{name}' already exists")]
    VersionExists { name: String, version: String },

    #[error("An archive with checksum {checksum} already exists as '{existing}'")]
    DuplicateChecksum { checksum: String, existing: String },

    #[error("Archive of {size} bytes exceeds the {limit}-byte limit")]
    ArchiveTooLarge { size: u64, limit: u64 },

    #[error("Checksum mismatch for '{name}@{version}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        name: String,
        version: String,
        expected: String,
        actual: String,
    },

    #[error("Invalid archive: {0}")]
    InvalidArchive(String),

    #[error("'{name}@{version}' is archived and cannot be activated")]
    VersionArchived { name: String, version: String },

    #[error("No version of '{name}' available to roll back to")]
    NothingToRollBack { name: String },

    #[error("Version error: {0}")]
    Version(#[from] VersionError),
}

impl StoreError {
    pub fn io(source: std::io::Error, operation: impl Into<String>, path: PathBuf) -> Self {
        StoreError::Io {
            source,
            path,
            operation: operation.into(),
        }
    }
}
