//! Umbrella error type of the Mosaic host.
//!
//! Subsystems own their error enums; this module folds them into one
//! [`Error`] with `#[from]` conversions and provides the crate-wide
//! [`Result`] alias.

use std::result::Result as StdResult;

use thiserror::Error as ThisError;

use crate::plugin_system::error::PluginSystemError;
use crate::store::error::StoreError;

#[derive(Debug, ThisError)]
pub enum Error {
    /// Typed plugin system error.
    #[error("Plugin system error: {0}")]
    PluginSystem(#[from] PluginSystemError),

    /// Typed registry store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Generic error with message.
    #[error("Error: {0}")]
    Other(String),
}

/// Shorthand for Result with our Error type.
pub type Result<T> = StdResult<T, Error>;

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}
