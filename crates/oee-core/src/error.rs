//! Error types for the dashboard core
//!
//! - [`ConfigError`]: configuration could not be loaded or is unusable
//! - [`DashboardError`]: wiring and controller failures

use oee_client::{ApiError, StorageError};
use oee_store::StoreError;
use std::path::PathBuf;

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for this schema
    #[error("invalid configuration file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Values parse but cannot be used
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Main dashboard error type
#[derive(Debug, thiserror::Error)]
pub enum DashboardError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// REST call failed
    #[error("api error: {0}")]
    Api(#[from] ApiError),

    /// Token storage could not be opened
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Store rejected an operation
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// No downtime is waiting for a reason
    #[error("no downtime awaiting a reason")]
    NoPendingDowntime,

    /// Dashboard already shut down
    #[error("dashboard is shut down")]
    ShutDown,
}

impl DashboardError {
    /// Whether the failure was an authentication rejection
    #[inline]
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Api(e) if e.is_unauthorized())
    }
}
