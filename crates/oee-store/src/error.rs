//! Store errors

use crate::types::LocalId;
use thiserror::Error;

/// Store operation failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No downtime record with this local id
    #[error("unknown downtime record: {0}")]
    UnknownRecord(LocalId),

    /// The record has no server id yet, so it cannot be addressed remotely
    #[error("downtime record {0} is not known to the server yet")]
    Unsynced(LocalId),
}
