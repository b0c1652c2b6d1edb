//! Poll errors

use oee_client::ApiError;
use thiserror::Error;

/// Failure of a single poll
#[derive(Debug, Error)]
pub enum PollError {
    /// The REST call failed
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Anything else the poll body reports
    #[error("poll failed: {0}")]
    Task(String),
}

impl PollError {
    /// Whether the failure was an authentication rejection
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Api(e) if e.is_unauthorized())
    }
}
