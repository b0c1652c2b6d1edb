//! Error types for lifecycle teardown

use crate::broadcaster::CallbackId;

/// Failure of a single logout callback
///
/// Collected into [`crate::LogoutReport`]; never stops the remaining callbacks.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LogoutCallbackError {
    /// Callback returned an error
    #[error("logout callback {id} failed: {message}")]
    Failed { id: CallbackId, message: String },

    /// Callback panicked
    #[error("logout callback {id} panicked: {message}")]
    Panicked { id: CallbackId, message: String },
}

impl LogoutCallbackError {
    /// Id of the failing callback
    #[inline]
    #[must_use]
    pub fn id(&self) -> CallbackId {
        match self {
            Self::Failed { id, .. } | Self::Panicked { id, .. } => *id,
        }
    }
}
