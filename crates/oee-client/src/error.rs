//! Error types for the REST client
//!
//! - [`TransportError`]: no response reached the caller
//! - [`ApiError`]: everything the client surfaces, including HTTP failures
//! - [`StorageError`]: durable token storage could not be opened

use std::path::PathBuf;
use std::sync::Arc;

/// Failure below HTTP: connection refused, DNS, timeout, broken body
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Could not connect to the server
    #[error("connection failed: {0}")]
    Connect(String),

    /// Request timed out
    #[error("request timed out")]
    Timeout,

    /// Any other transport failure
    #[error("transport failure: {0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_connect() {
            Self::Connect(e.to_string())
        } else {
            Self::Other(e.to_string())
        }
    }
}

/// Client error
///
/// Cheap to clone so one failure can be handed to every caller waiting on it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    /// No response was received
    #[error("{method} {url} failed: {source}")]
    Network {
        method: String,
        url: String,
        #[source]
        source: TransportError,
    },

    /// Server answered with a non-2xx status
    #[error("{method} {url} returned {status}: {message}")]
    Http {
        method: String,
        url: String,
        status: u16,
        message: String,
    },

    /// Response body was not the expected JSON
    #[error("could not decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: Arc<serde_json::Error>,
    },

    /// Request body could not be serialized
    #[error("could not encode request body: {0}")]
    Encode(#[source] Arc<serde_json::Error>),
}

impl ApiError {
    /// HTTP status, when the server answered
    #[inline]
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the server answered 401
    #[inline]
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }

    /// Whether no response reached the caller
    #[inline]
    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network { .. })
    }

    /// Whether retrying the same request later can succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } => true,
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            Self::Decode { .. } | Self::Encode(_) => false,
        }
    }
}

/// Token storage could not be opened
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// IO error on the backing file
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Backing file is not a JSON object of strings
    #[error("corrupt token store {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16) -> ApiError {
        ApiError::Http {
            method: "GET".to_string(),
            url: "http://line/api".to_string(),
            status,
            message: "nope".to_string(),
        }
    }

    #[test]
    fn classifies_status() {
        assert!(http(401).is_unauthorized());
        assert!(!http(403).is_unauthorized());
        assert_eq!(http(404).status(), Some(404));
    }

    #[test]
    fn retryable_errors() {
        assert!(http(503).is_retryable());
        assert!(http(429).is_retryable());
        assert!(!http(400).is_retryable());

        let net = ApiError::Network {
            method: "GET".to_string(),
            url: "http://line/api".to_string(),
            source: TransportError::Timeout,
        };
        assert!(net.is_network());
        assert!(net.is_retryable());
        assert_eq!(net.status(), None);
    }

    #[test]
    fn display_includes_status_and_body() {
        let msg = http(500).to_string();
        assert!(msg.contains("500"));
        assert!(msg.contains("nope"));
    }
}
