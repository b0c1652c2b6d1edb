//! REST client for the OEE dashboard
//!
//! [`ApiClient`] issues authenticated JSON requests through a pluggable
//! [`Transport`] and turns a 401 into a global logout via
//! [`oee_lifecycle::AuthFailureBroadcaster`].
//!
//! # Example
//!
//! ```rust,ignore
//! use oee_client::{ApiClient, ClientConfig, LogNavigator, MemoryTokenStorage, ReqwestTransport};
//!
//! let client = ApiClient::new(
//!     ClientConfig::new("http://mes.local/api"),
//!     Arc::new(ReqwestTransport::new(None)?),
//!     Arc::new(MemoryTokenStorage::new()),
//!     Arc::new(LogNavigator),
//!     broadcaster,
//! );
//! let production: ProductionPayload = client.get("/lines/L1/production").await?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod client;
pub mod error;
pub mod storage;
pub mod transport;

pub use client::{ApiClient, ClientConfig, LogNavigator, Navigator};
pub use error::{ApiError, StorageError, TransportError};
pub use storage::{FileTokenStorage, MemoryTokenStorage, TokenStorage, TOKEN_KEY};
pub use transport::{HttpRequest, HttpResponse, Method, ReqwestTransport, Transport};
