//! OEE dashboard sync engine
//!
//! Wires the lifecycle, client, cache, poller and store crates into a
//! [`Dashboard`] for one controlled production line:
//! - [`DashboardConfig`]: TOML configuration
//! - [`ProductionApi`]: typed REST calls
//! - [`ProductionController`]: optimistic operator actions
//! - [`ClockTicker`]: header clock
//!
//! # Example
//!
//! ```rust,ignore
//! use oee_core::{Dashboard, DashboardConfig, DashboardDeps};
//!
//! let dashboard = Dashboard::new(DashboardConfig::load("dashboard.toml")?, deps)?;
//! dashboard.login(token)?;
//! dashboard.controller().stop().await;
//! dashboard.controller().submit_downtime_reason("Falta de material").await?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod api;
pub mod clock;
pub mod config;
pub mod controller;
pub mod dashboard;
pub mod error;

pub use api::{
    DowntimePayload, DowntimeReasonRequest, OeeSummary, ProductionApi, ProductionPayload,
    StatusChangeRequest, StatusChangeResponse, TimelineEvent, TimelineQuery,
};
pub use clock::ClockTicker;
pub use config::{ApiSection, CacheSection, DashboardConfig, PollingSection};
pub use controller::{ActionOutcome, ProductionController};
pub use dashboard::{Dashboard, DashboardDeps, PollerStates, Timeline};
pub use error::{ConfigError, DashboardError};
