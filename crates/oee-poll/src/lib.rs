//! Scheduled polling for the OEE dashboard
//!
//! Each REST endpoint the dashboard mirrors is driven by its own [`Poller`].
//! Pollers register their timers with the shared
//! [`oee_lifecycle::IntervalRegistry`] so a logout can stop all of them at once.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod error;
pub mod poller;
pub mod visibility;

pub use error::PollError;
pub use poller::{
    poll_fn, EnabledFn, FnTask, PollTask, Poller, PollerBuilder, PollerConfig, PollerState,
    PollerStats,
};
pub use visibility::{Visibility, VisibilityState};
