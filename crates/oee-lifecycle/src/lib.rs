//! Lifecycle primitives for the OEE dashboard core
//!
//! - [`IntervalRegistry`]: every live polling timer, with global teardown
//! - [`AuthFailureBroadcaster`]: logout callbacks fired on auth invalidation
//! - [`ClearableSet`]: caches that must be wiped on logout
//!
//! All three are constructed once by the application and shared through `Arc`.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod broadcaster;
pub mod clearable;
pub mod error;
pub mod registry;

pub use broadcaster::{AuthFailureBroadcaster, CallbackId, LogoutCallback, LogoutReport};
pub use clearable::{Clearable, ClearableSet};
pub use error::LogoutCallbackError;
pub use registry::{CancelTimer, IntervalRegistry, TimerHandle, TimerId};
