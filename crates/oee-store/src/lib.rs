//! Production state for the OEE dashboard
//!
//! [`ProductionStore`] publishes immutable [`StoreSnapshot`]s. User actions
//! are applied optimistically and later settled with
//! [`ProductionStore::confirm_or_revert`], which reports a typed
//! [`ReconcileOutcome`] instead of raising.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod error;
pub mod store;
pub mod types;

pub use error::StoreError;
pub use store::ProductionStore;
pub use types::{
    Confirmation, DowntimeRecord, LocalId, MachineSnapshot, MachineStatus, Navigation,
    PendingTransition, ProductionFigures, ReconcileOutcome, StoreSnapshot, Transition, View,
    PENDING_REASON,
};
