//! Operator actions on the controlled line
//!
//! Every action is applied to the store first, then sent to the server and
//! reconciled. Successful calls force a production refresh so the
//! authoritative state follows immediately instead of at the next tick.
//!
//! Stops and pauses open a downtime record that stays pending until the
//! operator submits a reason.

use crate::api::{DowntimeReasonRequest, ProductionApi, StatusChangeRequest};
use crate::error::DashboardError;
use oee_poll::Poller;
use oee_store::{
    Confirmation, LocalId, PendingTransition, ProductionStore, ReconcileOutcome, StoreError,
    Transition,
};
use parking_lot::Mutex;
use std::sync::Arc;

/// Result of a status action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The transition is settled
    Settled(ReconcileOutcome),
    /// A downtime record is open and waits for a reason
    AwaitingReason(LocalId),
}

/// Applies operator actions with optimistic updates
pub struct ProductionController {
    line_id: String,
    api: ProductionApi,
    store: Arc<ProductionStore>,
    production: Arc<Poller>,
    awaiting: Mutex<Option<PendingTransition>>,
}

impl ProductionController {
    /// Create a controller for the store's line
    #[must_use]
    pub fn new(api: ProductionApi, store: Arc<ProductionStore>, production: Arc<Poller>) -> Self {
        Self {
            line_id: store.line_id().to_string(),
            api,
            store,
            production,
            awaiting: Mutex::new(None),
        }
    }

    /// Resume production
    pub async fn start(&self) -> ReconcileOutcome {
        self.settle(Transition::start()).await
    }

    /// Enter changeover
    pub async fn setup(&self) -> ReconcileOutcome {
        self.settle(Transition::setup()).await
    }

    /// Stop the machine
    pub async fn stop(&self) -> ActionOutcome {
        self.open_downtime(Transition::stop()).await
    }

    /// Pause the machine
    pub async fn pause(&self) -> ActionOutcome {
        self.open_downtime(Transition::pause()).await
    }

    /// Local id of the downtime waiting for a reason
    #[must_use]
    pub fn awaiting_reason(&self) -> Option<LocalId> {
        self.awaiting
            .lock()
            .as_ref()
            .and_then(|pending| pending.local_id)
    }

    /// Attach the operator's reason to the open downtime and close it
    ///
    /// A failed or impossible server call still records the reason locally.
    ///
    /// # Errors
    /// [`DashboardError::NoPendingDowntime`] if no stop or pause is awaiting a reason.
    pub async fn submit_downtime_reason(
        &self,
        reason: impl Into<String>,
    ) -> Result<ReconcileOutcome, DashboardError> {
        let reason = reason.into();
        let Some(pending) = self.awaiting.lock().take() else {
            return Err(DashboardError::NoPendingDowntime);
        };
        let pending = pending.with_reason(reason.clone());

        let result = match (&pending.server_id, pending.local_id) {
            (Some(server_id), _) => self
                .api
                .submit_downtime_reason(
                    server_id,
                    &DowntimeReasonRequest {
                        reason,
                        ended_at: None,
                    },
                )
                .await
                .map(Confirmation::from)
                .map_err(DashboardError::from),
            (None, Some(local_id)) => Err(StoreError::Unsynced(local_id).into()),
            (None, None) => Err(DashboardError::NoPendingDowntime),
        };

        let succeeded = result.is_ok();
        let outcome = self.store.confirm_or_revert(&pending, result);
        if succeeded {
            self.production.refresh().await;
        }
        Ok(outcome)
    }

    async fn settle(&self, transition: Transition) -> ReconcileOutcome {
        let request = StatusChangeRequest {
            status: transition.target,
            reason: transition.reason.clone(),
        };
        let pending = self.store.apply_optimistic(transition);
        let result = self
            .api
            .change_status(&self.line_id, &request)
            .await
            .map(Confirmation::from);

        let succeeded = result.is_ok();
        let outcome = self.store.confirm_or_revert(&pending, result);
        if succeeded {
            self.production.refresh().await;
        }
        outcome
    }

    async fn open_downtime(&self, transition: Transition) -> ActionOutcome {
        let request = StatusChangeRequest {
            status: transition.target,
            reason: transition.reason.clone(),
        };
        let pending = self.store.apply_optimistic(transition);

        match self.api.change_status(&self.line_id, &request).await {
            Ok(response) => {
                let mut pending = pending;
                if let Some(downtime) = response.downtime {
                    if let Some(local_id) = pending.local_id {
                        if let Err(e) = self.store.attach_server_id(local_id, downtime.id.clone()) {
                            tracing::debug!(line = %self.line_id, "server id not attached: {}", e);
                        }
                    }
                    pending = pending.with_server_id(downtime.id);
                }
                let local_id = pending.local_id;
                if let Some(previous) = self.awaiting.lock().replace(pending) {
                    tracing::warn!(
                        line = %self.line_id,
                        record = ?previous.local_id,
                        "previous downtime never received a reason"
                    );
                }
                self.production.refresh().await;
                match local_id {
                    Some(id) => ActionOutcome::AwaitingReason(id),
                    None => ActionOutcome::Settled(ReconcileOutcome::Confirmed),
                }
            }
            Err(e) => {
                ActionOutcome::Settled(self.store.confirm_or_revert(&pending, Err::<Confirmation, _>(e)))
            }
        }
    }
}

impl std::fmt::Debug for ProductionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProductionController")
            .field("line_id", &self.line_id)
            .field("awaiting_reason", &self.awaiting_reason())
            .finish_non_exhaustive()
    }
}
