//! Production state store
//!
//! Holds the dashboard's belief about one production line. User actions are
//! applied optimistically and reconciled when the server answers; polls
//! replace the machine snapshot wholesale. Every update publishes a new
//! immutable [`StoreSnapshot`] on a `watch` channel.

use crate::error::StoreError;
use crate::types::{
    Confirmation, DowntimeRecord, LocalId, MachineSnapshot, Navigation, PendingTransition,
    ReconcileOutcome, StoreSnapshot, Transition, View,
};
use chrono::Utc;
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::watch;

/// Optimistic state store for one line
#[derive(Debug)]
pub struct ProductionStore {
    line_id: String,
    state: watch::Sender<Arc<StoreSnapshot>>,
}

impl ProductionStore {
    /// Empty store for `line_id`
    #[must_use]
    pub fn new(line_id: impl Into<String>) -> Self {
        let line_id = line_id.into();
        let initial = StoreSnapshot {
            machine: MachineSnapshot::new(line_id.clone()),
            navigation: Navigation::default(),
        };
        let (state, _rx) = watch::channel(Arc::new(initial));
        Self { line_id, state }
    }

    /// Line this store mirrors
    #[inline]
    #[must_use]
    pub fn line_id(&self) -> &str {
        &self.line_id
    }

    /// Current snapshot
    #[must_use]
    pub fn snapshot(&self) -> Arc<StoreSnapshot> {
        Arc::clone(&self.state.borrow())
    }

    /// Receive every published snapshot
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<StoreSnapshot>> {
        self.state.subscribe()
    }

    /// Show `transition` immediately
    ///
    /// Sets the target status, remembers the current view in the single back
    /// slot and moves to the transition's view. Downtime-opening transitions
    /// append a provisional record with the placeholder reason.
    pub fn apply_optimistic(&self, transition: Transition) -> PendingTransition {
        let applied_at = Utc::now();
        let mut local_id = None;

        self.state.send_modify(|state| {
            let mut next = StoreSnapshot::clone(state);
            next.machine.status = transition.target;
            if transition.target.opens_downtime() {
                let record = DowntimeRecord::provisional(applied_at);
                local_id = Some(record.local_id);
                next.machine.downtime_history.push(record);
            }
            if next.navigation.previous_view.is_some() {
                tracing::debug!(
                    line = %self.line_id,
                    "transition started before previous confirmed; back view overwritten"
                );
            }
            next.navigation = next.navigation.push(transition.view);
            *state = Arc::new(next);
        });

        tracing::info!(
            line = %self.line_id,
            status = %transition.target,
            record = ?local_id,
            "optimistic transition applied"
        );

        PendingTransition {
            transition,
            local_id,
            server_id: None,
            applied_at,
        }
    }

    /// Settle a pending transition with the server's answer
    ///
    /// Failures never roll back: the record keeps the operator's reason (if
    /// any), is closed locally, and stays unconfirmed. Navigation returns to
    /// the remembered view in both cases.
    pub fn confirm_or_revert<E: Display>(
        &self,
        pending: &PendingTransition,
        result: Result<Confirmation, E>,
    ) -> ReconcileOutcome {
        let now = Utc::now();
        let mut outcome = ReconcileOutcome::Confirmed;

        self.state.send_modify(|state| {
            let mut next = StoreSnapshot::clone(state);

            let record = match pending.local_id {
                // A server refresh may have replaced the provisional record
                Some(id) => match next.machine.downtime_history.iter_mut().find(|r| {
                    r.local_id == id
                        || (pending.server_id.is_some() && r.server_id == pending.server_id)
                }) {
                    Some(record) => Some(record),
                    None => {
                        outcome = ReconcileOutcome::Superseded;
                        None
                    }
                },
                None => None,
            };

            match &result {
                Ok(confirmation) => {
                    if let Some(record) = record {
                        if let Some(reason) = confirmation
                            .reason
                            .clone()
                            .or_else(|| pending.transition.reason.clone())
                        {
                            record.reason = reason;
                        }
                        if let Some(started_at) = confirmation.started_at {
                            record.started_at = started_at;
                        }
                        record.ended_at = Some(confirmation.ended_at.unwrap_or(now));
                        if confirmation.server_id.is_some() {
                            record.server_id.clone_from(&confirmation.server_id);
                        }
                        record.confirmed = true;
                    }
                    if outcome != ReconcileOutcome::Superseded {
                        next.machine.status =
                            confirmation.status.unwrap_or(pending.transition.target);
                    }
                }
                Err(e) => {
                    if let Some(record) = record {
                        if let Some(reason) = &pending.transition.reason {
                            record.reason.clone_from(reason);
                        }
                        record.ended_at = Some(now);
                    }
                    if outcome != ReconcileOutcome::Superseded {
                        outcome = ReconcileOutcome::Recovered {
                            error: e.to_string(),
                        };
                    }
                }
            }

            next.navigation = next.navigation.back();
            *state = Arc::new(next);
        });

        match &outcome {
            ReconcileOutcome::Confirmed => {
                tracing::info!(line = %self.line_id, status = %pending.transition.target, "transition confirmed");
            }
            ReconcileOutcome::Recovered { error } => {
                tracing::warn!(line = %self.line_id, status = %pending.transition.target, "transition not confirmed, kept locally: {}", error);
            }
            ReconcileOutcome::Superseded => {
                tracing::debug!(line = %self.line_id, record = ?pending.local_id, "record replaced by server state before confirmation");
            }
        }
        outcome
    }

    /// Record the server id for a provisional record
    ///
    /// # Errors
    /// Returns [`StoreError::UnknownRecord`] if the record is no longer present.
    pub fn attach_server_id(
        &self,
        local_id: LocalId,
        server_id: impl Into<String>,
    ) -> Result<(), StoreError> {
        let server_id = server_id.into();
        let mut found = false;
        self.state.send_if_modified(|state| {
            let mut next = StoreSnapshot::clone(state);
            let Some(record) = next
                .machine
                .downtime_history
                .iter_mut()
                .find(|r| r.local_id == local_id)
            else {
                return false;
            };
            found = true;
            record.server_id = Some(server_id);
            *state = Arc::new(next);
            true
        });
        if found {
            Ok(())
        } else {
            Err(StoreError::UnknownRecord(local_id))
        }
    }

    /// Replace the machine snapshot with authoritative server state
    ///
    /// Last writer wins; pending provisional records not present in `machine`
    /// are dropped.
    pub fn apply_server_state(&self, mut machine: MachineSnapshot) {
        if machine.line_id != self.line_id {
            tracing::warn!(
                line = %self.line_id,
                received = %machine.line_id,
                "ignoring server state for another line"
            );
            return;
        }
        self.state.send_if_modified(|state| {
            machine.adopt_local_ids(&state.machine);
            if state.machine == machine {
                return false;
            }
            *state = Arc::new(StoreSnapshot {
                machine,
                navigation: state.navigation,
            });
            true
        });
    }

    /// Show `view`, remembering the current one
    pub fn navigate(&self, view: View) {
        self.state.send_if_modified(|state| {
            if state.navigation.current == view {
                return false;
            }
            *state = Arc::new(StoreSnapshot {
                machine: state.machine.clone(),
                navigation: state.navigation.push(view),
            });
            true
        });
    }

    /// Forget everything; used on logout
    pub fn reset(&self) {
        self.state.send_replace(Arc::new(StoreSnapshot {
            machine: MachineSnapshot::new(self.line_id.clone()),
            navigation: Navigation::default(),
        }));
        tracing::debug!(line = %self.line_id, "store reset");
    }
}
