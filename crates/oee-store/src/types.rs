//! State types for the production store
//!
//! Defines the immutable snapshots the store publishes:
//! - machine status and downtime history mirrored from the server
//! - local navigation with its single back slot
//! - transitions, confirmations and reconciliation outcomes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Placeholder reason carried by a downtime record until the operator picks one
pub const PENDING_REASON: &str = "Aguardando motivo...";

/// Locally generated downtime record identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LocalId(pub Ulid);

impl LocalId {
    /// Generate new local ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for LocalId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LocalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Machine status as reported by the line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MachineStatus {
    /// Producing
    Running,
    /// Stopped by a fault or the operator
    Down,
    /// Short planned stop
    Paused,
    /// Changeover
    Setup,
    /// Idle, nothing scheduled
    #[default]
    Standby,
}

impl MachineStatus {
    /// Whether entering this status begins a downtime event
    #[inline]
    #[must_use]
    pub fn opens_downtime(self) -> bool {
        matches!(self, Self::Down | Self::Paused)
    }

    /// Wire name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Down => "down",
            Self::Paused => "paused",
            Self::Setup => "setup",
            Self::Standby => "standby",
        }
    }
}

impl std::fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dashboard screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum View {
    /// Live production counters
    #[default]
    Production,
    /// Downtime reason entry
    Downtime,
    /// OEE breakdown
    Oee,
    /// Status timeline
    Timeline,
    /// Changeover checklist
    Setup,
}

/// One downtime event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DowntimeRecord {
    /// Local identifier, stable across confirmation
    pub local_id: LocalId,
    /// Server identifier once known
    pub server_id: Option<String>,
    /// Operator-facing reason
    pub reason: String,
    /// Start of the stop
    pub started_at: DateTime<Utc>,
    /// End of the stop
    pub ended_at: Option<DateTime<Utc>>,
    /// Whether the server acknowledged this record
    pub confirmed: bool,
}

impl DowntimeRecord {
    /// Unconfirmed record with the placeholder reason
    #[must_use]
    pub fn provisional(started_at: DateTime<Utc>) -> Self {
        Self {
            local_id: LocalId::new(),
            server_id: None,
            reason: PENDING_REASON.to_string(),
            started_at,
            ended_at: None,
            confirmed: false,
        }
    }

    /// Record as received from the server
    #[must_use]
    pub fn confirmed(
        server_id: impl Into<String>,
        reason: impl Into<String>,
        started_at: DateTime<Utc>,
        ended_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            local_id: LocalId::new(),
            server_id: Some(server_id.into()),
            reason: reason.into(),
            started_at,
            ended_at,
            confirmed: true,
        }
    }

    /// Whether the stop is still ongoing
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// Production counters for the current shift
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProductionFigures {
    /// Good parts
    pub good: u64,
    /// Rejected parts
    pub rejected: u64,
    /// Shift target
    pub target: u64,
}

/// Server-mirrored machine state, replaced wholesale on every update
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MachineSnapshot {
    /// Line identifier
    pub line_id: String,
    /// Current status
    pub status: MachineStatus,
    /// Downtime events, oldest first
    pub downtime_history: Vec<DowntimeRecord>,
    /// Production counters
    pub production: ProductionFigures,
    /// Server timestamp of this state
    pub updated_at: Option<DateTime<Utc>>,
}

impl MachineSnapshot {
    /// Empty snapshot for a line
    #[must_use]
    pub fn new(line_id: impl Into<String>) -> Self {
        Self {
            line_id: line_id.into(),
            ..Self::default()
        }
    }

    /// Record by local id
    #[must_use]
    pub fn record(&self, local_id: LocalId) -> Option<&DowntimeRecord> {
        self.downtime_history
            .iter()
            .find(|r| r.local_id == local_id)
    }

    /// Give records the server already sent before the local ids they had then
    ///
    /// Decoding a payload mints fresh local ids, so without this two identical
    /// server states would never compare equal.
    pub fn adopt_local_ids(&mut self, previous: &MachineSnapshot) {
        for record in &mut self.downtime_history {
            let Some(server_id) = record.server_id.as_deref() else {
                continue;
            };
            if let Some(known) = previous
                .downtime_history
                .iter()
                .find(|r| r.server_id.as_deref() == Some(server_id))
            {
                record.local_id = known.local_id;
            }
        }
    }
}

/// Current screen plus one level of back navigation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Navigation {
    /// Visible view
    pub current: View,
    /// View to return to; a second push overwrites it
    pub previous_view: Option<View>,
}

impl Navigation {
    /// Move to `view`, remembering the current one
    #[must_use]
    pub fn push(self, view: View) -> Self {
        Self {
            current: view,
            previous_view: Some(self.current),
        }
    }

    /// Return to the remembered view, if any
    #[must_use]
    pub fn back(self) -> Self {
        match self.previous_view {
            Some(previous) => Self {
                current: previous,
                previous_view: None,
            },
            None => self,
        }
    }
}

/// Everything the store publishes
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StoreSnapshot {
    /// Machine state
    pub machine: MachineSnapshot,
    /// Navigation state
    pub navigation: Navigation,
}

/// A user-initiated status change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// Status to show immediately
    pub target: MachineStatus,
    /// View to navigate to while the change is pending
    pub view: View,
    /// Reason entered by the operator, if any
    pub reason: Option<String>,
}

impl Transition {
    /// Resume production
    #[must_use]
    pub fn start() -> Self {
        Self {
            target: MachineStatus::Running,
            view: View::Production,
            reason: None,
        }
    }

    /// Stop the machine; opens a downtime record
    #[must_use]
    pub fn stop() -> Self {
        Self {
            target: MachineStatus::Down,
            view: View::Downtime,
            reason: None,
        }
    }

    /// Pause the machine; opens a downtime record
    #[must_use]
    pub fn pause() -> Self {
        Self {
            target: MachineStatus::Paused,
            view: View::Downtime,
            reason: None,
        }
    }

    /// Enter changeover
    #[must_use]
    pub fn setup() -> Self {
        Self {
            target: MachineStatus::Setup,
            view: View::Setup,
            reason: None,
        }
    }

    /// With operator reason
    #[inline]
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Token for a transition awaiting confirmation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransition {
    /// The applied transition
    pub transition: Transition,
    /// Provisional record created for it
    pub local_id: Option<LocalId>,
    /// Server id of that record, once known
    pub server_id: Option<String>,
    /// When it was applied locally
    pub applied_at: DateTime<Utc>,
}

impl PendingTransition {
    /// Attach the operator's reason after the fact
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.transition.reason = Some(reason.into());
        self
    }

    /// Remember the server id assigned to the record
    #[must_use]
    pub fn with_server_id(mut self, server_id: impl Into<String>) -> Self {
        self.server_id = Some(server_id.into());
        self
    }
}

/// Server acknowledgement of a transition; omitted fields keep local values
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Confirmation {
    /// Status the server settled on
    pub status: Option<MachineStatus>,
    /// Server id of the downtime record
    pub server_id: Option<String>,
    /// Confirmed reason
    pub reason: Option<String>,
    /// Confirmed start
    pub started_at: Option<DateTime<Utc>>,
    /// Confirmed end; defaults to the confirmation time
    pub ended_at: Option<DateTime<Utc>>,
}

impl Confirmation {
    /// Empty confirmation
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With reason
    #[inline]
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// With status
    #[inline]
    #[must_use]
    pub fn with_status(mut self, status: MachineStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// With server id
    #[inline]
    #[must_use]
    pub fn with_server_id(mut self, id: impl Into<String>) -> Self {
        self.server_id = Some(id.into());
        self
    }
}

/// Result of reconciling a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Server confirmed; local record updated in place
    Confirmed,
    /// Server call failed; local record kept with best-effort fields
    Recovered {
        /// Failure description
        error: String,
    },
    /// An authoritative update replaced the record before confirmation
    Superseded,
}

impl ReconcileOutcome {
    /// Whether the server acknowledged the transition
    #[inline]
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed)
    }
}
