//! Typed REST calls for one plant
//!
//! Only the payload fields the dashboard reads are modelled; unknown fields
//! are ignored on decode.

use chrono::{DateTime, SecondsFormat, Utc};
use oee_client::{ApiClient, ApiError};
use oee_store::{
    Confirmation, DowntimeRecord, MachineSnapshot, MachineStatus, ProductionFigures,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Downtime event as the server reports it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DowntimePayload {
    pub id: String,
    pub reason: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}

impl From<DowntimePayload> for DowntimeRecord {
    fn from(p: DowntimePayload) -> Self {
        DowntimeRecord::confirmed(p.id, p.reason, p.started_at, p.ended_at)
    }
}

impl From<DowntimePayload> for Confirmation {
    fn from(p: DowntimePayload) -> Self {
        Confirmation {
            status: None,
            server_id: Some(p.id),
            reason: Some(p.reason),
            started_at: Some(p.started_at),
            ended_at: p.ended_at,
        }
    }
}

/// `GET /lines/{id}/production`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductionPayload {
    pub line_id: String,
    pub status: MachineStatus,
    #[serde(default)]
    pub good: u64,
    #[serde(default)]
    pub rejected: u64,
    #[serde(default)]
    pub target: u64,
    #[serde(default)]
    pub downtime: Vec<DowntimePayload>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<ProductionPayload> for MachineSnapshot {
    fn from(p: ProductionPayload) -> Self {
        MachineSnapshot {
            line_id: p.line_id,
            status: p.status,
            downtime_history: p.downtime.into_iter().map(DowntimeRecord::from).collect(),
            production: ProductionFigures {
                good: p.good,
                rejected: p.rejected,
                target: p.target,
            },
            updated_at: p.updated_at,
        }
    }
}

/// One status interval on the timeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub line_id: String,
    pub status: MachineStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// OEE breakdown for a line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OeeSummary {
    pub line_id: String,
    pub availability: f64,
    pub performance: f64,
    pub quality: f64,
    pub oee: f64,
    #[serde(default)]
    pub computed_at: Option<DateTime<Utc>>,
}

/// `POST /lines/{id}/status` body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChangeRequest {
    pub status: MachineStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// `POST /lines/{id}/status` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChangeResponse {
    pub status: MachineStatus,
    /// Downtime opened by this change, if any
    #[serde(default)]
    pub downtime: Option<DowntimePayload>,
}

impl From<StatusChangeResponse> for Confirmation {
    fn from(r: StatusChangeResponse) -> Self {
        let mut confirmation = r.downtime.map(Confirmation::from).unwrap_or_default();
        confirmation.status = Some(r.status);
        confirmation
    }
}

/// `PATCH /downtime/{id}` body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DowntimeReasonRequest {
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

/// Filters for `GET /timeline`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineQuery {
    pub lines: Vec<String>,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimelineQuery {
    /// Query string, lines in the given order and each one percent-encoded
    #[must_use]
    pub fn to_query_string(&self) -> String {
        let lines: Vec<_> = self
            .lines
            .iter()
            .map(|line| urlencoding::encode(line))
            .collect();
        format!(
            "lines={}&from={}&to={}",
            lines.join(","),
            self.from.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.to.to_rfc3339_opts(SecondsFormat::Secs, true),
        )
    }
}

/// Typed wrapper over [`ApiClient`]
#[derive(Debug, Clone)]
pub struct ProductionApi {
    client: Arc<ApiClient>,
}

impl ProductionApi {
    /// Wrap a client
    #[inline]
    #[must_use]
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self { client }
    }

    /// Underlying client
    #[inline]
    #[must_use]
    pub fn client(&self) -> &Arc<ApiClient> {
        &self.client
    }

    /// Production counters and machine state for a line
    ///
    /// # Errors
    /// Any [`ApiError`] from the client.
    pub async fn production(&self, line_id: &str) -> Result<ProductionPayload, ApiError> {
        self.client
            .get(&format!("/lines/{}/production", urlencoding::encode(line_id)))
            .await
    }

    /// Status timeline for several lines
    ///
    /// # Errors
    /// Any [`ApiError`] from the client.
    pub async fn timeline(&self, query: &TimelineQuery) -> Result<Vec<TimelineEvent>, ApiError> {
        self.client
            .get(&format!("/timeline?{}", query.to_query_string()))
            .await
    }

    /// Latest OEE breakdown
    ///
    /// # Errors
    /// Any [`ApiError`] from the client.
    pub async fn oee(&self, line_id: &str) -> Result<OeeSummary, ApiError> {
        self.client
            .get(&format!("/lines/{}/oee", urlencoding::encode(line_id)))
            .await
    }

    /// Ask the server to recompute OEE and return the result
    ///
    /// # Errors
    /// Any [`ApiError`] from the client.
    pub async fn recompute_oee(&self, line_id: &str) -> Result<OeeSummary, ApiError> {
        self.client
            .post(
                &format!("/lines/{}/oee/recompute", urlencoding::encode(line_id)),
                &serde_json::json!({}),
            )
            .await
    }

    /// Change machine status
    ///
    /// # Errors
    /// Any [`ApiError`] from the client.
    pub async fn change_status(
        &self,
        line_id: &str,
        request: &StatusChangeRequest,
    ) -> Result<StatusChangeResponse, ApiError> {
        self.client
            .post(&format!("/lines/{}/status", urlencoding::encode(line_id)), request)
            .await
    }

    /// Set the reason of a downtime event
    ///
    /// # Errors
    /// Any [`ApiError`] from the client.
    pub async fn submit_downtime_reason(
        &self,
        downtime_id: &str,
        request: &DowntimeReasonRequest,
    ) -> Result<DowntimePayload, ApiError> {
        self.client
            .patch(
                &format!("/downtime/{}", urlencoding::encode(downtime_id)),
                request,
            )
            .await
    }
}
