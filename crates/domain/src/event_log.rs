use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row per accepted webhook (spec §3). Uniqueness on `dedupe_key`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLog {
    pub id: i64,
    pub issue_id: i64,
    pub workspace_id: i64,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub external_id: Option<String>,
    pub dedupe_key: String,
    pub processed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl EventLog {
    pub fn is_pending(&self) -> bool {
        self.processed_at.is_none()
    }

    /// Recovers the engagement-relevant fields `EventIngestor` wrapped the
    /// raw webhook payload in (see [`EventEnvelope`]). `payload` is opaque
    /// per spec §3, but `relay-ingest` and `relay-orchestrator` agree on
    /// this shape so the Orchestrator's per-event engagement re-check
    /// (spec §4.4 step 3) doesn't need a second tracker round-trip.
    /// Returns `None` for rows written before this convention existed, or
    /// by a caller that bypassed `EventIngestor` — callers should treat
    /// that as "can't re-filter, keep the event".
    pub fn envelope(&self) -> Option<EventEnvelope> {
        serde_json::from_value(self.payload.clone()).ok()
    }
}

/// Engagement-relevant fields captured at ingest time, wrapped around the
/// caller's opaque `raw` payload (spec §3 EventLog.payload, §4.4 step 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub provider: String,
    pub triggered_by_username: String,
    pub issue_body: String,
    pub comment_body: String,
    pub discussion_id: Option<String>,
    pub comment_id: Option<String>,
    pub external_project_id: String,
    pub external_issue_iid: String,
    pub raw: serde_json::Value,
}
