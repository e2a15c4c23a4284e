use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `processing_status` of an [`Issue`] — see spec §3 for the state machine
/// (`idle → queued → claimed → idle`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Idle,
    Queued,
    Claimed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecStatus {
    None,
    Generating,
    Ready,
    Failed,
}

/// The unit around which all work is serialized (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub id: i64,
    pub integration_id: i64,
    pub external_issue_id: String,
    pub external_project_id: String,
    pub provider: String,

    pub title: String,
    pub description: String,
    pub labels: Vec<String>,
    pub assignees: Vec<String>,
    pub reporter: String,
    pub external_url: String,

    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub code_findings: Vec<crate::finding::Finding>,

    pub processing_status: ProcessingStatus,
    pub claimed_at: Option<DateTime<Utc>>,
    pub queued_at: Option<DateTime<Utc>>,

    /// Serialized [`crate::spec_ref::SpecRef`] JSON, or `None`.
    pub spec: Option<serde_json::Value>,
    pub spec_status: SpecStatus,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Issue {
    /// `claimed ⇒ claimed_at ≠ null` and a claim older than `stuck_duration`
    /// is reclaimable by the janitor (spec §3, §4.4).
    pub fn is_stuck(&self, now: DateTime<Utc>, stuck_duration: chrono::Duration) -> bool {
        self.processing_status == ProcessingStatus::Claimed
            && self
                .claimed_at
                .map(|t| now - t > stuck_duration)
                .unwrap_or(false)
    }

    pub fn identity(&self) -> (i64, &str) {
        (self.integration_id, self.external_issue_id.as_str())
    }
}

/// External identity tuple an [`Issue`] is upserted on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExternalIssueKey {
    pub integration_id: i64,
    pub external_issue_id: String,
}
