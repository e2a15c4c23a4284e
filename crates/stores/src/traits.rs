//! C2: store interfaces (spec §4.1–§4.12 reference these, never SQL
//! directly). One trait per entity, plus `TransactionRunner` for the
//! composite operations spec §4.1 step 5 and §4.10 demand run as a single
//! logical transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use relay_domain::error::Result;
use relay_domain::event_log::EventLog;
use relay_domain::finding::Finding;
use relay_domain::gap::{CloseReason, Gap, GapStatus, Respondent, Severity};
use relay_domain::integration::Integration;
use relay_domain::issue::Issue;
use relay_domain::learning::{Learning, LearningType};
use relay_domain::llm_eval::LlmEval;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Read-mostly entity traits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait]
pub trait IssueStore: Send + Sync {
    async fn get(&self, id: i64) -> Result<Option<Issue>>;
    async fn get_by_external(
        &self,
        integration_id: i64,
        external_issue_id: &str,
    ) -> Result<Option<Issue>>;
    async fn list_stuck_claimed(&self, older_than: DateTime<Utc>) -> Result<Vec<Issue>>;
    async fn list_stuck_queued(&self, older_than: DateTime<Utc>) -> Result<Vec<Issue>>;
    async fn reset_to_idle(&self, id: i64) -> Result<()>;
}

#[async_trait]
pub trait GapStore: Send + Sync {
    async fn get(&self, id: i64) -> Result<Option<Gap>>;
    async fn list_for_issue(&self, issue_id: i64) -> Result<Vec<Gap>>;
    async fn list_open_for_issue(&self, issue_id: i64) -> Result<Vec<Gap>> {
        Ok(self
            .list_for_issue(issue_id)
            .await?
            .into_iter()
            .filter(|g| g.is_open())
            .collect())
    }
}

#[async_trait]
pub trait FindingStore: Send + Sync {
    async fn list_for_issue(&self, issue_id: i64) -> Result<Vec<Finding>>;
}

#[async_trait]
pub trait LearningStore: Send + Sync {
    async fn list_for_workspace(&self, workspace_id: i64) -> Result<Vec<Learning>>;
}

#[async_trait]
pub trait EventLogStore: Send + Sync {
    async fn list_pending_for_issue(&self, issue_id: i64) -> Result<Vec<EventLog>>;
    async fn mark_error(&self, id: i64, error: &str) -> Result<()>;
}

#[async_trait]
pub trait LlmEvalStore: Send + Sync {
    async fn insert(&self, eval: LlmEval) -> Result<i64>;
}

#[async_trait]
pub trait IntegrationStore: Send + Sync {
    async fn get(&self, id: i64) -> Result<Option<Integration>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Write-side input records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tracker-fetched metadata used to upsert an [`Issue`] by its external
/// identity (spec §4.1 step 5).
#[derive(Debug, Clone)]
pub struct IssueUpsert {
    pub integration_id: i64,
    pub workspace_id: i64,
    pub external_issue_id: String,
    pub external_project_id: String,
    pub provider: String,
    pub title: String,
    pub description: String,
    pub labels: Vec<String>,
    pub assignees: Vec<String>,
    pub reporter: String,
    pub external_url: String,
}

#[derive(Debug, Clone)]
pub struct NewEventLog {
    pub issue_id: i64,
    pub workspace_id: i64,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub external_id: Option<String>,
    pub dedupe_key: String,
}

#[derive(Debug, Clone)]
pub struct NewGapRow {
    pub question: String,
    pub severity: Severity,
    pub respondent: Respondent,
}

#[derive(Debug, Clone)]
pub struct NewFindingRow {
    pub synthesis: String,
    pub sources: Vec<relay_domain::finding::FindingSource>,
    pub is_core: bool,
}

#[derive(Debug, Clone)]
pub struct NewLearningRow {
    pub workspace_id: i64,
    pub kind: LearningType,
    pub content: String,
    pub source_context: String,
}

/// Outcome of [`StoreTxn::insert_event_log`]: `None` when the unique
/// `dedupe_key` constraint absorbed a duplicate (ON CONFLICT DO NOTHING).
pub type EventLogInsertOutcome = Option<EventLog>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// StoreTxn — mutations available inside one transaction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything a single logical transaction can do. Object-safe (no
/// generic methods) so callers can hold it as `&mut dyn StoreTxn`.
#[async_trait]
pub trait StoreTxn: Send {
    async fn get_issue(&mut self, id: i64) -> Result<Option<Issue>>;

    /// Upsert by `(integration_id, external_issue_id)`. Returns the issue
    /// after the upsert.
    async fn upsert_issue(&mut self, upsert: IssueUpsert) -> Result<Issue>;

    /// Insert an [`EventLog`] row; `ON CONFLICT(dedupe_key) DO NOTHING`.
    /// Returns `None` when the conflict absorbed a duplicate.
    async fn insert_event_log(&mut self, new: NewEventLog) -> Result<EventLogInsertOutcome>;

    /// CAS: `idle -> queued`. Returns `false` if the current status wasn't
    /// `idle` (CAS lost).
    async fn try_set_queued_if_idle(&mut self, issue_id: i64) -> Result<bool>;

    /// CAS: `queued -> claimed`, stamping `claimed_at`.
    async fn try_claim(&mut self, issue_id: i64) -> Result<bool>;

    /// CAS: `claimed -> idle`, clearing `claimed_at`.
    async fn try_release(&mut self, issue_id: i64) -> Result<bool>;

    /// Insert a new gap, assigning the next per-issue `short_id`.
    async fn add_gap(&mut self, issue_id: i64, new: NewGapRow) -> Result<Gap>;

    /// Resolve/skip/close an existing gap. `status` must be a terminal
    /// status (never `Open`).
    async fn set_gap_status(
        &mut self,
        gap_id: i64,
        status: GapStatus,
        reason: Option<CloseReason>,
        note: Option<String>,
    ) -> Result<Gap>;

    async fn list_gaps(&mut self, issue_id: i64) -> Result<Vec<Gap>>;

    /// Replace the issue's core findings wholesale (spec §9 Open Questions
    /// resolution: replace the `is_core` subset).
    async fn replace_findings(
        &mut self,
        issue_id: i64,
        rows: Vec<NewFindingRow>,
    ) -> Result<Vec<Finding>>;

    /// Insert a learning, de-duplicating by `(type, content-hash)`.
    /// Returns `None` when a duplicate was absorbed.
    async fn insert_learning_dedup(&mut self, row: NewLearningRow) -> Result<Option<Learning>>;

    async fn set_issue_spec(
        &mut self,
        issue_id: i64,
        spec_ref_json: serde_json::Value,
        status: relay_domain::issue::SpecStatus,
    ) -> Result<()>;

    async fn set_spec_status(
        &mut self,
        issue_id: i64,
        status: relay_domain::issue::SpecStatus,
    ) -> Result<()>;

    async fn mark_events_processed(&mut self, ids: &[i64]) -> Result<()>;
}

pub type BoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Exposes one transactional runner, the single mutable shared resource
/// (spec §5: "Stores are the only mutable shared resource; all mutations
/// pass through the transactional runner").
#[async_trait]
pub trait TransactionRunner: Send + Sync {
    /// Runs `f` against a fresh `StoreTxn`, committing on `Ok` and rolling
    /// back on `Err`.
    async fn run_txn<'a, F, T>(&'a self, f: F) -> Result<T>
    where
        F: for<'c> FnOnce(&'c mut dyn StoreTxn) -> BoxFuture<'c, Result<T>> + Send + 'a,
        T: Send + 'a;
}

/// Supertrait bundling everything a caller needs: read-side entity
/// traits plus the transactional runner.
pub trait Stores:
    IssueStore
    + GapStore
    + FindingStore
    + LearningStore
    + EventLogStore
    + LlmEvalStore
    + IntegrationStore
    + TransactionRunner
{
}

impl<T> Stores for T where
    T: IssueStore
        + GapStore
        + FindingStore
        + LearningStore
        + EventLogStore
        + LlmEvalStore
        + IntegrationStore
        + TransactionRunner
{
}
pub use relay_domain::issue::ProcessingStatus as IssueStatus;
