//! SQLite-backed [`Stores`] implementation (pack enrichment: grounded on
//! `flatline/src/db.rs`'s `SqlitePoolOptions` + inline-migration shape,
//! the only sqlx usage anywhere in the retrieval pack). Runs WAL mode and
//! applies its schema with `sqlx::raw_sql` on open, same as the teacher's
//! enrichment source.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use relay_domain::error::{Error, Result};
use relay_domain::event_log::EventLog;
use relay_domain::finding::{Finding, FindingSource};
use relay_domain::gap::{CloseReason, Gap, GapStatus, Respondent, Severity};
use relay_domain::integration::{Integration, ServiceAccount};
use relay_domain::issue::{Issue, ProcessingStatus, SpecStatus};
use relay_domain::learning::{Learning, LearningType};
use relay_domain::llm_eval::LlmEval;

use crate::traits::*;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS issues (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    integration_id INTEGER NOT NULL,
    external_issue_id TEXT NOT NULL,
    external_project_id TEXT NOT NULL,
    provider TEXT NOT NULL,
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    labels TEXT NOT NULL,
    assignees TEXT NOT NULL,
    reporter TEXT NOT NULL,
    external_url TEXT NOT NULL,
    keywords TEXT NOT NULL DEFAULT '[]',
    code_findings TEXT NOT NULL DEFAULT '[]',
    processing_status TEXT NOT NULL DEFAULT 'idle',
    claimed_at TEXT,
    queued_at TEXT,
    spec TEXT,
    spec_status TEXT NOT NULL DEFAULT 'none',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(integration_id, external_issue_id)
);

CREATE TABLE IF NOT EXISTS gaps (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    issue_id INTEGER NOT NULL REFERENCES issues(id),
    short_id INTEGER NOT NULL,
    question TEXT NOT NULL,
    severity TEXT NOT NULL,
    respondent TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'open',
    created_at TEXT NOT NULL,
    resolved_at TEXT,
    resolution_note TEXT,
    comment_ref TEXT,
    UNIQUE(issue_id, short_id)
);

CREATE TABLE IF NOT EXISTS findings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    issue_id INTEGER NOT NULL REFERENCES issues(id),
    synthesis TEXT NOT NULL,
    sources TEXT NOT NULL,
    is_core INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS learnings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    workspace_id INTEGER NOT NULL,
    kind TEXT NOT NULL,
    content TEXT NOT NULL,
    source_context TEXT NOT NULL,
    dedupe_key TEXT NOT NULL,
    embedding TEXT,
    UNIQUE(dedupe_key)
);

CREATE TABLE IF NOT EXISTS event_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    issue_id INTEGER NOT NULL REFERENCES issues(id),
    workspace_id INTEGER NOT NULL,
    event_type TEXT NOT NULL,
    payload TEXT NOT NULL,
    external_id TEXT,
    dedupe_key TEXT NOT NULL,
    processed_at TEXT,
    error TEXT,
    created_at TEXT NOT NULL,
    UNIQUE(dedupe_key)
);

CREATE TABLE IF NOT EXISTS llm_evals (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    stage TEXT NOT NULL,
    issue_id INTEGER NOT NULL,
    workspace_id INTEGER NOT NULL,
    input_excerpt TEXT NOT NULL,
    output_excerpt TEXT NOT NULL,
    model TEXT NOT NULL,
    prompt_tokens INTEGER NOT NULL,
    completion_tokens INTEGER NOT NULL,
    total_tokens INTEGER NOT NULL,
    latency_ms INTEGER NOT NULL,
    error TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS integrations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    workspace_id INTEGER NOT NULL,
    provider TEXT NOT NULL,
    external_project_id TEXT,
    enabled INTEGER NOT NULL,
    service_account_username TEXT NOT NULL,
    service_account_user_id TEXT NOT NULL,
    UNIQUE(workspace_id, provider, external_project_id)
);
";

pub struct SqliteStores {
    pool: SqlitePool,
}

impl SqliteStores {
    /// Opens (creating if missing) the database at `path` and applies the
    /// schema. WAL mode, same as the enrichment source this is grounded on.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(Error::Io)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .pragma("foreign_keys", "ON");

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;

        sqlx::raw_sql(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| Error::Store(format!("schema migration failed: {e}")))?;

        Ok(Self { pool })
    }

    /// In-memory sqlite pool, for integration tests that want real SQL
    /// transactions without a file on disk.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| Error::Store(e.to_string()))?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        sqlx::raw_sql(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| Error::Store(format!("schema migration failed: {e}")))?;
        Ok(Self { pool })
    }
}

fn processing_status_str(s: ProcessingStatus) -> &'static str {
    match s {
        ProcessingStatus::Idle => "idle",
        ProcessingStatus::Queued => "queued",
        ProcessingStatus::Claimed => "claimed",
    }
}

fn processing_status_from_str(s: &str) -> Result<ProcessingStatus> {
    match s {
        "idle" => Ok(ProcessingStatus::Idle),
        "queued" => Ok(ProcessingStatus::Queued),
        "claimed" => Ok(ProcessingStatus::Claimed),
        other => Err(Error::Corruption(format!("bad processing_status {other}"))),
    }
}

fn spec_status_str(s: SpecStatus) -> &'static str {
    match s {
        SpecStatus::None => "none",
        SpecStatus::Generating => "generating",
        SpecStatus::Ready => "ready",
        SpecStatus::Failed => "failed",
    }
}

fn spec_status_from_str(s: &str) -> Result<SpecStatus> {
    match s {
        "none" => Ok(SpecStatus::None),
        "generating" => Ok(SpecStatus::Generating),
        "ready" => Ok(SpecStatus::Ready),
        "failed" => Ok(SpecStatus::Failed),
        other => Err(Error::Corruption(format!("bad spec_status {other}"))),
    }
}

fn severity_str(s: Severity) -> &'static str {
    match s {
        Severity::Low => "low",
        Severity::Medium => "medium",
        Severity::High => "high",
        Severity::Blocking => "blocking",
    }
}

fn severity_from_str(s: &str) -> Result<Severity> {
    match s {
        "low" => Ok(Severity::Low),
        "medium" => Ok(Severity::Medium),
        "high" => Ok(Severity::High),
        "blocking" => Ok(Severity::Blocking),
        other => Err(Error::Corruption(format!("bad severity {other}"))),
    }
}

fn respondent_str(r: Respondent) -> &'static str {
    match r {
        Respondent::Reporter => "reporter",
        Respondent::Assignee => "assignee",
    }
}

fn respondent_from_str(s: &str) -> Result<Respondent> {
    match s {
        "reporter" => Ok(Respondent::Reporter),
        "assignee" => Ok(Respondent::Assignee),
        other => Err(Error::Corruption(format!("bad respondent {other}"))),
    }
}

fn gap_status_str(s: GapStatus) -> &'static str {
    match s {
        GapStatus::Open => "open",
        GapStatus::Resolved => "resolved",
        GapStatus::Skipped => "skipped",
        GapStatus::ClosedInferred => "closed_inferred",
        GapStatus::ClosedNotRelevant => "closed_not_relevant",
    }
}

fn gap_status_from_str(s: &str) -> Result<GapStatus> {
    match s {
        "open" => Ok(GapStatus::Open),
        "resolved" => Ok(GapStatus::Resolved),
        "skipped" => Ok(GapStatus::Skipped),
        "closed_inferred" => Ok(GapStatus::ClosedInferred),
        "closed_not_relevant" => Ok(GapStatus::ClosedNotRelevant),
        other => Err(Error::Corruption(format!("bad gap status {other}"))),
    }
}

fn learning_type_str(k: LearningType) -> &'static str {
    match k {
        LearningType::ProjectStandards => "project_standards",
        LearningType::CodebaseStandards => "codebase_standards",
        LearningType::DomainKnowledge => "domain_knowledge",
    }
}

fn learning_type_from_str(s: &str) -> Result<LearningType> {
    match s {
        "project_standards" => Ok(LearningType::ProjectStandards),
        "codebase_standards" => Ok(LearningType::CodebaseStandards),
        "domain_knowledge" => Ok(LearningType::DomainKnowledge),
        other => Err(Error::Corruption(format!("bad learning type {other}"))),
    }
}

fn eval_stage_str(s: relay_domain::llm_eval::EvalStage) -> &'static str {
    use relay_domain::llm_eval::EvalStage;
    match s {
        EvalStage::Planner => "planner",
        EvalStage::Explore => "explore",
        EvalStage::SpecGenerator => "spec_generator",
        EvalStage::Keywords => "keywords",
    }
}

fn issue_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Issue> {
    let labels: String = row.try_get("labels").map_err(sqlx_err)?;
    let assignees: String = row.try_get("assignees").map_err(sqlx_err)?;
    let keywords: String = row.try_get("keywords").map_err(sqlx_err)?;
    let code_findings: String = row.try_get("code_findings").map_err(sqlx_err)?;
    let spec: Option<String> = row.try_get("spec").map_err(sqlx_err)?;
    let status: String = row.try_get("processing_status").map_err(sqlx_err)?;
    let spec_status: String = row.try_get("spec_status").map_err(sqlx_err)?;

    Ok(Issue {
        id: row.try_get("id").map_err(sqlx_err)?,
        integration_id: row.try_get("integration_id").map_err(sqlx_err)?,
        external_issue_id: row.try_get("external_issue_id").map_err(sqlx_err)?,
        external_project_id: row.try_get("external_project_id").map_err(sqlx_err)?,
        provider: row.try_get("provider").map_err(sqlx_err)?,
        title: row.try_get("title").map_err(sqlx_err)?,
        description: row.try_get("description").map_err(sqlx_err)?,
        labels: serde_json::from_str(&labels).map_err(Error::Json)?,
        assignees: serde_json::from_str(&assignees).map_err(Error::Json)?,
        reporter: row.try_get("reporter").map_err(sqlx_err)?,
        external_url: row.try_get("external_url").map_err(sqlx_err)?,
        keywords: serde_json::from_str(&keywords).map_err(Error::Json)?,
        code_findings: serde_json::from_str(&code_findings).map_err(Error::Json)?,
        processing_status: processing_status_from_str(&status)?,
        claimed_at: row.try_get("claimed_at").map_err(sqlx_err)?,
        queued_at: row.try_get("queued_at").map_err(sqlx_err)?,
        spec: spec
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(Error::Json)?,
        spec_status: spec_status_from_str(&spec_status)?,
        created_at: row.try_get("created_at").map_err(sqlx_err)?,
        updated_at: row.try_get("updated_at").map_err(sqlx_err)?,
    })
}

fn gap_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Gap> {
    let severity: String = row.try_get("severity").map_err(sqlx_err)?;
    let respondent: String = row.try_get("respondent").map_err(sqlx_err)?;
    let status: String = row.try_get("status").map_err(sqlx_err)?;
    let short_id: i64 = row.try_get("short_id").map_err(sqlx_err)?;
    Ok(Gap {
        id: row.try_get("id").map_err(sqlx_err)?,
        issue_id: row.try_get("issue_id").map_err(sqlx_err)?,
        short_id: short_id as u32,
        question: row.try_get("question").map_err(sqlx_err)?,
        severity: severity_from_str(&severity)?,
        respondent: respondent_from_str(&respondent)?,
        status: gap_status_from_str(&status)?,
        created_at: row.try_get("created_at").map_err(sqlx_err)?,
        resolved_at: row.try_get("resolved_at").map_err(sqlx_err)?,
        resolution_note: row.try_get("resolution_note").map_err(sqlx_err)?,
        comment_ref: row.try_get("comment_ref").map_err(sqlx_err)?,
    })
}

fn finding_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Finding> {
    let sources: String = row.try_get("sources").map_err(sqlx_err)?;
    let is_core: i64 = row.try_get("is_core").map_err(sqlx_err)?;
    Ok(Finding {
        id: row.try_get("id").map_err(sqlx_err)?,
        issue_id: row.try_get("issue_id").map_err(sqlx_err)?,
        synthesis: row.try_get("synthesis").map_err(sqlx_err)?,
        sources: serde_json::from_str::<Vec<FindingSource>>(&sources).map_err(Error::Json)?,
        is_core: is_core != 0,
    })
}

fn learning_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Learning> {
    let kind: String = row.try_get("kind").map_err(sqlx_err)?;
    let embedding: Option<String> = row.try_get("embedding").map_err(sqlx_err)?;
    Ok(Learning {
        id: row.try_get("id").map_err(sqlx_err)?,
        workspace_id: row.try_get("workspace_id").map_err(sqlx_err)?,
        kind: learning_type_from_str(&kind)?,
        content: row.try_get("content").map_err(sqlx_err)?,
        source_context: row.try_get("source_context").map_err(sqlx_err)?,
        embedding: embedding
            .map(|e| serde_json::from_str(&e))
            .transpose()
            .map_err(Error::Json)?,
    })
}

fn event_log_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<EventLog> {
    let payload: String = row.try_get("payload").map_err(sqlx_err)?;
    Ok(EventLog {
        id: row.try_get("id").map_err(sqlx_err)?,
        issue_id: row.try_get("issue_id").map_err(sqlx_err)?,
        workspace_id: row.try_get("workspace_id").map_err(sqlx_err)?,
        event_type: row.try_get("event_type").map_err(sqlx_err)?,
        payload: serde_json::from_str(&payload).map_err(Error::Json)?,
        external_id: row.try_get("external_id").map_err(sqlx_err)?,
        dedupe_key: row.try_get("dedupe_key").map_err(sqlx_err)?,
        processed_at: row.try_get("processed_at").map_err(sqlx_err)?,
        error: row.try_get("error").map_err(sqlx_err)?,
        created_at: row.try_get("created_at").map_err(sqlx_err)?,
    })
}

fn sqlx_err(e: sqlx::Error) -> Error {
    Error::Store(e.to_string())
}

#[async_trait]
impl IssueStore for SqliteStores {
    async fn get(&self, id: i64) -> Result<Option<Issue>> {
        let row = sqlx::query("SELECT * FROM issues WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_err)?;
        row.as_ref().map(issue_from_row).transpose()
    }

    async fn get_by_external(
        &self,
        integration_id: i64,
        external_issue_id: &str,
    ) -> Result<Option<Issue>> {
        let row = sqlx::query(
            "SELECT * FROM issues WHERE integration_id = ?1 AND external_issue_id = ?2",
        )
        .bind(integration_id)
        .bind(external_issue_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_err)?;
        row.as_ref().map(issue_from_row).transpose()
    }

    async fn list_stuck_claimed(&self, older_than: DateTime<Utc>) -> Result<Vec<Issue>> {
        let rows = sqlx::query(
            "SELECT * FROM issues WHERE processing_status = 'claimed' AND claimed_at < ?1",
        )
        .bind(older_than)
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_err)?;
        rows.iter().map(issue_from_row).collect()
    }

    async fn list_stuck_queued(&self, older_than: DateTime<Utc>) -> Result<Vec<Issue>> {
        let rows = sqlx::query(
            "SELECT * FROM issues WHERE processing_status = 'queued' AND queued_at < ?1",
        )
        .bind(older_than)
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_err)?;
        rows.iter().map(issue_from_row).collect()
    }

    async fn reset_to_idle(&self, id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE issues SET processing_status = 'idle', claimed_at = NULL, queued_at = NULL WHERE id = ?1",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(sqlx_err)?;
        Ok(())
    }
}

#[async_trait]
impl GapStore for SqliteStores {
    async fn get(&self, id: i64) -> Result<Option<Gap>> {
        let row = sqlx::query("SELECT * FROM gaps WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_err)?;
        row.as_ref().map(gap_from_row).transpose()
    }

    async fn list_for_issue(&self, issue_id: i64) -> Result<Vec<Gap>> {
        let rows = sqlx::query("SELECT * FROM gaps WHERE issue_id = ?1 ORDER BY short_id")
            .bind(issue_id)
            .fetch_all(&self.pool)
            .await
            .map_err(sqlx_err)?;
        rows.iter().map(gap_from_row).collect()
    }
}

#[async_trait]
impl FindingStore for SqliteStores {
    async fn list_for_issue(&self, issue_id: i64) -> Result<Vec<Finding>> {
        let rows = sqlx::query("SELECT * FROM findings WHERE issue_id = ?1")
            .bind(issue_id)
            .fetch_all(&self.pool)
            .await
            .map_err(sqlx_err)?;
        rows.iter().map(finding_from_row).collect()
    }
}

#[async_trait]
impl LearningStore for SqliteStores {
    async fn list_for_workspace(&self, workspace_id: i64) -> Result<Vec<Learning>> {
        let rows = sqlx::query("SELECT * FROM learnings WHERE workspace_id = ?1")
            .bind(workspace_id)
            .fetch_all(&self.pool)
            .await
            .map_err(sqlx_err)?;
        rows.iter().map(learning_from_row).collect()
    }
}

#[async_trait]
impl EventLogStore for SqliteStores {
    async fn list_pending_for_issue(&self, issue_id: i64) -> Result<Vec<EventLog>> {
        let rows = sqlx::query(
            "SELECT * FROM event_logs WHERE issue_id = ?1 AND processed_at IS NULL ORDER BY id",
        )
        .bind(issue_id)
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_err)?;
        rows.iter().map(event_log_from_row).collect()
    }

    async fn mark_error(&self, id: i64, error: &str) -> Result<()> {
        sqlx::query("UPDATE event_logs SET error = ?2 WHERE id = ?1")
            .bind(id)
            .bind(error)
            .execute(&self.pool)
            .await
            .map_err(sqlx_err)?;
        Ok(())
    }
}

#[async_trait]
impl LlmEvalStore for SqliteStores {
    async fn insert(&self, eval: LlmEval) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO llm_evals
               (stage, issue_id, workspace_id, input_excerpt, output_excerpt, model,
                prompt_tokens, completion_tokens, total_tokens, latency_ms, error, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )
        .bind(eval_stage_str(eval.stage))
        .bind(eval.issue_id)
        .bind(eval.workspace_id)
        .bind(&eval.input_excerpt)
        .bind(&eval.output_excerpt)
        .bind(&eval.model)
        .bind(eval.prompt_tokens as i64)
        .bind(eval.completion_tokens as i64)
        .bind(eval.total_tokens as i64)
        .bind(eval.latency_ms as i64)
        .bind(&eval.error)
        .bind(eval.created_at)
        .execute(&self.pool)
        .await
        .map_err(sqlx_err)?;
        Ok(result.last_insert_rowid())
    }
}

#[async_trait]
impl IntegrationStore for SqliteStores {
    async fn get(&self, id: i64) -> Result<Option<Integration>> {
        let row = sqlx::query("SELECT * FROM integrations WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_err)?;
        let Some(row) = row else { return Ok(None) };
        let enabled: i64 = row.try_get("enabled").map_err(sqlx_err)?;
        Ok(Some(Integration {
            id: row.try_get("id").map_err(sqlx_err)?,
            workspace_id: row.try_get("workspace_id").map_err(sqlx_err)?,
            provider: row.try_get("provider").map_err(sqlx_err)?,
            external_project_id: row.try_get("external_project_id").map_err(sqlx_err)?,
            enabled: enabled != 0,
            service_account: ServiceAccount {
                username: row
                    .try_get("service_account_username")
                    .map_err(sqlx_err)?,
                user_id: row.try_get("service_account_user_id").map_err(sqlx_err)?,
            },
        }))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transactional runner
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct SqliteTxn<'t> {
    tx: Transaction<'t, Sqlite>,
}

#[async_trait]
impl TransactionRunner for SqliteStores {
    async fn run_txn<'a, F, T>(&'a self, f: F) -> Result<T>
    where
        F: for<'c> FnOnce(&'c mut dyn StoreTxn) -> BoxFuture<'c, Result<T>> + Send + 'a,
        T: Send + 'a,
    {
        let tx = self.pool.begin().await.map_err(sqlx_err)?;
        let mut txn = SqliteTxn { tx };
        let result = f(&mut txn).await;
        match result {
            Ok(value) => {
                txn.tx.commit().await.map_err(sqlx_err)?;
                Ok(value)
            }
            Err(e) => {
                txn.tx.rollback().await.map_err(sqlx_err)?;
                Err(e)
            }
        }
    }
}

#[async_trait]
impl<'t> StoreTxn for SqliteTxn<'t> {
    async fn get_issue(&mut self, id: i64) -> Result<Option<Issue>> {
        let row = sqlx::query("SELECT * FROM issues WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(sqlx_err)?;
        row.as_ref().map(issue_from_row).transpose()
    }

    async fn upsert_issue(&mut self, up: IssueUpsert) -> Result<Issue> {
        let now = Utc::now();
        let labels = serde_json::to_string(&up.labels).map_err(Error::Json)?;
        let assignees = serde_json::to_string(&up.assignees).map_err(Error::Json)?;

        sqlx::query(
            "INSERT INTO issues
               (integration_id, external_issue_id, external_project_id, provider, title,
                description, labels, assignees, reporter, external_url,
                processing_status, spec_status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'idle', 'none', ?11, ?11)
             ON CONFLICT(integration_id, external_issue_id) DO UPDATE SET
               title = ?5, description = ?6, labels = ?7, assignees = ?8,
               reporter = ?9, external_url = ?10, updated_at = ?11",
        )
        .bind(up.integration_id)
        .bind(&up.external_issue_id)
        .bind(&up.external_project_id)
        .bind(&up.provider)
        .bind(&up.title)
        .bind(&up.description)
        .bind(&labels)
        .bind(&assignees)
        .bind(&up.reporter)
        .bind(&up.external_url)
        .bind(now)
        .execute(&mut *self.tx)
        .await
        .map_err(sqlx_err)?;

        let row = sqlx::query(
            "SELECT * FROM issues WHERE integration_id = ?1 AND external_issue_id = ?2",
        )
        .bind(up.integration_id)
        .bind(&up.external_issue_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(sqlx_err)?;
        issue_from_row(&row)
    }

    async fn insert_event_log(&mut self, new: NewEventLog) -> Result<EventLogInsertOutcome> {
        let payload = serde_json::to_string(&new.payload).map_err(Error::Json)?;
        let result = sqlx::query(
            "INSERT INTO event_logs
               (issue_id, workspace_id, event_type, payload, external_id, dedupe_key, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(dedupe_key) DO NOTHING",
        )
        .bind(new.issue_id)
        .bind(new.workspace_id)
        .bind(&new.event_type)
        .bind(&payload)
        .bind(&new.external_id)
        .bind(&new.dedupe_key)
        .bind(Utc::now())
        .execute(&mut *self.tx)
        .await
        .map_err(sqlx_err)?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        let row = sqlx::query("SELECT * FROM event_logs WHERE dedupe_key = ?1")
            .bind(&new.dedupe_key)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(sqlx_err)?;
        Ok(Some(event_log_from_row(&row)?))
    }

    async fn try_set_queued_if_idle(&mut self, issue_id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE issues SET processing_status = 'queued', queued_at = ?2
             WHERE id = ?1 AND processing_status = 'idle'",
        )
        .bind(issue_id)
        .bind(Utc::now())
        .execute(&mut *self.tx)
        .await
        .map_err(sqlx_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn try_claim(&mut self, issue_id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE issues SET processing_status = 'claimed', claimed_at = ?2
             WHERE id = ?1 AND processing_status = 'queued'",
        )
        .bind(issue_id)
        .bind(Utc::now())
        .execute(&mut *self.tx)
        .await
        .map_err(sqlx_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn try_release(&mut self, issue_id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE issues SET processing_status = 'idle', claimed_at = NULL
             WHERE id = ?1 AND processing_status = 'claimed'",
        )
        .bind(issue_id)
        .execute(&mut *self.tx)
        .await
        .map_err(sqlx_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn add_gap(&mut self, issue_id: i64, new: NewGapRow) -> Result<Gap> {
        let next_short_id: i64 = sqlx::query(
            "SELECT COALESCE(MAX(short_id), 0) + 1 AS next FROM gaps WHERE issue_id = ?1",
        )
        .bind(issue_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(sqlx_err)?
        .try_get("next")
        .map_err(sqlx_err)?;

        let result = sqlx::query(
            "INSERT INTO gaps (issue_id, short_id, question, severity, respondent, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'open', ?6)",
        )
        .bind(issue_id)
        .bind(next_short_id)
        .bind(&new.question)
        .bind(severity_str(new.severity))
        .bind(respondent_str(new.respondent))
        .bind(Utc::now())
        .execute(&mut *self.tx)
        .await
        .map_err(sqlx_err)?;

        let row = sqlx::query("SELECT * FROM gaps WHERE id = ?1")
            .bind(result.last_insert_rowid())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(sqlx_err)?;
        gap_from_row(&row)
    }

    async fn set_gap_status(
        &mut self,
        gap_id: i64,
        status: GapStatus,
        _reason: Option<CloseReason>,
        note: Option<String>,
    ) -> Result<Gap> {
        sqlx::query(
            "UPDATE gaps SET status = ?2, resolved_at = ?3, resolution_note = ?4 WHERE id = ?1",
        )
        .bind(gap_id)
        .bind(gap_status_str(status))
        .bind(Utc::now())
        .bind(&note)
        .execute(&mut *self.tx)
        .await
        .map_err(sqlx_err)?;

        let row = sqlx::query("SELECT * FROM gaps WHERE id = ?1")
            .bind(gap_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(sqlx_err)?
            .ok_or_else(|| Error::NotFound(format!("gap {gap_id}")))?;
        gap_from_row(&row)
    }

    async fn list_gaps(&mut self, issue_id: i64) -> Result<Vec<Gap>> {
        let rows = sqlx::query("SELECT * FROM gaps WHERE issue_id = ?1 ORDER BY short_id")
            .bind(issue_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(sqlx_err)?;
        rows.iter().map(gap_from_row).collect()
    }

    async fn replace_findings(
        &mut self,
        issue_id: i64,
        rows: Vec<NewFindingRow>,
    ) -> Result<Vec<Finding>> {
        sqlx::query("DELETE FROM findings WHERE issue_id = ?1")
            .bind(issue_id)
            .execute(&mut *self.tx)
            .await
            .map_err(sqlx_err)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let sources = serde_json::to_string(&row.sources).map_err(Error::Json)?;
            let result = sqlx::query(
                "INSERT INTO findings (issue_id, synthesis, sources, is_core) VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(issue_id)
            .bind(&row.synthesis)
            .bind(&sources)
            .bind(row.is_core as i64)
            .execute(&mut *self.tx)
            .await
            .map_err(sqlx_err)?;

            out.push(Finding {
                id: result.last_insert_rowid(),
                issue_id,
                synthesis: row.synthesis,
                sources: row.sources,
                is_core: row.is_core,
            });
        }
        Ok(out)
    }

    async fn insert_learning_dedup(&mut self, row: NewLearningRow) -> Result<Option<Learning>> {
        let dedupe_key = Learning::dedupe_key(row.kind, &row.content);
        let result = sqlx::query(
            "INSERT INTO learnings (workspace_id, kind, content, source_context, dedupe_key)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(dedupe_key) DO NOTHING",
        )
        .bind(row.workspace_id)
        .bind(learning_type_str(row.kind))
        .bind(&row.content)
        .bind(&row.source_context)
        .bind(&dedupe_key)
        .execute(&mut *self.tx)
        .await
        .map_err(sqlx_err)?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        let db_row = sqlx::query("SELECT * FROM learnings WHERE dedupe_key = ?1")
            .bind(&dedupe_key)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(sqlx_err)?;
        Ok(Some(learning_from_row(&db_row)?))
    }

    async fn set_issue_spec(
        &mut self,
        issue_id: i64,
        spec_ref_json: serde_json::Value,
        status: SpecStatus,
    ) -> Result<()> {
        let spec = serde_json::to_string(&spec_ref_json).map_err(Error::Json)?;
        sqlx::query("UPDATE issues SET spec = ?2, spec_status = ?3 WHERE id = ?1")
            .bind(issue_id)
            .bind(&spec)
            .bind(spec_status_str(status))
            .execute(&mut *self.tx)
            .await
            .map_err(sqlx_err)?;
        Ok(())
    }

    async fn set_spec_status(&mut self, issue_id: i64, status: SpecStatus) -> Result<()> {
        sqlx::query("UPDATE issues SET spec_status = ?2 WHERE id = ?1")
            .bind(issue_id)
            .bind(spec_status_str(status))
            .execute(&mut *self.tx)
            .await
            .map_err(sqlx_err)?;
        Ok(())
    }

    async fn mark_events_processed(&mut self, ids: &[i64]) -> Result<()> {
        let now = Utc::now();
        for id in ids {
            sqlx::query("UPDATE event_logs SET processed_at = ?2 WHERE id = ?1")
                .bind(id)
                .bind(now)
                .execute(&mut *self.tx)
                .await
                .map_err(sqlx_err)?;
        }
        Ok(())
    }
}
