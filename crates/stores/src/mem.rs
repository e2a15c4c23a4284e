//! In-memory `Stores` implementation, the teacher-style
//! `Mutex<HashMap<..>>` shape (`crates/sessions/src/store.rs`
//! generalized from one map to the full entity set), used by fast unit
//! tests of Planner/Validator/Executor logic that don't need a real
//! transaction (SPEC_FULL §4.2).
//!
//! Transactions here are coarse: one global mutex guards all state for
//! the duration of the closure, so "commit" is just "the closure
//! returned `Ok`" and "rollback" is "discard the cloned scratch state".
//! That's enough to exercise the Testable Properties in spec §8 without
//! real SQL. The lock is `tokio::sync::Mutex`, not `parking_lot`: the
//! transactional runner holds its guard across `f(&mut txn).await`
//! (`run_txn` below), and `parking_lot`'s guard is `!Send` without the
//! crate's `send_guard` feature — `TransactionRunner::run_txn` is a
//! plain `#[async_trait]` method, which requires the returned future to
//! be `Send`. `tokio::sync::MutexGuard` is `Send`, so the desugared
//! future type-checks.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use relay_domain::error::{Error, Result};
use relay_domain::event_log::EventLog;
use relay_domain::finding::{Finding, FindingSource};
use relay_domain::gap::{CloseReason, Gap, GapStatus};
use relay_domain::integration::Integration;
use relay_domain::issue::{Issue, ProcessingStatus, SpecStatus};
use relay_domain::learning::Learning;
use relay_domain::llm_eval::LlmEval;

use crate::traits::*;

#[derive(Default)]
struct MemState {
    next_issue_id: i64,
    next_gap_id: i64,
    next_finding_id: i64,
    next_learning_id: i64,
    next_event_log_id: i64,
    next_llm_eval_id: i64,

    issues: HashMap<i64, Issue>,
    issues_by_external: HashMap<(i64, String), i64>,
    gaps: HashMap<i64, Gap>,
    findings: HashMap<i64, Finding>,
    learnings: HashMap<i64, Learning>,
    learning_dedupe: HashMap<String, i64>,
    event_logs: HashMap<i64, EventLog>,
    event_logs_by_dedupe: HashMap<String, i64>,
    llm_evals: HashMap<i64, LlmEval>,
    integrations: HashMap<i64, Integration>,
}

pub struct MemStores {
    state: Mutex<MemState>,
}

impl Default for MemStores {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStores {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemState::default()),
        }
    }

    /// Seeds an integration for tests (the integration CRUD surface lives
    /// outside this core, per spec §1 non-goals).
    pub async fn seed_integration(&self, integration: Integration) {
        let mut st = self.state.lock().await;
        st.integrations.insert(integration.id, integration);
    }

    /// Seeds an issue directly (bypassing the ingest upsert path), for
    /// tests that want to start mid-pipeline.
    pub async fn seed_issue(&self, issue: Issue) {
        let mut st = self.state.lock().await;
        let key = (issue.integration_id, issue.external_issue_id.clone());
        st.issues_by_external.insert(key, issue.id);
        st.next_issue_id = st.next_issue_id.max(issue.id + 1);
        st.issues.insert(issue.id, issue);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Read-side traits — thin locks over the shared state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait]
impl IssueStore for MemStores {
    async fn get(&self, id: i64) -> Result<Option<Issue>> {
        Ok(self.state.lock().await.issues.get(&id).cloned())
    }

    async fn get_by_external(
        &self,
        integration_id: i64,
        external_issue_id: &str,
    ) -> Result<Option<Issue>> {
        let st = self.state.lock().await;
        let key = (integration_id, external_issue_id.to_string());
        Ok(st
            .issues_by_external
            .get(&key)
            .and_then(|id| st.issues.get(id))
            .cloned())
    }

    async fn list_stuck_claimed(&self, older_than: DateTime<Utc>) -> Result<Vec<Issue>> {
        let st = self.state.lock().await;
        Ok(st
            .issues
            .values()
            .filter(|i| {
                i.processing_status == ProcessingStatus::Claimed
                    && i.claimed_at.map(|t| t < older_than).unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn list_stuck_queued(&self, older_than: DateTime<Utc>) -> Result<Vec<Issue>> {
        let st = self.state.lock().await;
        Ok(st
            .issues
            .values()
            .filter(|i| {
                i.processing_status == ProcessingStatus::Queued
                    && i.queued_at.map(|t| t < older_than).unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn reset_to_idle(&self, id: i64) -> Result<()> {
        let mut st = self.state.lock().await;
        if let Some(issue) = st.issues.get_mut(&id) {
            issue.processing_status = ProcessingStatus::Idle;
            issue.claimed_at = None;
            issue.queued_at = None;
        }
        Ok(())
    }
}

#[async_trait]
impl GapStore for MemStores {
    async fn get(&self, id: i64) -> Result<Option<Gap>> {
        Ok(self.state.lock().await.gaps.get(&id).cloned())
    }

    async fn list_for_issue(&self, issue_id: i64) -> Result<Vec<Gap>> {
        let st = self.state.lock().await;
        let mut out: Vec<Gap> = st
            .gaps
            .values()
            .filter(|g| g.issue_id == issue_id)
            .cloned()
            .collect();
        out.sort_by_key(|g| g.short_id);
        Ok(out)
    }
}

#[async_trait]
impl FindingStore for MemStores {
    async fn list_for_issue(&self, issue_id: i64) -> Result<Vec<Finding>> {
        let st = self.state.lock().await;
        Ok(st
            .findings
            .values()
            .filter(|f| f.issue_id == issue_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl LearningStore for MemStores {
    async fn list_for_workspace(&self, workspace_id: i64) -> Result<Vec<Learning>> {
        let st = self.state.lock().await;
        Ok(st
            .learnings
            .values()
            .filter(|l| l.workspace_id == workspace_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl EventLogStore for MemStores {
    async fn list_pending_for_issue(&self, issue_id: i64) -> Result<Vec<EventLog>> {
        let st = self.state.lock().await;
        let mut out: Vec<EventLog> = st
            .event_logs
            .values()
            .filter(|e| e.issue_id == issue_id && e.is_pending())
            .cloned()
            .collect();
        out.sort_by_key(|e| e.id);
        Ok(out)
    }

    async fn mark_error(&self, id: i64, error: &str) -> Result<()> {
        let mut st = self.state.lock().await;
        if let Some(e) = st.event_logs.get_mut(&id) {
            e.error = Some(error.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl LlmEvalStore for MemStores {
    async fn insert(&self, mut eval: LlmEval) -> Result<i64> {
        let mut st = self.state.lock().await;
        st.next_llm_eval_id += 1;
        let id = st.next_llm_eval_id;
        eval.id = id;
        st.llm_evals.insert(id, eval);
        Ok(id)
    }
}

#[async_trait]
impl IntegrationStore for MemStores {
    async fn get(&self, id: i64) -> Result<Option<Integration>> {
        Ok(self.state.lock().await.integrations.get(&id).cloned())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transactional runner — one global lock, a `MemTxn` view over it
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct MemTxn<'a> {
    st: tokio::sync::MutexGuard<'a, MemState>,
}

#[async_trait]
impl TransactionRunner for MemStores {
    async fn run_txn<'a, F, T>(&'a self, f: F) -> Result<T>
    where
        F: for<'c> FnOnce(&'c mut dyn StoreTxn) -> BoxFuture<'c, Result<T>> + Send + 'a,
        T: Send + 'a,
    {
        let guard = self.state.lock().await;
        let mut txn = MemTxn { st: guard };
        f(&mut txn).await
    }
}

#[async_trait]
impl<'a> StoreTxn for MemTxn<'a> {
    async fn get_issue(&mut self, id: i64) -> Result<Option<Issue>> {
        Ok(self.st.issues.get(&id).cloned())
    }

    async fn upsert_issue(&mut self, up: IssueUpsert) -> Result<Issue> {
        let key = (up.integration_id, up.external_issue_id.clone());
        if let Some(&id) = self.st.issues_by_external.get(&key) {
            let issue = self.st.issues.get_mut(&id).expect("indexed issue exists");
            issue.title = up.title;
            issue.description = up.description;
            issue.labels = up.labels;
            issue.assignees = up.assignees;
            issue.reporter = up.reporter;
            issue.external_url = up.external_url;
            issue.updated_at = Utc::now();
            return Ok(issue.clone());
        }
        self.st.next_issue_id += 1;
        let id = self.st.next_issue_id;
        let now = Utc::now();
        let issue = Issue {
            id,
            integration_id: up.integration_id,
            external_issue_id: up.external_issue_id.clone(),
            external_project_id: up.external_project_id,
            provider: up.provider,
            title: up.title,
            description: up.description,
            labels: up.labels,
            assignees: up.assignees,
            reporter: up.reporter,
            external_url: up.external_url,
            keywords: Vec::new(),
            code_findings: Vec::new(),
            processing_status: ProcessingStatus::Idle,
            claimed_at: None,
            queued_at: None,
            spec: None,
            spec_status: SpecStatus::None,
            created_at: now,
            updated_at: now,
        };
        self.st.issues_by_external.insert(key, id);
        self.st.issues.insert(id, issue.clone());
        Ok(issue)
    }

    async fn insert_event_log(&mut self, new: NewEventLog) -> Result<EventLogInsertOutcome> {
        if self.st.event_logs_by_dedupe.contains_key(&new.dedupe_key) {
            return Ok(None);
        }
        self.st.next_event_log_id += 1;
        let id = self.st.next_event_log_id;
        let row = EventLog {
            id,
            issue_id: new.issue_id,
            workspace_id: new.workspace_id,
            event_type: new.event_type,
            payload: new.payload,
            external_id: new.external_id,
            dedupe_key: new.dedupe_key.clone(),
            processed_at: None,
            error: None,
            created_at: Utc::now(),
        };
        self.st
            .event_logs_by_dedupe
            .insert(new.dedupe_key, id);
        self.st.event_logs.insert(id, row.clone());
        Ok(Some(row))
    }

    async fn try_set_queued_if_idle(&mut self, issue_id: i64) -> Result<bool> {
        let Some(issue) = self.st.issues.get_mut(&issue_id) else {
            return Err(Error::NotFound(format!("issue {issue_id}")));
        };
        if issue.processing_status != ProcessingStatus::Idle {
            return Ok(false);
        }
        issue.processing_status = ProcessingStatus::Queued;
        issue.queued_at = Some(Utc::now());
        Ok(true)
    }

    async fn try_claim(&mut self, issue_id: i64) -> Result<bool> {
        let Some(issue) = self.st.issues.get_mut(&issue_id) else {
            return Err(Error::NotFound(format!("issue {issue_id}")));
        };
        if issue.processing_status != ProcessingStatus::Queued {
            return Ok(false);
        }
        issue.processing_status = ProcessingStatus::Claimed;
        issue.claimed_at = Some(Utc::now());
        Ok(true)
    }

    async fn try_release(&mut self, issue_id: i64) -> Result<bool> {
        let Some(issue) = self.st.issues.get_mut(&issue_id) else {
            return Err(Error::NotFound(format!("issue {issue_id}")));
        };
        if issue.processing_status != ProcessingStatus::Claimed {
            return Ok(false);
        }
        issue.processing_status = ProcessingStatus::Idle;
        issue.claimed_at = None;
        Ok(true)
    }

    async fn add_gap(&mut self, issue_id: i64, new: NewGapRow) -> Result<Gap> {
        let next_short_id = self
            .st
            .gaps
            .values()
            .filter(|g| g.issue_id == issue_id)
            .map(|g| g.short_id)
            .max()
            .unwrap_or(0)
            + 1;
        self.st.next_gap_id += 1;
        let id = self.st.next_gap_id;
        let gap = Gap {
            id,
            issue_id,
            short_id: next_short_id,
            question: new.question,
            severity: new.severity,
            respondent: new.respondent,
            status: GapStatus::Open,
            created_at: Utc::now(),
            resolved_at: None,
            resolution_note: None,
            comment_ref: None,
        };
        self.st.gaps.insert(id, gap.clone());
        Ok(gap)
    }

    async fn set_gap_status(
        &mut self,
        gap_id: i64,
        status: GapStatus,
        _reason: Option<CloseReason>,
        note: Option<String>,
    ) -> Result<Gap> {
        let Some(gap) = self.st.gaps.get_mut(&gap_id) else {
            return Err(Error::NotFound(format!("gap {gap_id}")));
        };
        gap.status = status;
        gap.resolved_at = Some(Utc::now());
        gap.resolution_note = note;
        Ok(gap.clone())
    }

    async fn list_gaps(&mut self, issue_id: i64) -> Result<Vec<Gap>> {
        Ok(self
            .st
            .gaps
            .values()
            .filter(|g| g.issue_id == issue_id)
            .cloned()
            .collect())
    }

    async fn replace_findings(
        &mut self,
        issue_id: i64,
        rows: Vec<NewFindingRow>,
    ) -> Result<Vec<Finding>> {
        let stale_ids: Vec<i64> = self
            .st
            .findings
            .values()
            .filter(|f| f.issue_id == issue_id)
            .map(|f| f.id)
            .collect();
        for id in stale_ids {
            self.st.findings.remove(&id);
        }
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            self.st.next_finding_id += 1;
            let id = self.st.next_finding_id;
            let finding = Finding {
                id,
                issue_id,
                synthesis: row.synthesis,
                sources: row
                    .sources
                    .into_iter()
                    .map(|s| FindingSource {
                        location: s.location,
                        excerpt: s.excerpt,
                    })
                    .collect(),
                is_core: row.is_core,
            };
            self.st.findings.insert(id, finding.clone());
            out.push(finding);
        }
        Ok(out)
    }

    async fn insert_learning_dedup(&mut self, row: NewLearningRow) -> Result<Option<Learning>> {
        let key = Learning::dedupe_key(row.kind, &row.content);
        if self.st.learning_dedupe.contains_key(&key) {
            return Ok(None);
        }
        self.st.next_learning_id += 1;
        let id = self.st.next_learning_id;
        let learning = Learning {
            id,
            workspace_id: row.workspace_id,
            kind: row.kind,
            content: row.content,
            source_context: row.source_context,
            embedding: None,
        };
        self.st.learning_dedupe.insert(key, id);
        self.st.learnings.insert(id, learning.clone());
        Ok(Some(learning))
    }

    async fn set_issue_spec(
        &mut self,
        issue_id: i64,
        spec_ref_json: serde_json::Value,
        status: SpecStatus,
    ) -> Result<()> {
        let Some(issue) = self.st.issues.get_mut(&issue_id) else {
            return Err(Error::NotFound(format!("issue {issue_id}")));
        };
        issue.spec = Some(spec_ref_json);
        issue.spec_status = status;
        Ok(())
    }

    async fn set_spec_status(&mut self, issue_id: i64, status: SpecStatus) -> Result<()> {
        let Some(issue) = self.st.issues.get_mut(&issue_id) else {
            return Err(Error::NotFound(format!("issue {issue_id}")));
        };
        issue.spec_status = status;
        Ok(())
    }

    async fn mark_events_processed(&mut self, ids: &[i64]) -> Result<()> {
        let now = Utc::now();
        for id in ids {
            if let Some(e) = self.st.event_logs.get_mut(id) {
                e.processed_at = Some(now);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_domain::gap::{Respondent, Severity};

    fn mk_runner() -> MemStores {
        MemStores::new()
    }

    #[tokio::test]
    async fn duplicate_dedupe_key_is_absorbed() {
        let stores = mk_runner();
        let new = |key: &str| NewEventLog {
            issue_id: 1,
            workspace_id: 1,
            event_type: "note".into(),
            payload: serde_json::json!({}),
            external_id: None,
            dedupe_key: key.to_string(),
        };
        let first = stores
            .run_txn(|txn| Box::pin(async move { txn.insert_event_log(new("k1")).await }))
            .await
            .unwrap();
        assert!(first.is_some());
        let second = stores
            .run_txn(|txn| Box::pin(async move { txn.insert_event_log(new("k1")).await }))
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn claim_cas_only_succeeds_once() {
        let stores = mk_runner();
        stores.seed_issue(Issue {
            id: 1,
            integration_id: 1,
            external_issue_id: "42".into(),
            external_project_id: "p".into(),
            provider: "gitlab".into(),
            title: "t".into(),
            description: "d".into(),
            labels: vec![],
            assignees: vec![],
            reporter: "r".into(),
            external_url: "u".into(),
            keywords: vec![],
            code_findings: vec![],
            processing_status: ProcessingStatus::Queued,
            claimed_at: None,
            queued_at: Some(Utc::now()),
            spec: None,
            spec_status: SpecStatus::None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
        .await;

        let a = stores
            .run_txn(|txn| Box::pin(async move { txn.try_claim(1).await }))
            .await
            .unwrap();
        let b = stores
            .run_txn(|txn| Box::pin(async move { txn.try_claim(1).await }))
            .await
            .unwrap();
        assert!(a);
        assert!(!b, "second claim attempt must lose the CAS");
    }

    #[tokio::test]
    async fn gap_short_ids_are_sequential_per_issue() {
        let stores = mk_runner();
        let g1 = stores
            .run_txn(|txn| {
                Box::pin(async move {
                    txn.add_gap(
                        1,
                        NewGapRow {
                            question: "q1".into(),
                            severity: Severity::Blocking,
                            respondent: Respondent::Reporter,
                        },
                    )
                    .await
                })
            })
            .await
            .unwrap();
        let g2 = stores
            .run_txn(|txn| {
                Box::pin(async move {
                    txn.add_gap(
                        1,
                        NewGapRow {
                            question: "q2".into(),
                            severity: Severity::Low,
                            respondent: Respondent::Assignee,
                        },
                    )
                    .await
                })
            })
            .await
            .unwrap();
        assert_eq!(g1.short_id, 1);
        assert_eq!(g2.short_id, 2);
    }
}
