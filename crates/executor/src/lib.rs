//! C11: ActionExecutor (spec §4.10).
//!
//! Grounded on the teacher's persistence-plus-observability shape in
//! `runtime/runs.rs` (append a record, emit a trace event, return):
//! each action arm writes through the `TransactionRunner`, then
//! performs any tracker side-effect as best-effort after commit (spec
//! §4.10: "post made as part of closing a gap is performed after the
//! DB transaction commits").

use std::sync::Arc;

use relay_domain::action::{Action, ActionBatch};
use relay_domain::gap::{resolve_gap_ref, CloseReason, GapStatus};
use relay_domain::issue::{Issue, SpecStatus};
use relay_domain::llm_eval::LlmEval;
use relay_domain::trace::TraceEvent;
use relay_domain::{Error, Result};

use relay_specgen::{SpecGenInput, SpecGenerator};
use relay_specstore::SpecStore;
use relay_stores::{
    FindingStore, GapStore, IntegrationStore, LearningStore, LlmEvalStore, NewFindingRow,
    NewGapRow, NewLearningRow, StoreTxn, Stores, TransactionRunner,
};
use relay_tracker::{CreateDiscussionRequest, IssueRef, IssueTracker, ReplyToThreadRequest};

/// What one `execute` call produced, for the Orchestrator to fold into
/// its own issue-local conversation cache.
#[derive(Default)]
pub struct ExecutionOutcome {
    pub posted_messages: Vec<relay_domain::conversation::ConversationMessage>,
    pub llm_evals: Vec<LlmEval>,
    pub executed_count: usize,
}

pub struct ActionExecutor<ST, TR> {
    stores: Arc<ST>,
    tracker: Arc<TR>,
    specstore: Arc<SpecStore>,
    specgen: Arc<SpecGenerator>,
}

impl<ST, TR> ActionExecutor<ST, TR>
where
    ST: Stores,
    TR: IssueTracker,
{
    pub fn new(
        stores: Arc<ST>,
        tracker: Arc<TR>,
        specstore: Arc<SpecStore>,
        specgen: Arc<SpecGenerator>,
    ) -> Self {
        Self {
            stores,
            tracker,
            specstore,
            specgen,
        }
    }

    fn issue_ref(issue: &Issue) -> IssueRef {
        IssueRef {
            integration_id: issue.integration_id,
            project_id: issue.external_project_id.clone(),
            issue_iid: issue.external_issue_id.clone(),
        }
    }

    /// Executes every action in `batch`, in order (spec §4.10). Stops
    /// and propagates on the first error — `outcome.executed_count`
    /// tells the caller how many actions already committed before that
    /// happened (spec §4.10: "partial success within a turn is
    /// observable").
    pub async fn execute(&self, issue: &Issue, batch: &ActionBatch) -> Result<ExecutionOutcome> {
        let mut outcome = ExecutionOutcome::default();
        for action in &batch.actions {
            self.execute_one(issue, action, &mut outcome).await?;
            outcome.executed_count += 1;
            TraceEvent::ActionExecuted {
                issue_id: issue.id,
                kind: action.kind_name().to_string(),
                ok: true,
            }
            .emit();
        }
        Ok(outcome)
    }

    async fn execute_one(
        &self,
        issue: &Issue,
        action: &Action,
        outcome: &mut ExecutionOutcome,
    ) -> Result<()> {
        match action {
            Action::PostComment(p) => self.execute_post_comment(issue, p, outcome).await,
            Action::UpdateGaps(u) => self.execute_update_gaps(issue, u).await,
            Action::UpdateFindings(u) => self.execute_update_findings(issue, u).await,
            Action::UpdateLearnings(u) => self.execute_update_learnings(issue, u).await,
            Action::ReadyForSpecGeneration(r) => {
                self.execute_ready_for_spec_generation(issue, r, outcome).await
            }
            Action::UpdateSpec(u) => self.execute_update_spec(issue, u).await,
        }
    }

    async fn execute_post_comment(
        &self,
        issue: &Issue,
        p: &relay_domain::action::PostComment,
        outcome: &mut ExecutionOutcome,
    ) -> Result<()> {
        let issue_ref = Self::issue_ref(issue);
        let posted = match &p.reply_to_discussion_id {
            Some(discussion_id) => {
                self.tracker
                    .reply_to_thread(ReplyToThreadRequest {
                        issue: issue_ref,
                        discussion_id: discussion_id.clone(),
                        content: p.content.clone(),
                    })
                    .await?
            }
            None => {
                self.tracker
                    .create_discussion(CreateDiscussionRequest {
                        issue: issue_ref,
                        content: p.content.clone(),
                    })
                    .await?
            }
        };
        outcome.posted_messages.push(relay_domain::conversation::ConversationMessage {
            discussion_id: Some(posted.discussion_id),
            ..relay_domain::conversation::ConversationMessage::new(
                0,
                "relay-bot",
                relay_domain::conversation::MessageRole::SelfRole,
                chrono::Utc::now(),
                p.content.clone(),
            )
        });
        Ok(())
    }

    async fn execute_update_gaps(
        &self,
        issue: &Issue,
        u: &relay_domain::action::UpdateGaps,
    ) -> Result<()> {
        let issue_id = issue.id;
        let u = u.clone();

        let gap_closes = self
            .stores
            .run_txn(move |txn| {
                Box::pin(async move {
                    for add in &u.add {
                        txn.add_gap(
                            issue_id,
                            NewGapRow {
                                question: add.question.clone(),
                                severity: add.severity,
                                respondent: add.respondent,
                            },
                        )
                        .await?;
                    }

                    let current = txn.list_gaps(issue_id).await?;
                    for reference in &u.resolve {
                        let gap = resolve_gap_ref(&current, reference)
                            .ok_or_else(|| Error::Validation(format!("unknown gap reference '{reference}'")))?;
                        txn.set_gap_status(gap.id, GapStatus::Resolved, None, None).await?;
                    }
                    for reference in &u.skip {
                        let gap = resolve_gap_ref(&current, reference)
                            .ok_or_else(|| Error::Validation(format!("unknown gap reference '{reference}'")))?;
                        txn.set_gap_status(gap.id, GapStatus::Skipped, None, None).await?;
                    }
                    let mut closed = Vec::new();
                    for close in &u.close {
                        let gap = resolve_gap_ref(&current, &close.gap_id).ok_or_else(|| {
                            Error::Validation(format!("unknown gap reference '{}'", close.gap_id))
                        })?;
                        let status = match close.reason {
                            CloseReason::Answered => GapStatus::Resolved,
                            CloseReason::Inferred => GapStatus::ClosedInferred,
                            CloseReason::NotRelevant => GapStatus::ClosedNotRelevant,
                        };
                        let resolved = txn
                            .set_gap_status(gap.id, status, Some(close.reason), close.note.clone())
                            .await?;
                        closed.push((resolved, gap.comment_ref.clone()));
                    }
                    Ok(closed)
                })
            })
            .await?;

        // Tracker replies on gap closure are best-effort, performed
        // after the transaction commits (spec §4.10).
        for (gap, comment_ref) in gap_closes {
            if let Some(discussion_id) = comment_ref {
                let note = gap.resolution_note.clone().unwrap_or_default();
                let result = self
                    .tracker
                    .reply_to_thread(ReplyToThreadRequest {
                        issue: Self::issue_ref(issue),
                        discussion_id,
                        content: format!("Closing gap #{}: {}", gap.short_id, note),
                    })
                    .await;
                if let Err(e) = result {
                    tracing::warn!(issue_id = issue.id, gap_id = gap.id, error = %e, "best-effort gap-close reply failed");
                }
            }
        }
        Ok(())
    }

    async fn execute_update_findings(
        &self,
        issue: &Issue,
        u: &relay_domain::action::UpdateFindings,
    ) -> Result<()> {
        let issue_id = issue.id;
        let rows: Vec<NewFindingRow> = if u.drop_all {
            Vec::new()
        } else {
            u.add
                .iter()
                .map(|f| NewFindingRow {
                    synthesis: f.synthesis.clone(),
                    sources: f.sources.clone(),
                    is_core: f.is_core,
                })
                .collect()
        };
        self.stores
            .run_txn(move |txn| Box::pin(async move { txn.replace_findings(issue_id, rows).await }))
            .await?;
        Ok(())
    }

    async fn execute_update_learnings(
        &self,
        issue: &Issue,
        u: &relay_domain::action::UpdateLearnings,
    ) -> Result<()> {
        let integration = IntegrationStore::get(self.stores.as_ref(), issue.integration_id)
            .await?
            .ok_or(Error::IntegrationNotFound(issue.integration_id))?;
        let proposals = u.propose.clone();
        self.stores
            .run_txn(move |txn| {
                Box::pin(async move {
                    for proposal in &proposals {
                        txn.insert_learning_dedup(NewLearningRow {
                            workspace_id: integration.workspace_id,
                            kind: proposal.kind,
                            content: proposal.content.clone(),
                            source_context: proposal.source_context.clone(),
                        })
                        .await?;
                    }
                    Ok(())
                })
            })
            .await
    }

    async fn execute_ready_for_spec_generation(
        &self,
        issue: &Issue,
        r: &relay_domain::action::ReadyForSpecGeneration,
        outcome: &mut ExecutionOutcome,
    ) -> Result<()> {
        let issue_id = issue.id;
        self.stores
            .run_txn(move |txn| {
                Box::pin(async move { txn.set_spec_status(issue_id, SpecStatus::Generating).await })
            })
            .await?;

        let input = self.assemble_specgen_input(issue, r).await?;
        let generated = match self.specgen.run(&input).await {
            Ok(g) => g,
            Err(e) => {
                self.stores
                    .run_txn(move |txn| {
                        Box::pin(async move { txn.set_spec_status(issue_id, SpecStatus::Failed).await })
                    })
                    .await?;
                return Err(e);
            }
        };

        let slug = SpecStore::slugify(&issue.title);
        let spec_ref = self.specstore.write(
            issue.id,
            &issue.provider,
            &issue.external_issue_id,
            &slug,
            &generated.spec_markdown,
        )?;
        let spec_ref_json = serde_json::to_value(&spec_ref)?;

        self.stores
            .run_txn(move |txn| {
                Box::pin(async move {
                    txn.set_issue_spec(issue_id, spec_ref_json, SpecStatus::Ready).await
                })
            })
            .await?;

        for eval in &generated.llm_evals {
            self.stores.insert(eval.clone()).await?;
        }
        outcome.llm_evals.extend(generated.llm_evals);
        TraceEvent::SpecWritten {
            issue_id: issue.id,
            sha256: spec_ref.sha256,
            path: spec_ref.path,
        }
        .emit();
        Ok(())
    }

    async fn assemble_specgen_input(
        &self,
        issue: &Issue,
        r: &relay_domain::action::ReadyForSpecGeneration,
    ) -> Result<SpecGenInput> {
        let all_gaps = GapStore::list_for_issue(self.stores.as_ref(), issue.id).await?;
        let closed_gaps = all_gaps.into_iter().filter(|g| !g.is_open()).collect();
        let findings = FindingStore::list_for_issue(self.stores.as_ref(), issue.id).await?;
        let integration = IntegrationStore::get(self.stores.as_ref(), issue.integration_id)
            .await?
            .ok_or(Error::IntegrationNotFound(issue.integration_id))?;
        let learnings = LearningStore::list_for_workspace(self.stores.as_ref(), integration.workspace_id).await?;

        let conversation = match self.tracker.fetch_discussions(&Self::issue_ref(issue)).await {
            Ok(msgs) => msgs,
            Err(e) => {
                tracing::warn!(issue_id = issue.id, error = %e, "could not fetch discussions for spec generation, proceeding without them");
                Vec::new()
            }
        };

        let existing_spec = match &issue.spec {
            Some(v) => {
                let spec_ref: relay_domain::spec_ref::SpecRef = serde_json::from_value(v.clone())?;
                Some(self.specstore.read(
                    &spec_ref,
                    relay_specstore::ReadMode::Full,
                    usize::MAX,
                )?)
            }
            None => None,
        };

        Ok(SpecGenInput {
            issue: issue.clone(),
            workspace_id: integration.workspace_id,
            proceed_signal: r.proceed_signal.clone(),
            context_summary: r.context_summary.clone(),
            closed_gaps,
            findings,
            learnings,
            conversation,
            existing_spec,
        })
    }

    async fn execute_update_spec(
        &self,
        issue: &Issue,
        u: &relay_domain::action::UpdateSpec,
    ) -> Result<()> {
        let slug = SpecStore::slugify(&issue.title);
        let spec_ref = self.specstore.write(
            issue.id,
            &issue.provider,
            &issue.external_issue_id,
            &slug,
            &u.content_markdown,
        )?;
        let spec_ref_json = serde_json::to_value(&spec_ref)?;
        let issue_id = issue.id;
        self.stores
            .run_txn(move |txn| {
                Box::pin(async move {
                    txn.set_issue_spec(issue_id, spec_ref_json, SpecStatus::Ready).await
                })
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relay_domain::action::{PostComment, UpdateFindings, UpdateGaps, UpdateLearnings};
    use relay_domain::finding::FindingSource;
    use relay_domain::gap::{Respondent, Severity};
    use relay_domain::integration::{Integration, ServiceAccount};
    use relay_domain::issue::ProcessingStatus;
    use relay_domain::learning::LearningType;
    use relay_explore::ExploreAgent;
    use relay_llm::{ChatRequest, ChatResponse, LlmClient};
    use relay_stores::MemStores;
    use relay_tracker::fake::FakeTracker;
    use relay_tracker::TrackerIssue;
    use std::sync::Arc;

    struct EchoClient;
    #[async_trait]
    impl LlmClient for EchoClient {
        async fn chat_with_tools(&self, _req: ChatRequest) -> Result<ChatResponse> {
            Ok(ChatResponse::default())
        }
        fn default_model(&self) -> &str {
            "echo/test"
        }
    }

    async fn setup() -> (ActionExecutor<MemStores, FakeTracker>, Issue) {
        let stores = Arc::new(MemStores::new());
        stores
            .seed_integration(Integration {
                id: 1,
                workspace_id: 1,
                provider: "gitlab".into(),
                external_project_id: Some("p1".into()),
                enabled: true,
                service_account: ServiceAccount {
                    username: "relay-bot".into(),
                    user_id: "u1".into(),
                },
            })
            .await;
        let tracker = Arc::new(FakeTracker::new());
        tracker.seed_issue(
            "p1",
            "42",
            TrackerIssue {
                external_issue_id: "42".into(),
                external_project_id: "p1".into(),
                provider: "gitlab".into(),
                title: "Fix login bug".into(),
                description: "desc".into(),
                labels: vec![],
                assignees: vec![],
                reporter: "alice".into(),
                external_url: "https://example.com".into(),
            },
        );
        let dir = tempfile::tempdir().unwrap();
        let specstore = Arc::new(SpecStore::new(dir.path(), 200_000).unwrap());
        let client: Arc<dyn LlmClient> = Arc::new(EchoClient);
        let explore = Arc::new(ExploreAgent::new(
            client.clone(),
            Arc::new(relay_explore::NullCodeGraph),
            relay_domain::config::ExploreConfig::default(),
            dir.path().to_path_buf(),
        ));
        let specgen = Arc::new(SpecGenerator::new(
            client,
            explore,
            relay_domain::config::SpecGenConfig::default(),
        ));
        let executor = ActionExecutor::new(stores.clone(), tracker, specstore, specgen);

        let issue = stores
            .run_txn(|txn| {
                Box::pin(async move {
                    txn.upsert_issue(relay_stores::IssueUpsert {
                        integration_id: 1,
                        workspace_id: 1,
                        external_issue_id: "42".into(),
                        external_project_id: "p1".into(),
                        provider: "gitlab".into(),
                        title: "Fix login bug".into(),
                        description: "desc".into(),
                        labels: vec![],
                        assignees: vec![],
                        reporter: "alice".into(),
                        external_url: "https://example.com".into(),
                    })
                    .await
                })
            })
            .await
            .unwrap();
        assert_eq!(issue.processing_status, ProcessingStatus::Idle);
        (executor, issue)
    }

    #[tokio::test]
    async fn post_comment_creates_a_discussion_and_returns_it() {
        let (executor, issue) = setup().await;
        let batch = ActionBatch {
            actions: vec![Action::PostComment(PostComment {
                content: "thanks, looking into it".into(),
                reply_to_discussion_id: None,
            })],
        };
        let outcome = executor.execute(&issue, &batch).await.unwrap();
        assert_eq!(outcome.executed_count, 1);
        assert_eq!(outcome.posted_messages.len(), 1);
    }

    #[tokio::test]
    async fn update_gaps_add_then_resolve_in_one_batch() {
        let (executor, issue) = setup().await;
        let add = ActionBatch {
            actions: vec![Action::UpdateGaps(UpdateGaps {
                add: vec![relay_domain::action::NewGap {
                    question: "which provider?".into(),
                    severity: Severity::Blocking,
                    respondent: Respondent::Reporter,
                }],
                ..Default::default()
            })],
        };
        executor.execute(&issue, &add).await.unwrap();

        let resolve = ActionBatch {
            actions: vec![Action::UpdateGaps(UpdateGaps {
                resolve: vec!["1".into()],
                ..Default::default()
            })],
        };
        let outcome = executor.execute(&issue, &resolve).await.unwrap();
        assert_eq!(outcome.executed_count, 1);
    }

    #[tokio::test]
    async fn update_findings_replaces_wholesale() {
        let (executor, issue) = setup().await;
        let batch = ActionBatch {
            actions: vec![Action::UpdateFindings(UpdateFindings {
                add: vec![relay_domain::action::NewFinding {
                    synthesis: "bug is in session refresh".into(),
                    sources: vec![FindingSource {
                        location: "src/auth.rs:10".into(),
                        excerpt: None,
                    }],
                    is_core: true,
                }],
                drop_all: false,
            })],
        };
        executor.execute(&issue, &batch).await.unwrap();
    }

    #[tokio::test]
    async fn update_learnings_dedupes_by_type_and_content() {
        let (executor, issue) = setup().await;
        let propose = relay_domain::action::ProposedLearning {
            kind: LearningType::DomainKnowledge,
            content: "auth uses session cookies".into(),
            source_context: "issue 42".into(),
        };
        let batch = ActionBatch {
            actions: vec![Action::UpdateLearnings(UpdateLearnings {
                propose: vec![propose.clone(), propose],
            })],
        };
        executor.execute(&issue, &batch).await.unwrap();
    }
}
