//! C13: the Orchestrator (spec §4.4, §5).
//!
//! Mirrors the teacher's `runtime::turn::run_turn` state machine
//! (`crates/gateway/src/runtime/turn.rs`) one level up: instead of one
//! LLM turn, one *issue* turn — claim, load, filter, plan, validate,
//! execute, mark processed, release. The worker pool itself generalizes
//! the teacher's `sa_tools::process::ProcessSession` shape (one spawned
//! task per slot) from "one task per background process" to "one task
//! per worker slot, claiming across issues" (SPEC_FULL §5).

pub mod janitor;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;

use relay_domain::config::{EngagementConfig, OrchestratorConfig};
use relay_domain::error::Retryable;
use relay_domain::issue::{Issue, ProcessingStatus};
use relay_domain::trace::TraceEvent;
use relay_domain::{Error, Result};

use relay_engagement::{EngagementDetector, EngagementRequest};
use relay_executor::ActionExecutor;
use relay_planner::Planner;
use relay_queue::{ClaimedMessage, IssueQueue, NewQueueMessage};
use relay_specstore::{ReadMode, SpecStore};
use relay_stores::{
    EventLogStore, FindingStore, GapStore, IntegrationStore, LearningStore, LlmEvalStore,
    Stores,
};
use relay_tracker::{CreateDiscussionRequest, IssueRef, IssueTracker};
use relay_validator::validate_batch;

pub use janitor::Janitor;

/// What one claimed message resolved to, for the caller's logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// A full turn ran to completion (possibly a no-op because every
    /// pending event was filtered out by the engagement re-check).
    Processed,
    /// The claim CAS lost to another worker (or self-heal also lost) —
    /// absorbed per spec §7 `Conflict`, not an error.
    ClaimLost,
}

pub struct Orchestrator<S, T>
where
    S: Stores,
    T: IssueTracker,
{
    stores: Arc<S>,
    tracker: Arc<T>,
    queue: Arc<dyn IssueQueue>,
    planner: Arc<Planner>,
    executor: Arc<ActionExecutor<S, T>>,
    specstore: Arc<SpecStore>,
    detector: EngagementDetector,
    config: OrchestratorConfig,
    engagement_config: EngagementConfig,
    /// Per-issue last-error-comment timestamp, rate-limiting the
    /// best-effort failure notice (spec §7: "rate-limited per issue").
    last_error_comment_at: Mutex<HashMap<i64, DateTime<Utc>>>,
}

impl<S, T> Orchestrator<S, T>
where
    S: Stores + 'static,
    T: IssueTracker + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stores: Arc<S>,
        tracker: Arc<T>,
        queue: Arc<dyn IssueQueue>,
        planner: Arc<Planner>,
        executor: Arc<ActionExecutor<S, T>>,
        specstore: Arc<SpecStore>,
        config: OrchestratorConfig,
        engagement_config: EngagementConfig,
    ) -> Self {
        let detector = EngagementDetector::new(tracker.clone() as Arc<dyn IssueTracker>);
        Self {
            stores,
            tracker,
            queue,
            planner,
            executor,
            specstore,
            detector,
            config,
            engagement_config,
            last_error_comment_at: Mutex::new(HashMap::new()),
        }
    }

    /// Claims and processes exactly one message, if any is available.
    /// Returns `Ok(None)` when the queue had nothing to claim.
    pub async fn run_once(&self, consumer_id: &str, visibility_timeout: Duration) -> Result<Option<TurnOutcome>> {
        let Some(msg) = self.queue.claim_next(consumer_id, visibility_timeout).await? else {
            return Ok(None);
        };
        let outcome = self.process_message(&msg).await;
        Ok(Some(outcome))
    }

    /// Spawns `n` cooperative worker loops pulling from the queue
    /// (spec §5: "parallel worker processes, each running multiple
    /// cooperative workers"). Each loop polls with `poll_interval` when
    /// the queue is empty.
    pub fn spawn_workers(
        self: &Arc<Self>,
        n: u32,
        visibility_timeout: Duration,
        poll_interval: Duration,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        (0..n)
            .map(|i| {
                let this = self.clone();
                let consumer_id = format!("worker-{i}");
                tokio::spawn(async move {
                    loop {
                        match this.run_once(&consumer_id, visibility_timeout).await {
                            Ok(Some(_)) => {}
                            Ok(None) => tokio::time::sleep(poll_interval).await,
                            Err(e) => {
                                tracing::error!(error = %e, "orchestrator worker loop error, backing off");
                                tokio::time::sleep(poll_interval).await;
                            }
                        }
                    }
                })
            })
            .collect()
    }

    /// Processes one claimed message to completion, acking it exactly
    /// once and never propagating an error back to the queue loop —
    /// every outcome (success, absorbed conflict, fatal failure,
    /// retryable failure) is resolved to an ack-or-requeue decision here
    /// (spec §4.4, §7).
    pub async fn process_message(&self, msg: &ClaimedMessage) -> TurnOutcome {
        match self.run_turn(msg).await {
            Ok(outcome) => {
                let _ = self.queue.ack(msg.message_id).await;
                outcome
            }
            Err(e) => {
                let _ = self
                    .stores
                    .mark_error(msg.event_log_id, &e.to_string())
                    .await;
                if Retryable::is_retryable(&e) {
                    let attempt = msg.attempt + 1;
                    let delay = backoff_delay(attempt, &self.config);
                    tracing::warn!(
                        issue_id = msg.issue_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retryable turn failure, requeuing with backoff"
                    );
                    let _ = self
                        .queue
                        .enqueue_after(
                            NewQueueMessage {
                                issue_id: msg.issue_id,
                                event_log_id: msg.event_log_id,
                                attempt,
                                trace_id: msg.trace_id.clone(),
                            },
                            delay,
                        )
                        .await;
                } else {
                    tracing::error!(issue_id = msg.issue_id, error = %e, "fatal turn failure, not retrying");
                    if let Ok(Some(issue)) = self.stores.get(msg.issue_id).await {
                        self.post_error_comment(&issue, &e.to_string()).await;
                    }
                }
                let _ = self.queue.ack(msg.message_id).await;
                TurnOutcome::Processed
            }
        }
    }

    /// The claim -> load -> filter -> plan -> validate -> execute ->
    /// mark-processed -> release state machine for one message.
    async fn run_turn(&self, msg: &ClaimedMessage) -> Result<TurnOutcome> {
        let issue_id = msg.issue_id;

        if !self.claim_with_selfheal(issue_id).await? {
            return Ok(TurnOutcome::ClaimLost);
        }
        TraceEvent::IssueClaimed {
            issue_id,
            attempt: msg.attempt,
        }
        .emit();

        let result = self.run_claimed_turn(issue_id).await;

        // Always release, whether the turn succeeded or failed — an
        // issue must never stay `claimed` past its own turn (spec §4.4
        // step 8 runs unconditionally relative to step 5/6 failures,
        // which instead re-queue with backoff per §4.4 Retries).
        let _ = self
            .stores
            .run_txn(move |txn| Box::pin(async move { txn.try_release(issue_id).await }))
            .await;
        TraceEvent::IssueReleased {
            issue_id,
            status: "idle".to_string(),
        }
        .emit();

        result.map(|_| TurnOutcome::Processed)
    }

    /// Attempts the `queued -> claimed` CAS (spec §4.4 step 1). If that
    /// loses because the row is sitting `idle` — the janitor reclaimed a
    /// stuck claim, or this is a stale redelivery of an already-released
    /// issue — self-heals by replaying the `idle -> queued -> claimed`
    /// transition a fresh enqueue would have taken, rather than treating
    /// every CAS loss as "another worker owns it" (SPEC_FULL §4.4: the
    /// janitor only promises to reset to `idle`, not to requeue, so the
    /// claim step has to be the one that notices and re-admits the
    /// issue). A CAS loss while the row is genuinely `claimed` is left
    /// alone — that really is another worker's turn in flight.
    async fn claim_with_selfheal(&self, issue_id: i64) -> Result<bool> {
        let claimed = self
            .stores
            .run_txn(move |txn| Box::pin(async move { txn.try_claim(issue_id).await }))
            .await?;
        if claimed {
            return Ok(true);
        }

        let issue = self.stores.get(issue_id).await?;
        let is_idle = matches!(
            issue.map(|i| i.processing_status),
            Some(ProcessingStatus::Idle)
        );
        if !is_idle {
            return Ok(false);
        }

        let requeued = self
            .stores
            .run_txn(move |txn| Box::pin(async move { txn.try_set_queued_if_idle(issue_id).await }))
            .await?;
        if !requeued {
            return Ok(false);
        }
        self.stores
            .run_txn(move |txn| Box::pin(async move { txn.try_claim(issue_id).await }))
            .await
    }

    async fn run_claimed_turn(&self, issue_id: i64) -> Result<()> {
        let issue = self
            .stores
            .get(issue_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("issue {issue_id}")))?;
        let integration = IntegrationStore::get(self.stores.as_ref(), issue.integration_id)
            .await?
            .ok_or(Error::IntegrationNotFound(issue.integration_id))?;

        let open_gaps = GapStore::list_open_for_issue(self.stores.as_ref(), issue_id).await?;
        let findings = FindingStore::list_for_issue(self.stores.as_ref(), issue_id).await?;
        let learnings =
            LearningStore::list_for_workspace(self.stores.as_ref(), integration.workspace_id)
                .await?;
        let pending_events = EventLogStore::list_pending_for_issue(self.stores.as_ref(), issue_id).await?;

        // Engagement filter (spec §4.4 step 3): drop any pending event
        // that no longer looks engagement-worthy on re-check.
        let mut surviving_ids = Vec::new();
        let mut dropped_ids = Vec::new();
        for event in &pending_events {
            match event.envelope() {
                Some(envelope) => {
                    let req = EngagementRequest {
                        provider: envelope.provider.clone(),
                        issue_body: envelope.issue_body.clone(),
                        comment_body: envelope.comment_body.clone(),
                        discussion_id: envelope.discussion_id.clone(),
                        comment_id: envelope.comment_id.clone(),
                        external_project_id: envelope.external_project_id.clone(),
                        external_issue_iid: envelope.external_issue_iid.clone(),
                        triggered_by_username: envelope.triggered_by_username.clone(),
                    };
                    let result = self.detector.detect(&integration, &req).await;
                    if result.engage {
                        surviving_ids.push(event.id);
                    } else {
                        dropped_ids.push(event.id);
                    }
                }
                // No envelope (row predates the convention, or was
                // written by a caller that bypassed EventIngestor) —
                // can't re-filter, so keep it rather than silently drop
                // work (spec §7: "failures never silently skip gaps or
                // findings").
                None => surviving_ids.push(event.id),
            }
        }

        if !dropped_ids.is_empty() {
            self.stores
                .run_txn(move |txn| Box::pin(async move { txn.mark_events_processed(&dropped_ids).await }))
                .await?;
        }

        if surviving_ids.is_empty() {
            return Ok(());
        }

        let issue_ref = IssueRef {
            integration_id: issue.integration_id,
            project_id: issue.external_project_id.clone(),
            issue_iid: issue.external_issue_id.clone(),
        };
        let mut conversation = self.tracker.fetch_discussions(&issue_ref).await?;
        relay_domain::conversation::annotate_messages(
            &mut conversation,
            &open_gaps,
            &self.engagement_config.proceed_phrases,
        );

        let spec_ref: Option<relay_domain::spec_ref::SpecRef> = issue
            .spec
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok());
        let spec_summary = match &spec_ref {
            Some(r) => self.specstore.read(r, ReadMode::Summary, 2_000).ok(),
            None => None,
        };

        let turn_deadline = Duration::from_millis(self.config.turn_wall_clock_budget_ms);
        let planner_outcome = tokio::time::timeout(
            turn_deadline,
            self.planner.run(
                &issue,
                integration.workspace_id,
                &open_gaps,
                &findings,
                &learnings,
                spec_ref.as_ref(),
                spec_summary.as_deref(),
                &conversation,
            ),
        )
        .await
        .map_err(|_| Error::ProviderTransient {
            provider: "planner".to_string(),
            message: "turn wall-clock budget exceeded".to_string(),
        })??;

        for eval in &planner_outcome.llm_evals {
            self.stores.insert(eval.clone()).await?;
        }
        TraceEvent::PlannerTurnFinished {
            issue_id,
            iterations: planner_outcome.iterations,
            actions: planner_outcome.batch.actions.len(),
            prompt_tokens: planner_outcome.prompt_tokens,
            completion_tokens: planner_outcome.completion_tokens,
        }
        .emit();

        // Validation failure is fatal for this turn (spec §4.4 step 5):
        // no action executes, propagate so `process_message` marks the
        // event failed without retrying.
        validate_batch(&open_gaps, &planner_outcome.batch)?;

        // Executor's own LlmEvals (stage=spec_generator) are already
        // persisted by ActionExecutor itself when it invokes SpecGenerator.
        self.executor.execute(&issue, &planner_outcome.batch).await?;

        self.stores
            .run_txn(move |txn| Box::pin(async move { txn.mark_events_processed(&surviving_ids).await }))
            .await?;

        Ok(())
    }

    /// Best-effort, rate-limited error comment (spec §7: "on any fatal
    /// turn failure, the Orchestrator posts a one-line error comment to
    /// the tracker, rate-limited per issue").
    async fn post_error_comment(&self, issue: &Issue, message: &str) {
        let now = Utc::now();
        let cooldown = chrono::Duration::seconds(self.config.error_comment_cooldown_secs);
        let should_post = {
            let mut last = self.last_error_comment_at.lock();
            match last.get(&issue.id) {
                Some(prev) if now - *prev < cooldown => false,
                _ => {
                    last.insert(issue.id, now);
                    true
                }
            }
        };
        if !should_post {
            return;
        }

        let issue_ref = IssueRef {
            integration_id: issue.integration_id,
            project_id: issue.external_project_id.clone(),
            issue_iid: issue.external_issue_id.clone(),
        };
        let content = format!(
            "I ran into an error while working on this issue and couldn't finish this pass: {message}"
        );
        if let Err(e) = self
            .tracker
            .create_discussion(CreateDiscussionRequest {
                issue: issue_ref,
                content,
            })
            .await
        {
            tracing::warn!(issue_id = issue.id, error = %e, "best-effort error comment failed");
        }
    }
}

/// `delay = min(base * 2^(attempt-1), cap) + jitter` (spec §4.4 Retries).
fn backoff_delay(attempt: u32, cfg: &OrchestratorConfig) -> Duration {
    let exp = attempt.saturating_sub(1).min(20);
    let raw = cfg.retry_base_delay_ms.saturating_mul(1u64 << exp);
    let capped = raw.min(cfg.retry_cap_delay_ms);
    let jitter = if cfg.retry_jitter_ms > 0 {
        rand::thread_rng().gen_range(0..=cfg.retry_jitter_ms)
    } else {
        0
    };
    Duration::from_millis(capped.saturating_add(jitter))
}
