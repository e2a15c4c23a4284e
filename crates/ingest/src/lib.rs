//! C5: `EventIngestor` (spec §4.1).
//!
//! Grounded on the teacher's inbound-webhook handler
//! (`crates/gateway/src/api/inbound.rs`, its `DedupeStore` idea)
//! generalized from "dedupe one session's messages" to "dedupe one
//! issue's webhook events and serialize them onto a per-issue queue".

use std::collections::BTreeMap;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use relay_domain::error::{Error, Result};
use relay_domain::event_log::EventEnvelope;
use relay_domain::issue::Issue;
use relay_domain::trace::TraceEvent;

use relay_engagement::{EngagementDetector, EngagementRequest};
use relay_queue::{IssueQueue, NewQueueMessage};
use relay_stores::traits::{EventLogInsertOutcome, IssueUpsert, NewEventLog, Stores};
use relay_tracker::{IssueRef, IssueTracker};

/// Canonical input (spec §4.1): whatever the provider-specific webhook
/// decoder produces, normalized to this shape before it reaches the core.
#[derive(Debug, Clone)]
pub struct IngestParams {
    pub integration_id: i64,
    pub workspace_id: i64,
    pub external_issue_id: String,
    pub external_project_id: String,
    pub provider: String,
    pub event_type: String,
    pub triggered_by_username: String,
    pub issue_body: String,
    pub comment_body: String,
    pub discussion_id: Option<String>,
    pub comment_id: Option<String>,
    pub payload: serde_json::Value,
    pub external_event_id: Option<String>,
    /// Caller-supplied dedupe key, takes priority over the derived one.
    pub dedupe_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub event_log_id: Option<i64>,
    pub issue: Option<Issue>,
    pub dedupe_key: String,
    pub event_published: bool,
    pub issue_picked_up: bool,
    pub duplicated: bool,
}

impl IngestOutcome {
    fn skipped(dedupe_key: String) -> Self {
        Self {
            event_log_id: None,
            issue: None,
            dedupe_key,
            event_published: false,
            issue_picked_up: false,
            duplicated: false,
        }
    }
}

pub struct EventIngestor<S: Stores> {
    stores: Arc<S>,
    tracker: Arc<dyn IssueTracker>,
    queue: Arc<dyn IssueQueue>,
    detector: EngagementDetector,
}

impl<S: Stores> EventIngestor<S> {
    pub fn new(stores: Arc<S>, tracker: Arc<dyn IssueTracker>, queue: Arc<dyn IssueQueue>) -> Self {
        let detector = EngagementDetector::new(tracker.clone());
        Self {
            stores,
            tracker,
            queue,
            detector,
        }
    }

    pub async fn ingest(&self, params: IngestParams) -> Result<IngestOutcome> {
        let integration = relay_stores::traits::IntegrationStore::get(
            &*self.stores,
            params.integration_id,
        )
        .await?
        .ok_or(Error::IntegrationNotFound(params.integration_id))?;
        if !integration.enabled {
            return Err(Error::IntegrationDisabled(params.integration_id));
        }

        let dedupe_key = compute_dedupe_key(&params);

        let engagement_req = EngagementRequest {
            provider: params.provider.clone(),
            issue_body: params.issue_body.clone(),
            comment_body: params.comment_body.clone(),
            discussion_id: params.discussion_id.clone(),
            comment_id: params.comment_id.clone(),
            external_project_id: params.external_project_id.clone(),
            external_issue_iid: params.external_issue_id.clone(),
            triggered_by_username: params.triggered_by_username.clone(),
        };

        let already_known = relay_stores::traits::IssueStore::get_by_external(
            &*self.stores,
            params.integration_id,
            &params.external_issue_id,
        )
        .await?
        .is_some();

        let engagement = self.detector.detect(&integration, &engagement_req).await;
        TraceEvent::EngagementDecided {
            integration_id: params.integration_id,
            engage: engagement.engage,
            reason: engagement.reason.to_string(),
        }
        .emit();

        if !(already_known || engagement.engage) {
            return Ok(IngestOutcome::skipped(dedupe_key));
        }

        let issue_ref = IssueRef {
            integration_id: params.integration_id,
            project_id: params.external_project_id.clone(),
            issue_iid: params.external_issue_id.clone(),
        };
        let tracker_issue = self.tracker.fetch_issue(&issue_ref).await?;

        let upsert = IssueUpsert {
            integration_id: params.integration_id,
            workspace_id: params.workspace_id,
            external_issue_id: params.external_issue_id.clone(),
            external_project_id: params.external_project_id.clone(),
            provider: params.provider.clone(),
            title: tracker_issue.title,
            description: tracker_issue.description,
            labels: tracker_issue.labels,
            assignees: tracker_issue.assignees,
            reporter: tracker_issue.reporter,
            external_url: tracker_issue.external_url,
        };

        // `EventLog.payload` is opaque per spec §3, but we wrap it in an
        // envelope carrying the engagement-relevant fields so the
        // Orchestrator can re-run `EngagementDetector` per pending event
        // (spec §4.4 step 3) without a second tracker call.
        let envelope = EventEnvelope {
            provider: params.provider.clone(),
            triggered_by_username: params.triggered_by_username.clone(),
            issue_body: params.issue_body.clone(),
            comment_body: params.comment_body.clone(),
            discussion_id: params.discussion_id.clone(),
            comment_id: params.comment_id.clone(),
            external_project_id: params.external_project_id.clone(),
            external_issue_iid: params.external_issue_id.clone(),
            raw: params.payload.clone(),
        };
        let new_event_log = NewEventLog {
            issue_id: 0, // filled in inside the transaction, see below
            workspace_id: params.workspace_id,
            event_type: params.event_type.clone(),
            payload: serde_json::to_value(&envelope)?,
            external_id: params.external_event_id.clone(),
            dedupe_key: dedupe_key.clone(),
        };

        let (issue, event_log, cas_queued) = self
            .stores
            .run_txn(move |txn| {
                Box::pin(async move {
                    let issue = txn.upsert_issue(upsert).await?;
                    let mut new_event_log = new_event_log;
                    new_event_log.issue_id = issue.id;
                    let event_log: EventLogInsertOutcome =
                        txn.insert_event_log(new_event_log).await?;
                    let cas_queued = if event_log.is_some() {
                        txn.try_set_queued_if_idle(issue.id).await?
                    } else {
                        false
                    };
                    Ok((issue, event_log, cas_queued))
                })
            })
            .await?;

        let duplicated = event_log.is_none();
        let event_published = event_log.is_some();
        let issue_picked_up = cas_queued;

        if event_published && cas_queued {
            if let Some(log) = &event_log {
                self.queue
                    .enqueue(NewQueueMessage {
                        issue_id: issue.id,
                        event_log_id: log.id,
                        attempt: 1,
                        trace_id: None,
                    })
                    .await?;
            }
        }

        TraceEvent::EventIngested {
            issue_id: issue.id,
            dedupe_key: dedupe_key.clone(),
            event_published,
            duplicated,
            issue_picked_up,
        }
        .emit();

        Ok(IngestOutcome {
            event_log_id: event_log.map(|e| e.id),
            issue: Some(issue),
            dedupe_key,
            event_published,
            issue_picked_up,
            duplicated,
        })
    }
}

/// Dedupe key derivation (spec §4.1 step 2): caller-supplied key wins;
/// else `source:event_type:external_event_id`; else a sha256 over
/// canonical JSON of `{source, event_type, external_issue_id, payload}`.
/// "Canonical" = sorted keys, achieved via a `BTreeMap` intermediate
/// (SPEC_FULL §4.1).
fn compute_dedupe_key(params: &IngestParams) -> String {
    if let Some(k) = &params.dedupe_key {
        return k.clone();
    }
    if let Some(ext_id) = &params.external_event_id {
        return format!("{}:{}:{}", params.provider, params.event_type, ext_id);
    }
    let mut canonical = BTreeMap::new();
    canonical.insert("source", serde_json::Value::String(params.provider.clone()));
    canonical.insert(
        "event_type",
        serde_json::Value::String(params.event_type.clone()),
    );
    canonical.insert(
        "external_issue_id",
        serde_json::Value::String(params.external_issue_id.clone()),
    );
    canonical.insert("payload", params.payload.clone());
    let json = serde_json::to_string(&canonical).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    format!("{}:{}:{}", params.provider, params.event_type, hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_domain::integration::{Integration, ServiceAccount};
    use relay_queue::InMemoryQueue;
    use relay_stores::mem::MemStores;
    use relay_tracker::fake::FakeTracker;
    use relay_tracker::TrackerIssue;

    fn tracker_issue() -> TrackerIssue {
        TrackerIssue {
            external_issue_id: "42".into(),
            external_project_id: "p1".into(),
            provider: "gitlab".into(),
            title: "Fix the thing".into(),
            description: "It's broken".into(),
            labels: vec![],
            assignees: vec![],
            reporter: "alice".into(),
            external_url: "https://example.com/p1/42".into(),
        }
    }

    async fn setup() -> (Arc<MemStores>, Arc<FakeTracker>, Arc<InMemoryQueue>) {
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
                    user_id: "999".into(),
                },
            })
            .await;
        let tracker = Arc::new(FakeTracker::new());
        tracker.seed_issue("p1", "42", tracker_issue());
        let queue = Arc::new(InMemoryQueue::new());
        (stores, tracker, queue)
    }

    fn params(mention: bool) -> IngestParams {
        IngestParams {
            integration_id: 1,
            workspace_id: 1,
            external_issue_id: "42".into(),
            external_project_id: "p1".into(),
            provider: "gitlab".into(),
            event_type: "issue.comment".into(),
            triggered_by_username: "alice".into(),
            issue_body: if mention {
                "Hey @relay-bot please help".into()
            } else {
                "no mentions".into()
            },
            comment_body: String::new(),
            discussion_id: None,
            comment_id: None,
            payload: serde_json::json!({"n": 1}),
            external_event_id: Some("evt-1".into()),
            dedupe_key: None,
        }
    }

    #[tokio::test]
    async fn engaging_event_publishes_and_enqueues() {
        let (stores, tracker, queue) = setup().await;
        let ingestor = EventIngestor::new(stores, tracker, queue.clone());
        let outcome = ingestor.ingest(params(true)).await.unwrap();
        assert!(outcome.event_published);
        assert!(!outcome.duplicated);
        assert!(outcome.issue_picked_up);
        assert_eq!(queue.pending_len().await, 1);
    }

    #[tokio::test]
    async fn non_engaging_event_on_unknown_issue_is_skipped() {
        let (stores, tracker, queue) = setup().await;
        let ingestor = EventIngestor::new(stores, tracker, queue.clone());
        let outcome = ingestor.ingest(params(false)).await.unwrap();
        assert!(!outcome.event_published);
        assert_eq!(queue.pending_len().await, 0);
    }

    #[tokio::test]
    async fn duplicate_webhook_is_deduped() {
        let (stores, tracker, queue) = setup().await;
        let ingestor = EventIngestor::new(stores, tracker, queue.clone());
        let first = ingestor.ingest(params(true)).await.unwrap();
        assert!(first.event_published);
        assert!(!first.duplicated);

        let second = ingestor.ingest(params(true)).await.unwrap();
        assert!(!second.event_published);
        assert!(second.duplicated);
        // Queue only got the one message from the first publish.
        assert_eq!(queue.pending_len().await, 1);
    }

    #[tokio::test]
    async fn self_triggered_event_never_publishes() {
        let (stores, tracker, queue) = setup().await;
        let ingestor = EventIngestor::new(stores, tracker, queue.clone());
        let mut p = params(true);
        p.triggered_by_username = "relay-bot".into();
        p.external_event_id = Some("evt-2".into());
        let outcome = ingestor.ingest(p).await.unwrap();
        assert!(!outcome.event_published);
    }

    #[tokio::test]
    async fn disabled_integration_is_rejected() {
        let (stores, tracker, queue) = setup().await;
        stores
            .seed_integration(Integration {
                id: 1,
                workspace_id: 1,
                provider: "gitlab".into(),
                external_project_id: Some("p1".into()),
                enabled: false,
                service_account: ServiceAccount {
                    username: "relay-bot".into(),
                    user_id: "999".into(),
                },
            })
            .await;
        let ingestor = EventIngestor::new(stores, tracker, queue);
        let err = ingestor.ingest(params(true)).await.unwrap_err();
        assert!(matches!(err, Error::IntegrationDisabled(1)));
    }
}
