//! C4: `EngagementDetector` (spec §4.2).
//!
//! Decides whether a webhook should lead to any pipeline work at all.
//! Grounded on the teacher's inbound-webhook gate
//! (`crates/gateway/src/api/inbound.rs`) generalized from "is this a
//! message the agent should answer" to "is this issue-tracker event
//! directed at the service account" — plus `relay-domain::mentions` for
//! the shared regex (spec §4.2, §8).

use std::sync::Arc;

use relay_domain::conversation::{ConversationMessage, MessageRole};
use relay_domain::integration::Integration;
use relay_domain::mentions::{extract_mentions, mentions_username};

use relay_tracker::{IssueRef, IssueTracker};

/// Input fields lifted straight off the inbound webhook (spec §4.2).
#[derive(Debug, Clone)]
pub struct EngagementRequest {
    pub provider: String,
    pub issue_body: String,
    pub comment_body: String,
    pub discussion_id: Option<String>,
    pub comment_id: Option<String>,
    pub external_project_id: String,
    pub external_issue_iid: String,
    pub triggered_by_username: String,
}

#[derive(Debug, Clone)]
pub struct EngagementResult {
    pub engage: bool,
    pub reason: &'static str,
    /// Present when the detector fetched the thread as part of deciding
    /// (the "authoritative fetcher" rule, spec §4.2) — callers must not
    /// re-fetch when this is `Some`.
    pub discussions: Option<Vec<ConversationMessage>>,
}

pub struct EngagementDetector {
    tracker: Arc<dyn IssueTracker>,
}

impl EngagementDetector {
    pub fn new(tracker: Arc<dyn IssueTracker>) -> Self {
        Self { tracker }
    }

    pub async fn detect(
        &self,
        integration: &Integration,
        req: &EngagementRequest,
    ) -> EngagementResult {
        let service_username = &integration.service_account.username;

        // Rule 1: self-trigger suppression.
        if req
            .triggered_by_username
            .eq_ignore_ascii_case(service_username)
        {
            return EngagementResult {
                engage: false,
                reason: "self_trigger",
                discussions: None,
            };
        }

        // Rule 2: mention, in either the issue body or the comment body.
        let mention_candidate = mentions_username(&req.issue_body, service_username)
            || mentions_username(&req.comment_body, service_username);

        let issue_ref = IssueRef {
            integration_id: integration.id,
            project_id: req.external_project_id.clone(),
            issue_iid: req.external_issue_iid.clone(),
        };

        // Rule 3: in-thread reply, only when a discussion_id is given.
        let mut engage = mention_candidate;
        let mut reason: &'static str = if mention_candidate {
            "mention"
        } else {
            "no_engagement"
        };
        let mut discussions: Option<Vec<ConversationMessage>> = None;

        if let Some(discussion_id) = &req.discussion_id {
            match self.tracker.fetch_discussions(&issue_ref).await {
                Ok(thread) => {
                    let has_prior_self_message = thread.iter().any(|m| {
                        m.role == MessageRole::SelfRole
                            && m.discussion_id.as_deref() == Some(discussion_id.as_str())
                    });
                    if has_prior_self_message {
                        let comment_mentions = extract_mentions(&req.comment_body);
                        let directed_elsewhere = !comment_mentions.is_empty()
                            && !comment_mentions
                                .iter()
                                .any(|m| m.eq_ignore_ascii_case(service_username));
                        if directed_elsewhere {
                            engage = false;
                            reason = "directed_at_others";
                        } else {
                            engage = true;
                            reason = "in_thread_reply";
                        }
                    }
                    discussions = Some(thread);
                }
                Err(err) => {
                    tracing::warn!(
                        integration_id = integration.id,
                        error = %err,
                        "fetch_discussions failed during engagement detection, falling back to mention-only"
                    );
                }
            }
        }

        // "Authoritative fetcher": whenever we're about to engage and
        // haven't already fetched the thread, fetch it now so
        // `EventIngestor` never has to make a redundant call.
        if engage && discussions.is_none() {
            match self.tracker.fetch_discussions(&issue_ref).await {
                Ok(thread) => discussions = Some(thread),
                Err(err) => {
                    tracing::warn!(
                        integration_id = integration.id,
                        error = %err,
                        "authoritative discussion fetch failed, engaging without cached discussions"
                    );
                }
            }
        }

        EngagementResult {
            engage,
            reason,
            discussions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_domain::integration::ServiceAccount;
    use relay_tracker::fake::FakeTracker;

    fn integration() -> Integration {
        Integration {
            id: 1,
            workspace_id: 1,
            provider: "gitlab".into(),
            external_project_id: Some("p1".into()),
            enabled: true,
            service_account: ServiceAccount {
                username: "relay-bot".into(),
                user_id: "999".into(),
            },
        }
    }

    fn base_req() -> EngagementRequest {
        EngagementRequest {
            provider: "gitlab".into(),
            issue_body: String::new(),
            comment_body: String::new(),
            discussion_id: None,
            comment_id: None,
            external_project_id: "p1".into(),
            external_issue_iid: "42".into(),
            triggered_by_username: "alice".into(),
        }
    }

    #[tokio::test]
    async fn self_trigger_is_suppressed_case_insensitively() {
        let tracker = Arc::new(FakeTracker::new());
        let detector = EngagementDetector::new(tracker);
        let mut req = base_req();
        req.triggered_by_username = "Relay-Bot".into();
        let result = detector.detect(&integration(), &req).await;
        assert!(!result.engage);
        assert_eq!(result.reason, "self_trigger");
    }

    #[tokio::test]
    async fn mention_in_issue_body_engages() {
        let tracker = Arc::new(FakeTracker::new());
        let detector = EngagementDetector::new(tracker);
        let mut req = base_req();
        req.issue_body = "Hey @relay-bot please help".into();
        let result = detector.detect(&integration(), &req).await;
        assert!(result.engage);
        assert_eq!(result.reason, "mention");
    }

    #[tokio::test]
    async fn partial_mention_match_does_not_engage() {
        let tracker = Arc::new(FakeTracker::new());
        let detector = EngagementDetector::new(tracker);
        let mut req = base_req();
        req.issue_body = "Hey @relay-bot-admin look at this".into();
        let result = detector.detect(&integration(), &req).await;
        assert!(!result.engage);
    }

    #[tokio::test]
    async fn reply_directed_at_another_user_in_existing_thread_is_suppressed() {
        let tracker = Arc::new(FakeTracker::new());
        tracker.seed_discussions(
            "p1",
            "42",
            vec![relay_domain::conversation::ConversationMessage {
                discussion_id: Some("d1".into()),
                ..relay_domain::conversation::ConversationMessage::new(
                    1,
                    "relay-bot",
                    MessageRole::SelfRole,
                    chrono::Utc::now(),
                    "I have some questions",
                )
            }],
        );
        let detector = EngagementDetector::new(tracker);
        let mut req = base_req();
        req.discussion_id = Some("d1".into());
        req.comment_body = "@alice what do you think?".into();
        let result = detector.detect(&integration(), &req).await;
        assert!(!result.engage);
        assert_eq!(result.reason, "directed_at_others");
    }

    #[tokio::test]
    async fn reply_in_existing_thread_without_other_mentions_engages() {
        let tracker = Arc::new(FakeTracker::new());
        tracker.seed_discussions(
            "p1",
            "42",
            vec![relay_domain::conversation::ConversationMessage {
                discussion_id: Some("d1".into()),
                ..relay_domain::conversation::ConversationMessage::new(
                    1,
                    "relay-bot",
                    MessageRole::SelfRole,
                    chrono::Utc::now(),
                    "I have some questions",
                )
            }],
        );
        let detector = EngagementDetector::new(tracker);
        let mut req = base_req();
        req.discussion_id = Some("d1".into());
        req.comment_body = "Here are the answers".into();
        let result = detector.detect(&integration(), &req).await;
        assert!(result.engage);
        assert_eq!(result.reason, "in_thread_reply");
        assert!(result.discussions.is_some());
    }

    #[tokio::test]
    async fn tracker_failure_falls_back_to_mention_only_without_crashing() {
        let tracker = Arc::new(FakeTracker::new());
        tracker.set_fail_fetch_discussions(true);
        let detector = EngagementDetector::new(tracker);
        let mut req = base_req();
        req.discussion_id = Some("d1".into());
        req.comment_body = "no mentions here".into();
        let result = detector.detect(&integration(), &req).await;
        assert!(!result.engage);
        assert!(result.discussions.is_none());
    }

    #[tokio::test]
    async fn no_mention_and_no_thread_does_not_engage() {
        let tracker = Arc::new(FakeTracker::new());
        let detector = EngagementDetector::new(tracker);
        let req = base_req();
        let result = detector.detect(&integration(), &req).await;
        assert!(!result.engage);
        assert_eq!(result.reason, "no_engagement");
    }
}
