//! An in-memory `IssueTracker` fake, the way the teacher hand-writes
//! trait mocks for `LlmProvider`/`SerialMemoryProvider` substitutes in
//! tests (SPEC_FULL §1.1) rather than pulling in a mocking framework.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use relay_domain::conversation::ConversationMessage;
use relay_domain::error::Error;
use relay_domain::Result;

use crate::{
    CreateDiscussionRequest, IssueRef, IssueTracker, PostedComment, Reaction,
    ReplyToThreadRequest, TrackerIssue,
};

#[derive(Default)]
struct State {
    issues: HashMap<(String, String), TrackerIssue>,
    discussions: HashMap<(String, String), Vec<ConversationMessage>>,
    next_comment_id: u64,
    fail_fetch_discussions: bool,
}

/// Hand-written fake tracker: seed issues/discussions, optionally force
/// `fetch_discussions` to fail so callers can exercise the "preserve
/// prior cache on retryable failure" rule (spec §4.1 step 4).
pub struct FakeTracker {
    state: Mutex<State>,
}

impl Default for FakeTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeTracker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    pub fn seed_issue(&self, project_id: &str, issue_iid: &str, issue: TrackerIssue) {
        let mut st = self.state.lock();
        st.issues
            .insert((project_id.to_string(), issue_iid.to_string()), issue);
    }

    pub fn seed_discussions(
        &self,
        project_id: &str,
        issue_iid: &str,
        messages: Vec<ConversationMessage>,
    ) {
        let mut st = self.state.lock();
        st.discussions
            .insert((project_id.to_string(), issue_iid.to_string()), messages);
    }

    pub fn set_fail_fetch_discussions(&self, fail: bool) {
        self.state.lock().fail_fetch_discussions = fail;
    }

    pub fn posted_comments(&self, project_id: &str, issue_iid: &str) -> Vec<ConversationMessage> {
        self.state
            .lock()
            .discussions
            .get(&(project_id.to_string(), issue_iid.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    fn key(issue: &IssueRef) -> (String, String) {
        (issue.project_id.clone(), issue.issue_iid.clone())
    }
}

#[async_trait]
impl IssueTracker for FakeTracker {
    async fn fetch_issue(&self, issue: &IssueRef) -> Result<TrackerIssue> {
        let st = self.state.lock();
        st.issues
            .get(&Self::key(issue))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("issue {}/{}", issue.project_id, issue.issue_iid)))
    }

    async fn fetch_discussions(&self, issue: &IssueRef) -> Result<Vec<ConversationMessage>> {
        let st = self.state.lock();
        if st.fail_fetch_discussions {
            return Err(Error::ProviderTransient {
                provider: "fake".into(),
                message: "simulated fetch failure".into(),
            });
        }
        Ok(st
            .discussions
            .get(&Self::key(issue))
            .cloned()
            .unwrap_or_default())
    }

    async fn create_discussion(&self, req: CreateDiscussionRequest) -> Result<PostedComment> {
        let mut st = self.state.lock();
        st.next_comment_id += 1;
        let comment_id = st.next_comment_id.to_string();
        let discussion_id = format!("disc-{comment_id}");
        let seq = st
            .discussions
            .get(&Self::key(&req.issue))
            .map(|v| v.len() as u32 + 1)
            .unwrap_or(1);
        let msg = ConversationMessage {
            discussion_id: Some(discussion_id.clone()),
            ..ConversationMessage::new(
                seq,
                "relay-bot",
                relay_domain::conversation::MessageRole::SelfRole,
                chrono::Utc::now(),
                req.content,
            )
        };
        st.discussions
            .entry(Self::key(&req.issue))
            .or_default()
            .push(msg);
        Ok(PostedComment {
            discussion_id,
            comment_id,
        })
    }

    async fn reply_to_thread(&self, req: ReplyToThreadRequest) -> Result<PostedComment> {
        let mut st = self.state.lock();
        st.next_comment_id += 1;
        let comment_id = st.next_comment_id.to_string();
        let seq = st
            .discussions
            .get(&Self::key(&req.issue))
            .map(|v| v.len() as u32 + 1)
            .unwrap_or(1);
        let msg = ConversationMessage {
            discussion_id: Some(req.discussion_id.clone()),
            ..ConversationMessage::new(
                seq,
                "relay-bot",
                relay_domain::conversation::MessageRole::SelfRole,
                chrono::Utc::now(),
                req.content,
            )
        };
        st.discussions
            .entry(Self::key(&req.issue))
            .or_default()
            .push(msg);
        Ok(PostedComment {
            discussion_id: req.discussion_id,
            comment_id,
        })
    }

    async fn add_reaction(&self, _issue: &IssueRef, _reaction: Reaction) -> Result<()> {
        Ok(())
    }

    async fn is_reply_to_user(&self, issue: &IssueRef, discussion_id: &str) -> Result<bool> {
        let st = self.state.lock();
        Ok(st
            .discussions
            .get(&Self::key(issue))
            .map(|msgs| {
                msgs.iter().any(|m| {
                    m.role == relay_domain::conversation::MessageRole::SelfRole
                        && m.discussion_id.as_deref() == Some(discussion_id)
                })
            })
            .unwrap_or(false))
    }
}
