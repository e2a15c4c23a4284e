//! C3: the abstract `IssueTracker` provider interface (spec §4.13).
//!
//! The core only ever sees this trait — GitLab/GitHub/Linear/Jira
//! adapters are out of scope (spec §1) and would each live in their own
//! crate implementing it. `relay-domain::Error::ProviderTransient` /
//! `ProviderFatal` carry the retryability contract from spec §4.13:
//! transient network/5xx is retryable, 4xx other than 404 is fatal, a
//! 404 on a referenced issue is fatal.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use relay_domain::conversation::ConversationMessage;
use relay_domain::Result;

pub mod fake;

/// Coordinates naming an issue on a provider (spec §6).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IssueRef {
    pub integration_id: i64,
    pub project_id: String,
    pub issue_iid: String,
}

/// Tracker-side issue metadata, as returned by `FetchIssue` (spec §4.13).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerIssue {
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
pub struct CreateDiscussionRequest {
    pub issue: IssueRef,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct ReplyToThreadRequest {
    pub issue: IssueRef,
    pub discussion_id: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct PostedComment {
    pub discussion_id: String,
    pub comment_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction {
    ThumbsUp,
    Eyes,
}

/// C3: the core's only view of a provider (spec §4.13). Every method
/// carries `IssueRef` coordinates rather than a provider-specific id
/// shape, so one implementation per provider can satisfy it without
/// the core depending on provider SDKs.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    async fn fetch_issue(&self, issue: &IssueRef) -> Result<TrackerIssue>;

    /// MUST paginate exhaustively (spec §4.13) — callers get the full
    /// thread in one call, not a page.
    async fn fetch_discussions(&self, issue: &IssueRef) -> Result<Vec<ConversationMessage>>;

    async fn create_discussion(&self, req: CreateDiscussionRequest) -> Result<PostedComment>;

    async fn reply_to_thread(&self, req: ReplyToThreadRequest) -> Result<PostedComment>;

    async fn add_reaction(&self, issue: &IssueRef, reaction: Reaction) -> Result<()>;

    /// Cheap probe for engagement (spec §4.13): has `service_account`
    /// already posted in `discussion_id`?
    async fn is_reply_to_user(&self, issue: &IssueRef, discussion_id: &str) -> Result<bool>;
}
