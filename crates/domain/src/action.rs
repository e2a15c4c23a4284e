//! Planner action taxonomy (spec §4.6).
//!
//! One tagged variant per action kind, each with its own explicit schema —
//! the re-architecture strategy in spec §9 ("deep interface hierarchies" →
//! "one tagged variant per action kind with explicit data schemas").
//! `ActionValidator` and `ActionExecutor` both match over this enum
//! exhaustively; adding a new action kind is a compile error until both
//! are updated.

use serde::{Deserialize, Serialize};

use crate::gap::{CloseReason, Respondent, Severity};
use crate::learning::LearningType;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    PostComment(PostComment),
    UpdateGaps(UpdateGaps),
    UpdateFindings(UpdateFindings),
    UpdateLearnings(UpdateLearnings),
    ReadyForSpecGeneration(ReadyForSpecGeneration),
    UpdateSpec(UpdateSpec),
}

impl Action {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Action::PostComment(_) => "post_comment",
            Action::UpdateGaps(_) => "update_gaps",
            Action::UpdateFindings(_) => "update_findings",
            Action::UpdateLearnings(_) => "update_learnings",
            Action::ReadyForSpecGeneration(_) => "ready_for_spec_generation",
            Action::UpdateSpec(_) => "update_spec",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostComment {
    pub content: String,
    #[serde(default)]
    pub reply_to_discussion_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewGap {
    pub question: String,
    pub severity: Severity,
    pub respondent: Respondent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GapClose {
    pub gap_id: String,
    pub reason: CloseReason,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateGaps {
    #[serde(default)]
    pub add: Vec<NewGap>,
    #[serde(default)]
    pub resolve: Vec<String>,
    #[serde(default)]
    pub skip: Vec<String>,
    #[serde(default)]
    pub close: Vec<GapClose>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFinding {
    pub synthesis: String,
    pub sources: Vec<crate::finding::FindingSource>,
    #[serde(default)]
    pub is_core: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateFindings {
    #[serde(default)]
    pub add: Vec<NewFinding>,
    /// See spec §9 Open Questions: resolved as "replace the `is_core` subset".
    #[serde(default)]
    pub drop_all: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedLearning {
    #[serde(rename = "type")]
    pub kind: LearningType,
    pub content: String,
    pub source_context: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateLearnings {
    #[serde(default)]
    pub propose: Vec<ProposedLearning>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyForSpecGeneration {
    pub context_summary: String,
    #[serde(default)]
    pub closed_gap_ids: Vec<i64>,
    #[serde(default)]
    pub relevant_finding_ids: Vec<i64>,
    #[serde(default)]
    pub learnings_applied: Vec<i64>,
    pub proceed_signal: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateSpec {
    pub content_markdown: String,
    pub reason: String,
    pub mode: String,
}

/// The batch returned by `submit_actions` / the Planner's final turn.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ActionBatch {
    pub actions: Vec<Action>,
}
