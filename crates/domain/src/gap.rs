use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Four-valued severity taxonomy (spec §9 Open Questions: resolved to the
/// four-valued set everywhere, including the prompt).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Blocking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Respondent {
    Reporter,
    Assignee,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapStatus {
    Open,
    Resolved,
    Skipped,
    ClosedInferred,
    ClosedNotRelevant,
}

impl GapStatus {
    /// Once non-open, status is terminal (spec §3 invariant).
    pub fn is_terminal(self) -> bool {
        !matches!(self, GapStatus::Open)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    Answered,
    Inferred,
    NotRelevant,
}

/// An open question needing a human answer (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gap {
    pub id: i64,
    pub issue_id: i64,
    /// 1-based, unique per issue.
    pub short_id: u32,
    pub question: String,
    pub severity: Severity,
    pub respondent: Respondent,
    pub status: GapStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_note: Option<String>,
    pub comment_ref: Option<String>,
}

impl Gap {
    pub fn is_open(&self) -> bool {
        self.status == GapStatus::Open
    }

    pub fn is_blocking(&self) -> bool {
        self.is_open() && self.severity == Severity::Blocking
    }
}

/// Resolves an action's gap reference (primary id or numeric short_id
/// string, per spec §4.9) against the issue's known gaps.
pub fn resolve_gap_ref<'a>(gaps: &'a [Gap], reference: &str) -> Option<&'a Gap> {
    if let Ok(id) = reference.parse::<i64>() {
        if let Some(g) = gaps.iter().find(|g| g.id == id) {
            return Some(g);
        }
    }
    if let Ok(short_id) = reference.parse::<u32>() {
        return gaps.iter().find(|g| g.short_id == short_id);
    }
    None
}
