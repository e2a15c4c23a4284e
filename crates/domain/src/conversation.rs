use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    Reporter,
    Assignee,
    #[serde(rename = "self")]
    SelfRole,
    Other,
}

/// Provider-agnostic thread message, produced by normalizing whatever
/// shape the `IssueTracker` adapter returns (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    /// 1-based position in the thread.
    pub seq: u32,
    pub author_username: String,
    pub role: MessageRole,
    pub timestamp: DateTime<Utc>,
    pub reply_to_seq: Option<u32>,
    pub content: String,

    /// Set when `author` matches a gap's respondent and `timestamp` falls
    /// inside `[gap.created_at, gap.resolved_at]` (spec §4.8.3).
    #[serde(default)]
    pub answers_gap_id: Option<i64>,
    /// Set when `content` contains a configured proceed phrase.
    #[serde(default)]
    pub is_proceed: bool,

    /// Provider thread/discussion id this message belongs to, if any.
    #[serde(default)]
    pub discussion_id: Option<String>,
}

impl ConversationMessage {
    pub fn new(
        seq: u32,
        author_username: impl Into<String>,
        role: MessageRole,
        timestamp: DateTime<Utc>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            seq,
            author_username: author_username.into(),
            role,
            timestamp,
            reply_to_seq: None,
            content: content.into(),
            answers_gap_id: None,
            is_proceed: false,
            discussion_id: None,
        }
    }
}

/// Renders a conversation into the XML block consumed by the Planner's
/// user message (spec §4.8.3). Kept here (not in `relay-context`) because
/// both the Planner and the SpecGenerator need it and neither should
/// depend on the other.
pub fn render_conversation_xml(messages: &[ConversationMessage]) -> String {
    let mut out = String::from("<conversation>\n");
    for m in messages {
        out.push_str("  <msg n=\"");
        out.push_str(&m.seq.to_string());
        out.push_str("\" author=\"");
        out.push_str(&xml_escape(&m.author_username));
        out.push_str("\" role=\"");
        out.push_str(role_str(m.role));
        out.push_str("\" ts=\"");
        out.push_str(&m.timestamp.to_rfc3339());
        out.push('"');
        if let Some(r) = m.reply_to_seq {
            out.push_str(&format!(" reply_to=\"{r}\""));
        }
        if let Some(g) = m.answers_gap_id {
            out.push_str(&format!(" answers_gap=\"{g}\""));
        }
        if m.is_proceed {
            out.push_str(" is_proceed=\"true\"");
        }
        out.push_str(">\n    ");
        out.push_str(&xml_escape(&m.content));
        out.push_str("\n  </msg>\n");
    }
    out.push_str("</conversation>");
    out
}

fn role_str(r: MessageRole) -> &'static str {
    match r {
        MessageRole::Reporter => "reporter",
        MessageRole::Assignee => "assignee",
        MessageRole::SelfRole => "self",
        MessageRole::Other => "other",
    }
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Annotation heuristics applied at handoff time (spec §4.8.3): mark
/// `answers_gap_id` for messages whose author matches the gap's respondent
/// role and whose timestamp falls in `[created_at, resolved_at]`, and mark
/// `is_proceed` for messages containing a configured proceed phrase
/// (case-insensitive substring).
pub fn annotate_messages(
    messages: &mut [ConversationMessage],
    gaps: &[crate::gap::Gap],
    proceed_phrases: &[String],
) {
    for m in messages.iter_mut() {
        for gap in gaps {
            let respondent_matches = match gap.respondent {
                crate::gap::Respondent::Reporter => m.role == MessageRole::Reporter,
                crate::gap::Respondent::Assignee => m.role == MessageRole::Assignee,
            };
            if !respondent_matches {
                continue;
            }
            let after_created = m.timestamp >= gap.created_at;
            let before_resolved = gap.resolved_at.map(|r| m.timestamp <= r).unwrap_or(true);
            if after_created && before_resolved {
                m.answers_gap_id = Some(gap.id);
                break;
            }
        }
        let lower = m.content.to_lowercase();
        m.is_proceed = proceed_phrases
            .iter()
            .any(|p| lower.contains(&p.to_lowercase()));
    }
}
