//! `PlannerContextBuilder` — assembles the Planner's user message (spec
//! §4.5), a direct generalization of the teacher's
//! `sa_contextpack::builder::ContextPackBuilder` (injecting workspace
//! files) to injecting issue sections (SPEC_FULL §4.5): same
//! per-section + total-char-cap algorithm, same delimited-section
//! format.

use relay_domain::conversation::{render_conversation_xml, ConversationMessage};
use relay_domain::finding::Finding;
use relay_domain::gap::Gap;
use relay_domain::issue::Issue;
use relay_domain::learning::Learning;

use crate::injection::format_section;
use crate::truncation::{apply_total_cap, truncate_per_section, Section};

/// Spec-stub fields injected in lieu of the full spec body (spec §4.5:
/// "never full spec body").
#[derive(Debug, Clone)]
pub struct SpecStub {
    pub path: String,
    pub updated_at: String,
    pub sha256: String,
    /// Caller-supplied 5–15 line summary (produced by `relay-specstore`'s
    /// `Read(ref, mode=summary)`), not read by this crate.
    pub summary: String,
}

pub struct PlannerContextBuilder {
    pub max_per_section_chars: usize,
    pub total_max_chars: usize,
}

impl PlannerContextBuilder {
    pub fn new(max_per_section_chars: usize, total_max_chars: usize) -> Self {
        Self {
            max_per_section_chars,
            total_max_chars,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn build(
        &self,
        issue: &Issue,
        learnings: &[Learning],
        findings: &[Finding],
        open_gaps: &[Gap],
        spec_stub: Option<&SpecStub>,
        conversation: &[ConversationMessage],
    ) -> String {
        let mut sections = Vec::new();
        sections.push(self.section("ISSUE", &format_issue(issue)));
        sections.push(self.section("LEARNINGS", &format_learnings(learnings)));
        sections.push(self.section("FINDINGS", &format_findings(findings)));
        sections.push(self.section("OPEN_GAPS", &format_gaps(open_gaps)));
        if let Some(stub) = spec_stub {
            sections.push(self.section("SPEC_STUB", &format_spec_stub(stub)));
        }
        sections.push(self.section("CONVERSATION", &render_conversation_xml(conversation)));
        sections.push(self.section(
            "LATEST_MESSAGE_FOCUS",
            &format_latest_message_focus(conversation),
        ));

        apply_total_cap(&mut sections, self.total_max_chars);

        let mut out = String::new();
        for section in &sections {
            if section.included {
                out.push_str(&section.content);
                out.push('\n');
            }
        }
        out
    }

    fn section(&self, name: &str, body: &str) -> Section {
        let raw_chars = body.len();
        let (truncated_body, was_truncated) =
            truncate_per_section(body, self.max_per_section_chars);
        Section {
            name: name.to_string(),
            content: format_section(name, &truncated_body),
            raw_chars,
            truncated_per_section: was_truncated,
            truncated_total_cap: false,
            included: true,
        }
    }
}

fn format_issue(issue: &Issue) -> String {
    format!(
        "Title: {}\nDescription:\n{}\nLabels: {}\nAssignees: {}\nReporter: {}\nURL: {}",
        issue.title,
        issue.description,
        issue.labels.join(", "),
        issue.assignees.join(", "),
        issue.reporter,
        issue.external_url,
    )
}

fn format_learnings(learnings: &[Learning]) -> String {
    if learnings.is_empty() {
        return "(none)".to_string();
    }
    learnings
        .iter()
        .map(|l| format!("- [{:?}] {}", l.kind, l.content))
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_findings(findings: &[Finding]) -> String {
    if findings.is_empty() {
        return "(none)".to_string();
    }
    findings
        .iter()
        .map(|f| {
            let locs = f
                .sources
                .iter()
                .map(|s| s.location.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            let core = if f.is_core { " [core]" } else { "" };
            format!("- {}{} ({})", f.synthesis, core, locs)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_gaps(gaps: &[Gap]) -> String {
    if gaps.is_empty() {
        return "(none)".to_string();
    }
    gaps.iter()
        .map(|g| {
            format!(
                "- #{} [{:?}/{:?}] {}",
                g.short_id, g.severity, g.respondent, g.question
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_spec_stub(stub: &SpecStub) -> String {
    format!(
        "path: {}\nupdated_at: {}\nsha256: {}\n---\n{}",
        stub.path, stub.updated_at, stub.sha256, stub.summary
    )
}

fn format_latest_message_focus(conversation: &[ConversationMessage]) -> String {
    conversation
        .last()
        .map(|m| format!("{}: {}", m.author_username, m.content))
        .unwrap_or_else(|| "(no messages yet)".to_string())
}
