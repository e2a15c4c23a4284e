//! C10: `ActionValidator` (spec §4.9).
//!
//! Pure, deterministic validation of a proposed action batch against the
//! issue's current open gaps. No I/O beyond the gap slice the caller
//! already loaded. Grounded on the action taxonomy in `relay-domain`
//! (spec §9 re-architecture strategy: "deep interface hierarchies" →
//! "one tagged variant per action kind with explicit data schemas,
//! validated by a pure function") — there is no teacher analogue because
//! the teacher validates ad hoc inline in handlers.
//!
//! Rules fail on first (spec §4.9), in the order actions were given.

use std::collections::HashSet;

use relay_domain::action::{Action, ActionBatch};
use relay_domain::error::{Error, Result};
use relay_domain::gap::{resolve_gap_ref, CloseReason, Gap, Severity};

const MAX_COMMENT_CHARS: usize = 65_000;
const MAX_SPEC_CHARS: usize = 200_000;

/// Validates the whole batch, failing on the first violation found while
/// scanning actions in order.
pub fn validate_batch(open_gaps: &[Gap], batch: &ActionBatch) -> Result<()> {
    // `ready_for_spec_generation` considers gap closures occurring
    // anywhere in the batch (spec §4.6 ordering note), so this set is
    // computed once up front rather than threaded through as state.
    let closed_in_batch = gap_refs_closed_in_batch(batch);

    for action in &batch.actions {
        validate_action(open_gaps, &closed_in_batch, action)?;
    }
    Ok(())
}

fn validate_action(
    open_gaps: &[Gap],
    closed_in_batch: &HashSet<String>,
    action: &Action,
) -> Result<()> {
    match action {
        Action::PostComment(p) => validate_post_comment(p),
        Action::UpdateGaps(u) => validate_update_gaps(open_gaps, u),
        Action::UpdateFindings(u) => validate_update_findings(u),
        Action::UpdateLearnings(u) => validate_update_learnings(u),
        Action::ReadyForSpecGeneration(r) => {
            validate_ready_for_spec_generation(open_gaps, closed_in_batch, r)
        }
        Action::UpdateSpec(u) => validate_update_spec(u),
    }
}

fn validate_post_comment(p: &relay_domain::action::PostComment) -> Result<()> {
    let len = p.content.chars().count();
    if len == 0 || len > MAX_COMMENT_CHARS {
        return Err(Error::Validation(format!(
            "post_comment.content length {len} outside [1, {MAX_COMMENT_CHARS}]"
        )));
    }
    Ok(())
}

fn validate_update_gaps(
    open_gaps: &[Gap],
    u: &relay_domain::action::UpdateGaps,
) -> Result<()> {
    for new_gap in &u.add {
        if new_gap.question.trim().is_empty() {
            return Err(Error::Validation("update_gaps.add[*].question must be non-empty".into()));
        }
        // severity/respondent are closed enums — already valid by construction.
    }
    for reference in u.resolve.iter().chain(u.skip.iter()) {
        if resolve_gap_ref(open_gaps, reference).is_none() {
            return Err(Error::Validation(format!(
                "update_gaps: unknown gap reference '{reference}'"
            )));
        }
    }
    for close in &u.close {
        if resolve_gap_ref(open_gaps, &close.gap_id).is_none() {
            return Err(Error::Validation(format!(
                "update_gaps.close: unknown gap reference '{}'",
                close.gap_id
            )));
        }
        let note_required = matches!(close.reason, CloseReason::Answered | CloseReason::Inferred);
        let note_present = close.note.as_ref().map(|n| !n.trim().is_empty()).unwrap_or(false);
        if note_required && !note_present {
            return Err(Error::Validation(format!(
                "update_gaps.close[{}]: reason {:?} requires a non-empty note",
                close.gap_id, close.reason
            )));
        }
    }
    Ok(())
}

fn validate_update_findings(u: &relay_domain::action::UpdateFindings) -> Result<()> {
    for f in &u.add {
        if f.synthesis.trim().is_empty() {
            return Err(Error::Validation("update_findings.add[*].synthesis must be non-empty".into()));
        }
        if f.sources.is_empty() {
            return Err(Error::Validation("update_findings.add[*].sources must have length >= 1".into()));
        }
        for s in &f.sources {
            if s.location.trim().is_empty() {
                return Err(Error::Validation("update_findings.add[*].sources[*].location must be non-empty".into()));
            }
        }
    }
    Ok(())
}

fn validate_update_learnings(u: &relay_domain::action::UpdateLearnings) -> Result<()> {
    for l in &u.propose {
        if l.content.trim().is_empty() {
            return Err(Error::Validation("update_learnings.propose[*].content must be non-empty".into()));
        }
        // `kind` is a closed enum — already valid by construction.
    }
    Ok(())
}

fn validate_ready_for_spec_generation(
    open_gaps: &[Gap],
    closed_in_batch: &HashSet<String>,
    r: &relay_domain::action::ReadyForSpecGeneration,
) -> Result<()> {
    let remaining_blocking = open_gaps
        .iter()
        .filter(|g| g.is_blocking())
        .filter(|g| {
            !closed_in_batch.contains(&g.id.to_string())
                && !closed_in_batch.contains(&g.short_id.to_string())
        })
        .count();
    if remaining_blocking > 0 {
        return Err(Error::Validation(format!(
            "ready_for_spec_generation: {remaining_blocking} open blocking gap(s) remain after this batch"
        )));
    }
    if r.closed_gap_ids.is_empty() && r.relevant_finding_ids.is_empty() {
        return Err(Error::Validation(
            "ready_for_spec_generation: at least one of closed_gap_ids or relevant_finding_ids must be non-empty".into(),
        ));
    }
    Ok(())
}

fn validate_update_spec(u: &relay_domain::action::UpdateSpec) -> Result<()> {
    let len = u.content_markdown.chars().count();
    if len == 0 || len > MAX_SPEC_CHARS {
        return Err(Error::Validation(format!(
            "update_spec.content_markdown length {len} outside [1, {MAX_SPEC_CHARS}]"
        )));
    }
    if u.mode != "overwrite" {
        return Err(Error::Validation(format!(
            "update_spec.mode must be 'overwrite', got '{}'",
            u.mode
        )));
    }
    Ok(())
}

/// All gap references (primary id or short_id, as strings) touched by
/// `resolve`/`skip`/`close` anywhere in the batch.
fn gap_refs_closed_in_batch(batch: &ActionBatch) -> HashSet<String> {
    let mut set = HashSet::new();
    for action in &batch.actions {
        if let Action::UpdateGaps(u) = action {
            set.extend(u.resolve.iter().cloned());
            set.extend(u.skip.iter().cloned());
            set.extend(u.close.iter().map(|c| c.gap_id.clone()));
        }
    }
    set
}

/// Severity ordering helper re-exported for callers that need to reason
/// about "at least blocking" without importing `relay_domain::gap` too.
pub fn is_blocking(severity: Severity) -> bool {
    severity == Severity::Blocking
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use relay_domain::action::{
        GapClose, NewFinding, NewGap, PostComment, ReadyForSpecGeneration, UpdateFindings,
        UpdateGaps, UpdateSpec,
    };
    use relay_domain::finding::FindingSource;
    use relay_domain::gap::{GapStatus, Respondent};

    fn gap(id: i64, short_id: u32, severity: Severity, status: GapStatus) -> Gap {
        Gap {
            id,
            issue_id: 1,
            short_id,
            question: "q".into(),
            severity,
            respondent: Respondent::Reporter,
            status,
            created_at: Utc::now(),
            resolved_at: None,
            resolution_note: None,
            comment_ref: None,
        }
    }

    fn batch(actions: Vec<Action>) -> ActionBatch {
        ActionBatch { actions }
    }

    #[test]
    fn empty_comment_is_rejected() {
        let b = batch(vec![Action::PostComment(PostComment {
            content: String::new(),
            reply_to_discussion_id: None,
        })]);
        assert!(validate_batch(&[], &b).is_err());
    }

    #[test]
    fn unknown_gap_reference_is_rejected() {
        let b = batch(vec![Action::UpdateGaps(UpdateGaps {
            resolve: vec!["999".into()],
            ..Default::default()
        })]);
        assert!(validate_batch(&[], &b).is_err());
    }

    #[test]
    fn close_with_answered_reason_requires_note() {
        let open = vec![gap(1, 1, Severity::Low, GapStatus::Open)];
        let b = batch(vec![Action::UpdateGaps(UpdateGaps {
            close: vec![GapClose {
                gap_id: "1".into(),
                reason: CloseReason::Answered,
                note: None,
            }],
            ..Default::default()
        })]);
        assert!(validate_batch(&open, &b).is_err());
    }

    #[test]
    fn close_by_short_id_with_note_succeeds() {
        let open = vec![gap(1, 1, Severity::Low, GapStatus::Open)];
        let b = batch(vec![Action::UpdateGaps(UpdateGaps {
            close: vec![GapClose {
                gap_id: "1".into(),
                reason: CloseReason::Answered,
                note: Some("answered in thread".into()),
            }],
            ..Default::default()
        })]);
        assert!(validate_batch(&open, &b).is_ok());
    }

    #[test]
    fn ready_for_spec_generation_blocked_by_remaining_open_blocking_gap() {
        let open = vec![gap(1, 1, Severity::Blocking, GapStatus::Open)];
        let b = batch(vec![Action::ReadyForSpecGeneration(ReadyForSpecGeneration {
            context_summary: "s".into(),
            closed_gap_ids: vec![],
            relevant_finding_ids: vec![101],
            learnings_applied: vec![],
            proceed_signal: "go ahead".into(),
        })]);
        assert!(validate_batch(&open, &b).is_err());
    }

    #[test]
    fn ready_for_spec_generation_accepts_closure_counted_across_the_batch() {
        let open = vec![gap(1, 1, Severity::Blocking, GapStatus::Open)];
        let b = batch(vec![
            Action::UpdateGaps(UpdateGaps {
                resolve: vec!["1".into()],
                ..Default::default()
            }),
            Action::ReadyForSpecGeneration(ReadyForSpecGeneration {
                context_summary: "s".into(),
                closed_gap_ids: vec![1],
                relevant_finding_ids: vec![],
                learnings_applied: vec![],
                proceed_signal: "go ahead".into(),
            }),
        ]);
        assert!(validate_batch(&open, &b).is_ok());
    }

    #[test]
    fn ready_for_spec_generation_requires_closed_gaps_or_findings() {
        let b = batch(vec![Action::ReadyForSpecGeneration(ReadyForSpecGeneration {
            context_summary: "s".into(),
            closed_gap_ids: vec![],
            relevant_finding_ids: vec![],
            learnings_applied: vec![],
            proceed_signal: "go".into(),
        })]);
        assert!(validate_batch(&[], &b).is_err());
    }

    #[test]
    fn update_findings_requires_at_least_one_source() {
        let b = batch(vec![Action::UpdateFindings(UpdateFindings {
            add: vec![NewFinding {
                synthesis: "x does y".into(),
                sources: vec![],
                is_core: true,
            }],
            drop_all: false,
        })]);
        assert!(validate_batch(&[], &b).is_err());
    }

    #[test]
    fn update_findings_with_source_passes() {
        let b = batch(vec![Action::UpdateFindings(UpdateFindings {
            add: vec![NewFinding {
                synthesis: "x does y".into(),
                sources: vec![FindingSource {
                    location: "src/lib.rs:42".into(),
                    excerpt: None,
                }],
                is_core: true,
            }],
            drop_all: false,
        })]);
        assert!(validate_batch(&[], &b).is_ok());
    }

    #[test]
    fn update_spec_requires_overwrite_mode() {
        let b = batch(vec![Action::UpdateSpec(UpdateSpec {
            content_markdown: "# spec".into(),
            reason: "initial draft".into(),
            mode: "patch".into(),
        })]);
        assert!(validate_batch(&[], &b).is_err());
    }

    #[test]
    fn new_gap_with_empty_question_is_rejected() {
        let b = batch(vec![Action::UpdateGaps(UpdateGaps {
            add: vec![NewGap {
                question: "   ".into(),
                severity: Severity::High,
                respondent: Respondent::Assignee,
            }],
            ..Default::default()
        })]);
        assert!(validate_batch(&[], &b).is_err());
    }
}
