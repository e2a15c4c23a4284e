//! Structured trace events emitted across the pipeline.
//!
//! One JSON line per pipeline milestone, the way the rest of the stack
//! logs: a single tagged enum, serialized and handed to `tracing` at
//! `info` level so downstream log processors can key on `event`.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    EventIngested {
        issue_id: i64,
        dedupe_key: String,
        event_published: bool,
        duplicated: bool,
        issue_picked_up: bool,
    },
    EngagementDecided {
        integration_id: i64,
        engage: bool,
        reason: String,
    },
    IssueClaimed {
        issue_id: i64,
        attempt: u32,
    },
    IssueReleased {
        issue_id: i64,
        status: String,
    },
    PlannerTurnFinished {
        issue_id: i64,
        iterations: u32,
        actions: usize,
        prompt_tokens: u32,
        completion_tokens: u32,
    },
    ExploreTurnFinished {
        issue_id: i64,
        iterations: u32,
        prompt_tokens: u32,
        completion_tokens: u32,
        budget_exhausted: bool,
    },
    ActionExecuted {
        issue_id: i64,
        kind: String,
        ok: bool,
    },
    SpecWritten {
        issue_id: i64,
        sha256: String,
        path: String,
    },
    StuckClaimReclaimed {
        issue_id: i64,
        claimed_for_ms: i64,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "relay_event");
    }
}
