use serde::{Deserialize, Serialize};

/// Orchestrator + janitor knobs (spec §4.4, §5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Concurrency bound across issues (spec §9 Open Questions, resolved:
    /// a configurable bound, no per-workspace fairness).
    #[serde(default = "d_max_concurrent")]
    pub max_concurrent_issues: u32,

    /// A `claimed` row older than this is reclaimable by the janitor.
    #[serde(default = "d_stuck_secs")]
    pub stuck_duration_secs: i64,

    /// A `queued`-but-never-claimed row older than this is reset to `idle`.
    #[serde(default = "d_queued_stuck_secs")]
    pub queued_stuck_duration_secs: i64,

    /// How often the janitor sweeps.
    #[serde(default = "d_janitor_interval_secs")]
    pub janitor_interval_secs: u64,

    /// Hard per-turn wall clock budget.
    #[serde(default = "d_turn_budget_ms")]
    pub turn_wall_clock_budget_ms: u64,

    /// Retry backoff: `delay = min(base * 2^(attempt-1), cap)` + jitter.
    #[serde(default = "d_retry_base_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "d_retry_cap_ms")]
    pub retry_cap_delay_ms: u64,
    #[serde(default = "d_retry_jitter_ms")]
    pub retry_jitter_ms: u64,

    /// Per-issue rate limit on error comments (spec §7: "rate-limited per issue").
    #[serde(default = "d_error_comment_cooldown_secs")]
    pub error_comment_cooldown_secs: i64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_issues: d_max_concurrent(),
            stuck_duration_secs: d_stuck_secs(),
            queued_stuck_duration_secs: d_queued_stuck_secs(),
            janitor_interval_secs: d_janitor_interval_secs(),
            turn_wall_clock_budget_ms: d_turn_budget_ms(),
            retry_base_delay_ms: d_retry_base_ms(),
            retry_cap_delay_ms: d_retry_cap_ms(),
            retry_jitter_ms: d_retry_jitter_ms(),
            error_comment_cooldown_secs: d_error_comment_cooldown_secs(),
        }
    }
}

fn d_max_concurrent() -> u32 {
    8
}
fn d_stuck_secs() -> i64 {
    300
}
fn d_queued_stuck_secs() -> i64 {
    1800
}
fn d_janitor_interval_secs() -> u64 {
    30
}
fn d_turn_budget_ms() -> u64 {
    120_000
}
fn d_retry_base_ms() -> u64 {
    2_000
}
fn d_retry_cap_ms() -> u64 {
    300_000
}
fn d_retry_jitter_ms() -> u64 {
    500
}
fn d_error_comment_cooldown_secs() -> i64 {
    600
}
