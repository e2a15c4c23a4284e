use serde::{Deserialize, Serialize};

/// SpecGenerator budgets (spec §4.11).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecGenConfig {
    #[serde(default = "d_max_explore_calls")]
    pub max_explore_calls: u32,
    #[serde(default = "d_token_budget")]
    pub total_token_budget: u32,
    #[serde(default = "d_max_validation_retries")]
    pub max_validation_retries: u32,
    /// Required `Decision Log` section when inferred complexity is at
    /// least this value (spec §4.11: "complexity-adaptive").
    #[serde(default = "d_decision_log_complexity_threshold")]
    pub decision_log_complexity_threshold: u32,
}

impl Default for SpecGenConfig {
    fn default() -> Self {
        Self {
            max_explore_calls: d_max_explore_calls(),
            total_token_budget: d_token_budget(),
            max_validation_retries: d_max_validation_retries(),
            decision_log_complexity_threshold: d_decision_log_complexity_threshold(),
        }
    }
}

fn d_max_explore_calls() -> u32 {
    2
}
fn d_token_budget() -> u32 {
    80_000
}
fn d_max_validation_retries() -> u32 {
    1
}
fn d_decision_log_complexity_threshold() -> u32 {
    2
}
