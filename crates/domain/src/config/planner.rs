use serde::{Deserialize, Serialize};

/// Planner loop budgets (spec §4.5: `N_planner` default 8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    #[serde(default = "d_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "d_token_budget")]
    pub total_token_budget: u32,
    /// Max chars of a finding excerpt kept in context by default (elided
    /// unless `read_spec` or an explicit action references it).
    #[serde(default = "d_read_spec_max_chars")]
    pub read_spec_default_max_chars: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_iterations: d_max_iterations(),
            total_token_budget: d_token_budget(),
            read_spec_default_max_chars: d_read_spec_max_chars(),
        }
    }
}

fn d_max_iterations() -> u32 {
    8
}
fn d_token_budget() -> u32 {
    60_000
}
fn d_read_spec_max_chars() -> usize {
    4_000
}
