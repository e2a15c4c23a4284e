use serde::{Deserialize, Serialize};

/// ExploreAgent budgets (spec §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExploreConfig {
    #[serde(default = "d_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "d_soft_token_ceiling")]
    pub soft_token_ceiling: u32,
    #[serde(default = "d_hard_token_ceiling")]
    pub hard_token_ceiling: u32,
    /// Per-tool output truncation limit in bytes.
    #[serde(default = "d_tool_output_byte_limit")]
    pub tool_output_byte_limit: usize,
    /// Read-only commands the `bash` tool may invoke.
    #[serde(default = "d_allowlisted_commands")]
    pub allowlisted_commands: Vec<String>,
}

impl Default for ExploreConfig {
    fn default() -> Self {
        Self {
            max_iterations: d_max_iterations(),
            soft_token_ceiling: d_soft_token_ceiling(),
            hard_token_ceiling: d_hard_token_ceiling(),
            tool_output_byte_limit: d_tool_output_byte_limit(),
            allowlisted_commands: d_allowlisted_commands(),
        }
    }
}

fn d_max_iterations() -> u32 {
    20
}
fn d_soft_token_ceiling() -> u32 {
    40_000
}
fn d_hard_token_ceiling() -> u32 {
    50_000
}
fn d_tool_output_byte_limit() -> usize {
    8_000
}
fn d_allowlisted_commands() -> Vec<String> {
    ["git", "ls", "cat", "rg", "find", "sed", "head", "tail", "wc"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
