use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalStage {
    Planner,
    Explore,
    SpecGenerator,
    Keywords,
}

/// Observability record per LLM call (spec §3). Used for evaluation only,
/// never read back by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmEval {
    pub id: i64,
    pub stage: EvalStage,
    pub issue_id: i64,
    pub workspace_id: i64,
    pub input_excerpt: String,
    pub output_excerpt: String,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub latency_ms: u64,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}
