//! C8: `ExploreAgent` (spec §4.7).
//!
//! Directly grounded on the teacher's `runtime::agent::run_agent`
//! (fresh session, bounded turn, drains events, returns final text)
//! composed with `runtime::tools::dispatch_tool`'s dispatch-by-name
//! pattern (SPEC_FULL §4.7) — here a synchronous loop rather than an
//! event channel, since explore runs inline within a single Planner
//! tool call (spec §5: "no fan-out").

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use relay_domain::config::ExploreConfig;
use relay_domain::llm_eval::{EvalStage, LlmEval};
use relay_domain::{Error, Result};
use relay_llm::{ChatRequest, FinishReason, LlmClient, Message, ToolCall, ToolDefinition};

use crate::code_graph::CodeGraph;
use crate::tools;

pub struct ExploreReport {
    pub report: String,
    pub iterations: u32,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub budget_exhausted: bool,
    /// One row per LLM call (spec §4.7), left unpersisted — the caller
    /// (`relay-planner`) owns the store handle and writes these through
    /// its own transaction.
    pub llm_evals: Vec<LlmEval>,
}

pub struct ExploreAgent {
    llm: Arc<dyn LlmClient>,
    code_graph: Arc<dyn CodeGraph>,
    config: ExploreConfig,
    workspace_root: PathBuf,
}

impl ExploreAgent {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        code_graph: Arc<dyn CodeGraph>,
        config: ExploreConfig,
        workspace_root: PathBuf,
    ) -> Self {
        Self {
            llm,
            code_graph,
            config,
            workspace_root,
        }
    }

    fn tool_defs(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition {
                name: "grep".into(),
                description: "Regex search across files under the workspace root.".into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "additionalProperties": false,
                    "properties": {
                        "pattern": {"type": "string"},
                        "path": {"type": "string"}
                    },
                    "required": ["pattern"]
                }),
            },
            ToolDefinition {
                name: "glob".into(),
                description: "List relative paths matching a */**/? glob pattern.".into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "additionalProperties": false,
                    "properties": {"pattern": {"type": "string"}},
                    "required": ["pattern"]
                }),
            },
            ToolDefinition {
                name: "read_file".into(),
                description: "Read a file relative to the workspace root.".into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "additionalProperties": false,
                    "properties": {"path": {"type": "string"}},
                    "required": ["path"]
                }),
            },
            ToolDefinition {
                name: "bash".into(),
                description: "Run a read-only, allowlisted shell command.".into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "additionalProperties": false,
                    "properties": {"command": {"type": "string"}},
                    "required": ["command"]
                }),
            },
            ToolDefinition {
                name: "code_graph".into(),
                description: "Query the read-only code-graph retrieval index.".into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "additionalProperties": false,
                    "properties": {"query": {"type": "string"}},
                    "required": ["query"]
                }),
            },
            ToolDefinition {
                name: "submit_report".into(),
                description: "Terminates the session with a synthesized markdown report.".into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "additionalProperties": false,
                    "properties": {"report": {"type": "string"}},
                    "required": ["report"]
                }),
            },
        ]
    }

    /// Runs one exploration session against a fresh context window —
    /// the session's token usage never pollutes the caller's own LLM
    /// loop (spec §4.7).
    pub async fn run(&self, query: &str, issue_id: i64, workspace_id: i64) -> Result<ExploreReport> {
        let tool_defs = self.tool_defs();
        let mut messages = vec![
            Message::system(SYSTEM_PROMPT),
            Message::user(query.to_string()),
        ];

        let mut iterations: u32 = 0;
        let mut total_prompt_tokens: u32 = 0;
        let mut total_completion_tokens: u32 = 0;
        let mut llm_evals = Vec::new();
        let mut last_text = String::new();

        loop {
            if iterations >= self.config.max_iterations {
                return Ok(ExploreReport {
                    report: fallback_report(&last_text, "iteration limit reached"),
                    iterations,
                    prompt_tokens: total_prompt_tokens,
                    completion_tokens: total_completion_tokens,
                    budget_exhausted: true,
                    llm_evals,
                });
            }
            let total_so_far = total_prompt_tokens + total_completion_tokens;
            if total_so_far >= self.config.hard_token_ceiling {
                return Ok(ExploreReport {
                    report: fallback_report(&last_text, "hard token ceiling reached"),
                    iterations,
                    prompt_tokens: total_prompt_tokens,
                    completion_tokens: total_completion_tokens,
                    budget_exhausted: true,
                    llm_evals,
                });
            }
            if total_so_far >= self.config.soft_token_ceiling {
                tracing::warn!(
                    issue_id,
                    total_so_far,
                    ceiling = self.config.soft_token_ceiling,
                    "explore agent crossed soft token ceiling"
                );
            }

            iterations += 1;
            let started = Instant::now();
            let response = self
                .llm
                .chat_with_tools(ChatRequest {
                    messages: messages.clone(),
                    tools: tool_defs.clone(),
                    model: None,
                    temperature: None,
                    max_tokens: None,
                })
                .await?;
            let latency_ms = started.elapsed().as_millis() as u64;

            total_prompt_tokens += response.prompt_tokens;
            total_completion_tokens += response.completion_tokens;
            llm_evals.push(LlmEval {
                id: 0,
                stage: EvalStage::Explore,
                issue_id,
                workspace_id,
                input_excerpt: excerpt(query),
                output_excerpt: excerpt(response.text.as_deref().unwrap_or("")),
                model: response.model.clone(),
                prompt_tokens: response.prompt_tokens,
                completion_tokens: response.completion_tokens,
                total_tokens: response.prompt_tokens + response.completion_tokens,
                latency_ms,
                error: None,
                created_at: chrono::Utc::now(),
            });

            if let Some(text) = &response.text {
                last_text = text.clone();
            }

            if response.finish_reason == Some(FinishReason::Error) {
                return Err(Error::ProviderTransient {
                    provider: "llm".into(),
                    message: "explore agent LLM call errored".into(),
                });
            }

            if let Some(submit) = response
                .tool_calls
                .iter()
                .find(|c| c.tool_name == "submit_report")
            {
                let report = submit
                    .arguments
                    .get("report")
                    .and_then(|v| v.as_str())
                    .unwrap_or(&last_text)
                    .to_string();
                return Ok(ExploreReport {
                    report,
                    iterations,
                    prompt_tokens: total_prompt_tokens,
                    completion_tokens: total_completion_tokens,
                    budget_exhausted: false,
                    llm_evals,
                });
            }

            if response.tool_calls.is_empty() {
                // No tool call and no submit_report — the model is done
                // talking without terminating properly; treat its text
                // as the report rather than looping forever.
                return Ok(ExploreReport {
                    report: fallback_report(&last_text, "model stopped without submit_report"),
                    iterations,
                    prompt_tokens: total_prompt_tokens,
                    completion_tokens: total_completion_tokens,
                    budget_exhausted: false,
                    llm_evals,
                });
            }

            messages.push(Message::assistant_tool_calls(
                response.text.as_deref().unwrap_or(""),
                &response.tool_calls,
            ));
            // Tool calls execute serially, in the order the LLM returned
            // them (spec §9: "executed serially ... parallelism adds
            // complexity with negligible latency benefit").
            for call in &response.tool_calls {
                let output = self.dispatch(call).await;
                tracing::debug!(
                    tool = %call.tool_name,
                    arguments = %call.arguments,
                    "explore tool call"
                );
                messages.push(Message::tool_result(call.call_id.clone(), output));
            }
        }
    }

    async fn dispatch(&self, call: &ToolCall) -> String {
        let result = match call.tool_name.as_str() {
            "grep" => {
                let pattern = str_arg(&call.arguments, "pattern").unwrap_or_default();
                let path = call.arguments.get("path").and_then(|v| v.as_str());
                tools::grep(&self.workspace_root, &pattern, path, self.config.tool_output_byte_limit)
            }
            "glob" => {
                let pattern = str_arg(&call.arguments, "pattern").unwrap_or_default();
                tools::glob(&self.workspace_root, &pattern, self.config.tool_output_byte_limit)
            }
            "read_file" => {
                let path = str_arg(&call.arguments, "path").unwrap_or_default();
                tools::read_file(&self.workspace_root, &path, self.config.tool_output_byte_limit)
            }
            "bash" => {
                let command = str_arg(&call.arguments, "command").unwrap_or_default();
                tools::bash(
                    &self.workspace_root,
                    &command,
                    &self.config.allowlisted_commands,
                    self.config.tool_output_byte_limit,
                )
                .await
            }
            "code_graph" => {
                let query = str_arg(&call.arguments, "query").unwrap_or_default();
                match self.code_graph.query(&query).await {
                    Ok(hits) => Ok(serde_json::to_string_pretty(&hits).unwrap_or_default()),
                    Err(e) => Err(e),
                }
            }
            other => Err(Error::Validation(format!("unknown explore tool '{other}'"))),
        };
        match result {
            Ok(s) => s,
            Err(e) => format!("error: {e}"),
        }
    }
}

fn str_arg(args: &serde_json::Value, key: &str) -> Option<String> {
    args.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
}

fn excerpt(s: &str) -> String {
    const MAX: usize = 2_000;
    if s.len() <= MAX {
        return s.to_string();
    }
    let mut idx = MAX;
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    format!("{}...", &s[..idx])
}

fn fallback_report(last_text: &str, reason: &str) -> String {
    if last_text.is_empty() {
        format!("(exploration ended early: {reason}, no synthesized text available)")
    } else {
        format!("{last_text}\n\n(exploration ended early: {reason})")
    }
}

const SYSTEM_PROMPT: &str = "You are a code-context retrieval sub-agent. \
Use grep/glob/read_file/bash/code_graph to investigate the workspace, then call \
submit_report exactly once with a synthesized markdown report answering the query. \
Never call any tool other than the ones offered.";

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relay_llm::ChatResponse;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedClient {
        responses: Vec<ChatResponse>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmClient for ScriptedClient {
        async fn chat_with_tools(&self, _req: ChatRequest) -> Result<ChatResponse> {
            let idx = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.responses.get(idx).cloned().unwrap_or_default())
        }
        fn default_model(&self) -> &str {
            "scripted/test"
        }
    }

    fn workspace() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn a() {}\n").unwrap();
        dir
    }

    #[tokio::test]
    async fn submit_report_terminates_the_loop() {
        let dir = workspace();
        let client = Arc::new(ScriptedClient {
            responses: vec![ChatResponse {
                tool_calls: vec![ToolCall {
                    call_id: "1".into(),
                    tool_name: "submit_report".into(),
                    arguments: serde_json::json!({"report": "Found nothing unusual."}),
                }],
                prompt_tokens: 10,
                completion_tokens: 5,
                finish_reason: Some(FinishReason::ToolUse),
                model: "scripted/test".into(),
                ..Default::default()
            }],
            calls: AtomicUsize::new(0),
        });
        let agent = ExploreAgent::new(
            client,
            Arc::new(crate::code_graph::NullCodeGraph),
            ExploreConfig::default(),
            dir.path().to_path_buf(),
        );
        let report = agent.run("what does a.rs do?", 1, 1).await.unwrap();
        assert_eq!(report.report, "Found nothing unusual.");
        assert_eq!(report.iterations, 1);
        assert!(!report.budget_exhausted);
        assert_eq!(report.llm_evals.len(), 1);
    }

    #[tokio::test]
    async fn grep_tool_call_is_dispatched_before_final_submit() {
        let dir = workspace();
        let client = Arc::new(ScriptedClient {
            responses: vec![
                ChatResponse {
                    tool_calls: vec![ToolCall {
                        call_id: "1".into(),
                        tool_name: "grep".into(),
                        arguments: serde_json::json!({"pattern": "fn a"}),
                    }],
                    prompt_tokens: 5,
                    completion_tokens: 5,
                    finish_reason: Some(FinishReason::ToolUse),
                    model: "scripted/test".into(),
                    ..Default::default()
                },
                ChatResponse {
                    tool_calls: vec![ToolCall {
                        call_id: "2".into(),
                        tool_name: "submit_report".into(),
                        arguments: serde_json::json!({"report": "a.rs defines fn a()."}),
                    }],
                    prompt_tokens: 5,
                    completion_tokens: 5,
                    finish_reason: Some(FinishReason::ToolUse),
                    model: "scripted/test".into(),
                    ..Default::default()
                },
            ],
            calls: AtomicUsize::new(0),
        });
        let agent = ExploreAgent::new(
            client,
            Arc::new(crate::code_graph::NullCodeGraph),
            ExploreConfig::default(),
            dir.path().to_path_buf(),
        );
        let report = agent.run("where is fn a defined?", 1, 1).await.unwrap();
        assert_eq!(report.iterations, 2);
        assert_eq!(report.report, "a.rs defines fn a().");
    }

    #[tokio::test]
    async fn iteration_limit_produces_a_best_effort_report() {
        let dir = workspace();
        let endless = ChatResponse {
            tool_calls: vec![ToolCall {
                call_id: "1".into(),
                tool_name: "grep".into(),
                arguments: serde_json::json!({"pattern": "fn"}),
            }],
            prompt_tokens: 1,
            completion_tokens: 1,
            finish_reason: Some(FinishReason::ToolUse),
            model: "scripted/test".into(),
            ..Default::default()
        };
        let mut cfg = ExploreConfig::default();
        cfg.max_iterations = 2;
        let client = Arc::new(ScriptedClient {
            responses: vec![endless.clone(), endless.clone(), endless],
            calls: AtomicUsize::new(0),
        });
        let agent = ExploreAgent::new(
            client,
            Arc::new(crate::code_graph::NullCodeGraph),
            cfg,
            dir.path().to_path_buf(),
        );
        let report = agent.run("loop forever", 1, 1).await.unwrap();
        assert!(report.budget_exhausted);
        assert_eq!(report.iterations, 2);
    }
}
