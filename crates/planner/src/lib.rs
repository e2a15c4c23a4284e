//! C9: the Planner (spec §4.5, §4.6) — the outer LLM loop that turns an
//! issue's assembled context into a batch of actions.
//!
//! Grounded on the teacher's `runtime::turn::run_turn` tool-calling loop
//! (`MAX_TOOL_LOOPS`, drain-then-dispatch, terminal tool detection) and
//! composed with `relay-context::PlannerContextBuilder` for the user
//! message and `relay-explore::ExploreAgent` for the `explore` tool
//! (SPEC_FULL §4.5: "explore is the only way the Planner touches code").

use std::sync::Arc;
use std::time::Instant;

use relay_domain::action::ActionBatch;
use relay_domain::config::PlannerConfig;
use relay_domain::conversation::ConversationMessage;
use relay_domain::finding::Finding;
use relay_domain::gap::Gap;
use relay_domain::issue::Issue;
use relay_domain::learning::Learning;
use relay_domain::llm_eval::{EvalStage, LlmEval};
use relay_domain::spec_ref::SpecRef;
use relay_domain::{Error, Result};

use relay_context::builder::{PlannerContextBuilder, SpecStub};
use relay_explore::ExploreAgent;
use relay_llm::{ChatRequest, FinishReason, LlmClient, Message, ToolCall, ToolDefinition};
use relay_specstore::{ReadMode, SpecStore};

/// What the Planner produced, plus everything its caller (`relay-executor`
/// via `relay-orchestrator`) needs to persist.
pub struct PlannerOutcome {
    pub batch: ActionBatch,
    pub iterations: u32,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub budget_exhausted: bool,
    pub llm_evals: Vec<LlmEval>,
}

pub struct Planner {
    llm: Arc<dyn LlmClient>,
    explore: Arc<ExploreAgent>,
    specstore: Arc<SpecStore>,
    config: PlannerConfig,
}

impl Planner {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        explore: Arc<ExploreAgent>,
        specstore: Arc<SpecStore>,
        config: PlannerConfig,
    ) -> Self {
        Self {
            llm,
            explore,
            specstore,
            config,
        }
    }

    fn tool_defs(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition {
                name: "read_spec".into(),
                description: "Read the issue's current spec draft, in summary or full mode."
                    .into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "additionalProperties": false,
                    "properties": {
                        "mode": {"type": "string", "enum": ["summary", "full"]}
                    },
                    "required": ["mode"]
                }),
            },
            ToolDefinition {
                name: "explore".into(),
                description: "Delegate a bounded code-retrieval query to a sub-agent.".into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "additionalProperties": false,
                    "properties": {"query": {"type": "string"}},
                    "required": ["query"]
                }),
            },
            ToolDefinition {
                name: "submit_actions".into(),
                description: "Terminates the turn with the batch of actions to execute.".into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "additionalProperties": false,
                    "properties": {
                        "actions": {
                            "type": "array",
                            "items": {"type": "object"}
                        }
                    },
                    "required": ["actions"]
                }),
            },
        ]
    }

    /// Runs one Planner turn to completion: builds the user message from
    /// the supplied issue state, loops on tool calls, and returns either
    /// a validated-shape action batch or a deferral fallback when the
    /// iteration/token budget runs out before `submit_actions` (spec
    /// §4.5: "never leaves the issue silently stuck").
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &self,
        issue: &Issue,
        workspace_id: i64,
        open_gaps: &[Gap],
        findings: &[Finding],
        learnings: &[Learning],
        spec_ref: Option<&SpecRef>,
        spec_summary: Option<&str>,
        conversation: &[ConversationMessage],
    ) -> Result<PlannerOutcome> {
        let context_builder = PlannerContextBuilder::new(4_000, 20_000);
        let stub = match (spec_ref, spec_summary) {
            (Some(r), Some(summary)) => Some(SpecStub {
                path: r.path.clone(),
                updated_at: r.updated_at.to_rfc3339(),
                sha256: r.sha256.clone(),
                summary: summary.to_string(),
            }),
            _ => None,
        };
        let user_message = context_builder.build(
            issue,
            learnings,
            findings,
            open_gaps,
            stub.as_ref(),
            conversation,
        );

        let tool_defs = self.tool_defs();
        let mut messages = vec![Message::system(SYSTEM_PROMPT), Message::user(user_message)];

        let mut iterations: u32 = 0;
        let mut total_prompt_tokens: u32 = 0;
        let mut total_completion_tokens: u32 = 0;
        let mut llm_evals = Vec::new();

        loop {
            if iterations >= self.config.max_iterations {
                return Ok(self.deferral_outcome(
                    "planner iteration limit reached before submit_actions",
                    iterations,
                    total_prompt_tokens,
                    total_completion_tokens,
                    llm_evals,
                ));
            }
            if total_prompt_tokens + total_completion_tokens >= self.config.total_token_budget {
                return Ok(self.deferral_outcome(
                    "planner token budget exhausted before submit_actions",
                    iterations,
                    total_prompt_tokens,
                    total_completion_tokens,
                    llm_evals,
                ));
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
                stage: EvalStage::Planner,
                issue_id: issue.id,
                workspace_id,
                input_excerpt: excerpt(&issue.title),
                output_excerpt: excerpt(response.text.as_deref().unwrap_or("")),
                model: response.model.clone(),
                prompt_tokens: response.prompt_tokens,
                completion_tokens: response.completion_tokens,
                total_tokens: response.prompt_tokens + response.completion_tokens,
                latency_ms,
                error: None,
                created_at: chrono::Utc::now(),
            });

            if response.finish_reason == Some(FinishReason::Error) {
                return Err(Error::ProviderTransient {
                    provider: "llm".into(),
                    message: "planner LLM call errored".into(),
                });
            }

            if let Some(submit) = response
                .tool_calls
                .iter()
                .find(|c| c.tool_name == "submit_actions")
            {
                let batch = parse_action_batch(submit)?;
                return Ok(PlannerOutcome {
                    batch,
                    iterations,
                    prompt_tokens: total_prompt_tokens,
                    completion_tokens: total_completion_tokens,
                    budget_exhausted: false,
                    llm_evals,
                });
            }

            if response.tool_calls.is_empty() {
                return Ok(self.deferral_outcome(
                    "planner stopped without calling submit_actions",
                    iterations,
                    total_prompt_tokens,
                    total_completion_tokens,
                    llm_evals,
                ));
            }

            messages.push(Message::assistant_tool_calls(
                response.text.as_deref().unwrap_or(""),
                &response.tool_calls,
            ));
            for call in &response.tool_calls {
                let output = self
                    .dispatch(call, issue, workspace_id, spec_ref, &mut llm_evals)
                    .await;
                tracing::debug!(tool = %call.tool_name, issue_id = issue.id, "planner tool call");
                messages.push(Message::tool_result(call.call_id.clone(), output));
            }
        }
    }

    async fn dispatch(
        &self,
        call: &ToolCall,
        issue: &Issue,
        workspace_id: i64,
        spec_ref: Option<&SpecRef>,
        llm_evals: &mut Vec<LlmEval>,
    ) -> String {
        let result: Result<String> = match call.tool_name.as_str() {
            "read_spec" => {
                let mode = call
                    .arguments
                    .get("mode")
                    .and_then(|v| v.as_str())
                    .unwrap_or("summary");
                match spec_ref {
                    None => Ok("(no spec has been written for this issue yet)".to_string()),
                    Some(r) => {
                        let read_mode = if mode == "full" {
                            ReadMode::Full
                        } else {
                            ReadMode::Summary
                        };
                        self.specstore
                            .read(r, read_mode, self.config.read_spec_default_max_chars)
                    }
                }
            }
            "explore" => {
                let query = call
                    .arguments
                    .get("query")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                match self.explore.run(query, issue.id, workspace_id).await {
                    Ok(report) => {
                        relay_domain::trace::TraceEvent::ExploreTurnFinished {
                            issue_id: issue.id,
                            iterations: report.iterations,
                            prompt_tokens: report.prompt_tokens,
                            completion_tokens: report.completion_tokens,
                            budget_exhausted: report.budget_exhausted,
                        }
                        .emit();
                        llm_evals.extend(report.llm_evals.clone());
                        Ok(report.report)
                    }
                    Err(e) => Err(e),
                }
            }
            other => Err(Error::Validation(format!("unknown planner tool '{other}'"))),
        };
        match result {
            Ok(s) => s,
            Err(e) => format!("error: {e}"),
        }
    }

    fn deferral_outcome(
        &self,
        reason: &str,
        iterations: u32,
        prompt_tokens: u32,
        completion_tokens: u32,
        llm_evals: Vec<LlmEval>,
    ) -> PlannerOutcome {
        tracing::warn!(reason, "planner deferring to a single post_comment action");
        PlannerOutcome {
            batch: ActionBatch {
                actions: vec![relay_domain::action::Action::PostComment(
                    relay_domain::action::PostComment {
                        content: format!(
                            "I wasn't able to finish analyzing this issue in this pass ({reason}). \
I'll pick it back up on the next update."
                        ),
                        reply_to_discussion_id: None,
                    },
                )],
            },
            iterations,
            prompt_tokens,
            completion_tokens,
            budget_exhausted: true,
            llm_evals,
        }
    }
}

fn parse_action_batch(call: &ToolCall) -> Result<ActionBatch> {
    let actions = call
        .arguments
        .get("actions")
        .cloned()
        .ok_or_else(|| Error::Validation("submit_actions missing 'actions'".into()))?;
    let actions = serde_json::from_value(actions)
        .map_err(|e| Error::Validation(format!("submit_actions actions malformed: {e}")))?;
    Ok(ActionBatch { actions })
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

const SYSTEM_PROMPT: &str = "You are the planning stage of an issue-triage pipeline. \
Use read_spec to see the current spec draft and explore to investigate the codebase. \
When you have enough information, call submit_actions exactly once with the batch of \
actions to take (post_comment, update_gaps, update_findings, update_learnings, \
ready_for_spec_generation, update_spec). Never call any tool other than the ones offered.";
