//! C12: SpecGenerator (spec §4.11) — the sub-agent invoked on the
//! `ready_for_spec_generation` transition.
//!
//! Grounded on the teacher's `runtime::agent::run_agent` (fresh
//! session, bounded turn, terminal-tool detection) for the loop shape,
//! and on `sa_skills::manifest`'s section-parsing style for the
//! structural validator (`structural.rs`).

pub mod structural;

use std::sync::Arc;
use std::time::Instant;

use relay_domain::config::SpecGenConfig;
use relay_domain::conversation::{render_conversation_xml, ConversationMessage};
use relay_domain::finding::Finding;
use relay_domain::gap::Gap;
use relay_domain::issue::Issue;
use relay_domain::learning::Learning;
use relay_domain::llm_eval::{EvalStage, LlmEval};
use relay_domain::{Error, Result};

use relay_explore::ExploreAgent;
use relay_llm::{ChatRequest, FinishReason, LlmClient, Message, ToolCall, ToolDefinition};

use structural::{validate_spec, ValidationResult};

/// Everything the ActionExecutor assembles from stores for one
/// generation attempt (spec §4.11: "not from the Planner's
/// `relevant_finding_ids` alone").
pub struct SpecGenInput {
    pub issue: Issue,
    pub workspace_id: i64,
    pub proceed_signal: String,
    pub context_summary: String,
    pub closed_gaps: Vec<Gap>,
    pub findings: Vec<Finding>,
    pub learnings: Vec<Learning>,
    pub conversation: Vec<ConversationMessage>,
    pub existing_spec: Option<String>,
}

pub struct SpecGenOutcome {
    pub spec_markdown: String,
    pub spec_summary: String,
    pub changelog: Option<String>,
    /// `"ok"` or `"partial"` (spec §4.11: degraded results still persist).
    pub validation_status: String,
    pub llm_evals: Vec<LlmEval>,
}

struct Attempt {
    spec_markdown: String,
    spec_summary: String,
    changelog: Option<String>,
    llm_evals: Vec<LlmEval>,
    terminated_via_submit: bool,
}

pub struct SpecGenerator {
    llm: Arc<dyn LlmClient>,
    explore: Arc<ExploreAgent>,
    config: SpecGenConfig,
}

impl SpecGenerator {
    pub fn new(llm: Arc<dyn LlmClient>, explore: Arc<ExploreAgent>, config: SpecGenConfig) -> Self {
        Self {
            llm,
            explore,
            config,
        }
    }

    fn tool_defs(&self) -> Vec<ToolDefinition> {
        vec![
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
                name: "submit_spec".into(),
                description: "Terminates the session with the generated spec.".into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "additionalProperties": false,
                    "properties": {
                        "spec_markdown": {"type": "string"},
                        "spec_summary": {"type": "string"},
                        "changelog": {"type": "string"}
                    },
                    "required": ["spec_markdown", "spec_summary"]
                }),
            },
        ]
    }

    /// Runs generation to completion, retrying once on structural
    /// validation failure (spec §4.11), and persisting a degraded
    /// result with `validation_status = "partial"` if it still fails
    /// or the budget runs out before `submit_spec`.
    pub async fn run(&self, input: &SpecGenInput) -> Result<SpecGenOutcome> {
        let complexity = infer_complexity(input);
        let mut attempt = self.generate_once(input, None).await?;
        let mut evals = std::mem::take(&mut attempt.llm_evals);

        let mut validation = validate_spec(
            &attempt.spec_markdown,
            complexity,
            self.config.decision_log_complexity_threshold,
        );

        let mut retries_left = self.config.max_validation_retries;
        while !validation.is_ok() && attempt.terminated_via_submit && retries_left > 0 {
            retries_left -= 1;
            let error_context = format_error_context(&validation);
            let retry_attempt = self.generate_once(input, Some(&error_context)).await?;
            evals.extend(retry_attempt.llm_evals.iter().cloned());
            validation = validate_spec(
                &retry_attempt.spec_markdown,
                complexity,
                self.config.decision_log_complexity_threshold,
            );
            attempt = Attempt {
                llm_evals: Vec::new(),
                ..retry_attempt
            };
        }

        let validation_status = if validation.is_ok() && attempt.terminated_via_submit {
            "ok"
        } else {
            "partial"
        };

        Ok(SpecGenOutcome {
            spec_markdown: attempt.spec_markdown,
            spec_summary: attempt.spec_summary,
            changelog: attempt.changelog,
            validation_status: validation_status.to_string(),
            llm_evals: evals,
        })
    }

    async fn generate_once(&self, input: &SpecGenInput, error_context: Option<&str>) -> Result<Attempt> {
        let tool_defs = self.tool_defs();
        let mut messages = vec![
            Message::system(SYSTEM_PROMPT),
            Message::user(build_user_message(input)),
        ];
        if let Some(errors) = error_context {
            messages.push(Message::user(format!(
                "The previous draft failed structural validation:\n{errors}\n\
Please submit a corrected spec via submit_spec."
            )));
        }

        let mut explore_calls: u32 = 0;
        let mut total_prompt_tokens: u32 = 0;
        let mut total_completion_tokens: u32 = 0;
        let mut llm_evals = Vec::new();
        let mut last_text = String::new();
        // Safety bound on top of the token budget: the loop always
        // terminates even if the model never calls submit_spec.
        let max_iterations = self.config.max_explore_calls * 2 + 6;

        for _ in 0..max_iterations {
            if total_prompt_tokens + total_completion_tokens >= self.config.total_token_budget {
                break;
            }

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
                stage: EvalStage::SpecGenerator,
                issue_id: input.issue.id,
                workspace_id: input.workspace_id,
                input_excerpt: excerpt(&input.context_summary),
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
                    message: "specgen LLM call errored".into(),
                });
            }

            let submit_calls: Vec<&ToolCall> = response
                .tool_calls
                .iter()
                .filter(|c| c.tool_name == "submit_spec")
                .collect();
            if let Some(first) = submit_calls.first() {
                if submit_calls.len() > 1 {
                    tracing::warn!(
                        issue_id = input.issue.id,
                        "specgen rejected extra submit_spec calls in the same turn"
                    );
                }
                let spec_markdown = str_arg(&first.arguments, "spec_markdown").unwrap_or_default();
                let spec_summary = str_arg(&first.arguments, "spec_summary").unwrap_or_default();
                let changelog = str_arg(&first.arguments, "changelog");
                return Ok(Attempt {
                    spec_markdown,
                    spec_summary,
                    changelog,
                    llm_evals,
                    terminated_via_submit: true,
                });
            }

            if response.tool_calls.is_empty() {
                break;
            }

            messages.push(Message::assistant_tool_calls(
                response.text.as_deref().unwrap_or(""),
                &response.tool_calls,
            ));
            for call in &response.tool_calls {
                let output = if call.tool_name == "explore" {
                    if explore_calls >= self.config.max_explore_calls {
                        "explore limit reached".to_string()
                    } else {
                        explore_calls += 1;
                        let query = str_arg(&call.arguments, "query").unwrap_or_default();
                        match self
                            .explore
                            .run(&query, input.issue.id, input.workspace_id)
                            .await
                        {
                            Ok(report) => report.report,
                            Err(e) => format!("error: {e}"),
                        }
                    }
                } else {
                    format!("error: unknown specgen tool '{}'", call.tool_name)
                };
                messages.push(Message::tool_result(call.call_id.clone(), output));
            }
        }

        // Budget exhausted or model stopped talking without submit_spec:
        // persist a degraded best-effort draft (spec §4.11: "a degraded
        // result is produced but still persisted").
        Ok(Attempt {
            spec_markdown: degraded_spec_markdown(input, &last_text),
            spec_summary: excerpt(&last_text),
            changelog: None,
            llm_evals,
            terminated_via_submit: false,
        })
    }
}

fn str_arg(args: &serde_json::Value, key: &str) -> Option<String> {
    args.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
}

fn infer_complexity(input: &SpecGenInput) -> u32 {
    let signal = input.closed_gaps.len() + input.findings.len();
    if signal >= 6 {
        3
    } else if signal >= 3 {
        2
    } else {
        1
    }
}

fn format_error_context(validation: &ValidationResult) -> String {
    validation
        .errors
        .iter()
        .map(|e| format!("- {e}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn degraded_spec_markdown(input: &SpecGenInput, last_text: &str) -> String {
    if !last_text.trim().is_empty() {
        return last_text.to_string();
    }
    format!(
        "## TL;DR\n(draft incomplete: generation budget exhausted)\n\n## Problem Statement\n{}\n",
        input.issue.description
    )
}

fn build_user_message(input: &SpecGenInput) -> String {
    let mut out = String::new();
    out.push_str("=== ISSUE ===\n");
    out.push_str(&format!(
        "Title: {}\nDescription:\n{}\n",
        input.issue.title, input.issue.description
    ));
    out.push_str("\n=== PROCEED_SIGNAL ===\n");
    out.push_str(&input.proceed_signal);
    out.push_str("\n\n=== CONTEXT_SUMMARY ===\n");
    out.push_str(&input.context_summary);
    out.push_str("\n\n=== CLOSED_GAPS ===\n");
    if input.closed_gaps.is_empty() {
        out.push_str("(none)\n");
    } else {
        for g in &input.closed_gaps {
            out.push_str(&format!(
                "- #{} [{:?}] {} (resolution: {})\n",
                g.short_id,
                g.severity,
                g.question,
                g.resolution_note.as_deref().unwrap_or("(none)")
            ));
        }
    }
    out.push_str("\n=== FINDINGS ===\n");
    if input.findings.is_empty() {
        out.push_str("(none)\n");
    } else {
        for f in &input.findings {
            let locs = f
                .sources
                .iter()
                .map(|s| s.location.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            out.push_str(&format!("- {} [core={}] ({})\n", f.synthesis, f.is_core, locs));
        }
    }
    out.push_str("\n=== LEARNINGS ===\n");
    if input.learnings.is_empty() {
        out.push_str("(none)\n");
    } else {
        for l in &input.learnings {
            out.push_str(&format!("- [{:?}] {}\n", l.kind, l.content));
        }
    }
    out.push_str("\n=== CONVERSATION ===\n");
    out.push_str(&render_conversation_xml(&input.conversation));
    out.push_str("\n\n=== EXISTING_SPEC ===\n");
    out.push_str(input.existing_spec.as_deref().unwrap_or("(none)"));
    out
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

const SYSTEM_PROMPT: &str = "You generate an implementation-ready specification markdown document \
from an issue's gathered context. Use explore at most a few times to confirm code details, then \
call submit_spec exactly once with spec_markdown, spec_summary, and an optional changelog. \
The spec must include a 'TL;DR' section, a 'Problem Statement' section, at least one \
'#### Scenario:' block with WHEN and THEN lines, and an 'Implementation Plan' with at least \
one task. Never call any tool other than the ones offered.";

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relay_domain::gap::{GapStatus, Respondent, Severity};
    use relay_domain::issue::{ProcessingStatus, SpecStatus};
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

    fn issue() -> Issue {
        Issue {
            id: 1,
            integration_id: 1,
            external_issue_id: "42".into(),
            external_project_id: "p1".into(),
            provider: "gitlab".into(),
            title: "Fix login bug".into(),
            description: "Users can't log in".into(),
            labels: vec![],
            assignees: vec![],
            reporter: "alice".into(),
            external_url: "https://example.com".into(),
            keywords: vec![],
            code_findings: vec![],
            processing_status: ProcessingStatus::Claimed,
            claimed_at: Some(chrono::Utc::now()),
            queued_at: None,
            spec: None,
            spec_status: SpecStatus::Generating,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    fn input() -> SpecGenInput {
        SpecGenInput {
            issue: issue(),
            workspace_id: 1,
            proceed_signal: "please proceed".into(),
            context_summary: "login bug traced to session middleware".into(),
            closed_gaps: vec![Gap {
                id: 1,
                issue_id: 1,
                short_id: 1,
                question: "which auth provider".into(),
                severity: Severity::Blocking,
                respondent: Respondent::Reporter,
                status: GapStatus::Resolved,
                created_at: chrono::Utc::now(),
                resolved_at: Some(chrono::Utc::now()),
                resolution_note: Some("local auth only".into()),
                comment_ref: None,
            }],
            findings: vec![],
            learnings: vec![],
            conversation: vec![],
            existing_spec: None,
        }
    }

    fn generator(client: Arc<dyn LlmClient>) -> SpecGenerator {
        let dir = tempfile::tempdir().unwrap();
        let explore = Arc::new(ExploreAgent::new(
            client.clone(),
            Arc::new(relay_explore::NullCodeGraph),
            relay_domain::config::ExploreConfig::default(),
            dir.path().to_path_buf(),
        ));
        SpecGenerator::new(client, explore, SpecGenConfig::default())
    }

    const GOOD_SPEC: &str = "\
## TL;DR
Fixes session expiry handling.

## Problem Statement
Users can't log in under certain conditions.

#### Scenario: Expired session
WHEN a session has expired
THEN the user is redirected to login

## Implementation Plan
- Patch the session middleware (`src/auth/session.rs`)
";

    #[tokio::test]
    async fn well_formed_submit_spec_yields_ok_status() {
        let client: Arc<dyn LlmClient> = Arc::new(ScriptedClient {
            responses: vec![ChatResponse {
                tool_calls: vec![ToolCall {
                    call_id: "1".into(),
                    tool_name: "submit_spec".into(),
                    arguments: serde_json::json!({
                        "spec_markdown": GOOD_SPEC,
                        "spec_summary": "Fixes session expiry handling."
                    }),
                }],
                prompt_tokens: 100,
                completion_tokens: 50,
                finish_reason: Some(FinishReason::ToolUse),
                model: "scripted/test".into(),
                ..Default::default()
            }],
            calls: AtomicUsize::new(0),
        });
        let gen = generator(client);
        let outcome = gen.run(&input()).await.unwrap();
        assert_eq!(outcome.validation_status, "ok");
        assert_eq!(outcome.llm_evals.len(), 1);
    }

    #[tokio::test]
    async fn malformed_spec_retries_once_then_persists_partial() {
        let bad_spec = "## TL;DR\nonly this\n";
        let client: Arc<dyn LlmClient> = Arc::new(ScriptedClient {
            responses: vec![
                ChatResponse {
                    tool_calls: vec![ToolCall {
                        call_id: "1".into(),
                        tool_name: "submit_spec".into(),
                        arguments: serde_json::json!({
                            "spec_markdown": bad_spec,
                            "spec_summary": "only this"
                        }),
                    }],
                    prompt_tokens: 10,
                    completion_tokens: 10,
                    finish_reason: Some(FinishReason::ToolUse),
                    model: "scripted/test".into(),
                    ..Default::default()
                },
                ChatResponse {
                    tool_calls: vec![ToolCall {
                        call_id: "2".into(),
                        tool_name: "submit_spec".into(),
                        arguments: serde_json::json!({
                            "spec_markdown": bad_spec,
                            "spec_summary": "still only this"
                        }),
                    }],
                    prompt_tokens: 10,
                    completion_tokens: 10,
                    finish_reason: Some(FinishReason::ToolUse),
                    model: "scripted/test".into(),
                    ..Default::default()
                },
            ],
            calls: AtomicUsize::new(0),
        });
        let gen = generator(client);
        let outcome = gen.run(&input()).await.unwrap();
        assert_eq!(outcome.validation_status, "partial");
        assert_eq!(outcome.llm_evals.len(), 2);
    }
}
