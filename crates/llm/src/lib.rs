//! C7: the typed `ChatWithTools` contract (spec §4.8).
//!
//! Grounded on the teacher's `sa_providers::LlmProvider` trait: one
//! provider-agnostic request/response pair, adapters translate to/from
//! wire formats. Unlike the teacher, there is no streaming variant here —
//! spec §4.8 is explicit that this is a single blocking call with no
//! internal retry; retries live at the caller (`relay-planner`,
//! `relay-explore`, `relay-specgen`) so attempts stay attributable via
//! `LlmEval` rows.

pub mod message;

pub use message::{ContentPart, Message, MessageContent, Role};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use relay_domain::Result;

/// A tool definition exposed to the model. Every schema is expected to be
/// `{type: "object", additionalProperties: false, required: [...]}`
/// (spec §6) — enforced by callers, not by this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A tool call returned by the model, in the order the provider emitted it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    ToolUse,
    Length,
    ContentFilter,
    Error,
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub finish_reason: Option<FinishReason>,
    pub model: String,
}

impl Default for FinishReason {
    fn default() -> Self {
        FinishReason::Stop
    }
}

/// C7: a single typed chat-with-tools call. No internal retry — a failed
/// network call returns `Error::ProviderTransient`; a content-filter or
/// invalid-argument rejection returns `Error::ProviderFatal` (spec §4.8).
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat_with_tools(&self, req: ChatRequest) -> Result<ChatResponse>;

    /// Identifies the client for `LlmEval.model` when the request didn't
    /// pin a model explicitly.
    fn default_model(&self) -> &str;
}
