//! Provider abstraction: conversation shapes and the `LlmProvider` trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::AgentError;
use crate::model::TokenUsage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

/// Payload of a tool result block. Screenshots travel as base64 images so the
/// model can look at the page; everything else is text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolResultPayload {
    Text { text: String },
    Image { media_type: String, data: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        payload: ToolResultPayload,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: Vec<ContentBlock>,
}

impl ChatMessage {
    pub fn user(content: Vec<ContentBlock>) -> Self {
        Self {
            role: MessageRole::User,
            content,
        }
    }

    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content,
        }
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        Self::user(vec![ContentBlock::Text { text: text.into() }])
    }
}

/// One tool advertised to the model. The registry is fixed at compile time.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// A tool invocation the model asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// Why the provider stopped generating this turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// The model wants tools executed before continuing.
    ToolCalls,
    /// Clean stop; the text should carry the verdict object.
    NormalStop,
    LengthLimit,
    ContentFiltered,
    ProviderError,
    Other,
}

/// One provider round-trip result.
#[derive(Debug, Clone)]
pub struct Completion {
    /// Concatenated text blocks of the turn.
    pub text: String,
    pub finish_reason: FinishReason,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: TokenUsage,
    /// The assistant turn exactly as it must be appended to the history.
    pub assistant_message: ChatMessage,
}

#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub system: &'a str,
    pub messages: &'a [ChatMessage],
    pub tools: &'a [ToolDefinition],
    pub max_tokens: u32,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Completion, AgentError>;
}

/// Deterministic provider for offline smoke runs: immediately returns a
/// passed verdict without requesting any tools.
#[derive(Debug, Default, Clone)]
pub struct MockLlmProvider;

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Completion, AgentError> {
        let text = format!(
            "{{\"status\": \"passed\", \"reason\": \"offline mock run over {} message(s)\"}}",
            request.messages.len()
        );
        Ok(Completion {
            text: text.clone(),
            finish_reason: FinishReason::NormalStop,
            tool_calls: Vec::new(),
            usage: TokenUsage::default(),
            assistant_message: ChatMessage::assistant(vec![ContentBlock::Text { text }]),
        })
    }
}
