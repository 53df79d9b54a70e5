//! Anthropic Messages API provider.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use agent_core::{
    AgentError, ChatMessage, Completion, CompletionRequest, ContentBlock, FinishReason,
    LlmProvider, MessageRole, TokenUsage, ToolCallRequest, ToolResultPayload,
};

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub model: String,
    pub api_base: String,
    pub timeout: Duration,
}

pub struct AnthropicProvider {
    client: Client,
    config: AnthropicConfig,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicConfig) -> Result<Self, AgentError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| AgentError::internal(format!("failed to build http client: {err}")))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Completion, AgentError> {
        let body = json!({
            "model": self.config.model,
            "max_tokens": request.max_tokens,
            "system": request.system,
            "messages": request.messages.iter().map(wire_message).collect::<Vec<_>>(),
            "tools": request.tools.iter().map(|tool| json!({
                "name": tool.name,
                "description": tool.description,
                "input_schema": tool.input_schema,
            })).collect::<Vec<_>>(),
        });
        let url = format!("{}/messages", self.config.api_base.trim_end_matches('/'));
        debug!(model = %self.config.model, messages = request.messages.len(), "calling provider");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|err| AgentError::Transient(format!("provider request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "<response body unavailable>".to_string());
            return Err(AgentError::from_status(status.as_u16(), text));
        }

        let payload: WireResponse = response.json().await.map_err(|err| {
            AgentError::invalid_response(format!("malformed provider payload: {err}"))
        })?;
        Ok(parse_completion(payload))
    }
}

fn wire_message(message: &ChatMessage) -> Value {
    let role = match message.role {
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
    };
    let content: Vec<Value> = message
        .content
        .iter()
        .map(|block| match block {
            ContentBlock::Text { text } => json!({"type": "text", "text": text}),
            ContentBlock::ToolUse { id, name, input } => {
                json!({"type": "tool_use", "id": id, "name": name, "input": input})
            }
            ContentBlock::ToolResult {
                tool_use_id,
                payload,
            } => match payload {
                ToolResultPayload::Text { text } => json!({
                    "type": "tool_result",
                    "tool_use_id": tool_use_id,
                    "content": [{"type": "text", "text": text}],
                }),
                ToolResultPayload::Image { media_type, data } => json!({
                    "type": "tool_result",
                    "tool_use_id": tool_use_id,
                    "content": [{
                        "type": "image",
                        "source": {"type": "base64", "media_type": media_type, "data": data},
                    }],
                }),
            },
        })
        .collect();
    json!({"role": role, "content": content})
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    content: Vec<WireBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    input: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

fn parse_completion(payload: WireResponse) -> Completion {
    let mut text_parts = Vec::new();
    let mut tool_calls = Vec::new();
    let mut blocks = Vec::new();

    for block in payload.content {
        match block.kind.as_str() {
            "text" => {
                if let Some(text) = block.text {
                    blocks.push(ContentBlock::Text { text: text.clone() });
                    text_parts.push(text);
                }
            }
            "tool_use" => {
                if let (Some(id), Some(name)) = (block.id, block.name) {
                    let input = block.input.unwrap_or(Value::Null);
                    blocks.push(ContentBlock::ToolUse {
                        id: id.clone(),
                        name: name.clone(),
                        input: input.clone(),
                    });
                    tool_calls.push(ToolCallRequest { id, name, input });
                }
            }
            _ => {}
        }
    }

    let finish_reason = match payload.stop_reason.as_deref() {
        Some("tool_use") => FinishReason::ToolCalls,
        Some("end_turn") | Some("stop_sequence") => FinishReason::NormalStop,
        Some("max_tokens") => FinishReason::LengthLimit,
        Some("refusal") => FinishReason::ContentFiltered,
        Some(_) => FinishReason::Other,
        None => FinishReason::ProviderError,
    };
    let usage = payload
        .usage
        .map(|usage| TokenUsage::new(usage.input_tokens, usage.output_tokens))
        .unwrap_or_default();

    Completion {
        text: text_parts.join("\n"),
        finish_reason,
        tool_calls,
        usage,
        assistant_message: ChatMessage::assistant(blocks),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(raw: Value) -> WireResponse {
        serde_json::from_value(raw).expect("wire response")
    }

    #[test]
    fn parses_tool_use_turn() {
        let completion = parse_completion(wire(json!({
            "content": [
                {"type": "text", "text": "opening the page"},
                {"type": "tool_use", "id": "call_1", "name": "navigate",
                 "input": {"url": "https://example.test"}},
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 210, "output_tokens": 45},
        })));
        assert_eq!(completion.finish_reason, FinishReason::ToolCalls);
        assert_eq!(completion.tool_calls.len(), 1);
        assert_eq!(completion.tool_calls[0].name, "navigate");
        assert_eq!(completion.text, "opening the page");
        assert_eq!(completion.usage, TokenUsage::new(210, 45));
        assert_eq!(completion.assistant_message.content.len(), 2);
    }

    #[test]
    fn maps_terminal_stop_reasons() {
        let cases = [
            (json!("end_turn"), FinishReason::NormalStop),
            (json!("stop_sequence"), FinishReason::NormalStop),
            (json!("max_tokens"), FinishReason::LengthLimit),
            (json!("refusal"), FinishReason::ContentFiltered),
            (json!("pause_turn"), FinishReason::Other),
            (Value::Null, FinishReason::ProviderError),
        ];
        for (stop_reason, expected) in cases {
            let completion = parse_completion(wire(json!({
                "content": [],
                "stop_reason": stop_reason,
            })));
            assert_eq!(completion.finish_reason, expected);
        }
    }

    #[test]
    fn tool_results_serialize_to_the_wire_shape() {
        let message = ChatMessage::user(vec![ContentBlock::ToolResult {
            tool_use_id: "call_1".into(),
            payload: ToolResultPayload::Image {
                media_type: "image/png".into(),
                data: "aGVsbG8=".into(),
            },
        }]);
        let wire = wire_message(&message);
        assert_eq!(wire["role"], "user");
        assert_eq!(wire["content"][0]["type"], "tool_result");
        assert_eq!(wire["content"][0]["content"][0]["source"]["type"], "base64");
    }
}
