//! Shared fixtures: a scripted provider and completion builders.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use agent_core::{
    AgentError, ChatMessage, Completion, CompletionRequest, ContentBlock, FinishReason,
    LlmProvider, TestSpec, TokenUsage, ToolCallRequest,
};
use agentest_cli::agent::LoopConfig;

/// Provider that plays back a fixed response script and counts calls.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<Completion, AgentError>>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<Completion, AgentError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn complete(&self, _request: CompletionRequest<'_>) -> Result<Completion, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| Err(AgentError::internal("scripted provider exhausted")))
    }
}

pub fn verdict_completion(status: &str, reason: &str, usage: TokenUsage) -> Completion {
    let text = format!("{{\"status\": \"{status}\", \"reason\": \"{reason}\"}}");
    Completion {
        text: text.clone(),
        finish_reason: FinishReason::NormalStop,
        tool_calls: Vec::new(),
        usage,
        assistant_message: ChatMessage::assistant(vec![ContentBlock::Text { text }]),
    }
}

pub fn tool_completion(id: &str, name: &str, input: Value, usage: TokenUsage) -> Completion {
    let reasoning = "working through the next step".to_string();
    Completion {
        text: reasoning.clone(),
        finish_reason: FinishReason::ToolCalls,
        tool_calls: vec![ToolCallRequest {
            id: id.into(),
            name: name.into(),
            input: input.clone(),
        }],
        usage,
        assistant_message: ChatMessage::assistant(vec![
            ContentBlock::Text { text: reasoning },
            ContentBlock::ToolUse {
                id: id.into(),
                name: name.into(),
                input,
            },
        ]),
    }
}

pub fn raw_completion(text: &str, finish_reason: FinishReason) -> Completion {
    Completion {
        text: text.to_string(),
        finish_reason,
        tool_calls: Vec::new(),
        usage: TokenUsage::default(),
        assistant_message: ChatMessage::assistant(vec![ContentBlock::Text {
            text: text.to_string(),
        }]),
    }
}

/// Loop config with millisecond-scale delays so retry tests stay fast.
pub fn fast_loop_config() -> LoopConfig {
    LoopConfig {
        max_retries: 3,
        retry_backoff_ms: 1,
        rate_limit_cooldown_ms: 1,
        step_budget: 10,
        max_tokens: 1024,
    }
}

pub fn sample_test() -> TestSpec {
    TestSpec::new(
        "login works",
        "suites/auth.yaml",
        "open /login, sign in as alice, expect to land on /home",
    )
}
