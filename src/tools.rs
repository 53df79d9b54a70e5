//! Tool dispatch between the model and the browser/shell driver.
//!
//! The tool set is a closed union: adding a tool means a new `ToolAction`
//! variant plus its registry entry, both in this file. A tool name outside
//! the union coming back from the model is a programming error, not a
//! recoverable condition.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::process::Command;
use tracing::{debug, warn};

use agent_core::{AgentError, ContentBlock, ToolCallRequest, ToolDefinition, ToolResultPayload};

use crate::driver::{BrowserDriver, DriverAction, DriverOutput};

pub const TOOL_BROWSER: &str = "browser_action";
pub const TOOL_SHELL: &str = "run_shell";
pub const TOOL_SLEEP: &str = "sleep";
pub const TOOL_NAVIGATE: &str = "navigate";
pub const TOOL_CALLBACK: &str = "run_test_callback";

/// Async hook registered by the test-authoring layer and exposed to the model
/// as the `run_test_callback` tool.
pub type TestCallback = Arc<
    dyn Fn() -> Pin<Box<dyn Future<Output = Result<String, AgentError>> + Send>> + Send + Sync,
>;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BrowserInput {
    pub action: String,
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ShellInput {
    pub command: String,
    #[serde(default = "default_shell_timeout")]
    pub timeout_secs: u64,
}

fn default_shell_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SleepInput {
    pub ms: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NavigateInput {
    pub url: String,
}

/// Closed set of tools the model may call.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolAction {
    Browser(BrowserInput),
    Shell(ShellInput),
    Sleep(SleepInput),
    Navigate(NavigateInput),
    TestCallback,
}

impl ToolAction {
    /// Parse a model-issued call. Malformed input for a known tool is the
    /// model's fault (`InvalidResponse`); an unknown name means the
    /// conversation is corrupt and is fatal.
    pub fn parse(call: &ToolCallRequest) -> Result<Self, AgentError> {
        fn typed<T: serde::de::DeserializeOwned>(call: &ToolCallRequest) -> Result<T, AgentError> {
            serde_json::from_value(call.input.clone()).map_err(|err| {
                AgentError::invalid_response(format!("bad input for tool '{}': {err}", call.name))
            })
        }

        match call.name.as_str() {
            TOOL_BROWSER => Ok(Self::Browser(typed(call)?)),
            TOOL_SHELL => Ok(Self::Shell(typed(call)?)),
            TOOL_SLEEP => Ok(Self::Sleep(typed(call)?)),
            TOOL_NAVIGATE => Ok(Self::Navigate(typed(call)?)),
            TOOL_CALLBACK => Ok(Self::TestCallback),
            other => Err(AgentError::internal(format!(
                "model requested unknown tool '{other}'"
            ))),
        }
    }
}

/// The fixed registry advertised to the model on every request.
pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: TOOL_BROWSER.into(),
            description: "Perform a browser action (click, type, scroll, move_mouse, screenshot, \
                          ...) against the page under test. Pointer actions take x/y page \
                          coordinates."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "action": {"type": "string"},
                    "x": {"type": "number"},
                    "y": {"type": "number"}
                },
                "required": ["action"],
                "additionalProperties": true
            }),
        },
        ToolDefinition {
            name: TOOL_SHELL.into(),
            description: "Run a shell command on the test host and return its output.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string"},
                    "timeout_secs": {"type": "integer", "minimum": 1}
                },
                "required": ["command"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: TOOL_SLEEP.into(),
            description: "Pause for the given number of milliseconds.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {"ms": {"type": "integer", "minimum": 0}},
                "required": ["ms"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: TOOL_NAVIGATE.into(),
            description: "Navigate the browser to a url.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {"url": {"type": "string"}},
                "required": ["url"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: TOOL_CALLBACK.into(),
            description: "Invoke the test's registered callback hook and return its output."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }),
        },
    ]
}

/// Outcome of one dispatched call, including extras destined for the cache
/// step record.
#[derive(Debug, Clone, Default)]
pub struct BridgeOutcome {
    pub output_text: Option<String>,
    pub image_base64: Option<String>,
    pub extras: Map<String, Value>,
}

impl From<DriverOutput> for BridgeOutcome {
    fn from(output: DriverOutput) -> Self {
        Self {
            output_text: output.output_text,
            image_base64: output.image_base64,
            extras: Map::new(),
        }
    }
}

pub struct ToolBridge {
    driver: Arc<dyn BrowserDriver>,
    callback: Option<TestCallback>,
}

impl ToolBridge {
    pub fn new(driver: Arc<dyn BrowserDriver>, callback: Option<TestCallback>) -> Self {
        Self { driver, callback }
    }

    pub async fn execute(&self, call: &ToolCallRequest) -> Result<BridgeOutcome, AgentError> {
        match ToolAction::parse(call)? {
            ToolAction::Browser(input) => self.run_browser(input).await,
            ToolAction::Navigate(input) => {
                let output = self
                    .driver
                    .execute(DriverAction {
                        name: "navigate".into(),
                        input: json!({"url": input.url}),
                    })
                    .await?;
                Ok(output.into())
            }
            ToolAction::Shell(input) => self.run_shell(input).await,
            ToolAction::Sleep(input) => {
                tokio::time::sleep(Duration::from_millis(input.ms)).await;
                Ok(BridgeOutcome {
                    output_text: Some(format!("slept {}ms", input.ms)),
                    ..Default::default()
                })
            }
            ToolAction::TestCallback => match &self.callback {
                Some(callback) => {
                    let text = callback().await?;
                    Ok(BridgeOutcome {
                        output_text: Some(text),
                        ..Default::default()
                    })
                }
                None => Ok(BridgeOutcome {
                    output_text: Some("no test callback registered".into()),
                    ..Default::default()
                }),
            },
        }
    }

    async fn run_browser(&self, input: BrowserInput) -> Result<BridgeOutcome, AgentError> {
        let coordinates = pointer_coordinates(&input);

        let mut payload = input.rest.clone();
        if let Some(x) = input.x {
            payload.insert("x".into(), json!(x));
        }
        if let Some(y) = input.y {
            payload.insert("y".into(), json!(y));
        }
        let output = self
            .driver
            .execute(DriverAction {
                name: input.action.clone(),
                input: Value::Object(payload),
            })
            .await?;
        let mut outcome = BridgeOutcome::from(output);

        // A replayed step has no live page to inspect, so capture what the
        // pointer was over while we still can.
        if let Some((x, y)) = coordinates {
            match self.driver.describe_element_at(x, y).await {
                Ok(description) => {
                    outcome
                        .extras
                        .insert("componentDescription".into(), Value::String(description));
                }
                Err(err) => warn!(%err, "element description unavailable"),
            }
        }
        Ok(outcome)
    }

    /// Shell failures are reported back to the model as text so it can react;
    /// only spawning trouble is an engine error.
    async fn run_shell(&self, input: ShellInput) -> Result<BridgeOutcome, AgentError> {
        debug!(command = %input.command, timeout_secs = input.timeout_secs, "running shell tool");
        let run = Command::new("sh").arg("-c").arg(&input.command).output();
        let output = match tokio::time::timeout(Duration::from_secs(input.timeout_secs), run).await
        {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                return Err(AgentError::internal(format!(
                    "failed to spawn shell command: {err}"
                )))
            }
            Err(_) => {
                return Ok(BridgeOutcome {
                    output_text: Some(format!(
                        "command timed out after {}s",
                        input.timeout_secs
                    )),
                    ..Default::default()
                })
            }
        };

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&stderr);
        }
        if !output.status.success() {
            text = format!("exit status {}\n{text}", output.status);
        }
        Ok(BridgeOutcome {
            output_text: Some(text),
            ..Default::default()
        })
    }
}

/// Coordinates of pointer-style browser actions, the ones worth annotating
/// with the element under the cursor.
fn pointer_coordinates(input: &BrowserInput) -> Option<(f64, f64)> {
    if !matches!(
        input.action.as_str(),
        "move_mouse" | "mouse_move" | "hover" | "drag" | "click"
    ) {
        return None;
    }
    match (input.x, input.y) {
        (Some(x), Some(y)) => Some((x, y)),
        _ => None,
    }
}

/// Shape a tool outcome into the result block appended to the conversation.
/// Screenshots take precedence; missing text still yields a valid (empty)
/// text block.
pub fn outcome_to_block(call_id: &str, outcome: &BridgeOutcome) -> ContentBlock {
    let payload = match &outcome.image_base64 {
        Some(data) => ToolResultPayload::Image {
            media_type: "image/png".into(),
            data: data.clone(),
        },
        None => ToolResultPayload::Text {
            text: outcome.output_text.clone().unwrap_or_default(),
        },
    };
    ContentBlock::ToolResult {
        tool_use_id: call_id.to_string(),
        payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::EchoDriver;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn call(name: &str, input: Value) -> ToolCallRequest {
        ToolCallRequest {
            id: "call_1".into(),
            name: name.into(),
            input,
        }
    }

    #[test]
    fn unknown_tool_is_fatal() {
        let err = ToolAction::parse(&call("teleport", json!({}))).unwrap_err();
        assert!(matches!(err, AgentError::Internal(_)));
    }

    #[test]
    fn malformed_input_is_invalid_response() {
        let err = ToolAction::parse(&call(TOOL_SHELL, json!({"cmd": "ls"}))).unwrap_err();
        assert!(matches!(err, AgentError::InvalidResponse(_)));
    }

    #[test]
    fn browser_input_keeps_unknown_fields() {
        let parsed = ToolAction::parse(&call(
            TOOL_BROWSER,
            json!({"action": "type", "selector": "#user", "text": "alice"}),
        ))
        .expect("parse");
        match parsed {
            ToolAction::Browser(input) => {
                assert_eq!(input.action, "type");
                assert_eq!(input.rest.get("selector"), Some(&json!("#user")));
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn registry_matches_the_union() {
        let names: Vec<String> = tool_definitions().into_iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            vec![TOOL_BROWSER, TOOL_SHELL, TOOL_SLEEP, TOOL_NAVIGATE, TOOL_CALLBACK]
        );
    }

    #[test]
    fn empty_output_still_yields_a_text_block() {
        let block = outcome_to_block("call_9", &BridgeOutcome::default());
        match block {
            ContentBlock::ToolResult {
                tool_use_id,
                payload: ToolResultPayload::Text { text },
            } => {
                assert_eq!(tool_use_id, "call_9");
                assert_eq!(text, "");
            }
            other => panic!("unexpected block {other:?}"),
        }
    }

    #[test]
    fn screenshot_takes_precedence_over_text() {
        let outcome = BridgeOutcome {
            output_text: Some("took screenshot".into()),
            image_base64: Some("aGVsbG8=".into()),
            extras: Map::new(),
        };
        match outcome_to_block("call_2", &outcome) {
            ContentBlock::ToolResult {
                payload: ToolResultPayload::Image { media_type, .. },
                ..
            } => assert_eq!(media_type, "image/png"),
            other => panic!("unexpected block {other:?}"),
        }
    }

    #[tokio::test]
    async fn pointer_actions_are_enriched_with_element_description() {
        let bridge = ToolBridge::new(Arc::new(EchoDriver), None);
        let outcome = bridge
            .execute(&call(
                TOOL_BROWSER,
                json!({"action": "move_mouse", "x": 120.0, "y": 48.0}),
            ))
            .await
            .expect("dispatch");
        assert_eq!(
            outcome.extras.get("componentDescription"),
            Some(&json!("element at (120, 48)"))
        );
    }

    #[tokio::test]
    async fn non_pointer_actions_are_not_enriched() {
        let bridge = ToolBridge::new(Arc::new(EchoDriver), None);
        let outcome = bridge
            .execute(&call(TOOL_BROWSER, json!({"action": "screenshot"})))
            .await
            .expect("dispatch");
        assert!(outcome.extras.is_empty());
    }

    #[tokio::test]
    async fn shell_tool_captures_output() {
        let bridge = ToolBridge::new(Arc::new(EchoDriver), None);
        let outcome = bridge
            .execute(&call(TOOL_SHELL, json!({"command": "printf hello"})))
            .await
            .expect("dispatch");
        assert_eq!(outcome.output_text.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn shell_timeout_becomes_a_tool_result() {
        let bridge = ToolBridge::new(Arc::new(EchoDriver), None);
        let outcome = bridge
            .execute(&call(
                TOOL_SHELL,
                json!({"command": "sleep 5", "timeout_secs": 1}),
            ))
            .await
            .expect("dispatch");
        assert!(outcome
            .output_text
            .as_deref()
            .unwrap_or_default()
            .contains("timed out"));
    }

    #[tokio::test]
    async fn callback_tool_invokes_the_hook() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        let hook: TestCallback = Arc::new(|| {
            Box::pin(async {
                CALLS.fetch_add(1, Ordering::SeqCst);
                Ok("hook done".to_string())
            })
        });
        let bridge = ToolBridge::new(Arc::new(EchoDriver), Some(hook));
        let outcome = bridge
            .execute(&call(TOOL_CALLBACK, json!({})))
            .await
            .expect("dispatch");
        assert_eq!(outcome.output_text.as_deref(), Some("hook done"));
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }
}
