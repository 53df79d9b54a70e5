//! Browser driver contract consumed by the tool bridge.
//!
//! The engine does not speak CDP itself; an embedding harness supplies a
//! `BrowserDriver` that executes page actions and answers coordinate probes.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value;

use agent_core::AgentError;

/// One action forwarded to the automation driver, e.g. `click` with
/// coordinates or `navigate` with a url.
#[derive(Debug, Clone)]
pub struct DriverAction {
    pub name: String,
    pub input: Value,
}

/// What came back from the driver: text, a screenshot, or both.
#[derive(Debug, Clone, Default)]
pub struct DriverOutput {
    pub output_text: Option<String>,
    /// Base64-encoded PNG when the action produced a screenshot.
    pub image_base64: Option<String>,
}

#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn execute(&self, action: DriverAction) -> Result<DriverOutput, AgentError>;

    /// Human-readable description of the UI element under page coordinates.
    /// Used to annotate recorded pointer actions while the page is live.
    async fn describe_element_at(&self, x: f64, y: f64) -> Result<String, AgentError>;
}

/// Driver that acknowledges every action without touching a browser. Used by
/// offline runs and tests.
#[derive(Debug, Default, Clone)]
pub struct EchoDriver;

#[async_trait]
impl BrowserDriver for EchoDriver {
    async fn execute(&self, action: DriverAction) -> Result<DriverOutput, AgentError> {
        if action.name == "screenshot" {
            return Ok(DriverOutput {
                output_text: None,
                image_base64: Some(STANDARD.encode(b"agentest-echo-frame")),
            });
        }
        Ok(DriverOutput {
            output_text: Some(format!("executed {}", action.name)),
            image_base64: None,
        })
    }

    async fn describe_element_at(&self, x: f64, y: f64) -> Result<String, AgentError> {
        Ok(format!("element at ({x:.0}, {y:.0})"))
    }
}
