//! Verdict extraction from free-form model text.
//!
//! A terminal turn must contain exactly one JSON object shaped like
//! `{"status": "passed"|"failed", "reason": "..."}`. Surrounding prose is
//! tolerated; zero objects, several objects, or an off-schema object are all
//! rejected so an ambiguous answer never silently becomes a verdict.

use serde_json::Value;

use crate::errors::AgentError;
use crate::model::{Verdict, VerdictStatus};

pub fn extract_verdict(raw: &str) -> Result<Verdict, AgentError> {
    let mut objects: Vec<Value> = balanced_object_spans(raw)
        .into_iter()
        .filter_map(|span| serde_json::from_str::<Value>(span).ok())
        .filter(Value::is_object)
        .collect();

    match objects.len() {
        0 => Err(AgentError::invalid_response(
            "no JSON verdict object in model output",
        )),
        1 => verdict_from_value(objects.remove(0)),
        n => Err(AgentError::invalid_response(format!(
            "expected exactly one JSON object in model output, found {n}"
        ))),
    }
}

fn verdict_from_value(value: Value) -> Result<Verdict, AgentError> {
    let status = value
        .get("status")
        .and_then(Value::as_str)
        .ok_or_else(|| AgentError::invalid_response("verdict object missing string 'status'"))?;
    let status = match status {
        "passed" => VerdictStatus::Passed,
        "failed" => VerdictStatus::Failed,
        other => {
            return Err(AgentError::invalid_response(format!(
                "unknown verdict status '{other}'"
            )))
        }
    };
    let reason = value
        .get("reason")
        .and_then(Value::as_str)
        .ok_or_else(|| AgentError::invalid_response("verdict object missing string 'reason'"))?
        .to_string();
    Ok(Verdict { status, reason })
}

/// Top-level `{...}` spans in `raw`, found with a string-aware depth scan.
/// Quoting is honored at depth 0 too, so a brace quoted in surrounding prose
/// cannot open a phantom span.
fn balanced_object_spans(raw: &str) -> Vec<&str> {
    let mut spans = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in raw.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(idx);
                }
                depth += 1;
            }
            '}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        if let Some(s) = start.take() {
                            spans.push(&raw[s..=idx]);
                        }
                    }
                }
            }
            _ => {}
        }
    }
    spans
}
