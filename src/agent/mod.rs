//! Multi-turn conversation loop driving the model to a pass/fail verdict.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use agent_core::{
    extract_verdict, AgentError, CacheStep, ChatMessage, Completion, CompletionRequest,
    ContentBlock, EntryMetadata, FinishReason, Fingerprint, LlmProvider, StepAction, TestSpec,
    TokenUsage, ToolDefinition, Verdict, CACHE_SCHEMA_VERSION,
};

use crate::cache::ActionCache;
use crate::tools::{outcome_to_block, tool_definitions, ToolBridge};

const SYSTEM_PROMPT: &str = "You are a QA agent operating a real browser and shell to execute \
an end-to-end test. Use the provided tools to carry out the test steps and observe the result. \
When the outcome is clear, respond with exactly one JSON object of the form \
{\"status\": \"passed\"|\"failed\", \"reason\": \"...\"} and nothing else.";

#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Full-attempt retries for transient provider failures.
    pub max_retries: u32,
    /// Delay before retry n is `retry_backoff_ms * n`.
    pub retry_backoff_ms: u64,
    /// Pause after a rate-limit response; does not consume the retry budget.
    pub rate_limit_cooldown_ms: u64,
    /// Provider round-trips allowed per attempt.
    pub step_budget: u32,
    pub max_tokens: u32,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_backoff_ms: 2_000,
            rate_limit_cooldown_ms: 15_000,
            step_budget: 50,
            max_tokens: 4096,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub verdict: Verdict,
    pub usage: TokenUsage,
    pub run_id: String,
}

pub struct ConversationLoop {
    provider: Arc<dyn LlmProvider>,
    bridge: ToolBridge,
    cache: Arc<ActionCache>,
    config: LoopConfig,
}

impl ConversationLoop {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        bridge: ToolBridge,
        cache: Arc<ActionCache>,
        config: LoopConfig,
    ) -> Self {
        Self {
            provider,
            bridge,
            cache,
            config,
        }
    }

    /// Run the conversation for one test. Transient provider failures retry
    /// the whole attempt with a fresh step record and usage counter;
    /// everything else propagates typed to the orchestrator.
    pub async fn run(
        &self,
        prompt: &str,
        test: &TestSpec,
        fingerprint: &Fingerprint,
    ) -> Result<RunOutcome, AgentError> {
        let mut attempt = 0u32;
        loop {
            match self.run_attempt(prompt, test, fingerprint).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) if err.is_retryable() => {
                    attempt += 1;
                    if attempt > self.config.max_retries {
                        return Err(AgentError::MaxRetriesReached(format!(
                            "{attempt} attempt(s) failed, last error: {err}"
                        )));
                    }
                    let delay = self.config.retry_backoff_ms * u64::from(attempt);
                    warn!(attempt, delay_ms = delay, %err, "transient provider failure, retrying run");
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn run_attempt(
        &self,
        prompt: &str,
        test: &TestSpec,
        fingerprint: &Fingerprint,
    ) -> Result<RunOutcome, AgentError> {
        let run_id = Uuid::new_v4().to_string();
        let tools = tool_definitions();
        let mut history = vec![ChatMessage::user_text(prompt)];
        let mut usage = TokenUsage::default();
        // the step record lives with the run, so concurrent tests sharing one
        // cache can never see each other's steps
        let mut steps: Vec<CacheStep> = Vec::new();

        for turn in 0..self.config.step_budget {
            let completion = self.complete_with_cooldown(&history, &tools).await?;
            usage.add(completion.usage);
            history.push(completion.assistant_message.clone());

            match completion.finish_reason {
                FinishReason::ToolCalls => {
                    let results = self.dispatch_tools(&completion, &mut steps).await?;
                    history.push(ChatMessage::user(results));
                }
                FinishReason::NormalStop => {
                    let verdict = extract_verdict(&completion.text)?;
                    info!(
                        test = %test.name,
                        status = ?verdict.status,
                        turns = turn + 1,
                        steps = steps.len(),
                        tokens = usage.total(),
                        "conversation finished"
                    );
                    // only passing runs are worth replaying
                    if verdict.is_passed() {
                        let metadata = EntryMetadata {
                            version: CACHE_SCHEMA_VERSION,
                            status: verdict.status,
                            reason: verdict.reason.clone(),
                            token_usage: usage,
                            run_id: run_id.clone(),
                            from_cache: false,
                        };
                        if let Err(err) =
                            self.cache.commit(test, fingerprint, steps, metadata).await
                        {
                            // a caching problem never fails a passing test
                            warn!(%err, "failed to persist action cache entry");
                        }
                    }
                    return Ok(RunOutcome {
                        verdict,
                        usage,
                        run_id,
                    });
                }
                FinishReason::LengthLimit => {
                    return Err(AgentError::TokenLimit(
                        "generation hit the token budget".into(),
                    ))
                }
                FinishReason::ContentFiltered => {
                    return Err(AgentError::ContentFiltered(
                        "provider declined to continue the conversation".into(),
                    ))
                }
                FinishReason::ProviderError => {
                    return Err(AgentError::ProviderStop(
                        "provider reported a generation error".into(),
                    ))
                }
                FinishReason::Other => {
                    return Err(AgentError::ProviderStop(
                        "provider stopped for an unrecognized reason".into(),
                    ))
                }
            }
        }
        Err(AgentError::StepBudgetExceeded(self.config.step_budget))
    }

    /// Provider call with rate-limit handling: a 429 pauses for the cooldown
    /// and resumes the same attempt, leaving the retry budget untouched.
    async fn complete_with_cooldown(
        &self,
        history: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<Completion, AgentError> {
        loop {
            let request = CompletionRequest {
                system: SYSTEM_PROMPT,
                messages: history,
                tools,
                max_tokens: self.config.max_tokens,
            };
            match self.provider.complete(request).await {
                Err(err) if err.is_rate_limited() => {
                    warn!(
                        cooldown_ms = self.config.rate_limit_cooldown_ms,
                        %err,
                        "provider rate limited, cooling down"
                    );
                    tokio::time::sleep(Duration::from_millis(self.config.rate_limit_cooldown_ms))
                        .await;
                }
                other => return other,
            }
        }
    }

    /// Execute every tool call of the turn, append a step to the run's
    /// record per call, and return the result blocks for the next user
    /// message.
    async fn dispatch_tools(
        &self,
        completion: &Completion,
        steps: &mut Vec<CacheStep>,
    ) -> Result<Vec<ContentBlock>, AgentError> {
        if completion.tool_calls.is_empty() {
            return Err(AgentError::invalid_response(
                "tool-call stop without any tool calls",
            ));
        }
        let mut blocks = Vec::with_capacity(completion.tool_calls.len());
        for call in &completion.tool_calls {
            debug!(tool = %call.name, "dispatching tool call");
            let outcome = self.bridge.execute(call).await?;
            steps.push(CacheStep {
                reasoning: completion.text.clone(),
                action: StepAction {
                    name: call.name.clone(),
                    input: call.input.clone(),
                },
                result: outcome.output_text.clone(),
                extras: outcome.extras.clone(),
                timestamp: Utc::now(),
            });
            blocks.push(outcome_to_block(&call.id, &outcome));
        }
        Ok(blocks)
    }
}
