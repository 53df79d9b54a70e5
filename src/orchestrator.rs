//! Per-test orchestration: replay from cache or run the agent.

use std::sync::Arc;

use tracing::{info, warn};

use agent_core::{AgentError, CacheEntry, CacheStep, TestSpec, TokenUsage, Verdict};

use crate::agent::ConversationLoop;
use crate::cache::ActionCache;

/// Outcome of one test execution, replayed or fresh.
#[derive(Debug, Clone)]
pub struct TestReport {
    pub verdict: Verdict,
    pub usage: TokenUsage,
    pub from_cache: bool,
    /// Replayed step record; empty for fresh runs, whose record lives in the
    /// cache entry written at commit.
    pub steps: Vec<CacheStep>,
}

pub struct TestOrchestrator {
    agent: ConversationLoop,
    cache: Arc<ActionCache>,
    no_cache: bool,
}

impl TestOrchestrator {
    pub fn new(agent: ConversationLoop, cache: Arc<ActionCache>, no_cache: bool) -> Self {
        Self {
            agent,
            cache,
            no_cache,
        }
    }

    /// Execute one test. On a cache hit the recorded steps are surfaced as
    /// the run's output and the provider is never consulted. Loop errors that
    /// describe the test going wrong become a failed verdict; engine-level
    /// errors (credentials, outage, programming errors) propagate.
    pub async fn execute(&self, test: &TestSpec) -> Result<TestReport, AgentError> {
        let fingerprint = test.fingerprint();

        if !self.no_cache {
            if let Some(entry) = self.cache.get(&fingerprint).await {
                info!(test = %test.name, %fingerprint, "cache hit, replaying recorded steps");
                return Ok(replay(entry));
            }
        }

        let prompt = build_prompt(test);
        match self.agent.run(&prompt, test, &fingerprint).await {
            Ok(outcome) => Ok(TestReport {
                verdict: outcome.verdict,
                usage: outcome.usage,
                from_cache: false,
                steps: Vec::new(),
            }),
            Err(err) if err.is_test_failure() => {
                warn!(test = %test.name, %err, "agent run failed, recording failed verdict");
                Ok(TestReport {
                    verdict: Verdict::failed(err.to_string()),
                    usage: TokenUsage::default(),
                    from_cache: false,
                    steps: Vec::new(),
                })
            }
            Err(err) => Err(err),
        }
    }
}

fn replay(entry: CacheEntry) -> TestReport {
    let (verdict, usage) = match entry.metadata {
        Some(meta) => (
            Verdict {
                status: meta.status,
                reason: meta.reason,
            },
            meta.token_usage,
        ),
        None => (Verdict::passed("replayed from cache"), TokenUsage::default()),
    };
    TestReport {
        verdict,
        usage,
        from_cache: true,
        steps: entry.data.steps,
    }
}

fn build_prompt(test: &TestSpec) -> String {
    format!(
        "Execute this end-to-end test and report a verdict.\n\nTest: {}\nDefined in: {}\n\n{}",
        test.name, test.file_path, test.body
    )
}
