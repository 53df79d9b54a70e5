use thiserror::Error;

/// Errors emitted by the conversation loop and its collaborators.
///
/// The taxonomy splits three ways: retryable provider trouble, terminal
/// generation outcomes that read as a failed test, and everything that should
/// stop the process (bad credentials, provider outage, programming errors).
#[derive(Debug, Error)]
pub enum AgentError {
    /// Provider rejected the credentials. Never retried.
    #[error("provider authentication failed: {0}")]
    Auth(String),

    /// Provider refused the request outright. Never retried.
    #[error("provider authorization denied: {0}")]
    Forbidden(String),

    /// Provider-side fault. Never retried.
    #[error("provider server fault: {0}")]
    ServerFault(String),

    /// Provider asked us to slow down; handled with a cooldown, not a retry.
    #[error("provider rate limited: {0}")]
    RateLimited(String),

    /// Network hiccups, timeouts, unclassified provider statuses.
    #[error("transient provider failure: {0}")]
    Transient(String),

    /// Retry budget for transient failures is exhausted.
    #[error("retries exhausted: {0}")]
    MaxRetriesReached(String),

    /// The model ran out of generation budget mid-conversation.
    #[error("token limit reached: {0}")]
    TokenLimit(String),

    /// The provider filtered the generation.
    #[error("content filtered: {0}")]
    ContentFiltered(String),

    /// The provider stopped for an error or an unrecognized reason.
    #[error("provider stopped generation: {0}")]
    ProviderStop(String),

    /// The model produced output the engine cannot act on (bad verdict JSON,
    /// malformed tool input, tool-call stop without calls).
    #[error("invalid model response: {0}")]
    InvalidResponse(String),

    /// The conversation ran past its round-trip budget.
    #[error("conversation exceeded step budget of {0}")]
    StepBudgetExceeded(u32),

    /// Programming errors: unknown tool names, broken wiring.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Map an HTTP status from the provider onto the taxonomy.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 => Self::Auth(message),
            403 => Self::Forbidden(message),
            429 => Self::RateLimited(message),
            500 => Self::ServerFault(message),
            _ => Self::Transient(format!("status {status}: {message}")),
        }
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether the whole attempt may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }

    /// Whether the error describes the test going wrong rather than the
    /// engine. These become a failed verdict instead of propagating.
    pub fn is_test_failure(&self) -> bool {
        matches!(
            self,
            Self::TokenLimit(_)
                | Self::ContentFiltered(_)
                | Self::ProviderStop(_)
                | Self::InvalidResponse(_)
                | Self::StepBudgetExceeded(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert!(matches!(AgentError::from_status(401, "x"), AgentError::Auth(_)));
        assert!(matches!(AgentError::from_status(403, "x"), AgentError::Forbidden(_)));
        assert!(matches!(AgentError::from_status(429, "x"), AgentError::RateLimited(_)));
        assert!(matches!(AgentError::from_status(500, "x"), AgentError::ServerFault(_)));
        assert!(matches!(AgentError::from_status(503, "x"), AgentError::Transient(_)));
    }

    #[test]
    fn only_transient_is_retryable() {
        assert!(AgentError::Transient("t".into()).is_retryable());
        assert!(!AgentError::Auth("a".into()).is_retryable());
        assert!(!AgentError::RateLimited("r".into()).is_retryable());
        assert!(!AgentError::ServerFault("s".into()).is_retryable());
    }

    #[test]
    fn test_failure_classification() {
        assert!(AgentError::StepBudgetExceeded(50).is_test_failure());
        assert!(AgentError::invalid_response("bad").is_test_failure());
        assert!(AgentError::TokenLimit("t".into()).is_test_failure());
        assert!(!AgentError::MaxRetriesReached("m".into()).is_test_failure());
        assert!(!AgentError::internal("i").is_test_failure());
        assert!(!AgentError::Auth("a".into()).is_test_failure());
    }
}
