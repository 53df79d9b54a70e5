//! Core domain types for the agentest engine.
//!
//! This crate is runtime-agnostic: it holds the test/cache data model, the
//! error taxonomy shared by the conversation loop and the cache layer, the
//! `LlmProvider` abstraction, and verdict extraction from model output.

pub mod errors;
pub mod llm_provider;
pub mod model;
pub mod verdict;

pub use errors::AgentError;
pub use llm_provider::{
    ChatMessage, Completion, CompletionRequest, ContentBlock, FinishReason, LlmProvider,
    MessageRole, MockLlmProvider, ToolCallRequest, ToolDefinition, ToolResultPayload,
};
pub use model::{
    CacheData, CacheEntry, CacheStep, EntryMetadata, Fingerprint, InvalidFingerprint, StepAction,
    TestSpec, TokenUsage, Verdict, VerdictStatus, CACHE_SCHEMA_VERSION,
};
pub use verdict::extract_verdict;
