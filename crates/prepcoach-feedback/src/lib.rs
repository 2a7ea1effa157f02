//! Feedback generation for PrepCoach.
//!
//! Turns a practised conversation into PREP [`Feedback`](prepcoach_core::Feedback)
//! by walking an ordered chain of strategies, from the provider's stored
//! transcript down to a deterministic keyword heuristic, and guarantees that
//! at most one generation runs at a time.
//!
//! # Main types
//!
//! - [`FeedbackOrchestrator`] / [`OrchestratorHandle`] — Single-flight worker and its front end.
//! - [`FeedbackResolver`] — The ordered strategy chain.
//! - [`ConversationPoller`] — Backoff polling for a provider transcript.
//! - [`ClaudeCompletion`] — Analysis model client.
//! - [`ConvaiClient`] — Voice-agent provider client.

/// Model, provider and polling configuration.
pub mod config;
/// Voice-agent provider client.
pub mod convai;
/// Keyword heuristic scoring.
pub mod heuristic;
/// Analysis model client.
pub mod llm;
/// Single-flight generation worker.
pub mod orchestrator;
/// Model reply parsing.
pub mod parser;
/// Transcript polling with backoff.
pub mod poller;
/// Analysis prompt construction.
pub mod prompt;
/// Fallback strategy chain.
pub mod resolver;

pub use config::{ConvaiConfig, LlmProvider, ModelConfig, PollingPolicy};
pub use convai::{ConvaiClient, ConversationSource};
pub use llm::{ClaudeCompletion, TextCompletion};
pub use orchestrator::{FeedbackOrchestrator, FeedbackStatus, GenerateOutcome, OrchestratorHandle};
pub use parser::{parse_feedback, ParsedFeedback};
pub use poller::{ConversationPoller, PollState};
pub use resolver::{
    AgentFeedbackStrategy, FeedbackResolver, FeedbackStrategy, HeuristicStrategy,
    LocalTranscriptStrategy, RemoteTranscriptStrategy, ResolveContext, Resolution,
    StrategyOutcome,
};
