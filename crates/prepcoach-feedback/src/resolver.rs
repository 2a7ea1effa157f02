use crate::config::PollingPolicy;
use crate::heuristic;
use crate::llm::TextCompletion;
use crate::parser::{parse_feedback, ParsedFeedback};
use crate::poller::ConversationPoller;
use crate::prompt::{analysis_prompt, format_messages, format_turns};
use async_trait::async_trait;
use prepcoach_core::{Feedback, FeedbackSource, Message};
use prepcoach_session::MIN_MESSAGES_FOR_FEEDBACK;
use std::sync::Arc;
use tracing::{info, warn};

/// A feedback result and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// The feedback to show.
    pub feedback: Feedback,
    /// Strategy that produced it.
    pub source: FeedbackSource,
    /// Raw model reply, when a model produced the feedback.
    pub notes: Option<String>,
}

/// Result of one strategy.
#[derive(Debug)]
pub enum StrategyOutcome {
    /// Feedback was produced; later strategies are not run.
    Resolved(Resolution),
    /// The strategy did not apply or failed; the reason is logged.
    Skipped(String),
}

/// Hook told when a polling strategy starts and stops polling.
pub type PollingObserver = Arc<dyn Fn(bool) + Send + Sync>;

/// Everything a strategy may read. Built once per resolution.
pub struct ResolveContext {
    /// Provider conversation to poll, if known.
    pub conversation_id: Option<String>,
    /// Locally captured messages in arrival order.
    pub messages: Vec<Message>,
    /// Feedback the agent handed over through its tool.
    pub agent_feedback: Option<Feedback>,
    /// Told when a strategy starts and stops polling.
    pub on_polling: Option<PollingObserver>,
}

impl ResolveContext {
    /// A context with no agent feedback and no polling observer.
    pub fn new(conversation_id: Option<String>, messages: Vec<Message>) -> Self {
        Self {
            conversation_id,
            messages,
            agent_feedback: None,
            on_polling: None,
        }
    }

    fn set_polling(&self, active: bool) {
        if let Some(f) = &self.on_polling {
            f(active);
        }
    }

    fn user_texts(&self) -> Vec<&str> {
        self.messages
            .iter()
            .filter(|m| m.is_user)
            .map(|m| m.text.as_str())
            .collect()
    }
}

/// One link of the fallback chain.
#[async_trait]
pub trait FeedbackStrategy: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Tries to produce feedback from `ctx`.
    async fn attempt(&self, ctx: &ResolveContext) -> StrategyOutcome;
}

/// Runs strategies strictly in order; the first resolution wins.
pub struct FeedbackResolver {
    strategies: Vec<Box<dyn FeedbackStrategy>>,
}

impl FeedbackResolver {
    /// A chain tried in the given order.
    pub fn new(strategies: Vec<Box<dyn FeedbackStrategy>>) -> Self {
        Self { strategies }
    }

    /// The standard chain: remote transcript, remote re-poll, agent-supplied
    /// feedback, model over local messages, keyword heuristic.
    pub fn standard(
        poller: Arc<ConversationPoller>,
        completion: Arc<dyn TextCompletion>,
        first_pass: PollingPolicy,
        retry: PollingPolicy,
    ) -> Self {
        Self::new(vec![
            Box::new(RemoteTranscriptStrategy::first_pass(
                poller.clone(),
                completion.clone(),
                first_pass,
            )),
            Box::new(RemoteTranscriptStrategy::retry(poller, completion.clone(), retry)),
            Box::new(AgentFeedbackStrategy),
            Box::new(LocalTranscriptStrategy::new(completion)),
            Box::new(HeuristicStrategy),
        ])
    }

    /// Strategy names in chain order.
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// First resolution of the chain, or `None` when every strategy skipped.
    pub async fn resolve(&self, ctx: &ResolveContext) -> Option<Resolution> {
        for strategy in &self.strategies {
            match strategy.attempt(ctx).await {
                StrategyOutcome::Resolved(resolution) => {
                    info!(
                        strategy = strategy.name(),
                        source = %resolution.source,
                        overall_score = resolution.feedback.overall_score,
                        "Feedback resolved"
                    );
                    return Some(resolution);
                }
                StrategyOutcome::Skipped(reason) => {
                    info!(strategy = strategy.name(), reason = %reason, "Strategy skipped, trying next");
                }
            }
        }
        warn!("Every feedback strategy failed");
        None
    }
}

/// Polls the provider for the stored transcript and has the model analyze it.
///
/// If the model call fails or its reply is unreadable, the keyword heuristic
/// runs over the retrieved transcript instead of giving up.
pub struct RemoteTranscriptStrategy {
    name: &'static str,
    poller: Arc<ConversationPoller>,
    completion: Arc<dyn TextCompletion>,
    policy: PollingPolicy,
    source: FeedbackSource,
}

impl RemoteTranscriptStrategy {
    /// Polls right after the call ends.
    pub fn first_pass(
        poller: Arc<ConversationPoller>,
        completion: Arc<dyn TextCompletion>,
        policy: PollingPolicy,
    ) -> Self {
        Self {
            name: "remote_transcript",
            poller,
            completion,
            policy,
            source: FeedbackSource::ElevenlabsApiTranscript,
        }
    }

    /// Polls again, faster, after the first pass missed.
    pub fn retry(
        poller: Arc<ConversationPoller>,
        completion: Arc<dyn TextCompletion>,
        policy: PollingPolicy,
    ) -> Self {
        Self {
            name: "remote_polling",
            poller,
            completion,
            policy,
            source: FeedbackSource::ElevenlabsApiPolling,
        }
    }
}

#[async_trait]
impl FeedbackStrategy for RemoteTranscriptStrategy {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn attempt(&self, ctx: &ResolveContext) -> StrategyOutcome {
        let Some(conversation_id) = ctx.conversation_id.as_deref() else {
            return StrategyOutcome::Skipped("no conversation id".into());
        };

        ctx.set_polling(true);
        let record = self.poller.poll(conversation_id, &self.policy).await;
        ctx.set_polling(false);

        let Some(record) = record else {
            return StrategyOutcome::Skipped("transcript not available".into());
        };

        let prompt = analysis_prompt(&format_turns(&record.transcript));
        match self.completion.complete(&prompt).await {
            Ok(reply) => {
                if let ParsedFeedback::Parsed(feedback) = parse_feedback(&reply) {
                    return StrategyOutcome::Resolved(Resolution {
                        feedback,
                        source: self.source,
                        notes: Some(reply),
                    });
                }
                warn!(conversation_id = %conversation_id, "Analysis reply unreadable, scoring transcript locally");
            }
            Err(e) => {
                warn!(conversation_id = %conversation_id, error = %e, "Analysis call failed, scoring transcript locally");
            }
        }

        let user_turns: Vec<&str> = record
            .transcript
            .iter()
            .filter(|t| t.is_user())
            .map(|t| t.text())
            .collect();
        let (feedback, source) = heuristic::synthesize(&user_turns);
        StrategyOutcome::Resolved(Resolution {
            feedback,
            source,
            notes: None,
        })
    }
}

/// Returns feedback the agent handed over through its client tool.
pub struct AgentFeedbackStrategy;

#[async_trait]
impl FeedbackStrategy for AgentFeedbackStrategy {
    fn name(&self) -> &'static str {
        "agent_feedback_tool"
    }

    async fn attempt(&self, ctx: &ResolveContext) -> StrategyOutcome {
        match &ctx.agent_feedback {
            Some(feedback) => StrategyOutcome::Resolved(Resolution {
                feedback: feedback.clone(),
                source: FeedbackSource::AgentFeedbackTool,
                notes: None,
            }),
            None => StrategyOutcome::Skipped("agent supplied no feedback".into()),
        }
    }
}

/// Has the model analyze the locally captured messages.
pub struct LocalTranscriptStrategy {
    completion: Arc<dyn TextCompletion>,
}

impl LocalTranscriptStrategy {
    /// Analyzes with `completion`.
    pub fn new(completion: Arc<dyn TextCompletion>) -> Self {
        Self { completion }
    }
}

#[async_trait]
impl FeedbackStrategy for LocalTranscriptStrategy {
    fn name(&self) -> &'static str {
        "local_transcript"
    }

    async fn attempt(&self, ctx: &ResolveContext) -> StrategyOutcome {
        if ctx.messages.len() < MIN_MESSAGES_FOR_FEEDBACK {
            return StrategyOutcome::Skipped("not enough conversation data".into());
        }

        let prompt = analysis_prompt(&format_messages(&ctx.messages));
        match self.completion.complete(&prompt).await {
            Ok(reply) => match parse_feedback(&reply) {
                ParsedFeedback::Parsed(feedback) => StrategyOutcome::Resolved(Resolution {
                    feedback,
                    source: FeedbackSource::Claude,
                    notes: Some(reply),
                }),
                ParsedFeedback::Unparsed => StrategyOutcome::Skipped("analysis reply unreadable".into()),
            },
            Err(e) => StrategyOutcome::Skipped(format!("analysis call failed: {e}")),
        }
    }
}

/// Keyword heuristic over the local messages. Always resolves.
pub struct HeuristicStrategy;

#[async_trait]
impl FeedbackStrategy for HeuristicStrategy {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    async fn attempt(&self, ctx: &ResolveContext) -> StrategyOutcome {
        let (feedback, source) = heuristic::synthesize(&ctx.user_texts());
        StrategyOutcome::Resolved(Resolution {
            feedback,
            source,
            notes: None,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::convai::ConversationSource;
    use prepcoach_core::{ConversationRecord, PrepcoachError, PrepcoachResult, TranscriptTurn};
    use prepcoach_store::MemoryStore;
    use std::sync::atomic::{AtomicU32, Ordering};

    const GOOD_REPLY: &str = r#"```json
{"overallScore": 88, "areas": {
  "prepFramework": {"score": 90, "strengths": ["a"], "improvements": ["b"]},
  "content": {"score": 85, "strengths": ["a"], "improvements": ["b"]},
  "delivery": {"score": 87, "strengths": ["a"], "improvements": ["b"]}}}
```"#;

    struct ScriptedCompletion {
        reply: PrepcoachResult<&'static str>,
        calls: AtomicU32,
    }

    impl ScriptedCompletion {
        fn ok(reply: &'static str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply),
                calls: AtomicU32::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: Err(PrepcoachError::Http("503 Service Unavailable".into())),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl TextCompletion for ScriptedCompletion {
        async fn complete(&self, _prompt: &str) -> PrepcoachResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.reply {
                Ok(text) => Ok((*text).to_string()),
                Err(e) => Err(PrepcoachError::Http(e.to_string())),
            }
        }
    }

    struct StaticSource(Option<Vec<TranscriptTurn>>);

    #[async_trait]
    impl ConversationSource for StaticSource {
        async fn get_conversation(&self, _id: &str) -> PrepcoachResult<ConversationRecord> {
            match &self.0 {
                Some(turns) => Ok(ConversationRecord {
                    transcript: turns.clone(),
                    ..Default::default()
                }),
                None => Err(PrepcoachError::Http("404 Not Found".into())),
            }
        }
    }

    fn quick() -> PollingPolicy {
        PollingPolicy {
            max_attempts: 2,
            initial_delay_ms: 1,
            max_delay_ms: 1,
        }
    }

    fn resolver(
        source: StaticSource,
        completion: Arc<ScriptedCompletion>,
    ) -> FeedbackResolver {
        let poller = Arc::new(ConversationPoller::new(
            Arc::new(source),
            Arc::new(MemoryStore::new()),
        ));
        FeedbackResolver::standard(poller, completion, quick(), quick())
    }

    fn messages() -> Vec<Message> {
        vec![
            Message::initial_agent("What's your proposal?"),
            Message::user("We offer better value for the price."),
            Message::agent("Go on."),
            Message::user("For example, our service quality is higher."),
        ]
    }

    fn remote_turns() -> Vec<TranscriptTurn> {
        vec![
            TranscriptTurn::new("agent", "Hello"),
            TranscriptTurn::new("user", "I understand your perspective"),
            TranscriptTurn::new("user", "Our proposal is a partnership"),
        ]
    }

    #[test]
    fn test_standard_order() {
        let r = resolver(StaticSource(None), ScriptedCompletion::ok(GOOD_REPLY));
        assert_eq!(
            r.strategy_names(),
            vec![
                "remote_transcript",
                "remote_polling",
                "agent_feedback_tool",
                "local_transcript",
                "heuristic"
            ]
        );
    }

    #[tokio::test]
    async fn test_remote_transcript_first() {
        let completion = ScriptedCompletion::ok(GOOD_REPLY);
        let r = resolver(StaticSource(Some(remote_turns())), completion.clone());
        let ctx = ResolveContext::new(Some("conv_1".into()), messages());

        let res = r.resolve(&ctx).await.unwrap();
        assert_eq!(res.source, FeedbackSource::ElevenlabsApiTranscript);
        assert_eq!(res.feedback.overall_score, 88);
        assert!(res.notes.is_some());
        assert_eq!(completion.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remote_model_failure_scores_remote_transcript() {
        let r = resolver(StaticSource(Some(remote_turns())), ScriptedCompletion::failing());
        let ctx = ResolveContext::new(Some("conv_1".into()), messages());

        let res = r.resolve(&ctx).await.unwrap();
        assert_eq!(res.source, FeedbackSource::SyntheticFromTranscript);
        // understand + perspective + proposal = 3 delivery hits; partnership = 1 content hit.
        assert_eq!(res.feedback.areas.delivery.score, 80);
        assert_eq!(res.feedback.areas.content.score, 65);
    }

    #[tokio::test]
    async fn test_without_id_goes_to_local_model() {
        let r = resolver(StaticSource(None), ScriptedCompletion::ok(GOOD_REPLY));
        let ctx = ResolveContext::new(None, messages());
        let res = r.resolve(&ctx).await.unwrap();
        assert_eq!(res.source, FeedbackSource::Claude);
    }

    #[tokio::test]
    async fn test_agent_feedback_before_local_model() {
        let completion = ScriptedCompletion::ok(GOOD_REPLY);
        let r = resolver(StaticSource(None), completion.clone());
        let mut ctx = ResolveContext::new(Some("conv_1".into()), messages());
        ctx.agent_feedback = Some(heuristic::default_feedback());

        let res = r.resolve(&ctx).await.unwrap();
        assert_eq!(res.source, FeedbackSource::AgentFeedbackTool);
        assert_eq!(completion.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_everything_down_falls_to_heuristic() {
        let r = resolver(StaticSource(None), ScriptedCompletion::failing());
        let ctx = ResolveContext::new(Some("conv_1".into()), messages());
        let res = r.resolve(&ctx).await.unwrap();
        assert_eq!(res.source, FeedbackSource::SyntheticFromTranscript);
        assert!(res.feedback.is_well_formed());
    }

    #[tokio::test]
    async fn test_polling_flag_toggles() {
        let flags = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let r = resolver(StaticSource(None), ScriptedCompletion::failing());
        let mut ctx = ResolveContext::new(Some("conv_1".into()), messages());
        let sink = flags.clone();
        ctx.on_polling = Some(Arc::new(move |active| sink.lock().push(active)));

        r.resolve(&ctx).await.unwrap();
        assert_eq!(*flags.lock(), vec![true, false, true, false]);
    }
}
