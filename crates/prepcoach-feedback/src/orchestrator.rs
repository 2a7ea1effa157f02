//! Single-flight feedback generation.
//!
//! One worker task owns the generation state. Requests arrive over a channel
//! and are admitted only when the session is eligible, no feedback has been
//! produced yet, and no generation is running. Progress is published on a
//! `watch` channel for any number of observers.

use crate::resolver::{FeedbackResolver, ResolveContext, Resolution};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use prepcoach_core::{Feedback, FeedbackSource};
use prepcoach_session::{FeedbackTrigger, SessionHandle, TriggerReason};
use prepcoach_store::kv::CONVERSATION_ID_KEY;
use prepcoach_store::{FeedbackLog, KeyValueStore, PersistenceGateway};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

const GENERATION_FAILED: &str = "Failed to generate feedback. Please try again.";

/// Observable generation state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeedbackStatus {
    /// A generation is running.
    pub is_loading: bool,
    /// The running generation is polling the provider.
    pub is_polling: bool,
    /// The feedback produced for this session.
    pub feedback: Option<Feedback>,
    /// Which strategy produced `feedback`.
    pub source: Option<FeedbackSource>,
    /// User-facing message for the last failed generation.
    pub last_error: Option<String>,
}

/// What became of one generation request.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerateOutcome {
    /// This request ran the chain.
    Generated(Resolution),
    /// Feedback already exists for this session.
    Cached(Resolution),
    /// Another generation is running; this request was dropped.
    InFlight,
    /// Fewer messages than scoring needs.
    InsufficientConversation,
    /// Every strategy failed.
    Failed(String),
    /// The generation was abandoned by a reset or shutdown.
    Cancelled,
}

enum FeedbackCommand {
    Generate {
        reason: TriggerReason,
        reply: Option<oneshot::Sender<GenerateOutcome>>,
    },
    Reset {
        reply: Option<oneshot::Sender<()>>,
    },
}

type Finished = (Option<String>, Option<Resolution>);

/// Owns the resolver and the single in-flight generation.
pub struct FeedbackOrchestrator {
    resolver: Arc<FeedbackResolver>,
    session: SessionHandle,
    kv: Arc<dyn KeyValueStore>,
    gateway: Arc<dyn PersistenceGateway>,
    status: Arc<watch::Sender<FeedbackStatus>>,
}

impl FeedbackOrchestrator {
    /// A worker resolving feedback for `session`.
    pub fn new(
        resolver: FeedbackResolver,
        session: SessionHandle,
        kv: Arc<dyn KeyValueStore>,
        gateway: Arc<dyn PersistenceGateway>,
    ) -> Self {
        let (status, _) = watch::channel(FeedbackStatus::default());
        Self {
            resolver: Arc::new(resolver),
            session,
            kv,
            gateway,
            status: Arc::new(status),
        }
    }

    /// Spawns the worker on the current runtime and returns its handle.
    pub fn spawn(self) -> OrchestratorHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let status = self.status.subscribe();
        tokio::spawn(self.run(rx));
        OrchestratorHandle { tx, status }
    }

    async fn run(self, mut rx: mpsc::UnboundedReceiver<FeedbackCommand>) {
        let mut cached: Option<Resolution> = None;
        let mut in_flight: Option<BoxFuture<'static, Finished>> = None;
        let mut waiting: Option<oneshot::Sender<GenerateOutcome>> = None;

        loop {
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    None => break,
                    Some(FeedbackCommand::Generate { reason, mut reply }) => {
                        let outcome = if !self.session.should_generate_feedback() {
                            debug!(reason = ?reason, messages = self.session.message_count(), "Not enough conversation for feedback");
                            Some(GenerateOutcome::InsufficientConversation)
                        } else if let Some(existing) = &cached {
                            debug!(reason = ?reason, "Feedback already generated");
                            Some(GenerateOutcome::Cached(existing.clone()))
                        } else if in_flight.is_some() {
                            debug!(reason = ?reason, "Feedback generation already in progress");
                            Some(GenerateOutcome::InFlight)
                        } else {
                            info!(reason = ?reason, "Starting feedback generation");
                            in_flight = Some(self.start().await);
                            waiting = reply.take();
                            None
                        };
                        if let (Some(outcome), Some(reply)) = (outcome, reply) {
                            let _ = reply.send(outcome);
                        }
                    }
                    Some(FeedbackCommand::Reset { reply }) => {
                        if in_flight.take().is_some() {
                            info!("Abandoning in-flight feedback generation");
                        }
                        if let Some(w) = waiting.take() {
                            let _ = w.send(GenerateOutcome::Cancelled);
                        }
                        cached = None;
                        self.status.send_replace(FeedbackStatus::default());
                        if let Some(reply) = reply {
                            let _ = reply.send(());
                        }
                    }
                },
                (conversation_id, resolution) = drive(&mut in_flight), if in_flight.is_some() => {
                    in_flight = None;
                    let outcome = match resolution {
                        Some(resolution) => {
                            self.finish(conversation_id.as_deref(), &resolution).await;
                            cached = Some(resolution.clone());
                            GenerateOutcome::Generated(resolution)
                        }
                        None => {
                            self.status.send_modify(|s| {
                                s.is_loading = false;
                                s.is_polling = false;
                                s.last_error = Some(GENERATION_FAILED.to_string());
                            });
                            GenerateOutcome::Failed(GENERATION_FAILED.to_string())
                        }
                    };
                    if let Some(w) = waiting.take() {
                        let _ = w.send(outcome);
                    }
                }
            }
        }

        if let Some(w) = waiting.take() {
            let _ = w.send(GenerateOutcome::Cancelled);
        }
        debug!("Feedback worker stopped");
    }

    async fn start(&self) -> BoxFuture<'static, Finished> {
        let conversation_id = match self.session.conversation_id() {
            Some(id) => Some(id),
            None => self.kv.get(CONVERSATION_ID_KEY).await.ok().flatten(),
        };
        let snapshot = self.session.snapshot();

        self.status.send_modify(|s| {
            s.is_loading = true;
            s.last_error = None;
        });

        let status = self.status.clone();
        let ctx = ResolveContext {
            conversation_id: conversation_id.clone(),
            messages: snapshot.messages,
            agent_feedback: snapshot.agent_feedback,
            on_polling: Some(Arc::new(move |active| {
                status.send_modify(|s| s.is_polling = active);
            })),
        };
        let resolver = self.resolver.clone();
        async move {
            let resolution = resolver.resolve(&ctx).await;
            (conversation_id, resolution)
        }
        .boxed()
    }

    async fn finish(&self, conversation_id: Option<&str>, resolution: &Resolution) {
        self.status.send_modify(|s| {
            s.is_loading = false;
            s.is_polling = false;
            s.feedback = Some(resolution.feedback.clone());
            s.source = Some(resolution.source);
        });

        let Some(id) = conversation_id else {
            debug!("No conversation id, feedback not logged");
            return;
        };
        let log = FeedbackLog::new(
            id,
            &resolution.feedback,
            resolution.source,
            resolution.notes.clone(),
        );
        if let Err(e) = self.gateway.insert_feedback_log(&log).await {
            warn!(conversation_id = %id, error = %e, "Failed to store feedback log");
        }
    }
}

async fn drive(in_flight: &mut Option<BoxFuture<'static, Finished>>) -> Finished {
    match in_flight.as_mut() {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

/// Cheap, cloneable front end to the feedback worker.
#[derive(Clone)]
pub struct OrchestratorHandle {
    tx: mpsc::UnboundedSender<FeedbackCommand>,
    status: watch::Receiver<FeedbackStatus>,
}

impl OrchestratorHandle {
    /// Requests feedback and waits for the request's outcome.
    pub async fn generate(&self, reason: TriggerReason) -> GenerateOutcome {
        let (reply, rx) = oneshot::channel();
        let cmd = FeedbackCommand::Generate {
            reason,
            reply: Some(reply),
        };
        if self.tx.send(cmd).is_err() {
            return GenerateOutcome::Cancelled;
        }
        rx.await.unwrap_or(GenerateOutcome::Cancelled)
    }

    /// Fire-and-forget request.
    pub fn request(&self, reason: TriggerReason) {
        let cmd = FeedbackCommand::Generate {
            reason,
            reply: None,
        };
        if self.tx.send(cmd).is_err() {
            debug!("Feedback worker gone, request dropped");
        }
    }

    /// Drops cached feedback and abandons any running generation.
    pub async fn reset(&self) {
        let (reply, rx) = oneshot::channel();
        let cmd = FeedbackCommand::Reset { reply: Some(reply) };
        if self.tx.send(cmd).is_ok() {
            let _ = rx.await;
        }
    }

    /// The latest published status.
    pub fn status(&self) -> FeedbackStatus {
        self.status.borrow().clone()
    }

    /// A receiver notified on every status change.
    pub fn subscribe(&self) -> watch::Receiver<FeedbackStatus> {
        self.status.clone()
    }
}

impl FeedbackTrigger for OrchestratorHandle {
    fn request_feedback(&self, reason: TriggerReason) {
        self.request(reason);
    }

    /// Queued behind earlier commands, ahead of any later request.
    fn reset_feedback(&self) {
        if self.tx.send(FeedbackCommand::Reset { reply: None }).is_err() {
            debug!("Feedback worker gone, reset dropped");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::resolver::{FeedbackStrategy, StrategyOutcome};
    use async_trait::async_trait;
    use prepcoach_core::Message;
    use prepcoach_session::ConversationSession;
    use prepcoach_store::{MemoryKeyValueStore, MemoryStore};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Resolves with the exemplar feedback once the gate opens.
    struct GatedStrategy {
        gate: Arc<Notify>,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl FeedbackStrategy for GatedStrategy {
        fn name(&self) -> &'static str {
            "gated"
        }

        async fn attempt(&self, _ctx: &ResolveContext) -> StrategyOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            StrategyOutcome::Resolved(Resolution {
                feedback: crate::heuristic::default_feedback(),
                source: FeedbackSource::Claude,
                notes: Some("raw".into()),
            })
        }
    }

    struct Fixture {
        handle: OrchestratorHandle,
        session: SessionHandle,
        store: Arc<MemoryStore>,
        gate: Arc<Notify>,
        calls: Arc<AtomicU32>,
    }

    fn fixture(strategies: Option<Vec<Box<dyn FeedbackStrategy>>>) -> Fixture {
        let gate = Arc::new(Notify::new());
        let calls = Arc::new(AtomicU32::new(0));
        let strategies = strategies.unwrap_or_else(|| {
            vec![Box::new(GatedStrategy {
                gate: gate.clone(),
                calls: calls.clone(),
            })]
        });
        let session = SessionHandle::new();
        let store = Arc::new(MemoryStore::new());
        let handle = FeedbackOrchestrator::new(
            FeedbackResolver::new(strategies),
            session.clone(),
            Arc::new(MemoryKeyValueStore::new()),
            store.clone(),
        )
        .spawn();
        Fixture {
            handle,
            session,
            store,
            gate,
            calls,
        }
    }

    fn eligible(session: &SessionHandle, conversation_id: Option<&str>) {
        let mut s = ConversationSession::new();
        s.conversation_id = conversation_id.map(str::to_string);
        s.add_message(Message::initial_agent("Your offer?"));
        s.add_message(Message::user("Our price reflects quality."));
        s.add_message(Message::agent("Too high."));
        session.replace(s);
    }

    async fn wait_loading(handle: &OrchestratorHandle) {
        let mut rx = handle.subscribe();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| s.is_loading))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_insufficient_conversation_is_noop() {
        let f = fixture(None);
        f.session.replace(ConversationSession::new());
        assert_eq!(
            f.handle.generate(TriggerReason::Manual).await,
            GenerateOutcome::InsufficientConversation
        );
        assert_eq!(f.calls.load(Ordering::SeqCst), 0);
        assert!(!f.handle.status().is_loading);
    }

    #[tokio::test]
    async fn test_single_flight_then_cached() {
        let f = fixture(None);
        eligible(&f.session, Some("conv_1"));

        let first = {
            let handle = f.handle.clone();
            tokio::spawn(async move { handle.generate(TriggerReason::AgentMessage).await })
        };
        wait_loading(&f.handle).await;

        assert_eq!(
            f.handle.generate(TriggerReason::CallEnded).await,
            GenerateOutcome::InFlight
        );
        f.gate.notify_one();

        let GenerateOutcome::Generated(resolution) = first.await.unwrap() else {
            panic!("expected generated feedback");
        };
        assert_eq!(resolution.source, FeedbackSource::Claude);
        assert_eq!(f.calls.load(Ordering::SeqCst), 1);

        let status = f.handle.status();
        assert!(!status.is_loading);
        assert_eq!(status.source, Some(FeedbackSource::Claude));
        assert_eq!(status.feedback.unwrap().overall_score, 76);

        let logs = f.store.feedback_logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].conversation_id, "conv_1");
        assert_eq!(logs[0].feedback_notes.as_deref(), Some("raw"));

        assert!(matches!(
            f.handle.generate(TriggerReason::Manual).await,
            GenerateOutcome::Cached(_)
        ));
        assert_eq!(f.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reset_abandons_in_flight() {
        let f = fixture(None);
        eligible(&f.session, None);

        let first = {
            let handle = f.handle.clone();
            tokio::spawn(async move { handle.generate(TriggerReason::Manual).await })
        };
        wait_loading(&f.handle).await;
        f.handle.reset().await;

        assert_eq!(first.await.unwrap(), GenerateOutcome::Cancelled);
        assert_eq!(f.handle.status(), FeedbackStatus::default());
        assert!(f.store.feedback_logs().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_chain_reports_failure() {
        let f = fixture(Some(Vec::new()));
        eligible(&f.session, Some("conv_1"));

        assert_eq!(
            f.handle.generate(TriggerReason::Manual).await,
            GenerateOutcome::Failed(GENERATION_FAILED.to_string())
        );
        let status = f.handle.status();
        assert!(!status.is_loading);
        assert_eq!(status.last_error.as_deref(), Some(GENERATION_FAILED));
        assert!(f.store.feedback_logs().is_empty());
    }

    #[tokio::test]
    async fn test_without_conversation_id_nothing_is_logged() {
        let f = fixture(None);
        eligible(&f.session, None);
        f.gate.notify_one();

        assert!(matches!(
            f.handle.generate(TriggerReason::Manual).await,
            GenerateOutcome::Generated(_)
        ));
        assert!(f.store.feedback_logs().is_empty());
    }

    #[tokio::test]
    async fn test_trigger_reset_clears_cached_feedback() {
        let f = fixture(None);
        eligible(&f.session, Some("conv_1"));
        f.gate.notify_one();
        assert!(matches!(
            f.handle.generate(TriggerReason::Manual).await,
            GenerateOutcome::Generated(_)
        ));

        // Next call: the tracker swaps the session and resets through the trigger.
        eligible(&f.session, Some("conv_2"));
        FeedbackTrigger::reset_feedback(&f.handle);
        f.gate.notify_one();

        let GenerateOutcome::Generated(_) = f.handle.generate(TriggerReason::Manual).await else {
            panic!("expected a fresh generation after reset");
        };
        assert_eq!(f.calls.load(Ordering::SeqCst), 2);
        let logs = f.store.feedback_logs();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[1].conversation_id, "conv_2");
    }

    #[tokio::test]
    async fn test_trigger_reset_abandons_in_flight() {
        let f = fixture(None);
        eligible(&f.session, None);

        let first = {
            let handle = f.handle.clone();
            tokio::spawn(async move { handle.generate(TriggerReason::AgentMessage).await })
        };
        wait_loading(&f.handle).await;
        FeedbackTrigger::reset_feedback(&f.handle);

        assert_eq!(first.await.unwrap(), GenerateOutcome::Cancelled);
        assert!(!f.handle.status().is_loading);
    }
}
