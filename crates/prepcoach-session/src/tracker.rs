use crate::session::ConversationSession;
use crate::signal::{
    self, Author, LifecycleSignal, FEEDBACK_TOOL_REPLY, NAME_TOOL_REPLY, START_TOOL_REPLY,
};
use crate::widget::{ClientToolHandler, ConvaiWidget, EventHandler, WidgetEvent};
use chrono::Utc;
use futures_util::FutureExt;
use parking_lot::RwLock;
use prepcoach_core::{Message, Speaker};
use prepcoach_store::kv::CONVERSATION_ID_KEY;
use prepcoach_store::{ConversationFields, KeyValueStore, MessageLog, PersistenceGateway};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Why a feedback request was published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
    /// A new agent message arrived and the session became eligible.
    AgentMessage,
    /// The agent finished a turn on an eligible session.
    AgentStoppedSpeaking,
    /// The agent called `triggerFeedback`.
    ClientTool,
    /// The call ended.
    CallEnded,
    /// The user asked for feedback.
    Manual,
}

/// Sink for "feedback requested" notifications.
///
/// Implementations must not block; the feedback worker decides whether a
/// request leads to any work.
pub trait FeedbackTrigger: Send + Sync {
    /// Publishes a feedback request.
    fn request_feedback(&self, reason: TriggerReason);

    /// Drops feedback produced for the previous session and stops any
    /// generation still running for it.
    fn reset_feedback(&self);
}

/// Shared, read-mostly view of the current [`ConversationSession`].
#[derive(Clone, Default)]
pub struct SessionHandle {
    inner: Arc<RwLock<ConversationSession>>,
}

impl SessionHandle {
    /// An empty session.
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of the current session.
    pub fn snapshot(&self) -> ConversationSession {
        self.inner.read().clone()
    }

    /// The provider conversation id, once a call has started.
    pub fn conversation_id(&self) -> Option<String> {
        self.inner.read().conversation_id.clone()
    }

    /// Whether enough conversation exists to score.
    pub fn should_generate_feedback(&self) -> bool {
        self.inner.read().should_generate_feedback()
    }

    /// Number of messages so far.
    pub fn message_count(&self) -> usize {
        self.inner.read().message_count()
    }

    /// Swaps in a whole session, e.g. one rebuilt from a saved transcript.
    pub fn replace(&self, session: ConversationSession) {
        *self.inner.write() = session;
    }

    fn write(&self) -> parking_lot::RwLockWriteGuard<'_, ConversationSession> {
        self.inner.write()
    }
}

/// Observes conversation lifecycle signals and owns the session state.
pub struct SessionTracker {
    session: SessionHandle,
    kv: Arc<dyn KeyValueStore>,
    gateway: Arc<dyn PersistenceGateway>,
    trigger: Arc<dyn FeedbackTrigger>,
}

impl SessionTracker {
    /// A tracker writing to `session`, mirroring the conversation id into
    /// `kv`, logging through `gateway` and publishing to `trigger`.
    pub fn new(
        session: SessionHandle,
        kv: Arc<dyn KeyValueStore>,
        gateway: Arc<dyn PersistenceGateway>,
        trigger: Arc<dyn FeedbackTrigger>,
    ) -> Self {
        Self {
            session,
            kv,
            gateway,
            trigger,
        }
    }

    /// The session this tracker writes.
    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Registers listeners and client tools on `widget`. Every callback only
    /// forwards a [`LifecycleSignal`]; feed the returned receiver to
    /// [`run`](Self::run) to process them in arrival order.
    pub fn attach(widget: &dyn ConvaiWidget) -> mpsc::UnboundedReceiver<LifecycleSignal> {
        let (tx, rx) = mpsc::unbounded_channel();

        for event in WidgetEvent::ALL {
            widget.add_event_listener(event, forward(&tx, event));
        }

        let feedback_tx = tx.clone();
        widget.register_client_tool(
            "triggerFeedback",
            Arc::new(move |payload: Value| {
                let _ = feedback_tx.send(LifecycleSignal::FeedbackToolCalled(payload));
                async { FEEDBACK_TOOL_REPLY.to_string() }.boxed()
            }),
        );
        widget.register_client_tool(
            "triggerName",
            Arc::new(|payload: Value| {
                debug!(payload = %payload, "triggerName called");
                async { NAME_TOOL_REPLY.to_string() }.boxed()
            }),
        );
        let start_tx = tx;
        let start_tool: ClientToolHandler = Arc::new(move |_payload: Value| {
            let _ = start_tx.send(LifecycleSignal::StartNegotiation);
            async { START_TOOL_REPLY.to_string() }.boxed()
        });
        widget.register_client_tool("triggerStartNegotiation", start_tool);

        rx
    }

    /// Processes signals until every sender is dropped.
    pub async fn run(&self, mut rx: mpsc::UnboundedReceiver<LifecycleSignal>) {
        while let Some(signal) = rx.recv().await {
            self.handle(signal).await;
        }
        debug!("Signal channel closed");
    }

    /// Loads the conversation id mirrored by a previous run, if the session
    /// has none yet.
    pub async fn restore(&self) {
        if self.session.conversation_id().is_some() {
            return;
        }
        match self.kv.get(CONVERSATION_ID_KEY).await {
            Ok(Some(id)) => {
                info!(conversation_id = %id, "Restored conversation id");
                self.session.write().conversation_id = Some(id);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Failed to read stored conversation id"),
        }
    }

    /// The conversation id from the session, else from durable storage.
    pub async fn current_conversation_id(&self) -> Option<String> {
        if let Some(id) = self.session.conversation_id() {
            return Some(id);
        }
        self.kv.get(CONVERSATION_ID_KEY).await.ok().flatten()
    }

    /// Applies one signal to the session.
    pub async fn handle(&self, signal: LifecycleSignal) {
        match signal {
            LifecycleSignal::Ready => info!("Conversation widget ready"),
            LifecycleSignal::CallStart(payload) => self.on_call_start(&payload).await,
            LifecycleSignal::AgentMessage(payload) => {
                let text = signal::message_text(&payload, Author::Agent);
                self.on_message(text, Author::Agent).await;
            }
            LifecycleSignal::UserMessage(payload) => {
                let text = signal::message_text(&payload, Author::User);
                self.on_message(text, Author::User).await;
            }
            LifecycleSignal::CallEnd(_) => self.on_call_end().await,
            LifecycleSignal::AgentStoppedSpeaking => {
                let eligible = {
                    let mut s = self.session.write();
                    s.started = true;
                    s.should_generate_feedback()
                };
                if eligible {
                    self.trigger.request_feedback(TriggerReason::AgentStoppedSpeaking);
                }
            }
            LifecycleSignal::WidgetInteraction | LifecycleSignal::StartNegotiation => {
                self.session.write().started = true;
            }
            LifecycleSignal::MicrophoneActivity(active) => {
                self.session.write().mic_active = active;
            }
            LifecycleSignal::Error(text) => {
                warn!(error = %text, "Conversation widget error");
                self.session.write().last_error = Some(text);
            }
            LifecycleSignal::FeedbackToolCalled(payload) => {
                if let Some(feedback) = signal::agent_feedback(&payload) {
                    info!(overall_score = feedback.overall_score, "Agent supplied feedback");
                    self.session.write().agent_feedback = Some(feedback);
                }
                self.trigger.request_feedback(TriggerReason::ClientTool);
            }
        }
    }

    /// Publishes a user-initiated feedback request.
    pub fn request_feedback(&self) {
        self.trigger.request_feedback(TriggerReason::Manual);
    }

    /// Clears the session and any feedback generated for it. The durable
    /// conversation id is left for the next call start to overwrite.
    pub fn reset(&self) {
        self.session.replace(ConversationSession::new());
        self.trigger.reset_feedback();
        info!("Session reset");
    }

    async fn on_call_start(&self, payload: &Value) {
        let Some(id) = signal::conversation_id(payload) else {
            debug!("Call start without a conversation id");
            return;
        };

        let previous = {
            let mut s = self.session.write();
            s.started = true;
            if s.conversation_id.as_deref() == Some(id.as_str()) {
                debug!(conversation_id = %id, "Conversation id already tracked");
                return;
            }
            s.conversation_id.replace(id.clone())
        };
        if let Some(previous) = previous {
            info!(conversation_id = %id, previous = %previous, "New conversation replaces the tracked one");
            self.trigger.reset_feedback();
        }
        info!(conversation_id = %id, "Conversation started");

        match self.kv.get(CONVERSATION_ID_KEY).await {
            Ok(Some(stored)) if stored == id => {}
            _ => {
                if let Err(e) = self.kv.set(CONVERSATION_ID_KEY, &id).await {
                    warn!(conversation_id = %id, error = %e, "Failed to persist conversation id");
                }
            }
        }

        match self.gateway.conversation_exists(&id).await {
            Ok(true) => debug!(conversation_id = %id, "Conversation row already exists"),
            Ok(false) => {
                let fields = ConversationFields {
                    start_time: Some(Utc::now()),
                    ..Default::default()
                };
                if let Err(e) = self.gateway.upsert_conversation(&id, &fields).await {
                    warn!(conversation_id = %id, error = %e, "Failed to store conversation start");
                }
            }
            Err(e) => warn!(conversation_id = %id, error = %e, "Failed to check conversation row"),
        }
    }

    async fn on_message(&self, text: String, author: Author) {
        let (speaker, auto_trigger) = {
            let mut s = self.session.write();
            let message = match author {
                Author::User => Message::user(text.clone()),
                Author::Agent if s.messages.is_empty() => Message::initial_agent(text.clone()),
                Author::Agent => Message::agent(text.clone()),
            };
            if author == Author::Agent {
                s.started = true;
            }
            let speaker = message.speaker();
            s.add_message(message);
            (speaker, s.last_message_is_agent() && s.should_generate_feedback())
        };
        debug!(speaker = %speaker, "Message appended");

        if let Some(id) = self.current_conversation_id().await {
            self.log_message(&id, speaker, &text).await;
        }

        if auto_trigger {
            self.trigger.request_feedback(TriggerReason::AgentMessage);
        }
    }

    async fn log_message(&self, conversation_id: &str, speaker: Speaker, text: &str) {
        let log = MessageLog::new(conversation_id, speaker, text);
        if let Err(e) = self.gateway.insert_message_log(&log).await {
            warn!(conversation_id = %conversation_id, error = %e, "Failed to log message");
        }
    }

    async fn on_call_end(&self) {
        let Some(id) = self.current_conversation_id().await else {
            debug!("Call ended before a conversation id was known");
            return;
        };
        info!(conversation_id = %id, "Conversation ended");

        let fields = ConversationFields {
            end_time: Some(Utc::now()),
            ..Default::default()
        };
        if let Err(e) = self.gateway.upsert_conversation(&id, &fields).await {
            warn!(conversation_id = %id, error = %e, "Failed to store conversation end");
        }
        self.trigger.request_feedback(TriggerReason::CallEnded);
    }
}

fn forward(tx: &mpsc::UnboundedSender<LifecycleSignal>, event: WidgetEvent) -> EventHandler {
    let tx = tx.clone();
    Arc::new(move |payload: Value| {
        let signal = match event {
            WidgetEvent::Ready => LifecycleSignal::Ready,
            WidgetEvent::CallStart => LifecycleSignal::CallStart(payload),
            WidgetEvent::CallEnd => LifecycleSignal::CallEnd(payload),
            WidgetEvent::AgentMessage => LifecycleSignal::AgentMessage(payload),
            WidgetEvent::UserMessage => LifecycleSignal::UserMessage(payload),
            WidgetEvent::AgentStoppedSpeaking => LifecycleSignal::AgentStoppedSpeaking,
            WidgetEvent::WidgetInteraction => LifecycleSignal::WidgetInteraction,
            WidgetEvent::MicrophoneActivity => {
                LifecycleSignal::MicrophoneActivity(signal::mic_active(&payload))
            }
            WidgetEvent::Error => LifecycleSignal::Error(signal::error_text(&payload)),
        };
        if tx.send(signal).is_err() {
            debug!(event = event.name(), "Session tracker gone, dropping event");
        }
    })
}
