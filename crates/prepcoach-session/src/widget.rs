use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Events the conversational widget emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WidgetEvent {
    /// The widget loaded.
    Ready,
    /// Carries the conversation id.
    CallStart,
    /// The call ended.
    CallEnd,
    /// Carries the agent text in one of several shapes.
    AgentMessage,
    /// Carries the user transcript in one of several shapes.
    UserMessage,
    /// The agent finished its turn.
    AgentStoppedSpeaking,
    /// Click or keypress inside the widget.
    WidgetInteraction,
    /// Microphone opened or closed.
    MicrophoneActivity,
    /// Error raised by the widget.
    Error,
}

impl WidgetEvent {
    /// Every event, in registration order.
    pub const ALL: [WidgetEvent; 9] = [
        WidgetEvent::Ready,
        WidgetEvent::CallStart,
        WidgetEvent::CallEnd,
        WidgetEvent::AgentMessage,
        WidgetEvent::UserMessage,
        WidgetEvent::AgentStoppedSpeaking,
        WidgetEvent::WidgetInteraction,
        WidgetEvent::MicrophoneActivity,
        WidgetEvent::Error,
    ];

    /// The event name on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            WidgetEvent::Ready => "ready",
            WidgetEvent::CallStart => "widgetCallStart",
            WidgetEvent::CallEnd => "widgetCallEnd",
            WidgetEvent::AgentMessage => "agentMessage",
            WidgetEvent::UserMessage => "userMessage",
            WidgetEvent::AgentStoppedSpeaking => "agentStoppedSpeaking",
            WidgetEvent::WidgetInteraction => "widgetInteraction",
            WidgetEvent::MicrophoneActivity => "microphoneActivity",
            WidgetEvent::Error => "error",
        }
    }

    /// Inverse of [`name`](Self::name).
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.name() == name)
    }
}

/// Callback for a widget event. Receives the raw payload.
pub type EventHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Callback for a client tool the agent may invoke; resolves to the text
/// handed back to the agent.
pub type ClientToolHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, String> + Send + Sync>;

/// Capability object for the conversational voice widget.
///
/// The session tracker is given one of these rather than reaching for an
/// ambient global, so tests can drive it with [`LocalWidget`].
pub trait ConvaiWidget: Send + Sync {
    /// Calls `handler` with the payload of every `event`.
    fn add_event_listener(&self, event: WidgetEvent, handler: EventHandler);

    /// Exposes `handler` to the agent as the tool `name`.
    fn register_client_tool(&self, name: &str, handler: ClientToolHandler);
}

/// In-process widget: listeners and tools are held in maps and invoked by
/// [`emit`](Self::emit) and [`call_tool`](Self::call_tool).
#[derive(Default)]
pub struct LocalWidget {
    listeners: RwLock<HashMap<WidgetEvent, Vec<EventHandler>>>,
    tools: RwLock<HashMap<String, ClientToolHandler>>,
}

impl LocalWidget {
    /// A widget with no listeners or tools.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers `payload` to every listener of `event`. Returns the number
    /// of listeners invoked.
    pub fn emit(&self, event: WidgetEvent, payload: Value) -> usize {
        let handlers = self.listeners.read().get(&event).cloned().unwrap_or_default();
        for handler in &handlers {
            handler(payload.clone());
        }
        handlers.len()
    }

    /// Invokes a registered client tool, or `None` if no such tool exists.
    pub async fn call_tool(&self, name: &str, payload: Value) -> Option<String> {
        let handler = self.tools.read().get(name).cloned()?;
        Some(handler(payload).await)
    }

    /// Registered tool names, sorted.
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl ConvaiWidget for LocalWidget {
    fn add_event_listener(&self, event: WidgetEvent, handler: EventHandler) {
        self.listeners.write().entry(event).or_default().push(handler);
    }

    fn register_client_tool(&self, name: &str, handler: ClientToolHandler) {
        self.tools.write().insert(name.to_string(), handler);
    }
}
