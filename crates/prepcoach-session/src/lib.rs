//! Conversation session tracking for PrepCoach.
//!
//! The [`SessionTracker`] listens to the voice widget through the injected
//! [`ConvaiWidget`] capability, normalizes its heterogeneous payloads, keeps
//! the [`ConversationSession`] (conversation id, messages, flags) and
//! publishes feedback requests through a [`FeedbackTrigger`].

/// Conversation session state.
pub mod session;
/// Lifecycle signals and payload normalization.
pub mod signal;
/// The session tracker.
pub mod tracker;
/// Widget capability interface.
pub mod widget;

pub use session::{ConversationSession, MIN_MESSAGES_FOR_FEEDBACK};
pub use signal::LifecycleSignal;
pub use tracker::{FeedbackTrigger, SessionHandle, SessionTracker, TriggerReason};
pub use widget::{ClientToolHandler, ConvaiWidget, EventHandler, LocalWidget, WidgetEvent};
