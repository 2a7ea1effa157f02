#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Drives a [`SessionTracker`] end to end through an in-process widget.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;

use prepcoach_session::signal::{FEEDBACK_TOOL_REPLY, NAME_TOOL_REPLY, START_TOOL_REPLY};
use prepcoach_session::{
    FeedbackTrigger, LocalWidget, SessionHandle, SessionTracker, TriggerReason, WidgetEvent,
};
use prepcoach_store::{MemoryKeyValueStore, MemoryStore};

#[derive(Default)]
struct RecordingTrigger {
    reasons: Mutex<Vec<TriggerReason>>,
    resets: Mutex<usize>,
}

impl FeedbackTrigger for RecordingTrigger {
    fn request_feedback(&self, reason: TriggerReason) {
        self.reasons.lock().push(reason);
    }

    fn reset_feedback(&self) {
        *self.resets.lock() += 1;
    }
}

fn tracker(trigger: Arc<RecordingTrigger>, store: Arc<MemoryStore>) -> SessionTracker {
    SessionTracker::new(
        SessionHandle::new(),
        Arc::new(MemoryKeyValueStore::new()),
        store,
        trigger,
    )
}

// ---------------------------------------------------------------------------
// Widget wiring
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_full_call_through_widget() {
    let trigger = Arc::new(RecordingTrigger::default());
    let store = Arc::new(MemoryStore::new());
    let tracker = tracker(trigger.clone(), store.clone());

    let widget = LocalWidget::new();
    let rx = SessionTracker::attach(&widget);

    widget.emit(WidgetEvent::Ready, json!(null));
    widget.emit(WidgetEvent::CallStart, json!({"detail": {"conversationId": "conv_live"}}));
    widget.emit(WidgetEvent::AgentMessage, json!({"message": "Let's talk terms."}));
    widget.emit(WidgetEvent::UserMessage, json!({"text": "The price is too high."}));
    widget.emit(WidgetEvent::MicrophoneActivity, json!({"isActive": true}));
    widget.emit(WidgetEvent::AgentMessage, json!({"response": "What would work?"}));
    widget.emit(WidgetEvent::Error, json!({"message": "audio glitch"}));
    widget.emit(WidgetEvent::CallEnd, json!({}));
    drop(widget);

    tracker.run(rx).await;

    let session = tracker.session().snapshot();
    assert_eq!(session.conversation_id.as_deref(), Some("conv_live"));
    assert_eq!(session.messages.len(), 3);
    assert!(session.mic_active);
    assert_eq!(session.last_error.as_deref(), Some("audio glitch"));
    assert_eq!(store.message_logs("conv_live").len(), 3);
    assert!(store.conversation("conv_live").unwrap().end_time.is_some());
    assert_eq!(
        *trigger.reasons.lock(),
        vec![TriggerReason::AgentMessage, TriggerReason::CallEnded]
    );
    // The first call of a session has nothing to clear.
    assert_eq!(*trigger.resets.lock(), 0);
}

#[tokio::test]
async fn test_client_tools() {
    let trigger = Arc::new(RecordingTrigger::default());
    let tracker = tracker(trigger.clone(), Arc::new(MemoryStore::new()));

    let widget = LocalWidget::new();
    let rx = SessionTracker::attach(&widget);
    assert_eq!(
        widget.tool_names(),
        vec!["triggerFeedback", "triggerName", "triggerStartNegotiation"]
    );

    let area = json!({"score": 88, "strengths": ["Clear point"], "improvements": ["Restate"]});
    let reply = widget
        .call_tool(
            "triggerFeedback",
            json!({"feedback": {
                "overallScore": 88,
                "areas": {"prepFramework": area, "content": area, "delivery": area}
            }}),
        )
        .await;
    assert_eq!(reply.as_deref(), Some(FEEDBACK_TOOL_REPLY));
    assert_eq!(
        widget.call_tool("triggerName", json!({})).await.as_deref(),
        Some(NAME_TOOL_REPLY)
    );
    assert_eq!(
        widget.call_tool("triggerStartNegotiation", json!({})).await.as_deref(),
        Some(START_TOOL_REPLY)
    );
    drop(widget);

    tracker.run(rx).await;

    let session = tracker.session().snapshot();
    assert!(session.started);
    assert_eq!(session.agent_feedback.unwrap().overall_score, 88);
    assert_eq!(*trigger.reasons.lock(), vec![TriggerReason::ClientTool]);
}
