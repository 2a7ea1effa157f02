//! Offline feedback: plays a saved transcript through the live pipeline.

use anyhow::{bail, Context};
use prepcoach_core::{ConversationRecord, TranscriptTurn};
use prepcoach_feedback::{FeedbackOrchestrator, FeedbackResolver, FeedbackStatus, GenerateOutcome};
use prepcoach_session::{
    FeedbackTrigger, LocalWidget, SessionHandle, SessionTracker, TriggerReason, WidgetEvent,
};
use prepcoach_store::{KeyValueStore, MemoryKeyValueStore, PersistenceGateway};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

/// Accepts either a bare `[{role, message}]` array or a provider
/// conversation record with a `transcript` field.
pub fn parse_transcript(raw: &str) -> anyhow::Result<Vec<TranscriptTurn>> {
    let value: serde_json::Value = serde_json::from_str(raw).context("transcript is not JSON")?;
    let turns = if value.is_array() {
        serde_json::from_value::<Vec<TranscriptTurn>>(value)?
    } else {
        serde_json::from_value::<ConversationRecord>(value)?.transcript
    };
    if turns.is_empty() {
        bail!("transcript has no turns");
    }
    Ok(turns)
}

/// Emits the widget events a real call with these turns would produce.
pub fn play(widget: &LocalWidget, conversation_id: Option<&str>, turns: &[TranscriptTurn]) {
    if let Some(id) = conversation_id {
        widget.emit(WidgetEvent::CallStart, json!({ "conversationId": id }));
    }
    for turn in turns {
        let event = if turn.is_user() {
            WidgetEvent::UserMessage
        } else {
            WidgetEvent::AgentMessage
        };
        widget.emit(event, json!({ "message": turn.text() }));
    }
    widget.emit(WidgetEvent::CallEnd, json!({}));
}

/// Collects nothing while the transcript plays; generation is requested
/// once every turn is in.
struct Deferred;

impl FeedbackTrigger for Deferred {
    fn request_feedback(&self, reason: TriggerReason) {
        debug!(?reason, "Deferring feedback until the transcript is complete");
    }

    fn reset_feedback(&self) {}
}

/// Plays `turns` into a fresh session, then scores the complete transcript.
///
/// The session mirror is scratch memory, so an id left behind by an earlier
/// call is never picked up. Without `conversation_id` nothing is logged.
pub async fn replay(
    resolver: FeedbackResolver,
    gateway: Arc<dyn PersistenceGateway>,
    conversation_id: Option<&str>,
    turns: &[TranscriptTurn],
) -> anyhow::Result<FeedbackStatus> {
    let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::new());
    let session = SessionHandle::new();
    let handle =
        FeedbackOrchestrator::new(resolver, session.clone(), kv.clone(), gateway.clone()).spawn();
    let tracker = SessionTracker::new(session, kv, gateway, Arc::new(Deferred));

    let widget = LocalWidget::new();
    let rx = SessionTracker::attach(&widget);
    play(&widget, conversation_id, turns);
    drop(widget);
    tracker.run(rx).await;

    match handle.generate(TriggerReason::Manual).await {
        GenerateOutcome::Generated(_) | GenerateOutcome::Cached(_) => Ok(handle.status()),
        GenerateOutcome::InFlight => {
            let mut rx = handle.subscribe();
            let status = rx.wait_for(|s| !s.is_loading).await?.clone();
            Ok(status)
        }
        GenerateOutcome::InsufficientConversation => {
            bail!("conversation too short for feedback ({} turns)", turns.len())
        }
        GenerateOutcome::Failed(reason) => bail!(reason),
        GenerateOutcome::Cancelled => bail!("feedback generation was cancelled"),
    }
}
