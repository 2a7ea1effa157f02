use crate::config::PollingPolicy;
use crate::convai::ConversationSource;
use prepcoach_core::{ConversationRecord, PrepcoachError};
use prepcoach_store::{ConversationFields, PersistenceGateway};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Type alias for the injectable sleep function used in tests.
#[cfg(test)]
type SleepFn = Box<
    dyn Fn(Duration) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
        + Send
        + Sync,
>;

/// Where a poll is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// Not started.
    Idle,
    /// About to read.
    Polling {
        /// 1-based attempt number.
        attempt: u32,
        /// The wait that follows this attempt if it misses.
        delay: Duration,
    },
    /// A read returned a transcript.
    Succeeded {
        /// The attempt that found it.
        attempt: u32,
    },
    /// Gave up.
    Exhausted {
        /// Reads made.
        attempts: u32,
    },
}

impl PollState {
    /// Whether another attempt is due.
    pub fn is_active(&self) -> bool {
        matches!(self, PollState::Polling { .. })
    }

    /// Next state after an attempt. `found` is whether the attempt returned a
    /// usable record.
    pub fn advance(self, found: bool, policy: &PollingPolicy) -> PollState {
        match self {
            PollState::Idle if policy.max_attempts == 0 => PollState::Exhausted { attempts: 0 },
            PollState::Idle => PollState::Polling {
                attempt: 1,
                delay: policy.initial_delay(),
            },
            PollState::Polling { attempt, .. } if found => PollState::Succeeded { attempt },
            PollState::Polling { attempt, .. } if attempt >= policy.max_attempts => {
                PollState::Exhausted { attempts: attempt }
            }
            PollState::Polling { attempt, delay } => PollState::Polling {
                attempt: attempt + 1,
                delay: policy.next_delay(delay),
            },
            done => done,
        }
    }
}

enum Attempt {
    Found(ConversationRecord),
    Missed,
    /// Retrying cannot help, e.g. no API key.
    Unavailable,
}

/// Polls the provider until a conversation's transcript is available.
///
/// The record found by a successful attempt is persisted through the gateway
/// before it is returned.
pub struct ConversationPoller {
    source: Arc<dyn ConversationSource>,
    gateway: Arc<dyn PersistenceGateway>,
    #[cfg(test)]
    sleep_fn: Option<SleepFn>,
}

impl ConversationPoller {
    /// Polls `source` and persists found transcripts through `gateway`.
    pub fn new(source: Arc<dyn ConversationSource>, gateway: Arc<dyn PersistenceGateway>) -> Self {
        Self {
            source,
            gateway,
            #[cfg(test)]
            sleep_fn: None,
        }
    }

    async fn do_sleep(&self, delay: Duration) {
        #[cfg(test)]
        if let Some(ref f) = self.sleep_fn {
            f(delay).await;
            return;
        }
        tokio::time::sleep(delay).await;
    }

    /// Runs up to `policy.max_attempts` reads. Returns `None` when every
    /// attempt missed; that is an expected outcome, not an error.
    pub async fn poll(
        &self,
        conversation_id: &str,
        policy: &PollingPolicy,
    ) -> Option<ConversationRecord> {
        self.poll_with(conversation_id, policy, |_| {}).await
    }

    /// Like [`poll`](Self::poll), reporting every state transition to `observe`.
    pub async fn poll_with(
        &self,
        conversation_id: &str,
        policy: &PollingPolicy,
        mut observe: impl FnMut(&PollState) + Send,
    ) -> Option<ConversationRecord> {
        let mut state = PollState::Idle.advance(false, policy);
        observe(&state);
        info!(
            conversation_id = %conversation_id,
            max_attempts = policy.max_attempts,
            initial_delay_ms = policy.initial_delay_ms,
            "Polling for conversation data"
        );

        loop {
            let PollState::Polling { attempt, delay } = state else {
                break;
            };

            let record = match self.attempt(conversation_id, attempt, policy).await {
                Attempt::Found(record) => Some(record),
                Attempt::Missed => None,
                Attempt::Unavailable => {
                    let exhausted = PollState::Exhausted { attempts: attempt };
                    observe(&exhausted);
                    return None;
                }
            };
            let next = state.advance(record.is_some(), policy);
            observe(&next);

            if let Some(record) = record {
                self.persist(conversation_id, &record).await;
                return Some(record);
            }
            if next.is_active() {
                debug!(conversation_id = %conversation_id, attempt, delay_ms = delay.as_millis() as u64, "Waiting before next attempt");
                self.do_sleep(delay).await;
            }
            state = next;
        }

        warn!(conversation_id = %conversation_id, attempts = policy.max_attempts, "Conversation data not available");
        None
    }

    async fn attempt(&self, conversation_id: &str, attempt: u32, policy: &PollingPolicy) -> Attempt {
        match self.source.get_conversation(conversation_id).await {
            Ok(record) if record.has_transcript() => {
                info!(
                    conversation_id = %conversation_id,
                    attempt,
                    turns = record.transcript.len(),
                    "Transcript retrieved"
                );
                Attempt::Found(record)
            }
            Ok(_) => {
                debug!(conversation_id = %conversation_id, attempt, max_attempts = policy.max_attempts, "Transcript empty, will retry");
                Attempt::Missed
            }
            // A misconfigured client fails the same way on every attempt.
            Err(PrepcoachError::Config(reason)) => {
                warn!(conversation_id = %conversation_id, reason = %reason, "Provider not configured, not polling");
                Attempt::Unavailable
            }
            Err(e) => {
                debug!(conversation_id = %conversation_id, attempt, max_attempts = policy.max_attempts, error = %e, "Conversation not available yet");
                Attempt::Missed
            }
        }
    }

    async fn persist(&self, conversation_id: &str, record: &ConversationRecord) {
        if let Err(e) = self
            .gateway
            .record_transcript(conversation_id, &record.transcript, ConversationFields::default())
            .await
        {
            warn!(conversation_id = %conversation_id, error = %e, "Failed to store transcript");
        }
    }
}
