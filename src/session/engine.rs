//! Event reconciliation state machine
//!
//! At most one conversation is live at a time. Each subscription carries a
//! generation token; inbound events stamped with a retired generation are
//! discarded even when they race the subscription close. Merges run to
//! completion one at a time (the controller holds its lock across a merge),
//! so arrival order is conversation order.

use crate::error::Result;
use crate::session::repository::SessionRepository;
use crate::session::{ChatMessage, ChatSession};
use std::sync::Arc;

/// Subscription state of the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenState {
    /// No subscription open
    Idle,
    /// Exactly one open subscription; inbound events run the merge
    Listening {
        /// Conversation the subscription is bound to
        conversation_id: String,
        /// Generation token events must carry to be accepted
        generation: u64,
    },
    /// Prior subscription retired, next one not yet open
    Transitioning,
}

/// Outcome of merging one inbound event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Message appended; `persisted` is false when the async write failed
    Merged { persisted: bool },
    /// Backend message id already present; event discarded
    Duplicate,
    /// Event carried a retired generation; event discarded
    Stale,
}

/// Reconciles inbound backend events into the persisted session state
pub struct ReconciliationEngine {
    repository: Arc<SessionRepository>,
    state: ListenState,
    next_generation: u64,
}

impl ReconciliationEngine {
    /// Create an idle engine over the given repository
    pub fn new(repository: Arc<SessionRepository>) -> Self {
        Self {
            repository,
            state: ListenState::Idle,
            next_generation: 0,
        }
    }

    /// Current subscription state
    pub fn state(&self) -> &ListenState {
        &self.state
    }

    /// Open a subscription for `conversation_id`, retiring any prior one
    ///
    /// Returns the generation token the new subscription's events must
    /// carry. Generations are monotonic across the engine's lifetime, so
    /// a token is retired forever once superseded.
    pub fn begin_listening(&mut self, conversation_id: impl Into<String>) -> u64 {
        let conversation_id = conversation_id.into();
        if let ListenState::Listening { generation, .. } = &self.state {
            tracing::debug!(
                retired_generation = generation,
                conversation_id = %conversation_id,
                "retiring prior subscription"
            );
            self.state = ListenState::Transitioning;
        }
        self.next_generation += 1;
        let generation = self.next_generation;
        self.state = ListenState::Listening {
            conversation_id,
            generation,
        };
        generation
    }

    /// Retire the live generation while a subscription close is in flight
    ///
    /// Events may keep arriving until the close completes; in
    /// `Transitioning` every one of them is discarded as stale.
    pub fn retire(&mut self) {
        if matches!(self.state, ListenState::Listening { .. }) {
            self.state = ListenState::Transitioning;
        }
    }

    /// Return to idle once the subscription close has completed
    ///
    /// Called when configuration is revoked or the active conversation is
    /// dropped without a successor.
    pub fn stop_listening(&mut self) {
        self.state = ListenState::Idle;
    }

    /// Whether `generation` is the live one
    pub fn is_live(&self, generation: u64) -> bool {
        matches!(
            &self.state,
            ListenState::Listening { generation: live, .. } if *live == generation
        )
    }

    /// Merge one inbound event into `session`
    ///
    /// Events with a retired generation are discarded (`Stale`); events
    /// whose backend message id is already present are discarded
    /// (`Duplicate`). Otherwise the message is appended in arrival order,
    /// `last_activity_at` is bumped, and the session is persisted. A
    /// persist failure is logged and reported through
    /// `MergeOutcome::Merged { persisted: false }`; the in-memory append
    /// is not rolled back.
    pub async fn merge(
        &mut self,
        generation: u64,
        session: &mut ChatSession,
        message: ChatMessage,
    ) -> Result<MergeOutcome> {
        if !self.is_live(generation) {
            tracing::debug!(
                generation = generation,
                message_id = %message.id,
                "discarding event from retired subscription"
            );
            return Ok(MergeOutcome::Stale);
        }

        if session.contains_message(&message.id) {
            tracing::debug!(message_id = %message.id, "discarding duplicate event");
            return Ok(MergeOutcome::Duplicate);
        }

        session.messages.push(message);
        session.touch();

        let persisted = match self.repository.save(session).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    conversation_id = %session.id,
                    error = %e,
                    "failed to persist merged message"
                );
                false
            }
        };
        Ok(MergeOutcome::Merged { persisted })
    }
}
