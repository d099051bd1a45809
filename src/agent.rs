//! Conversational agents
//!
//! An agent owns one or more top-level states and runs its own integer
//! sub-state machine inside them. The dispatcher feeds it one message at a
//! time together with the user's current sub-state.

pub mod campaign;

use crate::message::{InboundMessage, OutboundMessage};
use crate::runtime::{Publisher, Scratch, StoreError, SubState, TopLevelState};
use async_trait::async_trait;
use thiserror::Error;

/// What a handler asks the dispatcher to commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Keep the session open at this sub-state
    Next(SubState),
    /// Terminal marker: close the session and return the user to idle
    End,
}

/// Errors that abort a turn. The dispatcher resets the user and sends a
/// generic failure reply.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("{agent} has no handler for sub-state {sub_state}")]
    UnknownSubState {
        agent: &'static str,
        sub_state: SubState,
    },
    #[error("{agent} was entered from {state:?}, which it does not own")]
    ForeignState {
        agent: &'static str,
        state: TopLevelState,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Image(#[from] crate::runtime::ImageError),
}

/// Everything a handler may touch during one turn
pub struct TurnContext<'a> {
    pub message: &'a InboundMessage,
    /// Top-level state that routed this message here
    pub state: TopLevelState,
    pub scratch: &'a mut Scratch,
    publisher: &'a dyn Publisher,
}

impl<'a> TurnContext<'a> {
    pub fn new(
        message: &'a InboundMessage,
        state: TopLevelState,
        scratch: &'a mut Scratch,
        publisher: &'a dyn Publisher,
    ) -> Self {
        Self {
            message,
            state,
            scratch,
            publisher,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.message.user_id
    }

    /// Empty outbound message addressed to the sender
    pub fn reply_to_sender(&self) -> OutboundMessage {
        OutboundMessage::new(self.user_id())
    }

    /// Deliver a message. Delivery failures are logged and never abort the
    /// turn; state changes already made by the handler stand.
    pub async fn send(&self, message: OutboundMessage) {
        if message.is_empty() {
            return;
        }
        if let Err(e) = self.publisher.publish(message).await {
            tracing::warn!(error = %e, "Outbound delivery failed");
        }
    }

    /// Shorthand for a text-only reply to the sender
    pub async fn reply(&self, lines: &[&str]) {
        let message = lines
            .iter()
            .fold(self.reply_to_sender(), |msg, line| msg.text(*line));
        self.send(message).await;
    }
}

/// A named set of handlers indexed by sub-state
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &'static str;

    /// Top-level states this agent owns
    fn states(&self) -> &[TopLevelState];

    /// Sub-states present in the handler table
    fn sub_states(&self) -> &[SubState];

    /// Run the handler registered for `sub_state`
    async fn handle(
        &self,
        sub_state: SubState,
        ctx: &mut TurnContext<'_>,
    ) -> Result<Outcome, AgentError>;
}
