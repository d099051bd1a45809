//! Routes inbound messages to the agent owning the user's top-level state

use super::session::{ConversationState, SessionStore, TopLevelState, ENTRY_STATE};
use super::traits::Publisher;
use crate::agent::{Agent, Outcome, TurnContext};
use crate::classifier::KeywordClassifier;
use crate::message::{InboundMessage, MessageKind, OutboundMessage};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Reply sent when a handler fails
pub const GENERIC_FAILURE_REPLY: &str = "Sorry, something went wrong on my side. Session cancelled.";

/// Reply sent when the user cancels an open session
pub const CANCELLED_REPLY: &str = "OK, session cancelled.";

const CANCEL_KEYWORD: &str = "cancel";

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("State {state:?} is already owned by {owner}")]
    StateAlreadyOwned {
        state: TopLevelState,
        owner: &'static str,
    },
    #[error("{0} cannot own the idle state")]
    IdleNotOwnable(&'static str),
    #[error("{0} has no entry handler")]
    MissingEntryHandler(&'static str),
}

/// Why a message was not handed to any agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    UnrecognizedType(String),
    /// Idle user and nothing selected a state
    NoState,
    /// No agent owns the resolved state
    Unowned(TopLevelState),
}

/// Result of dispatching one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Dropped(DropReason),
    /// Session stays open at this sub-state
    Continued {
        agent: &'static str,
        sub_state: u32,
    },
    Ended {
        agent: &'static str,
    },
    Cancelled {
        agent: &'static str,
    },
    Failed {
        agent: &'static str,
    },
}

/// Builder enforcing that agents own disjoint sets of top-level states
#[derive(Default)]
pub struct DispatcherBuilder {
    agents: Vec<Arc<dyn Agent>>,
    owners: HashMap<TopLevelState, usize>,
    classifier: KeywordClassifier,
}

impl DispatcherBuilder {
    pub fn agent(mut self, agent: Arc<dyn Agent>) -> Result<Self, RegistrationError> {
        if !agent.sub_states().contains(&ENTRY_STATE) {
            return Err(RegistrationError::MissingEntryHandler(agent.name()));
        }
        for state in agent.states() {
            if state.is_idle() {
                return Err(RegistrationError::IdleNotOwnable(agent.name()));
            }
            if let Some(&owner) = self.owners.get(state) {
                return Err(RegistrationError::StateAlreadyOwned {
                    state: *state,
                    owner: self.agents[owner].name(),
                });
            }
        }

        let index = self.agents.len();
        for state in agent.states() {
            self.owners.insert(*state, index);
        }
        tracing::debug!(agent = agent.name(), states = ?agent.states(), "Registered agent");
        self.agents.push(agent);
        Ok(self)
    }

    #[allow(dead_code)] // Used in tests
    pub fn classifier(mut self, classifier: KeywordClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn build(self, sessions: Arc<SessionStore>, publisher: Arc<dyn Publisher>) -> Dispatcher {
        Dispatcher {
            agents: self.agents,
            owners: self.owners,
            classifier: self.classifier,
            sessions,
            publisher,
        }
    }
}

/// Message router. Cheap to share behind an `Arc`; every call to
/// [`Dispatcher::dispatch`] may run on its own task.
pub struct Dispatcher {
    agents: Vec<Arc<dyn Agent>>,
    owners: HashMap<TopLevelState, usize>,
    classifier: KeywordClassifier,
    sessions: Arc<SessionStore>,
    publisher: Arc<dyn Publisher>,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    fn owner_of(&self, state: TopLevelState) -> Option<&Arc<dyn Agent>> {
        self.owners.get(&state).map(|&index| &self.agents[index])
    }

    /// Pick the top-level state for this message.
    ///
    /// An open session keeps its state; a transition always wins; an idle
    /// user takes the envelope's state or whatever the classifier finds.
    fn resolve_state(&self, message: &InboundMessage, session: &mut ConversationState) -> Option<TopLevelState> {
        if message.kind == MessageKind::Transition {
            if session.has_open_session() {
                tracing::info!(
                    user_id = %message.user_id,
                    from = ?session.top_level,
                    to = ?message.state,
                    "Transition abandons open session"
                );
            }
            session.reset();
            return message.state.filter(|s| !s.is_idle());
        }

        if session.has_open_session() {
            return Some(session.top_level);
        }

        message
            .state
            .filter(|s| !s.is_idle())
            .or_else(|| message.text_content().and_then(|t| self.classifier.classify(t)))
    }

    pub async fn dispatch(&self, message: InboundMessage) -> DispatchOutcome {
        if let MessageKind::Unrecognized(kind) = &message.kind {
            tracing::info!(user_id = %message.user_id, kind = %kind, "Dropping unrecognized message type");
            return DispatchOutcome::Dropped(DropReason::UnrecognizedType(kind.clone()));
        }

        let mut session = self.sessions.lock(&message.user_id).await;
        let outcome = self.dispatch_locked(&message, &mut session).await;
        self.sessions.release(&message.user_id, session).await;
        outcome
    }

    /// Route one message while holding the sender's session lock
    async fn dispatch_locked(
        &self,
        message: &InboundMessage,
        session: &mut ConversationState,
    ) -> DispatchOutcome {
        let Some(state) = self.resolve_state(message, session) else {
            tracing::debug!(user_id = %message.user_id, "No state selected, dropping message");
            return DispatchOutcome::Dropped(DropReason::NoState);
        };

        let Some(agent) = self.owner_of(state).cloned() else {
            tracing::warn!(user_id = %message.user_id, state = ?state, "No agent owns state, dropping message");
            session.reset();
            return DispatchOutcome::Dropped(DropReason::Unowned(state));
        };
        let agent_name = agent.name();

        // The stored sub-state only applies to the session of the same state
        if session.top_level != state {
            session.reset();
        }
        let sub_state = session.effective_sub_state();

        if sub_state != ENTRY_STATE && is_cancel(message) {
            tracing::info!(user_id = %message.user_id, agent = agent_name, sub_state, "Session cancelled by user");
            session.reset();
            self.send(OutboundMessage::new(&message.user_id).text(CANCELLED_REPLY))
                .await;
            return DispatchOutcome::Cancelled { agent: agent_name };
        }

        tracing::info!(
            user_id = %message.user_id,
            agent = agent_name,
            state = ?state,
            sub_state,
            "Dispatching message"
        );

        let result = {
            let mut ctx = TurnContext::new(
                message,
                state,
                &mut session.scratch,
                self.publisher.as_ref(),
            );
            agent.handle(sub_state, &mut ctx).await
        };

        match result {
            Ok(Outcome::Next(next)) => {
                session.advance(state, next);
                tracing::debug!(user_id = %message.user_id, agent = agent_name, sub_state = next, "Session continues");
                DispatchOutcome::Continued {
                    agent: agent_name,
                    sub_state: next,
                }
            }
            Ok(Outcome::End) => {
                session.reset();
                tracing::debug!(user_id = %message.user_id, agent = agent_name, "Session ended");
                DispatchOutcome::Ended { agent: agent_name }
            }
            Err(e) => {
                tracing::error!(
                    user_id = %message.user_id,
                    agent = agent_name,
                    sub_state,
                    error = %e,
                    "Handler failed, resetting session"
                );
                session.reset();
                self.send(OutboundMessage::new(&message.user_id).text(GENERIC_FAILURE_REPLY))
                    .await;
                DispatchOutcome::Failed { agent: agent_name }
            }
        }
    }

    async fn send(&self, message: OutboundMessage) {
        if let Err(e) = self.publisher.publish(message).await {
            tracing::warn!(error = %e, "Outbound delivery failed");
        }
    }
}

fn is_cancel(message: &InboundMessage) -> bool {
    message
        .text_content()
        .is_some_and(|t| t.trim().eq_ignore_ascii_case(CANCEL_KEYWORD))
}
