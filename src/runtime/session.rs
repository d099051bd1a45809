//! Per-user conversation sessions

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// Agent-private sub-state number
pub type SubState = u32;

/// Sub-state used when a user has no open session under an agent
pub const ENTRY_STATE: SubState = 0;

/// Agent-private key/value bag, cleared when the session ends
pub type Scratch = Map<String, Value>;

/// Coarse conversational mode selecting the owning agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TopLevelState {
    #[default]
    Idle,
    Recommend,
    InitialInput,
    Feedback,
    InviteFriend,
    ClaimCoupon,
    ManageCampaign,
}

impl TopLevelState {
    pub fn is_idle(self) -> bool {
        self == TopLevelState::Idle
    }
}

/// Conversation state of one user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub top_level: TopLevelState,
    /// `None` while no agent session is open
    pub sub_state: Option<SubState>,
    #[serde(default)]
    pub scratch: Scratch,
}

impl ConversationState {
    /// Sub-state to feed the owning agent's handler table
    pub fn effective_sub_state(&self) -> SubState {
        self.sub_state.unwrap_or(ENTRY_STATE)
    }

    pub fn has_open_session(&self) -> bool {
        self.sub_state.is_some()
    }

    /// Open or advance a session
    pub fn advance(&mut self, top_level: TopLevelState, sub_state: SubState) {
        self.top_level = top_level;
        self.sub_state = Some(sub_state);
    }

    /// Drop any session and go back to idle
    pub fn reset(&mut self) {
        self.top_level = TopLevelState::Idle;
        self.sub_state = None;
        self.scratch.clear();
    }
}

/// Concurrency-safe map of user id to conversation state.
///
/// Each user has its own lock; holding it serialises that user's messages
/// without blocking anyone else. Only users with state worth keeping stay
/// in the map: [`SessionStore::release`] forgets idle users.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Mutex<ConversationState>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock a user's state, creating an idle entry on first contact
    pub async fn lock(&self, user_id: &str) -> OwnedMutexGuard<ConversationState> {
        let existing = self.sessions.read().await.get(user_id).cloned();
        let slot = match existing {
            Some(slot) => slot,
            None => self
                .sessions
                .write()
                .await
                .entry(user_id.to_string())
                .or_default()
                .clone(),
        };
        slot.lock_owned().await
    }

    /// Unlock a user's state. The entry is forgotten when it is back to idle
    /// and no other message holds or waits on it.
    pub async fn release(&self, user_id: &str, guard: OwnedMutexGuard<ConversationState>) {
        let idle = *guard == ConversationState::default();
        drop(guard);
        if !idle {
            return;
        }

        let mut sessions = self.sessions.write().await;
        // The map's reference is the only one left, and nobody changed the
        // state after the guard was dropped
        let unused = sessions.get(user_id).is_some_and(|slot| {
            Arc::strong_count(slot) == 1
                && slot
                    .try_lock()
                    .is_ok_and(|state| *state == ConversationState::default())
        });
        if unused {
            sessions.remove(user_id);
        }
    }

    /// Copy of a user's state; `None` for users that are idle and untracked
    pub async fn snapshot(&self, user_id: &str) -> Option<ConversationState> {
        let slot = self.sessions.read().await.get(user_id).cloned()?;
        let state = slot.lock().await;
        Some(state.clone())
    }

    #[allow(dead_code)] // Used in tests
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}
