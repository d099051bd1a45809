//! API request and response types

use crate::runtime::{ConversationState, TopLevelState};
use serde::Serialize;
use serde_json::{Map, Value};

/// Response for an accepted inbound message
#[derive(Debug, Serialize)]
pub struct QueuedResponse {
    pub queued: bool,
}

/// Response for a follow event
#[derive(Debug, Serialize)]
pub struct FollowResponse {
    /// False when the user already had a profile
    pub created: bool,
    pub follow_time: String,
}

/// Snapshot of one user's conversation
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub user_id: String,
    pub top_level: TopLevelState,
    pub sub_state: Option<u32>,
    pub scratch: Map<String, Value>,
}

impl SessionResponse {
    pub fn new(user_id: String, state: ConversationState) -> Self {
        Self {
            user_id,
            top_level: state.top_level,
            sub_state: state.sub_state,
            scratch: state.scratch,
        }
    }
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
