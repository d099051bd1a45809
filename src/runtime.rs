//! Runtime for routing conversations
//!
//! Sessions, the dispatcher and the collaborator traits handlers use.

mod dispatcher;
mod session;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use dispatcher::{DispatchOutcome, Dispatcher, CANCELLED_REPLY, GENERIC_FAILURE_REPLY};
pub use session::{
    ConversationState, Scratch, SessionStore, SubState, TopLevelState, ENTRY_STATE,
};
pub use traits::*;
