//! Conversation state and the send state machine.

mod controller;
mod message;
mod phase;

pub use controller::{ChatSession, DEFAULT_APOLOGY, SessionConfig};
pub use message::{Message, MessageId, Role, Snapshot};
pub use phase::{Rejection, SendOutcome, SendPhase};
