//! Streaming conversational client.
//!
//! A [`ChatSession`](session::ChatSession) sends each question to the chat
//! service's streaming endpoint, decodes the body as it arrives and grows
//! the assistant reply in place. If the stream cannot be opened or breaks
//! off, the session retries once with a buffered request and, failing that,
//! leaves an apology as the reply.

pub mod cli;
pub mod config;
pub mod decoder;
pub mod error;
pub mod logging;
pub mod session;
pub mod transport;

pub use error::{AppError, Result};
