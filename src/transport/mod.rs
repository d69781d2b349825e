//! Request plumbing between the session and the chat service.
//!
//! Two exchanges are supported: a buffered `POST` that returns the whole
//! answer as JSON, and a streaming `POST` whose body is unframed UTF-8 text.
//! Neither retries; deciding what to do after a failure is the caller's job.

pub mod error;
pub mod http;
pub mod mock;
pub mod stream;
pub mod types;

use async_trait::async_trait;

pub use error::TransportError;
pub use http::{HttpConfig, HttpTransport};
pub use mock::{MockStreamSender, MockTransport, RequestKind};
pub use stream::{ByteStream, ByteStreamHandle};
pub use types::{BaseUrl, ChatRequest, ChatResponse, SessionId, StreamRead};

/// A live response body, owned by exactly one send operation.
#[async_trait]
pub trait StreamHandle: Send {
    /// Suspends until the next chunk arrives or the stream ends.
    async fn read_next(&mut self) -> Result<StreamRead, TransportError>;

    /// Releases the underlying connection. Idempotent, and safe after `Done`.
    fn close(&mut self);
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_buffered(
        &self,
        session_id: &SessionId,
        question: &str,
    ) -> Result<String, TransportError>;

    async fn open_stream(
        &self,
        session_id: &SessionId,
        question: &str,
    ) -> Result<Box<dyn StreamHandle>, TransportError>;
}
