use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc;
use futures::stream;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::error::TransportError;
use super::stream::ByteStreamHandle;
use super::types::{SessionId, StreamRead};
use super::{StreamHandle, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Buffered,
    Stream,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub kind: RequestKind,
    pub session_id: SessionId,
    pub question: String,
}

enum ScriptedStream {
    Refuse(TransportError),
    Items(Vec<Result<Bytes, TransportError>>),
    Channel(mpsc::UnboundedReceiver<Result<Bytes, TransportError>>),
}

/// Feeds a scripted stream from the test body, one chunk at a time.
/// Dropping the sender (or calling [`finish`](Self::finish)) ends the stream.
#[derive(Debug, Clone)]
pub struct MockStreamSender {
    tx: mpsc::UnboundedSender<Result<Bytes, TransportError>>,
}

impl MockStreamSender {
    pub fn send_text(&self, text: &str) {
        self.send_bytes(text.as_bytes());
    }

    pub fn send_bytes(&self, bytes: &[u8]) {
        let _ = self.tx.unbounded_send(Ok(Bytes::copy_from_slice(bytes)));
    }

    pub fn fail(&self, error: TransportError) {
        let _ = self.tx.unbounded_send(Err(error));
    }

    pub fn finish(self) {
        self.tx.close_channel();
    }
}

/// Scripted [`Transport`] for tests and offline runs. Streams and buffered
/// answers are consumed in the order they were queued; an empty queue
/// behaves like an unreachable server.
#[derive(Clone, Default)]
pub struct MockTransport {
    streams: Arc<Mutex<VecDeque<ScriptedStream>>>,
    buffered: Arc<Mutex<VecDeque<Result<String, TransportError>>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    closed_streams: Arc<AtomicUsize>,
}

impl MockTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_stream_chunks(self, chunks: &[&str]) -> Self {
        let items = chunks
            .iter()
            .map(|c| Ok(Bytes::copy_from_slice(c.as_bytes())))
            .collect();
        self.streams.lock().push_back(ScriptedStream::Items(items));
        self
    }

    #[must_use]
    pub fn with_stream_bytes(self, chunks: Vec<Vec<u8>>) -> Self {
        let items = chunks.into_iter().map(|c| Ok(Bytes::from(c))).collect();
        self.streams.lock().push_back(ScriptedStream::Items(items));
        self
    }

    /// A stream that delivers `chunks` and then fails mid-read with `error`.
    #[must_use]
    pub fn with_stream_interrupted(self, chunks: &[&str], error: TransportError) -> Self {
        let mut items: Vec<_> = chunks
            .iter()
            .map(|c| Ok(Bytes::copy_from_slice(c.as_bytes())))
            .collect();
        items.push(Err(error));
        self.streams.lock().push_back(ScriptedStream::Items(items));
        self
    }

    #[must_use]
    pub fn with_stream_refused(self, error: TransportError) -> Self {
        self.streams.lock().push_back(ScriptedStream::Refuse(error));
        self
    }

    /// Queues a stream whose chunks are pushed later through the returned sender.
    #[must_use]
    pub fn with_stream_channel(self) -> (Self, MockStreamSender) {
        let (tx, rx) = mpsc::unbounded();
        self.streams.lock().push_back(ScriptedStream::Channel(rx));
        (self, MockStreamSender { tx })
    }

    #[must_use]
    pub fn with_buffered_answer(self, answer: impl Into<String>) -> Self {
        self.buffered.lock().push_back(Ok(answer.into()));
        self
    }

    #[must_use]
    pub fn with_buffered_failure(self, error: TransportError) -> Self {
        self.buffered.lock().push_back(Err(error));
        self
    }

    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    #[must_use]
    pub fn request_count(&self, kind: RequestKind) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.kind == kind)
            .count()
    }

    #[must_use]
    pub fn closed_streams(&self) -> usize {
        self.closed_streams.load(Ordering::SeqCst)
    }

    fn record(&self, kind: RequestKind, session_id: &SessionId, question: &str) {
        self.requests.lock().push(RecordedRequest {
            kind,
            session_id: session_id.clone(),
            question: question.to_string(),
        });
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("queued_streams", &self.streams.lock().len())
            .field("queued_buffered", &self.buffered.lock().len())
            .field("requests", &self.requests.lock().len())
            .finish()
    }
}

struct MockHandle {
    inner: ByteStreamHandle,
    closed: bool,
    closed_streams: Arc<AtomicUsize>,
}

#[async_trait]
impl StreamHandle for MockHandle {
    async fn read_next(&mut self) -> Result<StreamRead, TransportError> {
        self.inner.read_next().await
    }

    fn close(&mut self) {
        self.inner.close();
        if !self.closed {
            self.closed = true;
            self.closed_streams.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_buffered(
        &self,
        session_id: &SessionId,
        question: &str,
    ) -> Result<String, TransportError> {
        self.record(RequestKind::Buffered, session_id, question);
        self.buffered
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::network("MockTransport: no answer queued")))
    }

    async fn open_stream(
        &self,
        session_id: &SessionId,
        question: &str,
    ) -> Result<Box<dyn StreamHandle>, TransportError> {
        self.record(RequestKind::Stream, session_id, question);

        let scripted = self
            .streams
            .lock()
            .pop_front()
            .ok_or_else(|| TransportError::network("MockTransport: no stream queued"))?;

        let inner = match scripted {
            ScriptedStream::Refuse(error) => return Err(error),
            ScriptedStream::Items(items) => ByteStreamHandle::from_stream(stream::iter(items)),
            ScriptedStream::Channel(rx) => ByteStreamHandle::from_stream(rx),
        };

        Ok(Box::new(MockHandle {
            inner,
            closed: false,
            closed_streams: self.closed_streams.clone(),
        }))
    }
}
