use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;

use crate::decoder::Utf8StreamDecoder;
use crate::transport::{SessionId, StreamHandle, StreamRead, Transport, TransportError};

use super::message::{Message, MessageId, Snapshot};
use super::phase::{PendingSend, Rejection, SendOutcome, SendPhase};

pub const DEFAULT_APOLOGY: &str = "I'm sorry, I'm having technical difficulties. Please try again.";

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// When off, every send goes straight to the buffered request.
    pub streaming: bool,
    pub apology: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            streaming: true,
            apology: DEFAULT_APOLOGY.to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct Conversation {
    messages: Vec<Message>,
    loading: bool,
}

impl Conversation {
    fn get_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            messages: self.messages.clone(),
            loading: self.loading,
        }
    }
}

/// Owns the conversation log and drives one send at a time.
///
/// Every mutation publishes a fresh [`Snapshot`] through a watch channel;
/// subscribers never see a half-updated entry.
pub struct ChatSession {
    transport: Arc<dyn Transport>,
    session_id: SessionId,
    config: SessionConfig,
    state: Mutex<Conversation>,
    snapshots: watch::Sender<Arc<Snapshot>>,
}

impl ChatSession {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_config(transport, SessionConfig::default())
    }

    #[must_use]
    pub fn with_config(transport: Arc<dyn Transport>, config: SessionConfig) -> Self {
        Self::with_session_id(transport, config, SessionId::generate())
    }

    #[must_use]
    pub fn with_session_id(
        transport: Arc<dyn Transport>,
        config: SessionConfig,
        session_id: SessionId,
    ) -> Self {
        let (snapshots, _) = watch::channel(Arc::new(Snapshot::default()));
        Self {
            transport,
            session_id,
            config,
            state: Mutex::new(Conversation::default()),
            snapshots,
        }
    }

    #[must_use]
    pub const fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.state.lock().loading
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshots.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.snapshots.subscribe()
    }

    /// Sends `question` and resolves once its reply is final.
    ///
    /// A blank question, or a call while another send is in flight, is
    /// rejected without touching the log. Transport failures never escape:
    /// a failed stream falls back to the buffered request, and a failed
    /// fallback leaves the apology text as the reply.
    pub async fn send(&self, question: &str) -> SendOutcome {
        let mut op = match self.begin(question) {
            Ok(op) => op,
            Err(rejection) => {
                tracing::debug!(?rejection, "Send rejected");
                return SendOutcome::Rejected(rejection);
            }
        };
        let _in_flight = InFlight {
            session: self,
            message_id: op.message_id,
        };

        if self.config.streaming {
            match self.stream_reply(&mut op).await {
                Ok(()) => {
                    self.finalize(op.message_id, None);
                    op.advance(SendPhase::Finalized);
                    return SendOutcome::Streamed {
                        message_id: op.message_id,
                    };
                }
                Err(e) => {
                    tracing::warn!(
                        session_id = %self.session_id,
                        message_id = %op.message_id,
                        phase = %op.phase(),
                        error = %e,
                        "Streaming failed, falling back to buffered request"
                    );
                }
            }
        }

        self.fallback(op).await
    }

    fn begin(&self, question: &str) -> Result<PendingSend, Rejection> {
        if question.trim().is_empty() {
            return Err(Rejection::EmptyQuestion);
        }

        let mut state = self.state.lock();
        if state.loading {
            return Err(Rejection::Busy);
        }

        state.messages.push(Message::user(question));
        state.loading = true;
        self.publish(&state);

        let placeholder = Message::assistant_placeholder();
        let message_id = placeholder.id;
        state.messages.push(placeholder);
        self.publish(&state);

        tracing::debug!(session_id = %self.session_id, %message_id, "Send started");
        Ok(PendingSend::new(message_id, question.to_string()))
    }

    async fn stream_reply(&self, op: &mut PendingSend) -> Result<(), TransportError> {
        op.advance(SendPhase::StreamOpening);
        let mut handle = self
            .transport
            .open_stream(&self.session_id, &op.question)
            .await?;
        op.advance(SendPhase::Streaming);

        let result = self.pump(op, handle.as_mut()).await;
        handle.close();
        result
    }

    async fn pump(
        &self,
        op: &mut PendingSend,
        handle: &mut dyn StreamHandle,
    ) -> Result<(), TransportError> {
        let mut decoder = Utf8StreamDecoder::new();

        loop {
            match handle.read_next().await? {
                StreamRead::Data(bytes) => {
                    let fragment = decoder.decode(&bytes, false);
                    self.apply_fragment(op, &fragment);
                }
                StreamRead::Done => {
                    let tail = decoder.decode(&[], true);
                    self.apply_fragment(op, &tail);
                    if decoder.replacements() > 0 {
                        tracing::debug!(
                            message_id = %op.message_id,
                            replacements = decoder.replacements(),
                            "Replaced malformed UTF-8 in stream"
                        );
                    }
                    return Ok(());
                }
            }
        }
    }

    fn apply_fragment(&self, op: &mut PendingSend, fragment: &str) {
        if fragment.is_empty() {
            return;
        }
        op.accumulator.push_str(fragment);

        let mut state = self.state.lock();
        let Some(message) = state.get_mut(op.message_id) else {
            return;
        };
        if !message.is_streaming {
            return;
        }
        message.content.clone_from(&op.accumulator);
        self.publish(&state);
    }

    async fn fallback(&self, mut op: PendingSend) -> SendOutcome {
        op.advance(SendPhase::FallbackBuffered);
        op.accumulator.clear();

        let outcome = match self
            .transport
            .send_buffered(&self.session_id, &op.question)
            .await
        {
            Ok(answer) => {
                self.finalize(op.message_id, Some(answer));
                SendOutcome::Recovered {
                    message_id: op.message_id,
                }
            }
            Err(e) => {
                tracing::error!(
                    session_id = %self.session_id,
                    message_id = %op.message_id,
                    error = %e,
                    "Buffered fallback failed"
                );
                op.advance(SendPhase::FallbackFailed);
                self.finalize(op.message_id, Some(self.config.apology.clone()));
                SendOutcome::Apologized {
                    message_id: op.message_id,
                }
            }
        };

        op.advance(SendPhase::Finalized);
        outcome
    }

    /// Marks the reply final, optionally replacing its content, and clears
    /// the loading flag. Returns `false` without touching anything when the
    /// message is unknown or already final.
    fn finalize(&self, id: MessageId, content: Option<String>) -> bool {
        let mut state = self.state.lock();
        let Some(message) = state.get_mut(id) else {
            return false;
        };
        if !message.is_streaming {
            return false;
        }

        if let Some(content) = content {
            message.content = content;
        }
        message.is_streaming = false;
        state.loading = false;
        self.publish(&state);

        tracing::debug!(session_id = %self.session_id, message_id = %id, "Reply finalized");
        true
    }

    fn publish(&self, state: &Conversation) {
        self.snapshots.send_replace(Arc::new(state.snapshot()));
    }
}

/// Resolves the reply with the apology if a send is dropped before its
/// reply is final. A no-op once the reply has been finalized.
struct InFlight<'a> {
    session: &'a ChatSession,
    message_id: MessageId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let apology = self.session.config.apology.clone();
        if self.session.finalize(self.message_id, Some(apology)) {
            tracing::warn!(
                session_id = %self.session.session_id,
                message_id = %self.message_id,
                "Send dropped before its reply was final"
            );
        }
    }
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("session_id", &self.session_id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Role;
    use crate::transport::{MockTransport, RequestKind};
    use std::time::Duration;
    use tokio_test::{assert_pending, assert_ready};

    fn session_with(mock: &MockTransport) -> ChatSession {
        ChatSession::new(Arc::new(mock.clone()))
    }

    fn reply_of(session: &ChatSession) -> Message {
        session.snapshot().last().cloned().expect("reply")
    }

    #[tokio::test]
    async fn test_streamed_reply_is_concatenated() {
        let mock = MockTransport::new().with_stream_chunks(&["Hel", "lo, ", "world"]);
        let session = session_with(&mock);

        let outcome = session.send("Hi").await;
        assert!(matches!(outcome, SendOutcome::Streamed { .. }));

        let snapshot = session.snapshot();
        assert_eq!(snapshot.messages.len(), 2);
        assert_eq!(snapshot.messages[0].role, Role::User);
        assert_eq!(snapshot.messages[0].content, "Hi");

        let reply = &snapshot.messages[1];
        assert_eq!(reply.role, Role::Assistant);
        assert_eq!(reply.content, "Hello, world");
        assert!(!reply.is_streaming);
        assert_eq!(outcome.message_id(), Some(reply.id));
        assert!(!snapshot.loading);

        assert_eq!(mock.closed_streams(), 1);
        assert_eq!(mock.request_count(RequestKind::Buffered), 0);
    }

    #[tokio::test]
    async fn test_refused_stream_falls_back() {
        let mock = MockTransport::new()
            .with_stream_refused(TransportError::network("connection refused"))
            .with_buffered_answer("fallback ok");
        let session = session_with(&mock);

        let outcome = session.send("Hi").await;
        assert!(matches!(outcome, SendOutcome::Recovered { .. }));

        let reply = reply_of(&session);
        assert_eq!(reply.content, "fallback ok");
        assert!(!reply.is_streaming);
        assert!(!session.is_loading());
    }

    #[tokio::test]
    async fn test_double_failure_shows_apology() {
        let mock = MockTransport::new()
            .with_stream_refused(TransportError::server(500, "boom"))
            .with_buffered_failure(TransportError::server(500, "boom"));
        let session = session_with(&mock);

        let outcome = session.send("Hi").await;
        assert!(matches!(outcome, SendOutcome::Apologized { .. }));

        let reply = reply_of(&session);
        assert_eq!(reply.content, DEFAULT_APOLOGY);
        assert!(!reply.is_streaming);
        assert!(!session.is_loading());
    }

    #[tokio::test]
    async fn test_custom_apology() {
        let mock = MockTransport::new();
        let config = SessionConfig {
            apology: "Please try again later.".into(),
            ..SessionConfig::default()
        };
        let session = ChatSession::with_config(Arc::new(mock), config);

        session.send("Hi").await;
        assert_eq!(reply_of(&session).content, "Please try again later.");
    }

    #[tokio::test]
    async fn test_blank_questions_rejected() {
        let mock = MockTransport::new();
        let session = session_with(&mock);

        assert_eq!(
            session.send("").await,
            SendOutcome::Rejected(Rejection::EmptyQuestion)
        );
        assert_eq!(
            session.send("   ").await,
            SendOutcome::Rejected(Rejection::EmptyQuestion)
        );

        assert!(session.snapshot().is_empty());
        assert!(!session.is_loading());
        assert!(mock.requests().is_empty());
    }

    #[tokio::test]
    async fn test_second_send_rejected_while_loading() {
        let (mock, sender) = MockTransport::new().with_stream_channel();
        let session = session_with(&mock);

        let mut first = tokio_test::task::spawn(session.send("first"));
        assert_pending!(first.poll());
        assert!(session.is_loading());

        sender.send_text("partial");
        assert_pending!(first.poll());
        let before = session.snapshot();

        assert_eq!(
            session.send("second").await,
            SendOutcome::Rejected(Rejection::Busy)
        );
        assert_eq!(session.snapshot(), before);
        assert_eq!(mock.request_count(RequestKind::Stream), 1);

        sender.send_text(" answer");
        sender.finish();
        let outcome = assert_ready!(first.poll());
        assert!(matches!(outcome, SendOutcome::Streamed { .. }));

        let snapshot = session.snapshot();
        assert_eq!(snapshot.messages.len(), 2);
        assert_eq!(snapshot.messages[0].content, "first");
        assert_eq!(snapshot.messages[1].content, "partial answer");
    }

    #[tokio::test]
    async fn test_dropped_send_releases_session() {
        let (mock, sender) = MockTransport::new().with_stream_channel();
        let mock = mock.with_stream_chunks(&["still here"]);
        let session = session_with(&mock);

        sender.send_text("half an ans");
        let timed_out =
            tokio::time::timeout(Duration::from_millis(50), session.send("first")).await;
        assert!(timed_out.is_err());

        assert!(!session.is_loading());
        let reply = reply_of(&session);
        assert!(!reply.is_streaming);
        assert_eq!(reply.content, DEFAULT_APOLOGY);

        let outcome = session.send("second").await;
        assert!(matches!(outcome, SendOutcome::Streamed { .. }));
        assert_eq!(reply_of(&session).content, "still here");
        assert_eq!(session.snapshot().streaming_count(), 0);
    }

    #[tokio::test]
    async fn test_republished_content_only_grows() {
        let (mock, sender) = MockTransport::new().with_stream_channel();
        let session = session_with(&mock);

        let mut task = tokio_test::task::spawn(session.send("q"));
        assert_pending!(task.poll());

        let mut seen = vec![reply_of(&session).content];
        for chunk in ["The ", "quick ", "brown ", "fox"] {
            sender.send_text(chunk);
            assert_pending!(task.poll());

            let reply = reply_of(&session);
            assert!(reply.is_streaming);
            seen.push(reply.content);
        }
        sender.finish();
        assert_ready!(task.poll());

        assert!(seen.windows(2).all(|w| w[1].starts_with(&w[0]) && w[1].len() > w[0].len()));
        assert_eq!(reply_of(&session).content, "The quick brown fox");
    }

    #[tokio::test]
    async fn test_empty_chunk_does_not_republish() {
        let (mock, sender) = MockTransport::new().with_stream_channel();
        let session = session_with(&mock);
        let mut rx = session.subscribe();

        let mut task = tokio_test::task::spawn(session.send("q"));
        assert_pending!(task.poll());
        let _ = rx.borrow_and_update();

        sender.send_bytes(&[]);
        assert_pending!(task.poll());
        assert!(!rx.has_changed().expect("sender alive"));
        assert!(reply_of(&session).is_streaming);

        sender.finish();
        assert_ready!(task.poll());
        assert!(rx.has_changed().expect("sender alive"));
    }

    #[tokio::test]
    async fn test_placeholder_published_before_stream_data() {
        let (mock, sender) = MockTransport::new().with_stream_channel();
        let session = session_with(&mock);

        let mut task = tokio_test::task::spawn(session.send("q"));
        assert_pending!(task.poll());

        let snapshot = session.snapshot();
        assert!(snapshot.loading);
        assert_eq!(snapshot.messages.len(), 2);
        assert!(snapshot.messages[1].is_awaiting_content());
        assert_eq!(snapshot.streaming_count(), 1);

        drop(sender);
        assert_ready!(task.poll());
        assert_eq!(session.snapshot().streaming_count(), 0);
    }

    #[tokio::test]
    async fn test_interrupted_stream_discards_partial_text() {
        let mock = MockTransport::new()
            .with_stream_interrupted(&["I hear ", "you"], TransportError::network("reset"))
            .with_buffered_answer("I hear you, and I'm here.");
        let session = session_with(&mock);

        let outcome = session.send("hello").await;
        assert!(matches!(outcome, SendOutcome::Recovered { .. }));
        assert_eq!(reply_of(&session).content, "I hear you, and I'm here.");
        assert_eq!(mock.closed_streams(), 1);
    }

    #[tokio::test]
    async fn test_multibyte_split_across_chunks() {
        let bytes = "Ça va? 🙂".as_bytes().to_vec();
        let mock = MockTransport::new().with_stream_bytes(vec![
            bytes[..1].to_vec(),
            bytes[1..bytes.len() - 2].to_vec(),
            bytes[bytes.len() - 2..].to_vec(),
        ]);
        let session = session_with(&mock);

        session.send("q").await;
        assert_eq!(reply_of(&session).content, "Ça va? 🙂");
    }

    #[tokio::test]
    async fn test_truncated_stream_tail_becomes_replacement() {
        let euro = "€".as_bytes();
        let mock = MockTransport::new().with_stream_bytes(vec![b"cost ".to_vec(), euro[..2].to_vec()]);
        let session = session_with(&mock);

        session.send("q").await;
        assert_eq!(reply_of(&session).content, "cost \u{FFFD}");
    }

    #[tokio::test]
    async fn test_finalize_is_guarded() {
        let mock = MockTransport::new().with_stream_chunks(&["done"]);
        let session = session_with(&mock);

        let outcome = session.send("q").await;
        let id = outcome.message_id().expect("reply id");
        let before = session.snapshot();

        assert!(!session.finalize(id, Some("overwritten".into())));
        assert!(!session.finalize(MessageId::new(), None));
        assert_eq!(session.snapshot(), before);
    }

    #[tokio::test]
    async fn test_question_sent_raw_with_stable_session_id() {
        let mock = MockTransport::new()
            .with_stream_chunks(&["a"])
            .with_stream_refused(TransportError::network("down"))
            .with_buffered_answer("b");
        let session = session_with(&mock);

        session.send("  first  ").await;
        session.send("second").await;

        let requests = mock.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].question, "  first  ");
        assert!(requests.iter().all(|r| &r.session_id == session.session_id()));
        assert_eq!(session.snapshot().messages[0].content, "  first  ");
    }

    #[tokio::test]
    async fn test_sequential_sends_append_in_order() {
        let mock = MockTransport::new()
            .with_stream_chunks(&["one"])
            .with_stream_chunks(&["two"]);
        let session = session_with(&mock);

        session.send("1").await;
        let first_user = session.snapshot().messages[0].clone();
        session.send("2").await;

        let snapshot = session.snapshot();
        let contents: Vec<_> = snapshot.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["1", "one", "2", "two"]);
        assert_eq!(snapshot.messages[0], first_user);
        assert_eq!(snapshot.streaming_count(), 0);
    }

    #[tokio::test]
    async fn test_streaming_disabled_uses_buffered_only() {
        let mock = MockTransport::new().with_buffered_answer("buffered");
        let config = SessionConfig {
            streaming: false,
            ..SessionConfig::default()
        };
        let session = ChatSession::with_config(Arc::new(mock.clone()), config);

        let outcome = session.send("q").await;
        assert!(matches!(outcome, SendOutcome::Recovered { .. }));
        assert_eq!(reply_of(&session).content, "buffered");
        assert_eq!(mock.request_count(RequestKind::Stream), 0);
    }
}
