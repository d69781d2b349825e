use std::fmt;

use super::message::MessageId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SendPhase {
    Idle,
    UserMessageAppended,
    StreamOpening,
    Streaming,
    FallbackBuffered,
    FallbackFailed,
    Finalized,
}

impl SendPhase {
    /// `UserMessageAppended -> FallbackBuffered` covers sessions with
    /// streaming switched off, which go straight to the buffered request.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::UserMessageAppended)
                | (Self::UserMessageAppended, Self::StreamOpening | Self::FallbackBuffered)
                | (Self::StreamOpening, Self::Streaming | Self::FallbackBuffered)
                | (Self::Streaming, Self::Finalized | Self::FallbackBuffered)
                | (Self::FallbackBuffered, Self::Finalized | Self::FallbackFailed)
                | (Self::FallbackFailed, Self::Finalized)
        )
    }
}

impl fmt::Display for SendPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::UserMessageAppended => "user_message_appended",
            Self::StreamOpening => "stream_opening",
            Self::Streaming => "streaming",
            Self::FallbackBuffered => "fallback_buffered",
            Self::FallbackFailed => "fallback_failed",
            Self::Finalized => "finalized",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    EmptyQuestion,
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Rejected(Rejection),
    /// The answer arrived over the stream.
    Streamed { message_id: MessageId },
    /// The stream failed and the buffered request answered instead.
    Recovered { message_id: MessageId },
    /// Both paths failed; the reply holds the apology text.
    Apologized { message_id: MessageId },
}

impl SendOutcome {
    #[must_use]
    pub const fn message_id(&self) -> Option<MessageId> {
        match self {
            Self::Rejected(_) => None,
            Self::Streamed { message_id }
            | Self::Recovered { message_id }
            | Self::Apologized { message_id } => Some(*message_id),
        }
    }

    #[must_use]
    pub const fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

/// State private to one in-flight send. Dropped at finalization; the
/// message log is the only durable record.
#[derive(Debug)]
pub(crate) struct PendingSend {
    pub message_id: MessageId,
    pub question: String,
    pub accumulator: String,
    phase: SendPhase,
}

impl PendingSend {
    pub fn new(message_id: MessageId, question: String) -> Self {
        Self {
            message_id,
            question,
            accumulator: String::new(),
            phase: SendPhase::UserMessageAppended,
        }
    }

    pub const fn phase(&self) -> SendPhase {
        self.phase
    }

    pub fn advance(&mut self, next: SendPhase) -> bool {
        if !self.phase.can_advance_to(next) {
            tracing::warn!(
                message_id = %self.message_id,
                from = %self.phase,
                to = %next,
                "Ignoring illegal send phase transition"
            );
            return false;
        }

        tracing::debug!(message_id = %self.message_id, from = %self.phase, to = %next, "Send phase");
        self.phase = next;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streaming_path() {
        let path = [
            SendPhase::Idle,
            SendPhase::UserMessageAppended,
            SendPhase::StreamOpening,
            SendPhase::Streaming,
            SendPhase::Finalized,
        ];
        assert!(path.windows(2).all(|w| w[0].can_advance_to(w[1])));
    }

    #[test]
    fn test_fallback_paths() {
        assert!(SendPhase::StreamOpening.can_advance_to(SendPhase::FallbackBuffered));
        assert!(SendPhase::Streaming.can_advance_to(SendPhase::FallbackBuffered));
        assert!(SendPhase::FallbackBuffered.can_advance_to(SendPhase::Finalized));
        assert!(SendPhase::FallbackBuffered.can_advance_to(SendPhase::FallbackFailed));
        assert!(SendPhase::FallbackFailed.can_advance_to(SendPhase::Finalized));
    }

    #[test]
    fn test_finalized_has_no_successor() {
        let all = [
            SendPhase::Idle,
            SendPhase::UserMessageAppended,
            SendPhase::StreamOpening,
            SendPhase::Streaming,
            SendPhase::FallbackBuffered,
            SendPhase::FallbackFailed,
            SendPhase::Finalized,
        ];
        assert!(all.iter().all(|p| !SendPhase::Finalized.can_advance_to(*p)));
    }

    #[test]
    fn test_illegal_transition_ignored() {
        let mut op = PendingSend::new(MessageId::new(), "q".into());
        assert!(!op.advance(SendPhase::Streaming));
        assert_eq!(op.phase(), SendPhase::UserMessageAppended);

        assert!(op.advance(SendPhase::StreamOpening));
        assert!(op.advance(SendPhase::FallbackBuffered));
        assert!(!op.advance(SendPhase::Streaming));
        assert_eq!(op.phase(), SendPhase::FallbackBuffered);
    }

    #[test]
    fn test_outcome_message_id() {
        let id = MessageId::new();
        assert_eq!(SendOutcome::Streamed { message_id: id }.message_id(), Some(id));
        assert!(SendOutcome::Rejected(Rejection::Busy).message_id().is_none());
        assert!(SendOutcome::Rejected(Rejection::EmptyQuestion).is_rejected());
    }
}
