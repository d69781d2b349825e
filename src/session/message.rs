use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// Stable handle for one entry of the conversation log. Updates locate
/// their target by id, never by position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub is_streaming: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role: Role::User,
            content: content.into(),
            is_streaming: false,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn assistant_placeholder() -> Self {
        Self {
            id: MessageId::new(),
            role: Role::Assistant,
            content: String::new(),
            is_streaming: true,
            created_at: Utc::now(),
        }
    }

    /// True while a reply is in flight but nothing visible has arrived yet;
    /// the presentation shows a typing indicator in that case.
    #[must_use]
    pub fn is_awaiting_content(&self) -> bool {
        self.is_streaming && self.content.trim().is_empty()
    }
}

/// Immutable view of the conversation handed to the presentation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub messages: Vec<Message>,
    pub loading: bool,
}

impl Snapshot {
    #[must_use]
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    #[must_use]
    pub fn find(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    #[must_use]
    pub fn streaming_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_streaming).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
