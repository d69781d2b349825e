use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl TransportError {
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    #[must_use]
    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self::Server {
            status,
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    #[must_use]
    pub const fn is_server(&self) -> bool {
        matches!(self, Self::Server { .. })
    }

    /// Builds a `Server` error from a non-success response, preferring the
    /// message carried in a JSON error body (`detail`, `error` or `message`).
    #[must_use]
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| {
                ["detail", "error", "message"].iter().find_map(|key| {
                    let field = v.get(key)?;
                    field
                        .as_str()
                        .or_else(|| field.get("message")?.as_str())
                        .map(String::from)
                })
            })
            .unwrap_or_else(|| format!("HTTP {status}"));

        Self::Server { status, message }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else if err.is_builder() {
            Self::Configuration(err.to_string())
        } else if let Some(status) = err.status() {
            Self::server(status.as_u16(), err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}
