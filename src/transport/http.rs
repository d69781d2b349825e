use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use std::time::Duration;

use super::error::TransportError;
use super::stream::ByteStreamHandle;
use super::types::{BaseUrl, ChatRequest, ChatResponse, SessionId};
use super::{StreamHandle, Transport};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_CHAT_PATH: &str = "/chat";
pub const DEFAULT_STREAM_PATH: &str = "/chat/stream";

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub base_url: BaseUrl,
    pub chat_path: String,
    pub stream_path: String,
    pub connect_timeout: Duration,
    /// Applies to the buffered exchange only; a stream may run as long as
    /// the server keeps sending.
    pub request_timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: BaseUrl::new(DEFAULT_BASE_URL),
            chat_path: DEFAULT_CHAT_PATH.to_string(),
            stream_path: DEFAULT_STREAM_PATH.to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(120),
            user_agent: None,
        }
    }
}

impl HttpConfig {
    #[must_use]
    pub fn new(base_url: impl Into<BaseUrl>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_paths(mut self, chat_path: impl Into<String>, stream_path: impl Into<String>) -> Self {
        self.chat_path = chat_path.into();
        self.stream_path = stream_path.into();
        self
    }

    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    #[must_use]
    pub fn chat_url(&self) -> String {
        self.base_url.join(&self.chat_path)
    }

    #[must_use]
    pub fn stream_url(&self) -> String {
        self.base_url.join(&self.stream_path)
    }
}

/// reqwest-backed [`Transport`]. Performs no retries; fallback policy
/// belongs to the session.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    config: HttpConfig,
}

impl HttpTransport {
    pub fn new(config: HttpConfig) -> Result<Self, TransportError> {
        if config.base_url.as_str().is_empty() {
            return Err(TransportError::Configuration(
                "Base URL must not be empty".to_string(),
            ));
        }

        let mut builder = Client::builder().connect_timeout(config.connect_timeout);

        if let Some(ref ua) = config.user_agent {
            builder = builder.user_agent(ua);
        }

        let client = builder.build().map_err(|e| {
            TransportError::Configuration(format!("Failed to build HTTP client: {e}"))
        })?;

        Ok(Self { client, config })
    }

    #[must_use]
    pub const fn config(&self) -> &HttpConfig {
        &self.config
    }

    async fn post(
        &self,
        url: &str,
        session_id: &SessionId,
        question: &str,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response, TransportError> {
        let body = ChatRequest {
            session_id: session_id.as_str(),
            question,
        };

        let mut builder = self.client.post(url).json(&body);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(TransportError::from_status(status.as_u16(), &error_body));
        }

        Ok(response)
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send_buffered(
        &self,
        session_id: &SessionId,
        question: &str,
    ) -> Result<String, TransportError> {
        let url = self.config.chat_url();
        tracing::debug!(%url, %session_id, "Sending buffered chat request");

        let response = self
            .post(&url, session_id, question, Some(self.config.request_timeout))
            .await?;

        let body: ChatResponse = response.json().await?;

        Ok(body.answer)
    }

    async fn open_stream(
        &self,
        session_id: &SessionId,
        question: &str,
    ) -> Result<Box<dyn StreamHandle>, TransportError> {
        let url = self.config.stream_url();
        tracing::debug!(%url, %session_id, "Opening chat stream");

        let response = self.post(&url, session_id, question, None).await?;

        let byte_stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(TransportError::from));

        Ok(Box::new(ByteStreamHandle::from_stream(byte_stream)))
    }
}
