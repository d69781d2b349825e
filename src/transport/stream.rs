use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;

use super::StreamHandle;
use super::error::TransportError;
use super::types::StreamRead;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// [`StreamHandle`] over any byte stream. Fused: once the stream has ended,
/// failed or been closed, every further read reports `Done`.
pub struct ByteStreamHandle {
    inner: Option<ByteStream>,
    chunks_read: usize,
}

impl ByteStreamHandle {
    #[must_use]
    pub fn new(stream: ByteStream) -> Self {
        Self {
            inner: Some(stream),
            chunks_read: 0,
        }
    }

    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, TransportError>> + Send + 'static,
    {
        Self::new(Box::pin(stream))
    }

    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    #[must_use]
    pub const fn chunks_read(&self) -> usize {
        self.chunks_read
    }
}

impl std::fmt::Debug for ByteStreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteStreamHandle")
            .field("closed", &self.is_closed())
            .field("chunks_read", &self.chunks_read)
            .finish()
    }
}

#[async_trait]
impl StreamHandle for ByteStreamHandle {
    async fn read_next(&mut self) -> Result<StreamRead, TransportError> {
        let Some(stream) = self.inner.as_mut() else {
            return Ok(StreamRead::Done);
        };

        match stream.next().await {
            Some(Ok(bytes)) => {
                self.chunks_read += 1;
                Ok(StreamRead::Data(bytes))
            }
            Some(Err(e)) => {
                self.inner = None;
                Err(e)
            }
            None => {
                self.inner = None;
                Ok(StreamRead::Done)
            }
        }
    }

    fn close(&mut self) {
        if self.inner.take().is_some() {
            tracing::trace!(chunks = self.chunks_read, "Stream handle closed");
        }
    }
}
