//! Replays a captured stream from disk in fixed-size chunks.

use super::{ByteStream, Connector, InvocationParams, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct ReplayConnector {
    data: Bytes,
    chunk_bytes: usize,
}

impl ReplayConnector {
    pub fn from_bytes(data: impl Into<Bytes>, chunk_bytes: usize) -> Self {
        Self {
            data: data.into(),
            chunk_bytes: chunk_bytes.max(1),
        }
    }

    pub async fn from_file(path: &Path, chunk_bytes: usize) -> Result<Self, TransportError> {
        let data = tokio::fs::read(path).await?;
        tracing::debug!(path = %path.display(), bytes = data.len(), "Loaded replay capture");
        Ok(Self::from_bytes(data, chunk_bytes))
    }

    fn chunks(&self) -> Vec<Result<Bytes, TransportError>> {
        let mut chunks = Vec::with_capacity(self.data.len() / self.chunk_bytes + 1);
        let mut offset = 0;
        while offset < self.data.len() {
            let end = (offset + self.chunk_bytes).min(self.data.len());
            chunks.push(Ok(self.data.slice(offset..end)));
            offset = end;
        }
        chunks
    }
}

#[async_trait]
impl Connector for ReplayConnector {
    async fn open(&self, _params: &InvocationParams) -> Result<ByteStream, TransportError> {
        Ok(Box::pin(futures::stream::iter(self.chunks())))
    }
}
