//! Connection collaborator: opens one invocation and yields its raw bytes.

mod http;
mod replay;

pub use http::HttpConnector;
pub use replay::ReplayConnector;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid request: {0}")]
    Request(String),
}

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// Model selection sent with an invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model_name: String,
    pub agent_style: String,
}

impl Default for ModelSelection {
    fn default() -> Self {
        Self {
            model_name: "custom-vlm".to_string(),
            agent_style: String::new(),
        }
    }
}

/// Static parameters of one invocation.
#[derive(Debug, Clone)]
pub struct InvocationParams {
    pub agent_id: String,
    pub thread_id: String,
    pub message: String,
    pub model: ModelSelection,
    pub image_path: Option<String>,
}

impl InvocationParams {
    pub fn new(agent_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            thread_id: "1".to_string(),
            message: message.into(),
            model: ModelSelection::default(),
            image_path: None,
        }
    }

    #[must_use]
    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = thread_id.into();
        self
    }

    #[must_use]
    pub fn with_model(mut self, model_name: impl Into<String>) -> Self {
        self.model.model_name = model_name.into();
        self
    }
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open the invocation and return its raw byte stream.
    async fn open(&self, params: &InvocationParams) -> Result<ByteStream, TransportError>;
}
