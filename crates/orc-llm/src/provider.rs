//! The streaming chat client trait and its error type.

use crate::types::{ChatRequest, StreamDelta};
use futures::Stream;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

pub type LlmResult<T> = Result<T, LlmError>;
pub type LlmStream = Pin<Box<dyn Stream<Item = LlmResult<StreamDelta>> + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("failed to connect to {0}")]
    ConnectFailed(String),

    #[error("endpoint returned status {status}: {body}")]
    BadStatus { status: u16, body: String },

    #[error("stream disconnected: {0}")]
    StreamDisconnected(String),

    #[error("cancelled")]
    Cancelled,

    #[error("stream timed out after {0}s")]
    Timeout(u64),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl From<LlmError> for orc_core::Error {
    fn from(e: LlmError) -> Self {
        orc_core::Error::llm("chat", e.to_string())
    }
}

/// A streaming chat completion client. One implementation (`ChatClient`)
/// talks to any OpenAI-compatible `data:`-framed SSE endpoint; providers
/// differ only in base URL and auth header, which `ChatClient` takes as
/// config rather than requiring a new impl per vendor.
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    fn provider_name(&self) -> &str;

    /// Stream a completion. If `cancel` fires, the underlying connection is
    /// dropped and the stream ends without yielding `StreamDelta::Done`.
    async fn complete_stream(
        &self,
        request: ChatRequest,
        cancel: Option<CancellationToken>,
    ) -> LlmResult<LlmStream>;
}
