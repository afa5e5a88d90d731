//! Generic OpenAI-compatible streaming chat client.
//!
//! Talks to whatever `api_url` an `AgentProfile` names (Ollama, LM Studio, or
//! any other endpoint speaking the same `data:`-framed SSE protocol) rather
//! than hard-coding a single vendor, since the orchestrator's config format
//! (`provider`, `api_url`, `api_key`) never assumes one.

use crate::provider::{LlmClient, LlmError, LlmResult, LlmStream};
use crate::sse::parse_sse_stream;
use crate::types::ChatRequest;
use futures::StreamExt;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Total wall-clock budget for one streaming request, from the first byte
/// requested to `[DONE]`. Not a per-chunk idle timeout — a stream that
/// keeps producing content past this deadline is still cut off.
const STREAM_TIMEOUT_SECS: u64 = 120;

pub struct ChatClient {
    http: Client,
    provider: String,
    endpoint: String,
    api_key: Option<String>,
}

impl ChatClient {
    pub fn new(provider: impl Into<String>, api_url: impl Into<String>, api_key: Option<String>) -> Self {
        let endpoint = format!("{}/chat/completions", api_url.into().trim_end_matches('/'));
        Self {
            http: Client::new(),
            provider: provider.into(),
            endpoint,
            api_key,
        }
    }
}

#[async_trait::async_trait]
impl LlmClient for ChatClient {
    fn provider_name(&self) -> &str {
        &self.provider
    }

    async fn complete_stream(
        &self,
        request: ChatRequest,
        cancel: Option<CancellationToken>,
    ) -> LlmResult<LlmStream> {
        let mut builder = self.http.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        debug!(provider = %self.provider, url = %self.endpoint, "sending chat completion request");

        let response = builder
            .send()
            .await
            .map_err(|e| LlmError::ConnectFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::BadStatus { status: status.as_u16(), body });
        }

        let byte_stream = response.bytes_stream();
        let deltas = parse_sse_stream(byte_stream);
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(STREAM_TIMEOUT_SECS);

        let stream: LlmStream = Box::pin(async_stream::stream! {
            tokio::pin!(deltas);
            loop {
                tokio::select! {
                    biased;
                    _ = async { if let Some(t) = &cancel { t.cancelled().await } else { futures::future::pending::<()>().await } } => {
                        yield Err(LlmError::Cancelled);
                        break;
                    }
                    _ = tokio::time::sleep_until(deadline) => {
                        yield Err(LlmError::Timeout(STREAM_TIMEOUT_SECS));
                        break;
                    }
                    next = deltas.next() => {
                        match next {
                            Some(item) => yield item,
                            None => break,
                        }
                    }
                }
            }
        });

        Ok(stream)
    }
}
