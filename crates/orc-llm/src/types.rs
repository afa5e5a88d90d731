//! Request/response shapes for the streaming chat endpoint.

use serde::{Deserialize, Serialize};

/// A chat completion request, in the generic OpenAI-compatible shape the
/// configured endpoint expects.
#[derive(Clone, Debug, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub stream: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl From<orc_core::ChatMessage> for ChatMessage {
    fn from(m: orc_core::ChatMessage) -> Self {
        let role = match m.role {
            orc_core::ChatRole::System => "system",
            orc_core::ChatRole::User => "user",
            orc_core::ChatRole::Assistant => "assistant",
        };
        Self { role: role.to_string(), content: m.content }
    }
}

/// One decoded `data:` event from the stream.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamDelta {
    /// A chunk of assistant text (`choices[0].delta.content`).
    Content(String),
    /// The `data: [DONE]` terminator was seen.
    Done,
}

/// Wire shape of a single SSE JSON payload. Any field this orchestrator
/// doesn't care about is ignored by serde rather than rejected.
#[derive(Debug, Deserialize)]
pub(crate) struct SseChunk {
    #[serde(default)]
    pub choices: Vec<SseChoice>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SseChoice {
    #[serde(default)]
    pub delta: SseDelta,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SseDelta {
    pub content: Option<String>,
}
