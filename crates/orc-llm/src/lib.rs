//! orc-llm — the abstract streaming chat client and generic SSE parser.

pub mod client;
pub mod provider;
pub mod sse;
pub mod types;

pub use client::ChatClient;
pub use provider::{LlmClient, LlmError, LlmResult, LlmStream};
pub use types::{ChatMessage, ChatRequest, StreamDelta};
