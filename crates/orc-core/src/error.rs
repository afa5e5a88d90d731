//! The umbrella error type surfaced by the binary.
//!
//! Lower crates (`orc-tools`, `orc-llm`, `orc-workflow`) define their own
//! narrower `thiserror` enums and convert into this one at their public
//! boundary, wrapping tool/llm/workflow failures as string-carrying variants
//! rather than having this crate depend on any of them.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("llm error: {provider} - {message}")]
    Llm { provider: String, message: String },

    #[error("tool error: {name} - {message}")]
    Tool { name: String, message: String },

    #[error("plan error: {0}")]
    Plan(String),

    #[error("workflow error: {0}")]
    Workflow(String),

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn llm(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Llm { provider: provider.into(), message: message.into() }
    }

    pub fn tool(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tool { name: name.into(), message: message.into() }
    }
}
