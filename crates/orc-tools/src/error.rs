//! ToolExecutor's error taxonomy.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("path '{0}' is outside the allowed directories")]
    PathNotAllowed(String),

    #[error("file reads are disabled")]
    ReadDisabled,

    #[error("file writes are disabled")]
    WriteDisabled,

    #[error("file too large: {size_kb}kb exceeds limit of {limit_kb}kb")]
    FileTooLarge { size_kb: u64, limit_kb: u64 },

    #[error("file already exists: {0}")]
    FileExists(String),

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ToolResult<T> = std::result::Result<T, ToolError>;

impl From<ToolError> for orc_core::Error {
    fn from(e: ToolError) -> Self {
        orc_core::Error::tool("tool_executor", e.to_string())
    }
}
