//! Error types for Switchboard

use thiserror::Error;

/// Result type alias for Switchboard operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Switchboard
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection error ({provider}): {message}")]
    Connection { provider: String, message: String },

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Transcript error: {0}")]
    Transcript(String),

    #[error("Turn cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    pub fn connection(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Connection {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Only configuration problems stop the process; everything else is
    /// recovered inside the session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config(_))
    }
}

/// A failed tool call, carried as data back to the model.
///
/// This never crosses the orchestrator boundary as an `Err`; it is folded
/// into an ordinary tool turn.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{tool}: {message}")]
pub struct ToolInvocationError {
    pub tool: String,
    pub message: String,
}

impl ToolInvocationError {
    pub fn new(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            message: message.into(),
        }
    }
}
