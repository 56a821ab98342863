//! Error types for remora

use std::time::Duration;

use thiserror::Error;

/// Result type for remora operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for remora
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to launch the browser binary
    #[error("Failed to launch browser: {0}")]
    Launch(String),

    /// Transport error (socket not connected, write rejected, handshake failed)
    #[error("Transport error: {context}")]
    Transport {
        context: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Inbound frame is not valid JSON or not a JSON object
    #[error("Cannot read response: {0}")]
    MalformedResponse(String),

    /// Inbound frame is a well-formed object but neither a reply nor an event
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// `get_response` called on a reader that has not resolved yet
    #[error("No response available")]
    NoResponseAvailable,

    /// A bounded wait exceeded its deadline
    #[error("Operation timed out after {timeout:?}")]
    OperationTimedOut { timeout: Duration },

    /// Operation attempted on a destroyed target or session
    #[error("Target destroyed: {0}")]
    TargetDestroyed(String),

    /// `destroy` called on an already-destroyed target or session
    #[error("Already destroyed: {0}")]
    AlreadyDestroyed(String),

    /// CDP protocol error escalated by a convenience caller
    #[error("CDP error in {method}: {message} (code {code})")]
    Cdp {
        method: String,
        code: i64,
        message: String,
    },

    /// Decode error (e.g., base64)
    #[error("Decode error: {0}")]
    Decode(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a transport error with context
    pub fn transport(context: impl Into<String>) -> Self {
        Self::Transport {
            context: context.into(),
            source: None,
        }
    }

    /// Create a transport error with IO source
    pub fn transport_io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Transport {
            context: context.into(),
            source: Some(source),
        }
    }

    /// Create a CDP error with full context
    pub fn cdp(method: impl Into<String>, code: i64, message: impl Into<String>) -> Self {
        Self::Cdp {
            method: method.into(),
            code,
            message: message.into(),
        }
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::OperationTimedOut { .. })
    }

    /// Check if this error came from a destroyed target or session
    pub fn is_destroyed(&self) -> bool {
        matches!(self, Error::TargetDestroyed(_) | Error::AlreadyDestroyed(_))
    }
}
