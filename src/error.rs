use thiserror::Error;

/// Faults surfaced by a [`Channel`](crate::Channel).
#[derive(Error, Debug)]
pub enum ChannelError {
    /// Every instance the request reached had no await handler for the action.
    #[error("No handler registered for action \"{action}\"")]
    UnhandledAction { action: String },

    #[error("Request timeout: {action}")]
    Timeout { action: String, timeout_ms: u64 },

    #[error("Channel closed")]
    Closed,

    /// The remote await handler itself failed.
    #[error("Handler for \"{action}\" failed: {message}")]
    Handler { action: String, message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Tokio runtime unavailable: {0}")]
    Runtime(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Endpoint closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, ChannelError>;
pub type TransportResult<T> = std::result::Result<T, TransportError>;

impl From<serde_json::Error> for ChannelError {
    fn from(err: serde_json::Error) -> Self {
        ChannelError::Serialization(err.to_string())
    }
}

impl ChannelError {
    /// Action name carried by the fault, if any.
    pub fn action(&self) -> Option<&str> {
        match self {
            ChannelError::UnhandledAction { action }
            | ChannelError::Timeout { action, .. }
            | ChannelError::Handler { action, .. } => Some(action),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ChannelError::Timeout { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, ChannelError::Closed)
    }
}
