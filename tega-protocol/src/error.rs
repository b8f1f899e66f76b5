//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors that can occur while framing or parsing commands.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("empty frame")]
    EmptyFrame,

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("unknown request type: {0}")]
    UnknownRequestType(String),

    #[error("unknown scope: {0}")]
    UnknownScope(String),

    #[error("{command}: missing parameter at position {index}")]
    MissingParam { command: &'static str, index: usize },

    #[error("{0}: missing body line")]
    MissingBody(&'static str),

    #[error("invalid sequence number: {0}")]
    InvalidSeqNo(String),

    #[error("invalid base url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProtocolError {
    /// Returns whether the frame that produced this error should simply be
    /// skipped (as opposed to indicating a broken payload).
    pub fn is_ignorable(&self) -> bool {
        matches!(
            self,
            ProtocolError::UnknownCommand(_) | ProtocolError::UnknownRequestType(_)
        )
    }
}
