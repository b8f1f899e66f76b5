//! Client error types.

use crate::config::ConfigError;
use tega_protocol::ProtocolError;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(Box<tungstenite::Error>),

    #[error("JSON encode error: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("JSON decode error: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("server error: {status} {reason}")]
    Status { status: u16, reason: String },

    #[error("path not found: {path}")]
    NotFound { path: String },

    #[error("no rpc handler registered for {0}")]
    NotFoundHandler(String),

    #[error("rpc failed: {0}")]
    Rpc(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("not connected")]
    NotConnected,

    #[error("session closed")]
    Closed,

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl From<tungstenite::Error> for ClientError {
    fn from(err: tungstenite::Error) -> Self {
        ClientError::WebSocket(Box::new(err))
    }
}

impl ClientError {
    /// Returns whether this error came from the network layer.
    pub fn is_transport(&self) -> bool {
        matches!(self, ClientError::Transport(_) | ClientError::WebSocket(_))
    }

    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Transport(_) => true,
            ClientError::WebSocket(_) => true,
            ClientError::Closed => true,
            ClientError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Error returned by a registered RPC callable.
///
/// The message is sent back to the server in the `error` field of the
/// result envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RpcError {
    message: String,
}

impl RpcError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for RpcError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for RpcError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}
