//! Commands and JSON payload types for the pub/sub channel.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::ProtocolError;

/// Subscription scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// This process only.
    #[default]
    Local,
    /// All subscribers.
    Global,
    /// Global, and the server subscribes back (server-defined semantics).
    Sync,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Local => "local",
            Scope::Global => "global",
            Scope::Sync => "sync",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Scope::Local),
            "global" => Ok(Scope::Global),
            "sync" => Ok(Scope::Sync),
            other => Err(ProtocolError::UnknownScope(other.to_string())),
        }
    }
}

/// Request type carried by `REQUEST`/`RESPONSE` headers.
///
/// Only `RPC` is served by a driver; `SYNC` and `REFER` travel between
/// servers and are recognized so they can be skipped quietly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestType {
    Rpc,
    Sync,
    Refer,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::Rpc => "RPC",
            RequestType::Sync => "SYNC",
            RequestType::Refer => "REFER",
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RPC" => Ok(RequestType::Rpc),
            "SYNC" => Ok(RequestType::Sync),
            "REFER" => Ok(RequestType::Refer),
            other => Err(ProtocolError::UnknownRequestType(other.to_string())),
        }
    }
}

/// One changed node, delivered in a `NOTIFY` batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// tega ID of the actor that made the change.
    pub tega_id: String,
    /// CRUD operation name (e.g. `PUT`, `DELETE`).
    pub ope: String,
    /// Dotted path of the changed node.
    pub path: String,
    /// New value of the node.
    #[serde(default)]
    pub instance: Value,
}

/// Pub/sub payload envelope.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub message: Value,
}

impl Message {
    pub fn new(message: impl Into<Value>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Positional and keyword arguments of an inverse RPC call.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ArgsKwargs {
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl ArgsKwargs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_arg(mut self, arg: impl Into<Value>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    pub fn kwarg(&self, name: &str) -> Option<&Value> {
        self.kwargs.get(name)
    }
}

/// RPC return envelope.
///
/// `error` is set (and `result` is null) when the callable failed or no
/// callable was registered for the requested path.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RpcResult {
    #[serde(default)]
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcResult {
    pub fn ok(result: impl Into<Value>) -> Self {
        Self {
            result: result.into(),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            result: Value::Null,
            error: Some(message.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn into_result(self) -> Result<Value, String> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result),
        }
    }
}

/// A typed frame exchanged over the pub/sub channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Client → server handshake.
    Session { tega_id: String, scope: Scope },
    /// Server → client handshake acknowledgment.
    SessionAck { tega_id: String },
    /// Client → server. `regex` matches `path` as a regular expression.
    Subscribe {
        path: String,
        scope: Scope,
        regex: bool,
    },
    /// Client → server. `None` unsubscribes every path.
    Unsubscribe { path: Option<String>, regex: bool },
    /// Client → server.
    Publish { channel: String, message: Message },
    /// Server → client.
    Notify { notifications: Vec<Notification> },
    /// Server → client.
    Message {
        channel: String,
        tega_id: String,
        message: Message,
    },
    /// Server → client inverse RPC invocation.
    Request {
        seq_no: u32,
        request_type: RequestType,
        tega_id: String,
        path: String,
        args: ArgsKwargs,
    },
    /// Client → server reply to a `Request`.
    Response {
        seq_no: u32,
        request_type: RequestType,
        tega_id: String,
        result: RpcResult,
    },
}

impl Command {
    pub const SESSION: &'static str = "SESSION";
    pub const SESSIONACK: &'static str = "SESSIONACK";
    pub const SUBSCRIBE: &'static str = "SUBSCRIBE";
    pub const UNSUBSCRIBE: &'static str = "UNSUBSCRIBE";
    pub const PUBLISH: &'static str = "PUBLISH";
    pub const NOTIFY: &'static str = "NOTIFY";
    pub const MESSAGE: &'static str = "MESSAGE";
    pub const REQUEST: &'static str = "REQUEST";
    pub const RESPONSE: &'static str = "RESPONSE";

    /// Returns the header command token.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Session { .. } => Self::SESSION,
            Command::SessionAck { .. } => Self::SESSIONACK,
            Command::Subscribe { .. } => Self::SUBSCRIBE,
            Command::Unsubscribe { .. } => Self::UNSUBSCRIBE,
            Command::Publish { .. } => Self::PUBLISH,
            Command::Notify { .. } => Self::NOTIFY,
            Command::Message { .. } => Self::MESSAGE,
            Command::Request { .. } => Self::REQUEST,
            Command::Response { .. } => Self::RESPONSE,
        }
    }
}
