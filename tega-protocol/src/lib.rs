//! # tega-protocol
//!
//! Wire protocol implementation for the tega driver.
//!
//! This crate provides:
//! - Line-based framing (header line + optional JSON body line)
//! - Typed commands exchanged over the `/_pubsub` duplex channel
//! - Payload types (notifications, messages, RPC arguments and results)
//! - Dotted path to URL encoding shared by the CRUD facade

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;
pub mod path;

pub use codec::{Decoder, Encoder};
pub use error::ProtocolError;
pub use frame::Frame;
pub use message::{
    ArgsKwargs, Command, Message, Notification, RequestType, RpcResult, Scope,
};
pub use path::{PathCodec, QueryParams, VersionCursor};

/// Default REST/WebSocket server host.
pub const DEFAULT_HOST: &str = "localhost";

/// Default REST/WebSocket server port.
pub const DEFAULT_PORT: u16 = 8888;

/// tega ID used when the application does not supply one.
pub const DEFAULT_TEGA_ID: &str = "anonymous";

/// Path of the duplex pub/sub endpoint.
pub const PUBSUB_PATH: &str = "/_pubsub";
