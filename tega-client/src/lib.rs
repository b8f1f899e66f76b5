//! # tega-client
//!
//! Client driver for the tega hierarchical database.
//!
//! This crate provides:
//! - REST CRUD, transactions and management calls over HTTP
//! - A WebSocket pub/sub session with change notifications and messages
//! - Inverse RPC: callables the server invokes on this client
//! - Layered configuration (defaults, YAML file, environment)

pub mod config;
pub mod crud;
pub mod dispatcher;
pub mod driver;
pub mod error;
pub mod rpc;
pub mod session;
pub mod subscriber;

pub use config::{ClientConfig, ConfigError, ReconnectPolicy};
pub use crud::{CrudClient, GetOptions, Management};
pub use dispatcher::Dispatcher;
pub use driver::Driver;
pub use error::{ClientError, RpcError};
pub use rpc::{RpcHandler, RpcRegistry};
pub use session::{SessionChannel, SessionState};
pub use subscriber::{NoopSubscriber, Subscriber};
