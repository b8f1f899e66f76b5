//! Inverse RPC: functions the server invokes on this client.

use crate::crud::CrudClient;
use crate::error::{ClientError, RpcError};
use dashmap::DashMap;
use serde_json::Value;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tega_protocol::{ArgsKwargs, Command, RequestType, RpcResult};

/// A function callable by the server.
pub trait RpcHandler: Send + Sync {
    fn call(&self, args: ArgsKwargs) -> Result<Value, RpcError>;
}

impl<F> RpcHandler for F
where
    F: Fn(ArgsKwargs) -> Result<Value, RpcError> + Send + Sync,
{
    fn call(&self, args: ArgsKwargs) -> Result<Value, RpcError> {
        self(args)
    }
}

struct Registration {
    name: String,
    handler: Arc<dyn RpcHandler>,
}

/// Table of registered callables, keyed by dotted path.
///
/// Written by the application, read by the session dispatcher; the map
/// synchronizes the two.
pub struct RpcRegistry {
    tega_id: String,
    crud: Option<Arc<CrudClient>>,
    table: DashMap<String, Registration>,
}

impl RpcRegistry {
    /// Creates a registry that advertises registrations through `crud`.
    pub fn new(crud: Arc<CrudClient>) -> Self {
        Self {
            tega_id: crud.tega_id().to_string(),
            crud: Some(crud),
            table: DashMap::new(),
        }
    }

    /// Creates a registry that never writes advertisements to the server.
    pub fn detached(tega_id: impl Into<String>) -> Self {
        Self {
            tega_id: tega_id.into(),
            crud: None,
            table: DashMap::new(),
        }
    }

    pub fn tega_id(&self) -> &str {
        &self.tega_id
    }

    /// Value written at the registered path so other clients can discover
    /// the callable.
    pub fn advertisement(&self, name: &str) -> String {
        format!("%{}.{}", self.tega_id, name)
    }

    /// Stores `handler` under `path` without advertising it. Returns the
    /// name of the callable it replaced, if any.
    pub fn insert(
        &self,
        path: impl Into<String>,
        name: impl Into<String>,
        handler: impl RpcHandler + 'static,
    ) -> Option<String> {
        let registration = Registration {
            name: name.into(),
            handler: Arc::new(handler),
        };
        self.table
            .insert(path.into(), registration)
            .map(|previous| previous.name)
    }

    /// Stores `handler` under `path` and advertises it with a CRUD put of
    /// `%<tega_id>.<name>`. A failed advertisement is logged, the local
    /// registration stays in place.
    pub async fn register(
        &self,
        path: &str,
        name: &str,
        handler: impl RpcHandler + 'static,
        ephemeral: bool,
    ) {
        if let Some(previous) = self.insert(path, name, handler) {
            tracing::debug!("rpc {}: replaced callable {}", path, previous);
        }

        let Some(ref crud) = self.crud else {
            return;
        };
        let advertisement = self.advertisement(name);
        if let Err(e) = crud.put(path, &advertisement, ephemeral).await {
            tracing::warn!("rpc {}: failed to advertise {}: {}", path, advertisement, e);
        }
    }

    /// Removes the callable at `path` and deletes its advertisement.
    pub async fn unregister(&self, path: &str) -> bool {
        if self.table.remove(path).is_none() {
            return false;
        }
        if let Some(ref crud) = self.crud {
            if let Err(e) = crud.delete(path).await {
                tracing::warn!("rpc {}: failed to delete advertisement: {}", path, e);
            }
        }
        true
    }

    pub fn contains(&self, path: &str) -> bool {
        self.table.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Invokes the callable registered at `path`.
    pub fn call(&self, path: &str, args: ArgsKwargs) -> Result<Value, ClientError> {
        // Clone the handler out so the map shard is not locked while user
        // code runs (it may register other callables).
        let handler = self
            .table
            .get(path)
            .map(|r| r.handler.clone())
            .ok_or_else(|| ClientError::NotFoundHandler(path.to_string()))?;

        match panic::catch_unwind(AssertUnwindSafe(|| handler.call(args))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(ClientError::Rpc(e.to_string())),
            Err(_) => Err(ClientError::Rpc(format!("rpc handler for {} panicked", path))),
        }
    }

    /// Executes an inbound `REQUEST ... RPC` and builds the correlated
    /// `RESPONSE`. Failures are encoded in the result's `error` field.
    pub fn handle_request(
        &self,
        seq_no: u32,
        tega_id: &str,
        path: &str,
        args: ArgsKwargs,
    ) -> Command {
        let result = match self.call(path, args) {
            Ok(value) => RpcResult::ok(value),
            Err(ClientError::Rpc(message)) => {
                tracing::debug!("rpc {} (seq {}) failed: {}", path, seq_no, message);
                RpcResult::error(message)
            }
            Err(e) => {
                tracing::warn!("rpc {} (seq {}): {}", path, seq_no, e);
                RpcResult::error(e.to_string())
            }
        };

        Command::Response {
            seq_no,
            request_type: RequestType::Rpc,
            tega_id: tega_id.to_string(),
            result,
        }
    }
}
