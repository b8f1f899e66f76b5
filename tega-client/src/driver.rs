//! High-level driver API.

use crate::config::ClientConfig;
use crate::crud::CrudClient;
use crate::error::ClientError;
use crate::rpc::{RpcHandler, RpcRegistry};
use crate::session::{SessionChannel, SessionState};
use crate::subscriber::Subscriber;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tega_protocol::{ArgsKwargs, Scope, VersionCursor};

/// One tega identity: REST access plus an optional pub/sub session.
pub struct Driver {
    config: ClientConfig,
    crud: Arc<CrudClient>,
    rpc: Arc<RpcRegistry>,
    session: Option<SessionChannel>,
}

impl Driver {
    /// Creates a driver. No connection is made until [`Driver::connect`].
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let crud = Arc::new(CrudClient::new(&config)?);
        let rpc = Arc::new(RpcRegistry::new(crud.clone()));
        Ok(Self {
            config,
            crud,
            rpc,
            session: None,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn tega_id(&self) -> &str {
        &self.config.tega_id
    }

    /// Returns the REST client (management calls, transactions).
    pub fn crud(&self) -> &CrudClient {
        &self.crud
    }

    pub fn rpc_registry(&self) -> Arc<RpcRegistry> {
        self.rpc.clone()
    }

    // =========================================================================
    // Session lifecycle
    // =========================================================================

    /// Opens the pub/sub session. A session that is still open is kept.
    pub async fn connect(&mut self, subscriber: Arc<dyn Subscriber>) -> Result<(), ClientError> {
        if self.is_connected() {
            return Ok(());
        }
        let session = SessionChannel::open(&self.config, subscriber, self.rpc.clone()).await?;
        self.session = Some(session);
        Ok(())
    }

    /// Drops the current session and opens a new one, retrying with the
    /// configured backoff. Registered callables are kept; subscriptions are
    /// not restored.
    pub async fn reconnect(&mut self, subscriber: Arc<dyn Subscriber>) -> Result<(), ClientError> {
        if let Some(session) = self.session.take() {
            session.close();
        }

        let policy = self.config.reconnect.clone();
        let mut attempt = 0;
        loop {
            let delay = policy.backoff(attempt);
            if !delay.is_zero() {
                tracing::debug!("reconnect: waiting {:?} before attempt {}", delay, attempt + 1);
                tokio::time::sleep(delay).await;
            }

            match SessionChannel::open(&self.config, subscriber.clone(), self.rpc.clone()).await {
                Ok(session) => {
                    tracing::info!("reconnect: session re-opened after {} attempt(s)", attempt + 1);
                    self.session = Some(session);
                    return Ok(());
                }
                Err(e) if e.is_retryable() && policy.allows(attempt + 1) => {
                    tracing::warn!("reconnect: attempt {} failed: {}", attempt + 1, e);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Returns whether a session is open.
    pub fn is_connected(&self) -> bool {
        self.session.as_ref().is_some_and(SessionChannel::is_open)
    }

    pub fn session(&self) -> Option<&SessionChannel> {
        self.session.as_ref()
    }

    /// Returns the session state, or `None` if no session was ever opened.
    pub fn state(&self) -> Option<SessionState> {
        self.session.as_ref().map(SessionChannel::state)
    }

    /// Closes the session, if any.
    pub fn close(&mut self) {
        if let Some(session) = self.session.take() {
            session.close();
        }
    }

    fn open_session(&self) -> Result<&SessionChannel, ClientError> {
        self.session.as_ref().ok_or(ClientError::NotConnected)
    }

    // =========================================================================
    // Pub/sub
    // =========================================================================

    pub fn subscribe(&self, path: &str, scope: Scope) -> Result<(), ClientError> {
        self.open_session()?.subscribe(path, scope)
    }

    /// Subscribes with `path` matched as a regular expression when `regex`
    /// is set.
    pub fn subscribe_with(&self, path: &str, scope: Scope, regex: bool) -> Result<(), ClientError> {
        self.open_session()?.subscribe_with(path, scope, regex)
    }

    pub fn unsubscribe(&self, path: &str) -> Result<(), ClientError> {
        self.open_session()?.unsubscribe(path)
    }

    pub fn unsubscribe_with(&self, path: &str, regex: bool) -> Result<(), ClientError> {
        self.open_session()?.unsubscribe_with(path, regex)
    }

    pub fn unsubscribe_all(&self) -> Result<(), ClientError> {
        self.open_session()?.unsubscribe_all()
    }

    pub fn publish<T: Serialize + ?Sized>(
        &self,
        channel: &str,
        message: &T,
    ) -> Result<(), ClientError> {
        self.open_session()?.publish(channel, message)
    }

    // =========================================================================
    // Inverse RPC
    // =========================================================================

    /// Registers a callable at `path` and advertises it on the server.
    pub async fn register_rpc(
        &self,
        path: &str,
        name: &str,
        handler: impl RpcHandler + 'static,
        ephemeral: bool,
    ) {
        self.rpc.register(path, name, handler, ephemeral).await;
    }

    pub async fn unregister_rpc(&self, path: &str) -> bool {
        self.rpc.unregister(path).await
    }

    // =========================================================================
    // CRUD
    // =========================================================================

    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        version: impl Into<VersionCursor>,
    ) -> Result<T, ClientError> {
        self.crud.get(path, version).await
    }

    pub async fn get_value(&self, path: &str) -> Result<Value, ClientError> {
        self.crud.get_value(path).await
    }

    pub async fn put<T: Serialize + ?Sized>(
        &self,
        path: &str,
        value: &T,
        ephemeral: bool,
    ) -> Result<(), ClientError> {
        self.crud.put(path, value, ephemeral).await
    }

    pub async fn put_versioned<T: Serialize + ?Sized>(
        &self,
        path: &str,
        value: &T,
        version: impl Into<VersionCursor>,
        ephemeral: bool,
    ) -> Result<(), ClientError> {
        self.crud.put_versioned(path, value, version, ephemeral).await
    }

    pub async fn set_ephemeral(&self, path: &str) -> Result<(), ClientError> {
        self.crud.set_ephemeral(path).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), ClientError> {
        self.crud.delete(path).await
    }

    pub async fn begin(&self) -> Result<String, ClientError> {
        self.crud.begin().await
    }

    pub async fn commit(&self) -> Result<String, ClientError> {
        self.crud.commit().await
    }

    pub async fn cancel(&self) -> Result<String, ClientError> {
        self.crud.cancel().await
    }

    /// Calls a callable registered by some session, through the server.
    pub async fn rpc(&self, path: &str, args: &ArgsKwargs) -> Result<Value, ClientError> {
        self.crud.rpc(path, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconnectPolicy;
    use crate::error::RpcError;
    use crate::subscriber::NoopSubscriber;
    use futures_util::StreamExt;
    use std::time::{Duration, Instant};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio::time::timeout;
    use tokio_tungstenite::accept_async;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    const WAIT: Duration = Duration::from_secs(5);

    /// Accepts WebSocket sessions on `listener` and reports each first frame.
    fn serve(listener: TcpListener) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let Ok(mut ws) = accept_async(tcp).await else {
                        return;
                    };
                    while let Some(Ok(msg)) = ws.next().await {
                        if let WsMessage::Text(text) = msg {
                            let _ = tx.send(text.to_string());
                        }
                    }
                });
            }
        });
        rx
    }

    async fn unused_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    fn config(port: u16, policy: ReconnectPolicy) -> ClientConfig {
        ClientConfig::new("alice")
            .with_host("127.0.0.1")
            .with_port(port)
            .with_reconnect(policy)
    }

    #[test]
    fn test_new_is_disconnected() {
        let driver = Driver::new(ClientConfig::new("alice")).unwrap();
        assert_eq!(driver.tega_id(), "alice");
        assert!(!driver.is_connected());
        assert!(driver.state().is_none());
        assert_eq!(driver.rpc_registry().tega_id(), "alice");
    }

    #[test]
    fn test_pubsub_requires_session() {
        let driver = Driver::new(ClientConfig::new("alice")).unwrap();
        assert!(matches!(
            driver.subscribe("a.b", Scope::Local),
            Err(ClientError::NotConnected)
        ));
        assert!(matches!(
            driver.publish("ch", "hi"),
            Err(ClientError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_connect_opens_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut frames = serve(listener);

        let mut driver = Driver::new(config(port, ReconnectPolicy::default())).unwrap();
        driver.connect(Arc::new(NoopSubscriber)).await.unwrap();
        assert!(driver.is_connected());
        assert_eq!(driver.state(), Some(SessionState::Open));

        driver.subscribe_with("a\\..*", Scope::Local, true).unwrap();
        assert_eq!(
            timeout(WAIT, frames.recv()).await.unwrap().unwrap(),
            "SESSION alice local"
        );
        assert_eq!(
            timeout(WAIT, frames.recv()).await.unwrap().unwrap(),
            "SUBSCRIBE a\\..* local True"
        );

        // A second connect keeps the open session.
        driver.connect(Arc::new(NoopSubscriber)).await.unwrap();
        let extra = timeout(Duration::from_millis(200), frames.recv()).await;
        assert!(extra.is_err());

        driver.close();
        assert!(!driver.is_connected());
        assert!(matches!(
            driver.unsubscribe_all(),
            Err(ClientError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_reconnect_retries_until_server_is_up() {
        let port = unused_port().await;
        let policy = ReconnectPolicy {
            max_attempts: 20,
            initial_backoff_ms: 50,
            max_backoff_ms: 100,
        };
        let mut driver = Driver::new(config(port, policy)).unwrap();
        driver.rpc_registry().insert(
            "test.func.max",
            "max",
            |_: ArgsKwargs| -> Result<Value, RpcError> { Ok(Value::Null) },
        );
        let registry = driver.rpc_registry();

        // Nothing listens for the first attempts.
        let server = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
            serve(listener)
        });

        let started = Instant::now();
        driver.reconnect(Arc::new(NoopSubscriber)).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(250));
        assert!(driver.is_connected());

        let mut frames = server.await.unwrap();
        assert_eq!(
            timeout(WAIT, frames.recv()).await.unwrap().unwrap(),
            "SESSION alice local"
        );

        // Callables survive the reconnect.
        assert!(Arc::ptr_eq(&registry, &driver.rpc_registry()));
        assert!(driver.rpc_registry().contains("test.func.max"));
    }

    #[tokio::test]
    async fn test_reconnect_gives_up_after_max_attempts() {
        let port = unused_port().await;
        let policy = ReconnectPolicy {
            max_attempts: 3,
            initial_backoff_ms: 40,
            max_backoff_ms: 1000,
        };
        let mut driver = Driver::new(config(port, policy.clone())).unwrap();

        let started = Instant::now();
        let err = driver.reconnect(Arc::new(NoopSubscriber)).await.unwrap_err();
        assert!(err.is_transport());
        assert!(!driver.is_connected());

        // Attempts 2 and 3 waited; a fourth attempt would have waited 160ms more.
        let waited = policy.backoff(1) + policy.backoff(2);
        let elapsed = started.elapsed();
        assert!(elapsed >= waited, "{elapsed:?}");
        assert!(elapsed < waited + policy.backoff(3), "{elapsed:?}");
    }
}
