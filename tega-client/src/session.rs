//! WebSocket pub/sub session.
//!
//! One session owns three tasks:
//! - the reader pulls frames off the socket and queues them;
//! - the dispatcher drains that queue in arrival order and runs callbacks;
//! - the writer is the only code that touches the socket's sink.
//!
//! Application sends and RPC replies both go through the writer queue, so
//! frames are never interleaved. A read failure or a peer close ends the
//! session; there is no automatic reconnect.

use crate::config::ClientConfig;
use crate::dispatcher::Dispatcher;
use crate::error::ClientError;
use crate::rpc::RpcRegistry;
use crate::subscriber::Subscriber;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tega_protocol::{Command, Encoder, Frame, Message, Scope};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Lifecycle of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Dialing the server.
    Connecting,
    /// Upgraded; the SESSION frame is being written.
    HandshakeSent,
    /// Ready for pub/sub traffic.
    Open,
    /// Terminal. Carries the failure, if the session did not close cleanly.
    Closed(Option<String>),
}

impl SessionState {
    pub fn is_open(&self) -> bool {
        matches!(self, SessionState::Open)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, SessionState::Closed(_))
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::HandshakeSent => write!(f, "handshake sent"),
            SessionState::Open => write!(f, "open"),
            SessionState::Closed(None) => write!(f, "closed"),
            SessionState::Closed(Some(reason)) => write!(f, "closed: {}", reason),
        }
    }
}

/// Moves the session to `Closed` unless it is already there.
fn mark_closed(state: &watch::Sender<SessionState>, reason: Option<String>) -> bool {
    state.send_if_modified(|current| {
        if current.is_closed() {
            return false;
        }
        *current = SessionState::Closed(reason);
        true
    })
}

/// An open pub/sub session.
pub struct SessionChannel {
    tega_id: String,
    outbound: mpsc::UnboundedSender<WsMessage>,
    state: Arc<watch::Sender<SessionState>>,
    tasks: Vec<JoinHandle<()>>,
}

impl SessionChannel {
    /// Dials `ws://{host}:{port}/_pubsub`, sends the SESSION handshake and
    /// starts the reader, dispatcher and writer tasks.
    pub async fn open(
        config: &ClientConfig,
        subscriber: Arc<dyn Subscriber>,
        rpc: Arc<RpcRegistry>,
    ) -> Result<Self, ClientError> {
        let (state_tx, _) = watch::channel(SessionState::Connecting);
        let state = Arc::new(state_tx);

        let url = config.pubsub_url();
        tracing::debug!("session: connecting to {}", url);

        let mut request = url.as_str().into_client_request()?;
        let origin = HeaderValue::from_str(&config.origin())
            .map_err(|e| tungstenite::Error::HttpFormat(e.into()))?;
        request.headers_mut().insert("Origin", origin);

        let (ws, _) = connect_async(request).await.map_err(|e| {
            tracing::debug!("session: connect failed: {}", e);
            ClientError::from(e)
        })?;
        let (mut sink, stream) = ws.split();

        state.send_replace(SessionState::HandshakeSent);
        let handshake = Encoder::encode(&Command::Session {
            tega_id: config.tega_id.clone(),
            scope: config.scope,
        })?;
        sink.send(WsMessage::text(handshake)).await?;
        tracing::debug!("session: handshake sent as {}", config.tega_id);
        state.send_replace(SessionState::Open);

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (frames_tx, frames_rx) = mpsc::channel(config.dispatch_capacity.max(1));
        let dispatcher = Dispatcher::new(subscriber, rpc);

        // Not aborted on drop: exits once the state is closed, after
        // flushing a queued close frame.
        tokio::spawn(write_loop(sink, outbound_rx, state.clone()));
        let tasks = vec![
            tokio::spawn(read_loop(stream, frames_tx, state.clone())),
            tokio::spawn(dispatch_loop(
                dispatcher,
                frames_rx,
                outbound_tx.clone(),
                state.subscribe(),
            )),
        ];

        tracing::info!("session: open for {}", config.tega_id);

        Ok(Self {
            tega_id: config.tega_id.clone(),
            outbound: outbound_tx,
            state,
            tasks,
        })
    }

    pub fn tega_id(&self) -> &str {
        &self.tega_id
    }

    /// Returns the current state.
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Returns a receiver that observes every state transition.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn is_open(&self) -> bool {
        self.state.borrow().is_open()
    }

    /// Waits until the session has closed and returns the final state.
    pub async fn closed(&self) -> SessionState {
        let mut rx = self.state.subscribe();
        let result = rx.wait_for(SessionState::is_closed).await.map(|s| s.clone());
        match result {
            Ok(state) => state,
            Err(_) => self.state(),
        }
    }

    /// Queues a raw frame for the writer.
    pub fn send_frame(&self, frame: &Frame) -> Result<(), ClientError> {
        if self.state.borrow().is_closed() {
            return Err(ClientError::Closed);
        }
        self.outbound
            .send(WsMessage::text(frame.encode()))
            .map_err(|_| ClientError::Closed)
    }

    /// Encodes and queues a command for the writer.
    pub fn send(&self, command: &Command) -> Result<(), ClientError> {
        let frame = Encoder::encode_frame(command)?;
        self.send_frame(&frame)
    }

    /// Subscribes to change notifications (and messages) under `path`.
    pub fn subscribe(&self, path: &str, scope: Scope) -> Result<(), ClientError> {
        self.subscribe_with(path, scope, false)
    }

    /// Like [`SessionChannel::subscribe`]; with `regex` set the server
    /// matches `path` as a regular expression.
    pub fn subscribe_with(&self, path: &str, scope: Scope, regex: bool) -> Result<(), ClientError> {
        self.send(&Command::Subscribe {
            path: path.to_string(),
            scope,
            regex,
        })
    }

    pub fn unsubscribe(&self, path: &str) -> Result<(), ClientError> {
        self.unsubscribe_with(path, false)
    }

    pub fn unsubscribe_with(&self, path: &str, regex: bool) -> Result<(), ClientError> {
        self.send(&Command::Unsubscribe {
            path: Some(path.to_string()),
            regex,
        })
    }

    /// Drops every subscription of this session.
    pub fn unsubscribe_all(&self) -> Result<(), ClientError> {
        self.send(&Command::Unsubscribe {
            path: None,
            regex: false,
        })
    }

    /// Publishes `message` to every subscriber of `channel`.
    pub fn publish<T: Serialize + ?Sized>(
        &self,
        channel: &str,
        message: &T,
    ) -> Result<(), ClientError> {
        let value = serde_json::to_value(message).map_err(ClientError::Encode)?;
        self.send(&Command::Publish {
            channel: channel.to_string(),
            message: Message::new(value),
        })
    }

    /// Sends a close frame and ends the session. No callback runs for
    /// frames that arrive afterwards. Idempotent.
    pub fn close(&self) {
        if self.state.borrow().is_closed() {
            return;
        }
        tracing::debug!("session: closing");
        // The writer drains the close frame before it sees the new state.
        let _ = self.outbound.send(WsMessage::Close(None));
        mark_closed(&self.state, None);
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Drop for SessionChannel {
    fn drop(&mut self) {
        mark_closed(&self.state, None);
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<WsStream, WsMessage>,
    mut outbound: mpsc::UnboundedReceiver<WsMessage>,
    state: Arc<watch::Sender<SessionState>>,
) {
    let mut state_rx = state.subscribe();
    loop {
        tokio::select! {
            biased;

            msg = outbound.recv() => {
                let Some(msg) = msg else { break };
                let closing = msg.is_close();
                if let Err(e) = sink.send(msg).await {
                    tracing::warn!("write_loop: send failed: {}", e);
                    mark_closed(&state, Some(e.to_string()));
                    break;
                }
                if closing {
                    break;
                }
            }
            changed = state_rx.changed() => {
                if changed.is_err() || state_rx.borrow_and_update().is_closed() {
                    break;
                }
            }
        }
    }
    tracing::debug!("write_loop: exiting");
}

async fn read_loop(
    mut stream: SplitStream<WsStream>,
    frames: mpsc::Sender<String>,
    state: Arc<watch::Sender<SessionState>>,
) {
    tracing::debug!("read_loop started");
    let reason = loop {
        match stream.next().await {
            Some(Ok(WsMessage::Text(text))) => {
                tracing::trace!("read_loop: received {} bytes", text.len());
                if frames.send(text.to_string()).await.is_err() {
                    break None;
                }
            }
            Some(Ok(WsMessage::Close(frame))) => {
                tracing::debug!("read_loop: close frame received: {:?}", frame);
                break Some("connection closed by peer".to_string());
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::debug!("read_loop: read failed: {}", e);
                break Some(e.to_string());
            }
            None => {
                tracing::debug!("read_loop: stream ended");
                break Some("connection closed by peer".to_string());
            }
        }
    };

    if mark_closed(&state, reason) {
        tracing::info!("session closed: {}", *state.borrow());
    }
}

async fn dispatch_loop(
    dispatcher: Dispatcher,
    mut frames: mpsc::Receiver<String>,
    outbound: mpsc::UnboundedSender<WsMessage>,
    state: watch::Receiver<SessionState>,
) {
    while let Some(text) = frames.recv().await {
        // Frames still queued behind a local close are dropped.
        if *state.borrow() == SessionState::Closed(None) {
            tracing::debug!("dispatch_loop: session closed, dropping frame");
            break;
        }
        let Some(reply) = dispatcher.dispatch(&text) else {
            continue;
        };
        match Encoder::encode(&reply) {
            Ok(encoded) => {
                if outbound.send(WsMessage::text(encoded)).is_err() {
                    tracing::debug!("dispatch_loop: writer gone, dropping reply");
                }
            }
            Err(e) => tracing::warn!("dispatch_loop: failed to encode reply: {}", e),
        }
    }
    tracing::debug!("dispatch_loop: exiting");
}
