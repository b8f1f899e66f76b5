//! Routes inbound session frames to the application.

use crate::rpc::RpcRegistry;
use crate::subscriber::Subscriber;
use std::sync::Arc;
use tega_protocol::{Command, Decoder, ProtocolError, RequestType};

/// Decodes one inbound frame at a time and invokes the matching callback.
///
/// The dispatcher never writes to the socket itself: a frame that needs an
/// answer (an RPC request) yields the reply for the caller to enqueue.
pub struct Dispatcher {
    subscriber: Arc<dyn Subscriber>,
    rpc: Arc<RpcRegistry>,
}

impl Dispatcher {
    pub fn new(subscriber: Arc<dyn Subscriber>, rpc: Arc<RpcRegistry>) -> Self {
        Self { subscriber, rpc }
    }

    /// Handles one frame, returning the reply to send, if any.
    pub fn handle(&self, text: &str) -> Result<Option<Command>, ProtocolError> {
        let command = Decoder::decode(text)?;
        tracing::trace!("dispatch: {}", command.name());

        match command {
            Command::SessionAck { tega_id } => {
                tracing::debug!("dispatch: session acknowledged for {}", tega_id);
                self.subscriber.on_init();
                Ok(None)
            }
            Command::Notify { notifications } => {
                self.subscriber.on_notify(&notifications);
                Ok(None)
            }
            Command::Message {
                channel,
                tega_id,
                message,
            } => {
                self.subscriber.on_message(&channel, &tega_id, &message);
                Ok(None)
            }
            Command::Request {
                seq_no,
                request_type: RequestType::Rpc,
                tega_id,
                path,
                args,
            } => Ok(Some(self.rpc.handle_request(seq_no, &tega_id, &path, args))),
            Command::Request {
                request_type, path, ..
            } => {
                tracing::debug!(
                    "dispatch: ignoring {} request for {}",
                    request_type.as_str(),
                    path
                );
                Ok(None)
            }
            other => {
                tracing::debug!("dispatch: ignoring client-side command {}", other.name());
                Ok(None)
            }
        }
    }

    /// Like [`Dispatcher::handle`], but logs and drops frames that fail to
    /// decode so one bad frame never stops the session.
    pub fn dispatch(&self, text: &str) -> Option<Command> {
        match self.handle(text) {
            Ok(reply) => reply,
            Err(e) if e.is_ignorable() => {
                tracing::debug!("dispatch: skipping frame: {}", e);
                None
            }
            Err(e) => {
                tracing::warn!("dispatch: malformed frame dropped: {}", e);
                None
            }
        }
    }
}
