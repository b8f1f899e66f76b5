//! Application callbacks for pub/sub traffic.

use tega_protocol::{Message, Notification};

/// Receives session events from the dispatcher.
///
/// Every method runs on the session's dispatcher task, one frame at a time,
/// so implementations never race with each other but must not block for
/// long: the next frame waits until the callback returns.
pub trait Subscriber: Send + Sync {
    /// The server acknowledged the SESSION handshake.
    fn on_init(&self) {}

    /// One NOTIFY batch: every node changed under a subscribed path.
    fn on_notify(&self, _notifications: &[Notification]) {}

    /// A message published on a subscribed channel.
    fn on_message(&self, _channel: &str, _tega_id: &str, _message: &Message) {}
}

/// Subscriber that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSubscriber;

impl Subscriber for NoopSubscriber {}
