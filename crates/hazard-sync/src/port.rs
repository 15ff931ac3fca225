//! Broadcast channel port
//!
//! [`BroadcastPort`] is the seam between a window and whatever carries
//! messages between windows of one analysis. Implementations must deliver
//! at least once, keep each sender's messages in order and never deliver a
//! message back to its sender.

use crate::error::ChannelError;
use crate::message::BroadcastMessage;
use hazard_model::WindowId;
use std::fmt;
use tokio::sync::mpsc;

/// Per-analysis broadcast channel
pub trait BroadcastPort: Send + Sync + fmt::Debug {
    /// Send to every other subscribed window (fire-and-forget)
    ///
    /// # Errors
    /// Returns error if the channel cannot accept messages
    fn publish(&self, message: BroadcastMessage) -> Result<(), ChannelError>;

    /// Attach a window and obtain its inbox
    ///
    /// # Errors
    /// Returns [`ChannelError::Unavailable`] if the channel cannot be reached
    fn subscribe(&self, window: WindowId) -> Result<Inbox, ChannelError>;

    /// Detach a window; its inbox drains and then ends
    fn unsubscribe(&self, window: WindowId);

    /// Number of attached windows
    fn subscriber_count(&self) -> usize;
}

/// Receiving end of a window's subscription
#[derive(Debug)]
pub struct Inbox {
    window: WindowId,
    receiver: mpsc::UnboundedReceiver<BroadcastMessage>,
}

impl Inbox {
    /// Wrap a receiver
    #[must_use]
    pub fn new(window: WindowId, receiver: mpsc::UnboundedReceiver<BroadcastMessage>) -> Self {
        Self { window, receiver }
    }

    /// Window this inbox belongs to
    #[inline]
    #[must_use]
    pub fn window(&self) -> WindowId {
        self.window
    }

    /// Next queued message, without waiting
    pub fn try_next(&mut self) -> Option<BroadcastMessage> {
        self.receiver.try_recv().ok()
    }

    /// Wait for the next message; `None` once unsubscribed and drained
    pub async fn recv(&mut self) -> Option<BroadcastMessage> {
        self.receiver.recv().await
    }

    /// Number of queued messages
    #[must_use]
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }
}
