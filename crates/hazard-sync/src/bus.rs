//! In-process broadcast channels
//!
//! Provides [`InMemoryBus`], a [`BroadcastPort`] backed by one unbounded
//! queue per subscribed window, [`ChannelHub`] for per-analysis channels,
//! and [`UnavailablePort`] for exercising single-window degradation.

use crate::config::SyncConfig;
use crate::error::ChannelError;
use crate::message::BroadcastMessage;
use crate::port::{BroadcastPort, Inbox};
use dashmap::DashMap;
use hazard_model::WindowId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    /// Messages published
    pub published: u64,
    /// Individual deliveries (one per recipient, duplicates included)
    pub delivered: u64,
}

/// In-memory broadcast channel for one analysis
///
/// Delivery is immediate into each recipient's queue, so per-sender order
/// is the order of `publish` calls. Optional duplicate delivery and JSON
/// round-tripping make the at-least-once and wire-format contracts
/// observable in tests.
#[derive(Debug, Default)]
pub struct InMemoryBus {
    name: String,
    subscribers: DashMap<WindowId, mpsc::UnboundedSender<BroadcastMessage>>,
    duplicate_delivery: bool,
    wire_encoding: bool,
    published: AtomicU64,
    delivered: AtomicU64,
}

impl InMemoryBus {
    /// Create a bus named `name`
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Deliver every message twice
    #[inline]
    #[must_use]
    pub fn with_duplicate_delivery(mut self, enabled: bool) -> Self {
        self.duplicate_delivery = enabled;
        self
    }

    /// Encode and decode every delivery through JSON
    #[inline]
    #[must_use]
    pub fn with_wire_encoding(mut self, enabled: bool) -> Self {
        self.wire_encoding = enabled;
        self
    }

    /// Channel name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Delivery counters
    #[must_use]
    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
        }
    }

    fn prepare(&self, message: &BroadcastMessage) -> Result<BroadcastMessage, ChannelError> {
        if self.wire_encoding {
            BroadcastMessage::from_json(&message.to_json()?)
        } else {
            Ok(message.clone())
        }
    }
}

impl BroadcastPort for InMemoryBus {
    fn publish(&self, message: BroadcastMessage) -> Result<(), ChannelError> {
        self.published.fetch_add(1, Ordering::Relaxed);
        let copies = if self.duplicate_delivery { 2 } else { 1 };
        let mut closed = Vec::new();

        for entry in &self.subscribers {
            if *entry.key() == message.origin_window_id {
                continue;
            }
            for _ in 0..copies {
                let copy = self.prepare(&message)?;
                if entry.value().send(copy).is_err() {
                    closed.push(*entry.key());
                    break;
                }
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
        }

        for window in closed {
            tracing::debug!(channel = %self.name, window = %window, "dropping closed subscriber");
            self.subscribers.remove(&window);
        }
        Ok(())
    }

    fn subscribe(&self, window: WindowId) -> Result<Inbox, ChannelError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.insert(window, tx);
        tracing::debug!(channel = %self.name, window = %window, "window subscribed");
        Ok(Inbox::new(window, rx))
    }

    fn unsubscribe(&self, window: WindowId) {
        if self.subscribers.remove(&window).is_some() {
            tracing::debug!(channel = %self.name, window = %window, "window unsubscribed");
        }
    }

    fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

/// Port that can never be reached
#[derive(Debug, Clone, Default)]
pub struct UnavailablePort {
    reason: String,
}

impl UnavailablePort {
    /// Create with a reason reported in errors
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl BroadcastPort for UnavailablePort {
    fn publish(&self, _message: BroadcastMessage) -> Result<(), ChannelError> {
        Err(ChannelError::Unavailable(self.reason.clone()))
    }

    fn subscribe(&self, _window: WindowId) -> Result<Inbox, ChannelError> {
        Err(ChannelError::Unavailable(self.reason.clone()))
    }

    fn unsubscribe(&self, _window: WindowId) {}

    fn subscriber_count(&self) -> usize {
        0
    }
}

/// Registry of per-analysis channels
#[derive(Debug, Clone, Default)]
pub struct ChannelHub {
    prefix: String,
    channels: Arc<DashMap<String, Arc<InMemoryBus>>>,
    duplicate_delivery: bool,
    wire_encoding: bool,
}

impl ChannelHub {
    /// Create a hub naming channels `{prefix}:{analysis}`
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Self::default()
        }
    }

    /// Create a hub naming channels as `config` does
    #[must_use]
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.channel_prefix.as_str())
    }

    /// Deliver every message twice on channels created from now on
    #[inline]
    #[must_use]
    pub fn with_duplicate_delivery(mut self, enabled: bool) -> Self {
        self.duplicate_delivery = enabled;
        self
    }

    /// Round-trip deliveries through JSON on channels created from now on
    #[inline]
    #[must_use]
    pub fn with_wire_encoding(mut self, enabled: bool) -> Self {
        self.wire_encoding = enabled;
        self
    }

    /// Channel for `analysis`, created on first use
    #[must_use]
    pub fn channel(&self, analysis: &str) -> Arc<InMemoryBus> {
        let name = format!("{}:{}", self.prefix, analysis);
        self.channels
            .entry(name.clone())
            .or_insert_with(|| {
                Arc::new(
                    InMemoryBus::new(name)
                        .with_duplicate_delivery(self.duplicate_delivery)
                        .with_wire_encoding(self.wire_encoding),
                )
            })
            .clone()
    }

    /// Number of channels created
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Check if no channel exists yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageKind;
    use hazard_model::VersionId;

    fn request(origin: WindowId) -> BroadcastMessage {
        BroadcastMessage::full_sync_request(origin, VersionId::new("v1"))
    }

    #[test]
    fn never_echoes_to_sender() {
        let bus = InMemoryBus::new("t");
        let a = WindowId::new();
        let b = WindowId::new();
        let mut inbox_a = bus.subscribe(a).unwrap();
        let mut inbox_b = bus.subscribe(b).unwrap();

        bus.publish(request(a)).unwrap();
        assert!(inbox_a.try_next().is_none());
        assert_eq!(inbox_b.try_next().unwrap().kind(), MessageKind::FullSyncRequest);
    }

    #[test]
    fn preserves_per_sender_order() {
        let bus = InMemoryBus::new("t").with_wire_encoding(true);
        let a = WindowId::new();
        let b = WindowId::new();
        let mut inbox_b = bus.subscribe(b).unwrap();
        let _inbox_a = bus.subscribe(a).unwrap();

        for v in ["v1", "v2", "v3"] {
            bus.publish(BroadcastMessage::full_sync_request(a, VersionId::new(v)))
                .unwrap();
        }
        let seen: Vec<String> = std::iter::from_fn(|| inbox_b.try_next())
            .map(|m| m.version_id.to_string())
            .collect();
        assert_eq!(seen, vec!["v1", "v2", "v3"]);
    }

    #[test]
    fn duplicate_delivery_sends_twice() {
        let bus = InMemoryBus::new("t").with_duplicate_delivery(true);
        let a = WindowId::new();
        let b = WindowId::new();
        let inbox_b = bus.subscribe(b).unwrap();
        bus.publish(request(a)).unwrap();
        assert_eq!(inbox_b.pending(), 2);
        assert_eq!(bus.stats(), BusStats { published: 1, delivered: 2 });
    }

    #[test]
    fn unsubscribe_ends_inbox() {
        let bus = InMemoryBus::new("t");
        let b = WindowId::new();
        let mut inbox = bus.subscribe(b).unwrap();
        bus.unsubscribe(b);
        bus.publish(request(WindowId::new())).unwrap();
        assert!(inbox.try_next().is_none());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn hub_scopes_channels_per_analysis() {
        let hub = ChannelHub::new("sync");
        let first = hub.channel("acc");
        let again = hub.channel("acc");
        let other = hub.channel("lane-keeping");
        assert!(Arc::ptr_eq(&first, &again));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(first.name(), "sync:acc");
        assert_eq!(hub.len(), 2);
    }

    #[test]
    fn hub_follows_configured_prefix() {
        let config = SyncConfig::default().with_channel_prefix("hazard-tabs");
        let hub = ChannelHub::from_config(&config);
        assert_eq!(hub.channel("acc").name(), config.channel_name("acc"));
        assert_eq!(hub.channel("acc").name(), "hazard-tabs:acc");
    }

    #[test]
    fn unavailable_port_degrades() {
        let port = UnavailablePort::new("no channel support");
        let err = port.subscribe(WindowId::new()).unwrap_err();
        assert!(err.is_degradation());
    }
}
