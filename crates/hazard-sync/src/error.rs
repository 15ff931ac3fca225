//! Error types for window synchronization
//!
//! Provides error handling for:
//! - Broadcast channel failures (which degrade, never tear down)
//! - Version bookkeeping failures on incoming messages
//! - Configuration loading
//! - Window lifecycle

use hazard_model::{RecordError, WindowId};
use hazard_store::VersionError;

/// Broadcast channel errors
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The channel cannot be reached at all
    #[error("broadcast channel unavailable: {0}")]
    Unavailable(String),

    /// The sending window has been closed
    #[error("broadcast channel closed")]
    Closed,

    /// Message could not be encoded or decoded
    #[error("message encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    /// Message kind and payload do not match
    #[error("malformed {kind} message: {reason}")]
    Malformed {
        /// Declared kind
        kind: String,
        /// What was wrong
        reason: String,
    },
}

impl ChannelError {
    /// Check if the window should fall back to single-window mode
    #[inline]
    #[must_use]
    pub fn is_degradation(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Synchronization errors
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Channel failure
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Version bookkeeping failure
    #[error("version error: {0}")]
    Version(#[from] VersionError),

    /// Seed data could not be built
    #[error("seed error: {0}")]
    Seed(#[from] RecordError),

    /// Configuration file could not be read
    #[error("configuration I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration values are inconsistent
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// No window with this id
    #[error("unknown window: {0}")]
    UnknownWindow(WindowId),

    /// Window was closed
    #[error("window {0} is closed")]
    WindowClosed(WindowId),
}

impl SyncError {
    /// Check if the error leaves the window usable in single-window mode
    #[inline]
    #[must_use]
    pub fn is_degradation(&self) -> bool {
        matches!(self, Self::Channel(e) if e.is_degradation())
    }
}
