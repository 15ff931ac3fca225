//! Hazard Analysis Window Synchronization
//!
//! Keeps every window of one analysis converged over a broadcast channel.
//!
//! # Core Concepts
//!
//! - [`BroadcastMessage`]: `{ kind, versionId, payload, originWindowId,
//!   timestamp }` exchanged between windows
//! - [`BroadcastPort`]: At-least-once, per-sender-ordered, never-echoed
//!   channel; [`InMemoryBus`] is the in-process implementation
//! - [`SyncWindow`]: One window's store, versions and sessions wired to
//!   a port, with full-sync bootstrap and buffered replay
//! - [`StandaloneWindowManager`]: Opens section or framework windows that
//!   catch up through the channel
//! - [`SyncConfig`]: Channel prefix, retry policy and switch-following
//!
//! Concurrent edits of the same field from different windows resolve by
//! receipt order (last applied wins), so two windows can briefly end with
//! each other's value. Serialized edits always converge.
//!
//! # Example
//!
//! ```rust,ignore
//! use hazard_sync::{InMemoryBus, SyncConfig, SyncWindow};
//!
//! let bus = Arc::new(InMemoryBus::new("analysis-sync:acc"));
//! let main = SyncWindow::new(bus.clone(), SyncConfig::default());
//! main.start_primary(&DemoAnalysisSeed)?;
//!
//! let popup = SyncWindow::new(bus, SyncConfig::default());
//! popup.bootstrap(&DemoAnalysisSeed).await?; // installs main's state
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod bus;
mod config;
mod error;
mod manager;
mod message;
mod port;
mod window;

pub use bus::{BusStats, ChannelHub, InMemoryBus, UnavailablePort};
pub use config::{RetryPolicy, SyncConfig};
pub use error::{ChannelError, SyncError};
pub use manager::{
    AnalysisFramework, InProcessLauncher, StandaloneWindowManager, WindowHandle, WindowLauncher,
    WindowOptions, WindowTarget,
};
pub use message::{
    BroadcastMessage, CreatedPayload, FullSyncPayload, MessageBody, MessageKind, SeenSequences,
    SwitchPayload, SwitchedVersion, WireMessage,
};
pub use port::{BroadcastPort, Inbox};
pub use window::{BootstrapOutcome, Handled, Phase, SyncWindow};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
