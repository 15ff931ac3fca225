//! Window synchronization runtime
//!
//! Provides [`SyncWindow`], which ties one window's store, version manager
//! and session controller to a [`BroadcastPort`].
//!
//! # Lifecycle
//! 1. Construction subscribes to the port. If that fails the window runs in
//!    single-window mode and never publishes.
//! 2. A primary window installs its seed immediately. Any other window
//!    bootstraps: it sends `FULL_SYNC_REQUEST`, buffers everything else, and
//!    installs the first `FULL_SYNC_RESPONSE` addressed to it. Buffered
//!    messages are then replayed, except those the responder's snapshot
//!    already reflects: its own, and any at or below the sequence it
//!    reported for their origin.
//! 3. While ready, local store mutations and version operations are
//!    published; incoming messages are applied in arrival order.
//! 4. [`SyncWindow::close`] drops the subscription without handshake.

use crate::config::SyncConfig;
use crate::error::{ChannelError, SyncError};
use crate::message::{
    BroadcastMessage, CreatedPayload, FullSyncPayload, MessageBody, SeenSequences, SwitchPayload,
};
use crate::port::{BroadcastPort, Inbox};
use hazard_model::{AnalysisSnapshot, AnalysisVersion, VersionId, WindowId};
use hazard_store::{
    AnalysisStore, ChangeOrigin, EditSessionController, ReplaceReason, SeedProvider, Subscription,
    VersionError, VersionEventKind, VersionManager,
};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Synchronization phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for a full sync response
    Bootstrapping,
    /// Contents installed; applying and publishing changes
    Ready,
    /// Subscription dropped
    Closed,
}

/// How a window obtained its initial contents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// Installed a peer's full sync response
    Synced {
        /// Window that answered
        from: WindowId,
    },
    /// No peer answered; started from the seed provider
    Seeded,
    /// The channel is unreachable; started from the seed, alone
    SingleWindow,
}

/// What handling one incoming message did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    /// State or bookkeeping changed
    Applied,
    /// Message had no effect (duplicate, stale, or not for us)
    Ignored,
    /// Held until bootstrapping completes
    Buffered,
    /// Answered a full sync request
    Answered,
    /// Installed a full sync response
    Installed,
}

struct SyncState {
    phase: Phase,
    buffered: Vec<BroadcastMessage>,
}

/// Sending side of a subscription; numbers this window's messages
#[derive(Clone)]
struct Outbox {
    port: Arc<dyn BroadcastPort>,
    sent: Arc<Mutex<u64>>,
}

impl Outbox {
    fn publish(&self, message: BroadcastMessage) -> Result<(), ChannelError> {
        // Held across publish so sequence order is delivery order.
        let mut sent = self.sent.lock();
        *sent += 1;
        self.port.publish(message.with_sequence(*sent))
    }

    fn last_sent(&self) -> u64 {
        *self.sent.lock()
    }
}

/// One window attached to an analysis channel
pub struct SyncWindow {
    id: WindowId,
    store: AnalysisStore,
    versions: VersionManager,
    sessions: EditSessionController,
    outbox: Option<Outbox>,
    inbox: tokio::sync::Mutex<Option<Inbox>>,
    state: Mutex<SyncState>,
    seen: Mutex<SeenSequences>,
    config: SyncConfig,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl SyncWindow {
    /// Attach a new window to `port`
    ///
    /// The window starts in [`Phase::Bootstrapping`] with an empty root
    /// version; call [`SyncWindow::start_primary`] or
    /// [`SyncWindow::bootstrap`] next.
    #[must_use]
    pub fn new(port: Arc<dyn BroadcastPort>, config: SyncConfig) -> Arc<Self> {
        let id = WindowId::new();
        let store = AnalysisStore::empty();
        let root = AnalysisVersion::root(config.root_version_label.as_str(), AnalysisSnapshot::new())
            .with_id(config.root_version_id.as_str());
        let versions = VersionManager::new(store.clone(), root);
        let sessions = EditSessionController::new(store.clone());

        let subscribed = port.subscribe(id);
        let (outbox, inbox) = match subscribed {
            Ok(inbox) => {
                let outbox = Outbox {
                    port,
                    sent: Arc::new(Mutex::new(0)),
                };
                (Some(outbox), Some(inbox))
            }
            Err(e) => {
                tracing::warn!(window = %id, error = %e, "broadcast channel unavailable, running in single-window mode");
                (None, None)
            }
        };

        let window = Arc::new(Self {
            id,
            store,
            versions,
            sessions,
            outbox,
            inbox: tokio::sync::Mutex::new(inbox),
            state: Mutex::new(SyncState {
                phase: Phase::Bootstrapping,
                buffered: Vec::new(),
            }),
            seen: Mutex::new(SeenSequences::new()),
            config,
            subscriptions: Mutex::new(Vec::new()),
        });
        window.attach_publishers();
        window
    }

    // ----- accessors -----

    /// Window id
    #[inline]
    #[must_use]
    pub fn id(&self) -> WindowId {
        self.id
    }

    /// This window's store
    #[inline]
    #[must_use]
    pub fn store(&self) -> &AnalysisStore {
        &self.store
    }

    /// This window's versions
    #[inline]
    #[must_use]
    pub fn versions(&self) -> &VersionManager {
        &self.versions
    }

    /// This window's edit session controller
    #[inline]
    #[must_use]
    pub fn sessions(&self) -> &EditSessionController {
        &self.sessions
    }

    /// Settings in effect
    #[inline]
    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    /// Check if contents are installed
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.phase() == Phase::Ready
    }

    /// Check if the window runs without a channel
    #[inline]
    #[must_use]
    pub fn is_single_window(&self) -> bool {
        self.outbox.is_none()
    }

    /// Number of messages held while bootstrapping
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.state.lock().buffered.len()
    }

    // ----- startup -----

    /// Install the seed as the root version's contents and become ready
    ///
    /// Used by the first window of an analysis, by single-window mode and
    /// as the fallback when no peer answers.
    ///
    /// # Errors
    /// Returns error if the seed cannot be built
    pub fn start_primary(&self, seed: &dyn SeedProvider) -> Result<(), SyncError> {
        let snapshot = seed.seed()?;
        self.start_with(snapshot);
        tracing::info!(window = %self.id, seed = seed.name(), "window started from seed");
        Ok(())
    }

    /// Publish a `FULL_SYNC_REQUEST`
    ///
    /// # Errors
    /// Returns [`SyncError::WindowClosed`] after [`SyncWindow::close`], or
    /// the channel's error if it rejects the message
    pub fn request_full_sync(&self) -> Result<(), SyncError> {
        let message = BroadcastMessage::full_sync_request(self.id, self.versions.active_version_id());
        match self.send(message) {
            Ok(()) => {
                tracing::debug!(window = %self.id, "full sync requested");
                Ok(())
            }
            Err(ChannelError::Closed) => Err(SyncError::WindowClosed(self.id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Obtain initial contents from a peer, retrying with backoff
    ///
    /// Falls back to `seed` (or an empty analysis if seeding is disabled)
    /// once the retry policy is exhausted or the channel ends.
    ///
    /// # Errors
    /// Returns [`SyncError::WindowClosed`] if the window is closed before
    /// it has contents, or error if the fallback seed cannot be built
    pub async fn bootstrap(&self, seed: &dyn SeedProvider) -> Result<BootstrapOutcome, SyncError> {
        if self.outbox.is_none() {
            self.start_primary(seed)?;
            return Ok(BootstrapOutcome::SingleWindow);
        }

        let policy = self.config.full_sync.clone();
        for attempt in 0..policy.max_attempts {
            match self.request_full_sync() {
                Ok(()) => {}
                Err(e @ SyncError::WindowClosed(_)) => return Err(e),
                Err(e) if e.is_degradation() => {
                    tracing::warn!(window = %self.id, error = %e, attempt, "channel lost during bootstrap");
                    break;
                }
                Err(e) => {
                    tracing::warn!(window = %self.id, error = %e, attempt, "full sync request failed");
                    continue;
                }
            }

            let deadline = tokio::time::Instant::now() + policy.backoff(attempt);
            let mut guard = self.inbox.lock().await;
            let Some(inbox) = guard.as_mut() else { break };

            loop {
                match tokio::time::timeout_at(deadline, inbox.recv()).await {
                    Ok(Some(message)) => {
                        let from = message.origin_window_id;
                        if self.handle_message(message) == Handled::Installed {
                            return Ok(BootstrapOutcome::Synced { from });
                        }
                    }
                    Ok(None) => {
                        if self.phase() == Phase::Closed {
                            return Err(SyncError::WindowClosed(self.id));
                        }
                        tracing::warn!(window = %self.id, "channel closed during bootstrap");
                        return self.fall_back(seed);
                    }
                    Err(_) => {
                        tracing::debug!(window = %self.id, attempt, "no full sync response yet");
                        break;
                    }
                }
            }
        }

        self.fall_back(seed)
    }

    fn fall_back(&self, seed: &dyn SeedProvider) -> Result<BootstrapOutcome, SyncError> {
        tracing::warn!(
            window = %self.id,
            attempts = self.config.full_sync.max_attempts,
            "no peer answered full sync, starting from seed"
        );
        if self.config.fallback_to_seed {
            self.start_primary(seed)?;
        } else {
            self.start_with(AnalysisSnapshot::new());
        }
        Ok(BootstrapOutcome::Seeded)
    }

    fn start_with(&self, snapshot: AnalysisSnapshot) {
        let root = AnalysisVersion::root(self.config.root_version_label.as_str(), snapshot.clone())
            .with_id(self.config.root_version_id.as_str());
        let root_id = root.id.clone();
        if let Err(e) = self.versions.install(vec![root], &root_id, snapshot, ReplaceReason::Seed) {
            tracing::warn!(window = %self.id, error = %e, "could not install seed");
        }
        self.become_ready(None);
    }

    // ----- message processing -----

    /// Drain and handle every queued message without waiting
    ///
    /// Returns the number of messages handled. Returns 0 if another task
    /// is currently receiving on this window's inbox.
    pub fn pump(&self) -> usize {
        let Ok(mut guard) = self.inbox.try_lock() else {
            return 0;
        };
        let Some(inbox) = guard.as_mut() else {
            return 0;
        };
        let mut handled = 0;
        while let Some(message) = inbox.try_next() {
            self.handle_message(message);
            handled += 1;
        }
        handled
    }

    /// Receive and handle messages until the window is closed
    pub async fn run(self: Arc<Self>) {
        loop {
            let message = {
                let mut guard = self.inbox.lock().await;
                match guard.as_mut() {
                    Some(inbox) => inbox.recv().await,
                    None => None,
                }
            };
            match message {
                Some(message) => {
                    self.handle_message(message);
                }
                None => break,
            }
        }
        tracing::debug!(window = %self.id, "message loop ended");
    }

    /// Handle one incoming message
    pub fn handle_message(&self, message: BroadcastMessage) -> Handled {
        if message.origin_window_id == self.id {
            return Handled::Ignored;
        }

        let phase = self.state.lock().phase;
        match phase {
            Phase::Closed => Handled::Ignored,
            Phase::Bootstrapping => self.handle_while_bootstrapping(message),
            Phase::Ready => self.apply(message),
        }
    }

    fn handle_while_bootstrapping(&self, message: BroadcastMessage) -> Handled {
        match message.body {
            MessageBody::FullSyncResponse(payload) if payload.requester == self.id => {
                let responder = message.origin_window_id;
                self.install(&message.version_id, payload);
                self.become_ready(Some(responder));
                Handled::Installed
            }
            // Not ours, or we have nothing to answer with yet.
            MessageBody::FullSyncResponse(_) | MessageBody::FullSyncRequest => Handled::Ignored,
            _ => {
                self.state.lock().buffered.push(message);
                Handled::Buffered
            }
        }
    }

    fn install(&self, active: &VersionId, payload: FullSyncPayload) {
        let FullSyncPayload {
            snapshot,
            versions,
            seen,
            ..
        } = payload;
        *self.seen.lock() = seen;
        match self.versions.install(versions, active, snapshot.clone(), ReplaceReason::FullSync) {
            Ok(()) => {}
            Err(e) => {
                // Responder's active version missing from its own list; keep
                // the contents under a root version with that id.
                tracing::warn!(window = %self.id, error = %e, "full sync version list inconsistent");
                let root = AnalysisVersion::root(self.config.root_version_label.as_str(), snapshot.clone())
                    .with_id(active.clone());
                if let Err(e) = self.versions.install(vec![root], active, snapshot, ReplaceReason::FullSync) {
                    tracing::warn!(window = %self.id, error = %e, "could not install full sync contents");
                }
            }
        }
    }

    fn become_ready(&self, responder: Option<WindowId>) {
        let buffered = {
            let mut state = self.state.lock();
            if state.phase == Phase::Closed {
                return;
            }
            state.phase = Phase::Ready;
            std::mem::take(&mut state.buffered)
        };

        let mut replayed = 0;
        let mut skipped = 0;
        for message in buffered {
            if Some(message.origin_window_id) == responder || self.already_seen(&message) {
                skipped += 1;
                continue;
            }
            self.apply(message);
            replayed += 1;
        }
        tracing::info!(
            window = %self.id,
            active = %self.versions.active_version_id(),
            replayed,
            skipped,
            "window ready"
        );
    }

    /// Check if `message` is at or below its origin's high-water mark
    fn already_seen(&self, message: &BroadcastMessage) -> bool {
        message.sequence != 0
            && self
                .seen
                .lock()
                .get(&message.origin_window_id)
                .is_some_and(|&high| message.sequence <= high)
    }

    fn note_seen(&self, origin: WindowId, sequence: u64) {
        if sequence == 0 {
            return;
        }
        let mut seen = self.seen.lock();
        let high = seen.entry(origin).or_insert(0);
        *high = (*high).max(sequence);
    }

    fn apply(&self, message: BroadcastMessage) -> Handled {
        let BroadcastMessage {
            version_id,
            origin_window_id: origin,
            sequence,
            body,
            ..
        } = message;
        self.note_seen(origin, sequence);

        match body {
            MessageBody::StateUpdate(mutation) => {
                if self.versions.apply_to_version(&version_id, mutation).is_applied() {
                    Handled::Applied
                } else {
                    Handled::Ignored
                }
            }
            MessageBody::VersionCreated(CreatedPayload { version }) => {
                match self.versions.insert_remote(version) {
                    Ok(()) => Handled::Applied,
                    Err(e) => {
                        tracing::debug!(window = %self.id, error = %e, "version already recorded");
                        Handled::Ignored
                    }
                }
            }
            MessageBody::VersionSwitched(payload) => self.apply_switch(&version_id, payload),
            MessageBody::VersionDeleted => {
                if self.versions.remove_remote(&version_id) {
                    Handled::Applied
                } else {
                    Handled::Ignored
                }
            }
            MessageBody::FullSyncRequest => self.answer_full_sync(origin),
            MessageBody::FullSyncResponse(_) => Handled::Ignored,
        }
    }

    fn apply_switch(&self, version_id: &VersionId, payload: SwitchPayload) -> Handled {
        let SwitchPayload { snapshot, version } = payload;

        // The switch can overtake the VERSION_CREATED sent by another window.
        if !self.versions.contains(version_id) {
            let Some(meta) = version else {
                tracing::warn!(window = %self.id, version = %version_id, "ignoring switch to unknown version");
                return Handled::Ignored;
            };
            tracing::debug!(window = %self.id, version = %version_id, "switch arrived before its version");
            if let Err(e) = self
                .versions
                .insert_remote(meta.into_version(version_id.clone(), snapshot.clone()))
            {
                tracing::warn!(window = %self.id, error = %e, "could not record switched-to version");
            }
        }

        if !self.config.follow_remote_switches {
            return if self.versions.store_remote_snapshot(version_id, snapshot) {
                Handled::Applied
            } else {
                Handled::Ignored
            };
        }
        match self.versions.apply_remote_switch(version_id, snapshot) {
            Ok(()) => Handled::Applied,
            Err(VersionError::Unknown(id)) => {
                tracing::warn!(window = %self.id, version = %id, "ignoring switch to unknown version");
                Handled::Ignored
            }
            Err(e) => {
                tracing::warn!(window = %self.id, error = %e, "remote switch failed");
                Handled::Ignored
            }
        }
    }

    fn answer_full_sync(&self, requester: WindowId) -> Handled {
        // Marks first: anything handled after them is replayed by the
        // requester, at worst re-applying what the snapshot already holds.
        let mut seen = self.seen.lock().clone();
        if let Some(outbox) = &self.outbox {
            seen.insert(self.id, outbox.last_sent());
        }
        let payload = FullSyncPayload {
            requester,
            snapshot: self.store.snapshot(),
            versions: self.versions.versions(),
            seen,
        };
        let message = BroadcastMessage::new(
            self.id,
            self.versions.active_version_id(),
            MessageBody::FullSyncResponse(payload),
        );
        match self.send(message) {
            Ok(()) => {
                tracing::debug!(window = %self.id, requester = %requester, "answered full sync");
                Handled::Answered
            }
            Err(e) => {
                tracing::warn!(window = %self.id, error = %e, "could not answer full sync");
                Handled::Ignored
            }
        }
    }

    // ----- outbound -----

    fn send(&self, message: BroadcastMessage) -> Result<(), ChannelError> {
        if self.phase() == Phase::Closed {
            return Err(ChannelError::Closed);
        }
        match &self.outbox {
            Some(outbox) => outbox.publish(message),
            None => Ok(()),
        }
    }

    /// Publish local store mutations and version operations
    fn attach_publishers(&self) {
        let Some(shared) = &self.outbox else { return };

        let outbox = shared.clone();
        let window = self.id;
        let active = self.versions.active();
        let store_sub = self.store.subscribe(move |change| {
            if let Some(mutation) = change.outbound() {
                let message = BroadcastMessage::state_update(window, active.get(), mutation.clone());
                if let Err(e) = outbox.publish(message) {
                    tracing::warn!(window = %window, error = %e, "dropping state update");
                }
            }
        });

        let outbox = shared.clone();
        let version_sub = self.versions.subscribe(move |event| {
            if event.origin != ChangeOrigin::Local {
                return;
            }
            let message = match &event.kind {
                VersionEventKind::Created(version) => BroadcastMessage::new(
                    window,
                    version.id.clone(),
                    MessageBody::VersionCreated(CreatedPayload {
                        version: version.clone(),
                    }),
                ),
                VersionEventKind::Switched(version) => BroadcastMessage::new(
                    window,
                    version.id.clone(),
                    MessageBody::VersionSwitched(SwitchPayload::of(version)),
                ),
                VersionEventKind::Deleted(id) => {
                    BroadcastMessage::new(window, id.clone(), MessageBody::VersionDeleted)
                }
            };
            if let Err(e) = outbox.publish(message) {
                tracing::warn!(window = %window, error = %e, "dropping version event");
            }
        });

        self.subscriptions.lock().extend([store_sub, version_sub]);
    }

    // ----- teardown -----

    /// Detach from the channel
    ///
    /// Local state stays readable; nothing more is sent or received.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            if state.phase == Phase::Closed {
                return;
            }
            state.phase = Phase::Closed;
            state.buffered.clear();
        }
        self.subscriptions.lock().clear();
        if let Some(outbox) = &self.outbox {
            outbox.port.unsubscribe(self.id);
        }
        tracing::info!(window = %self.id, "window closed");
    }
}

impl Drop for SyncWindow {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for SyncWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncWindow")
            .field("id", &self.id)
            .field("phase", &self.phase())
            .field("single_window", &self.is_single_window())
            .field("versions", &self.versions)
            .finish_non_exhaustive()
    }
}
