//! Synchronous listener registry
//!
//! Provides [`Listeners`], the fan-out list behind store and version
//! subscriptions, and the RAII [`Subscription`] guard that removes a
//! listener when dropped.

use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E> {
    next_id: AtomicU64,
    entries: RwLock<Vec<(u64, Callback<E>)>>,
}

/// Ordered list of callbacks notified with `&E`
pub(crate) struct Listeners<E> {
    registry: Arc<Registry<E>>,
}

impl<E: 'static> Listeners<E> {
    pub(crate) fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                next_id: AtomicU64::new(0),
                entries: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Register a callback; it stays registered while the guard lives
    pub(crate) fn subscribe(&self, callback: impl Fn(&E) + Send + Sync + 'static) -> Subscription {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.entries.write().push((id, Arc::new(callback)));

        let weak: Weak<Registry<E>> = Arc::downgrade(&self.registry);
        Subscription {
            release: Some(Box::new(move || {
                if let Some(registry) = weak.upgrade() {
                    registry.entries.write().retain(|(entry, _)| *entry != id);
                }
            })),
        }
    }

    /// Notify every callback in registration order
    ///
    /// The list is copied before calling out, so callbacks may subscribe,
    /// unsubscribe or mutate the owner without deadlocking.
    pub(crate) fn notify(&self, event: &E) {
        let callbacks: Vec<Callback<E>> = self
            .registry
            .entries
            .read()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            callback(event);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.registry.entries.read().len()
    }
}

impl<E> fmt::Debug for Listeners<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.registry.entries.read().len())
            .finish()
    }
}

/// Guard for a registered listener
///
/// Dropping the guard unsubscribes. Use [`Subscription::detach`] to keep
/// the listener for the owner's whole lifetime.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Remove the listener now
    pub fn unsubscribe(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }

    /// Keep the listener registered without holding the guard
    pub fn detach(mut self) {
        self.release = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.release.is_some())
            .finish()
    }
}
