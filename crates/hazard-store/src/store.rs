//! Analysis store
//!
//! Provides [`AnalysisStore`], the single source of truth for one window's
//! view of the active version. Every change flows through one
//! patch-application function and is announced synchronously to
//! subscribers as a [`StoreChange`].
//!
//! # Lifecycle
//! A store is created empty or from a seed snapshot, handed explicitly to
//! the version manager, session controller and views that need it, and is
//! released when the last handle drops. Subscribers are removed when their
//! [`Subscription`] guard drops.

use crate::listeners::{Listeners, Subscription};
use hazard_model::{
    AnalysisSnapshot, Collection, DigestError, Entity, EntityId, EntityMap, EntityPatch,
    FieldPatch, MutationOutcome, Record, RecordError, SnapshotDigest, StateMutation,
};
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Where a change came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeOrigin {
    /// A user action in this window
    Local,
    /// A message received from another window
    Remote,
}

/// Why the whole snapshot was replaced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplaceReason {
    /// Initial contents from a seed provider
    Seed,
    /// The active version changed
    VersionSwitch,
    /// A full sync response was installed
    FullSync,
}

/// What changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// A mutation was applied
    Mutated {
        /// The mutation as applied
        mutation: StateMutation,
        /// Result of applying it
        outcome: MutationOutcome,
    },
    /// Contents were swapped wholesale
    Replaced(ReplaceReason),
}

/// Notification delivered to store subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    /// Origin of the change
    pub origin: ChangeOrigin,
    /// Content of the change
    pub change: Change,
    /// Store revision after the change
    pub revision: u64,
}

impl StoreChange {
    /// The mutation, if this change should be published to other windows
    ///
    /// Only local mutations travel; remote ones and wholesale replacements
    /// never do.
    #[must_use]
    pub fn outbound(&self) -> Option<&StateMutation> {
        match (&self.origin, &self.change) {
            (ChangeOrigin::Local, Change::Mutated { mutation, .. }) => Some(mutation),
            _ => None,
        }
    }
}

struct StoreInner {
    snapshot: RwLock<AnalysisSnapshot>,
    revision: AtomicU64,
    listeners: Listeners<StoreChange>,
}

/// Per-window analysis store
///
/// Cloning yields another handle to the same store.
#[derive(Clone)]
pub struct AnalysisStore {
    inner: Arc<StoreInner>,
}

impl AnalysisStore {
    /// Create a store holding `snapshot`
    #[must_use]
    pub fn new(snapshot: AnalysisSnapshot) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                snapshot: RwLock::new(snapshot),
                revision: AtomicU64::new(0),
                listeners: Listeners::new(),
            }),
        }
    }

    /// Create an empty store
    #[inline]
    #[must_use]
    pub fn empty() -> Self {
        Self::new(AnalysisSnapshot::new())
    }

    // ----- reads -----

    /// Ordered records of one collection
    #[must_use]
    pub fn entities(&self, collection: Collection) -> Vec<(EntityId, Record)> {
        self.inner.snapshot.read().entities(collection)
    }

    /// Decoded entities of `T`'s collection
    #[must_use]
    pub fn typed<T: Entity>(&self) -> Vec<T> {
        self.inner.snapshot.read().typed()
    }

    /// Single record
    #[must_use]
    pub fn get(&self, collection: Collection, id: &str) -> Option<Record> {
        self.inner.snapshot.read().get(collection, id).cloned()
    }

    /// Check if an entity exists
    #[must_use]
    pub fn contains(&self, collection: Collection, id: &str) -> bool {
        self.inner.snapshot.read().contains(collection, id)
    }

    /// Deep copy of the current contents
    #[must_use]
    pub fn snapshot(&self) -> AnalysisSnapshot {
        self.inner.snapshot.read().clone()
    }

    /// Run `f` against the current contents without copying
    pub fn read<R>(&self, f: impl FnOnce(&AnalysisSnapshot) -> R) -> R {
        f(&self.inner.snapshot.read())
    }

    /// Number of changes applied so far
    #[inline]
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.inner.revision.load(Ordering::Acquire)
    }

    /// Digest of the current contents
    ///
    /// # Errors
    /// Returns error if the snapshot cannot be serialized
    pub fn digest(&self) -> Result<SnapshotDigest, DigestError> {
        self.inner.snapshot.read().digest()
    }

    // ----- local writes -----

    /// Apply a local mutation and notify subscribers
    ///
    /// A mutation addressed to a missing entity is a silent no-op reported
    /// as [`MutationOutcome::Missing`]; nothing is announced.
    pub fn apply(&self, mutation: StateMutation) -> MutationOutcome {
        self.apply_from(ChangeOrigin::Local, mutation)
    }

    /// Insert or overwrite a typed entity
    ///
    /// # Errors
    /// Returns error if the entity cannot be encoded
    pub fn insert<T: Entity>(&self, entity: &T) -> Result<MutationOutcome, RecordError> {
        Ok(self.apply(EntityPatch::create_entity(entity)?.into()))
    }

    /// Field-level update of one entity
    pub fn mutate(
        &self,
        collection: Collection,
        id: impl Into<EntityId>,
        patch: FieldPatch,
    ) -> MutationOutcome {
        self.apply(EntityPatch::update(collection, id, patch).into())
    }

    /// Delete one entity (references to it are left dangling)
    pub fn delete(&self, collection: Collection, id: impl Into<EntityId>) -> MutationOutcome {
        self.apply(EntityPatch::delete(collection, id).into())
    }

    /// Replace one collection wholesale
    pub fn replace_collection(&self, collection: Collection, records: EntityMap) -> MutationOutcome {
        self.apply(StateMutation::replace_collection(collection, records))
    }

    // ----- remote writes -----

    /// Apply a mutation received from another window
    ///
    /// Subscribers are only notified if state actually changed, and the
    /// change is never re-published.
    pub fn apply_remote(&self, mutation: StateMutation) -> MutationOutcome {
        self.apply_from(ChangeOrigin::Remote, mutation)
    }

    /// Swap the entire contents atomically
    ///
    /// Readers observe either the old or the new snapshot, never a mix.
    pub fn replace_all(&self, snapshot: AnalysisSnapshot, reason: ReplaceReason) {
        {
            let mut current = self.inner.snapshot.write();
            *current = snapshot;
        }
        let revision = self.bump();
        tracing::debug!(?reason, revision, "store contents replaced");
        self.inner.listeners.notify(&StoreChange {
            origin: match reason {
                ReplaceReason::Seed => ChangeOrigin::Local,
                ReplaceReason::VersionSwitch | ReplaceReason::FullSync => ChangeOrigin::Remote,
            },
            change: Change::Replaced(reason),
            revision,
        });
    }

    /// Register a change listener
    ///
    /// Listeners run synchronously, after the store lock is released, in
    /// registration order.
    pub fn subscribe(&self, listener: impl Fn(&StoreChange) + Send + Sync + 'static) -> Subscription {
        self.inner.listeners.subscribe(listener)
    }

    /// Number of registered listeners
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    fn apply_from(&self, origin: ChangeOrigin, mutation: StateMutation) -> MutationOutcome {
        let outcome = self.inner.snapshot.write().apply(&mutation);

        let announce = match (origin, outcome) {
            (_, MutationOutcome::Missing) => false,
            (ChangeOrigin::Remote, MutationOutcome::Unchanged) => false,
            _ => true,
        };

        tracing::trace!(?origin, ?outcome, %mutation, "mutation applied");

        if announce {
            let revision = self.bump();
            self.inner.listeners.notify(&StoreChange {
                origin,
                change: Change::Mutated { mutation, outcome },
                revision,
            });
        }
        outcome
    }

    fn bump(&self) -> u64 {
        self.inner.revision.fetch_add(1, Ordering::AcqRel) + 1
    }
}

impl Default for AnalysisStore {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for AnalysisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisStore")
            .field("entities", &self.inner.snapshot.read().entity_count())
            .field("revision", &self.revision())
            .field("listeners", &self.inner.listeners)
            .finish()
    }
}
