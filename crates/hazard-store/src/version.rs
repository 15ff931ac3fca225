//! Version manager
//!
//! Provides [`VersionManager`], which owns the list of analysis versions for
//! one window and keeps the store's contents equal to the active version.
//!
//! # Invariants
//! - The active version's contents live in the store; its stored snapshot
//!   is refreshed whenever it stops being active.
//! - Non-active snapshots are only changed by late updates explicitly
//!   addressed to them.
//! - Every `parent_version_id` names an existing version.

use crate::error::VersionError;
use crate::listeners::{Listeners, Subscription};
use crate::store::{AnalysisStore, ChangeOrigin, ReplaceReason};
use hazard_model::{
    AnalysisSnapshot, AnalysisVersion, MutationOutcome, StateMutation, VersionId, VersionSummary,
};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Shared read handle on the active version id
///
/// Handed to components that must tag outgoing messages with the active
/// version without holding the whole manager.
#[derive(Debug, Clone)]
pub struct ActiveVersion(Arc<RwLock<VersionId>>);

impl ActiveVersion {
    fn new(id: VersionId) -> Self {
        Self(Arc::new(RwLock::new(id)))
    }

    /// Current active version id
    #[must_use]
    pub fn get(&self) -> VersionId {
        self.0.read().clone()
    }

    /// Check if `id` is active
    #[must_use]
    pub fn is(&self, id: &VersionId) -> bool {
        *self.0.read() == *id
    }

    fn set(&self, id: VersionId) {
        *self.0.write() = id;
    }
}

/// Version lifecycle event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionEventKind {
    /// A version was added
    Created(AnalysisVersion),
    /// The active version changed; the version carries its new contents
    Switched(AnalysisVersion),
    /// A version was removed
    Deleted(VersionId),
}

/// Notification delivered to version subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionEvent {
    /// Origin of the event
    pub origin: ChangeOrigin,
    /// What happened
    pub kind: VersionEventKind,
}

/// Owns the version list for one window
pub struct VersionManager {
    store: AnalysisStore,
    versions: RwLock<IndexMap<VersionId, AnalysisVersion>>,
    active: ActiveVersion,
    listeners: Listeners<VersionEvent>,
}

impl VersionManager {
    /// Create a manager whose single root version is `root`
    ///
    /// The store is seeded with the root's snapshot.
    #[must_use]
    pub fn new(store: AnalysisStore, root: AnalysisVersion) -> Self {
        store.replace_all(root.snapshot.clone(), ReplaceReason::Seed);
        let active = ActiveVersion::new(root.id.clone());
        let mut versions = IndexMap::new();
        versions.insert(root.id.clone(), root);
        Self {
            store,
            versions: RwLock::new(versions),
            active,
            listeners: Listeners::new(),
        }
    }

    /// Create a manager with a generated root version labelled `label`
    #[must_use]
    pub fn bootstrap(store: AnalysisStore, label: &str, seed: AnalysisSnapshot) -> Self {
        Self::new(store, AnalysisVersion::root(label, seed))
    }

    /// The store this manager drives
    #[inline]
    #[must_use]
    pub fn store(&self) -> &AnalysisStore {
        &self.store
    }

    /// Shared handle on the active version id
    #[inline]
    #[must_use]
    pub fn active(&self) -> ActiveVersion {
        self.active.clone()
    }

    /// Id of the version the store currently shows
    #[must_use]
    pub fn active_version_id(&self) -> VersionId {
        self.active.get()
    }

    /// Listing of every version, in creation order
    #[must_use]
    pub fn list_versions(&self) -> Vec<VersionSummary> {
        let active = self.active.get();
        self.versions
            .read()
            .values()
            .map(|v| {
                let mut summary = v.summary();
                if v.id == active {
                    summary.entity_count = self.store.read(AnalysisSnapshot::entity_count);
                }
                summary
            })
            .collect()
    }

    /// Full copy of one version; the active one carries the live contents
    #[must_use]
    pub fn version(&self, id: &VersionId) -> Option<AnalysisVersion> {
        let mut version = self.versions.read().get(id).cloned()?;
        if self.active.is(id) {
            version.snapshot = self.store.snapshot();
        }
        Some(version)
    }

    /// Full copy of every version, as sent in a full sync
    #[must_use]
    pub fn versions(&self) -> Vec<AnalysisVersion> {
        let active = self.active.get();
        let live = self.store.snapshot();
        self.versions
            .read()
            .values()
            .map(|v| {
                let mut v = v.clone();
                if v.id == active {
                    v.snapshot = live.clone();
                }
                v
            })
            .collect()
    }

    /// Number of versions
    #[must_use]
    pub fn len(&self) -> usize {
        self.versions.read().len()
    }

    /// Check if there are no versions (never true after construction)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.versions.read().is_empty()
    }

    /// Register a version event listener
    pub fn subscribe(&self, listener: impl Fn(&VersionEvent) + Send + Sync + 'static) -> Subscription {
        self.listeners.subscribe(listener)
    }

    // ----- local operations -----

    /// Branch a new version from `parent` (default: the active version)
    ///
    /// The new version receives a deep copy of the parent's contents; the
    /// active version is not changed.
    ///
    /// # Errors
    /// Returns [`VersionError::Unknown`] if `parent` does not exist
    pub fn create_version(
        &self,
        label: &str,
        description: &str,
        parent: Option<&VersionId>,
    ) -> Result<VersionId, VersionError> {
        let parent = parent.cloned().unwrap_or_else(|| self.active.get());
        let snapshot = self.contents_of(&parent)?;
        let version = AnalysisVersion::branch(&parent, label, description, snapshot);
        let id = version.id.clone();

        self.versions.write().insert(id.clone(), version.clone());
        tracing::info!(version = %id, parent = %parent, label, "version created");
        self.emit(ChangeOrigin::Local, VersionEventKind::Created(version));
        Ok(id)
    }

    /// Make `id` the active version
    ///
    /// The outgoing version keeps the store's current contents; the store
    /// is then replaced atomically with the target's snapshot. Switching to
    /// the active version does nothing.
    ///
    /// # Errors
    /// Returns [`VersionError::Unknown`] if `id` does not exist
    pub fn switch_version(&self, id: &VersionId) -> Result<(), VersionError> {
        if self.active.is(id) {
            tracing::debug!(version = %id, "already active");
            return Ok(());
        }
        let target = self
            .versions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| VersionError::Unknown(id.clone()))?;

        self.activate(id, target.snapshot.clone());
        tracing::info!(version = %id, "switched version");
        self.emit(ChangeOrigin::Local, VersionEventKind::Switched(target));
        Ok(())
    }

    /// Remove a version
    ///
    /// # Errors
    /// Refuses the active version, versions other versions branch from,
    /// and unknown ids.
    pub fn delete_version(&self, id: &VersionId) -> Result<(), VersionError> {
        self.check_deletable(id)?;
        self.versions.write().shift_remove(id);
        tracing::info!(version = %id, "version deleted");
        self.emit(ChangeOrigin::Local, VersionEventKind::Deleted(id.clone()));
        Ok(())
    }

    // ----- remote operations -----

    /// Record a version another window created
    ///
    /// # Errors
    /// Returns [`VersionError::Duplicate`] if the id is already known
    /// (duplicate delivery, or the version arrived first with a switch)
    pub fn insert_remote(&self, version: AnalysisVersion) -> Result<(), VersionError> {
        let id = version.id.clone();
        {
            let mut versions = self.versions.write();
            if versions.contains_key(&id) {
                return Err(VersionError::Duplicate(id));
            }
            versions.insert(id.clone(), version.clone());
        }
        tracing::debug!(version = %id, "remote version recorded");
        self.emit(ChangeOrigin::Remote, VersionEventKind::Created(version));
        Ok(())
    }

    /// Check if `id` is recorded
    #[must_use]
    pub fn contains(&self, id: &VersionId) -> bool {
        self.versions.read().contains_key(id)
    }

    /// Follow another window's switch to `id`, installing `snapshot`
    ///
    /// # Errors
    /// Returns [`VersionError::Unknown`] if `id` has not been recorded
    pub fn apply_remote_switch(&self, id: &VersionId, snapshot: AnalysisSnapshot) -> Result<(), VersionError> {
        if !self.versions.read().contains_key(id) {
            return Err(VersionError::Unknown(id.clone()));
        }
        if self.active.is(id) {
            // Duplicate delivery, or both windows were already on `id`.
            if !self.store.read(|current| current.same_as(&snapshot)) {
                self.store.replace_all(snapshot, ReplaceReason::VersionSwitch);
            }
            return Ok(());
        }

        self.activate(id, snapshot);
        tracing::info!(version = %id, "followed remote version switch");
        let switched = self.versions.read().get(id).cloned();
        if let Some(version) = switched {
            self.emit(ChangeOrigin::Remote, VersionEventKind::Switched(version));
        }
        Ok(())
    }

    /// Take another window's contents for `id` without switching
    ///
    /// Used when this window does not follow switches. If `id` is the
    /// version on display the store is replaced; otherwise only the stored
    /// snapshot changes. Returns `false` for unknown versions.
    pub fn store_remote_snapshot(&self, id: &VersionId, snapshot: AnalysisSnapshot) -> bool {
        if self.active.is(id) {
            if !self.store.read(|current| current.same_as(&snapshot)) {
                self.store.replace_all(snapshot, ReplaceReason::VersionSwitch);
            }
            return true;
        }
        match self.versions.write().get_mut(id) {
            Some(version) => {
                version.snapshot = snapshot;
                true
            }
            None => false,
        }
    }

    /// Remove a version another window deleted
    ///
    /// A version this window still needs (active here, or parent of a
    /// local version) is kept and a warning logged.
    pub fn remove_remote(&self, id: &VersionId) -> bool {
        match self.check_deletable(id) {
            Ok(()) => {
                self.versions.write().shift_remove(id);
                self.emit(ChangeOrigin::Remote, VersionEventKind::Deleted(id.clone()));
                true
            }
            Err(VersionError::Unknown(_)) => false,
            Err(e) => {
                tracing::warn!(version = %id, error = %e, "ignoring remote version deletion");
                false
            }
        }
    }

    /// Apply a remote mutation addressed to `version_id`
    ///
    /// Goes to the store when that version is active, to its stored
    /// snapshot otherwise. Mutations for unknown versions are dropped.
    pub fn apply_to_version(&self, version_id: &VersionId, mutation: StateMutation) -> MutationOutcome {
        if self.active.is(version_id) {
            return self.store.apply_remote(mutation);
        }
        match self.versions.write().get_mut(version_id) {
            Some(version) => {
                tracing::debug!(version = %version_id, %mutation, "applying update to inactive version");
                version.snapshot.apply(&mutation)
            }
            None => {
                tracing::warn!(version = %version_id, %mutation, "dropping update for unknown version");
                MutationOutcome::Missing
            }
        }
    }

    /// Replace the whole version list (seeding or full sync)
    ///
    /// `active` must be one of `versions`; `snapshot` becomes the store's
    /// contents and `reason` is what store subscribers are told.
    ///
    /// # Errors
    /// Returns [`VersionError::Unknown`] if `active` is not in `versions`
    pub fn install(
        &self,
        versions: Vec<AnalysisVersion>,
        active: &VersionId,
        snapshot: AnalysisSnapshot,
        reason: ReplaceReason,
    ) -> Result<(), VersionError> {
        let versions: IndexMap<VersionId, AnalysisVersion> =
            versions.into_iter().map(|v| (v.id.clone(), v)).collect();
        if !versions.contains_key(active) {
            return Err(VersionError::Unknown(active.clone()));
        }

        *self.versions.write() = versions;
        self.active.set(active.clone());
        self.store.replace_all(snapshot, reason);
        tracing::info!(version = %active, count = self.len(), ?reason, "installed version list");
        Ok(())
    }

    // ----- internals -----

    fn contents_of(&self, id: &VersionId) -> Result<AnalysisSnapshot, VersionError> {
        if self.active.is(id) {
            return Ok(self.store.snapshot());
        }
        self.versions
            .read()
            .get(id)
            .map(|v| v.snapshot.clone())
            .ok_or_else(|| VersionError::Unknown(id.clone()))
    }

    fn check_deletable(&self, id: &VersionId) -> Result<(), VersionError> {
        let versions = self.versions.read();
        if !versions.contains_key(id) {
            return Err(VersionError::Unknown(id.clone()));
        }
        if self.active.is(id) {
            return Err(VersionError::ActiveVersion(id.clone()));
        }
        let children = versions
            .values()
            .filter(|v| v.parent_version_id.as_ref() == Some(id))
            .count();
        if children > 0 {
            return Err(VersionError::HasChildren {
                id: id.clone(),
                children,
            });
        }
        Ok(())
    }

    /// Save the live contents into the outgoing version, then swap.
    ///
    /// The active id changes before the store announces the replacement,
    /// so store subscribers always see contents and id together.
    fn activate(&self, id: &VersionId, snapshot: AnalysisSnapshot) {
        let outgoing = self.active.get();
        let live = self.store.snapshot();
        {
            let mut versions = self.versions.write();
            if let Some(version) = versions.get_mut(&outgoing) {
                version.snapshot = live;
            }
            if let Some(version) = versions.get_mut(id) {
                version.snapshot.clone_from(&snapshot);
            }
        }
        self.active.set(id.clone());
        self.store.replace_all(snapshot, ReplaceReason::VersionSwitch);
    }

    fn emit(&self, origin: ChangeOrigin, kind: VersionEventKind) {
        self.listeners.notify(&VersionEvent { origin, kind });
    }
}

impl fmt::Debug for VersionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionManager")
            .field("active", &self.active.get())
            .field("versions", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Change;
    use hazard_model::{Collection, FieldPatch, Hazard, Severity};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn seed() -> AnalysisSnapshot {
        AnalysisSnapshot::new()
            .with_entity(&Hazard {
                id: "H-1".into(),
                title: "Too close".into(),
                description: String::new(),
                severity: Severity::Medium,
                related_losses: vec![],
            })
            .unwrap()
    }

    fn manager() -> VersionManager {
        VersionManager::new(
            AnalysisStore::empty(),
            AnalysisVersion::root("Baseline", seed()).with_id("v1"),
        )
    }

    fn severity(store: &AnalysisStore) -> Severity {
        store.typed::<Hazard>()[0].severity
    }

    #[test]
    fn new_manager_seeds_store() {
        let m = manager();
        assert!(m.store().snapshot().same_as(&seed()));
        assert_eq!(m.active_version_id(), VersionId::new("v1"));
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn branch_copies_live_contents_and_does_not_switch() {
        let m = manager();
        m.store()
            .mutate(Collection::Hazards, "H-1", FieldPatch::single("severity", json!("high")));

        let v2 = m.create_version("What-if", "", None).unwrap();
        assert_eq!(m.active_version_id(), VersionId::new("v1"));

        let branched = m.version(&v2).unwrap();
        assert_eq!(branched.parent_version_id, Some(VersionId::new("v1")));
        assert_eq!(
            branched.snapshot.get(Collection::Hazards, "H-1").unwrap().get_str("severity"),
            Some("high")
        );
    }

    #[test]
    fn branch_isolation() {
        let m = manager();
        let v1 = m.active_version_id();
        let v2 = m.create_version("What-if", "", None).unwrap();

        m.switch_version(&v2).unwrap();
        m.store()
            .mutate(Collection::Hazards, "H-1", FieldPatch::single("severity", json!("critical")));
        assert_eq!(severity(m.store()), Severity::Critical);

        m.switch_version(&v1).unwrap();
        assert_eq!(severity(m.store()), Severity::Medium);

        m.switch_version(&v2).unwrap();
        assert_eq!(severity(m.store()), Severity::Critical);
    }

    #[test]
    fn switch_is_announced_with_contents() {
        let m = manager();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let _sub = m.subscribe(move |e| sink.lock().push(e.clone()));

        let v2 = m.create_version("B", "", None).unwrap();
        m.switch_version(&v2).unwrap();
        m.switch_version(&v2).unwrap();

        let events = events.lock();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0].kind, VersionEventKind::Created(_)));
        assert!(matches!(
            &events[1].kind,
            VersionEventKind::Switched(version) if version.id == v2
        ));
    }

    #[test]
    fn unknown_versions_are_rejected() {
        let m = manager();
        let ghost = VersionId::new("ghost");
        assert_eq!(m.switch_version(&ghost), Err(VersionError::Unknown(ghost.clone())));
        assert!(m.create_version("x", "", Some(&ghost)).is_err());
    }

    #[test]
    fn delete_guards_active_and_parents() {
        let m = manager();
        let v1 = m.active_version_id();
        let v2 = m.create_version("B", "", None).unwrap();
        let v3 = m.create_version("C", "", Some(&v2)).unwrap();

        assert_eq!(m.delete_version(&v1), Err(VersionError::ActiveVersion(v1.clone())));
        assert!(matches!(
            m.delete_version(&v2),
            Err(VersionError::HasChildren { children: 1, .. })
        ));
        m.delete_version(&v3).unwrap();
        m.delete_version(&v2).unwrap();
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn late_update_goes_to_inactive_version() {
        let m = manager();
        let v1 = m.active_version_id();
        let v2 = m.create_version("B", "", None).unwrap();
        m.switch_version(&v2).unwrap();

        let patch = hazard_model::EntityPatch::update(
            Collection::Hazards,
            "H-1",
            FieldPatch::single("title", json!("late")),
        );
        assert!(m.apply_to_version(&v1, patch.into()).is_applied());

        assert_eq!(m.store().typed::<Hazard>()[0].title, "Too close");
        assert_eq!(
            m.version(&v1).unwrap().snapshot.typed::<Hazard>()[0].title,
            "late"
        );
    }

    #[test]
    fn install_replaces_everything() {
        let m = manager();
        let other = AnalysisVersion::root("Remote", AnalysisSnapshot::new()).with_id("r1");
        m.install(vec![other.clone()], &other.id, AnalysisSnapshot::new(), ReplaceReason::FullSync)
            .unwrap();
        assert_eq!(m.active_version_id(), other.id);
        assert!(m.store().snapshot().is_empty());
        assert_eq!(m.len(), 1);
    }

    /// Records (reason, active id) for every store replacement
    fn watch_replacements(m: &VersionManager) -> (Arc<Mutex<Vec<(ReplaceReason, VersionId)>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let active = m.active();
        let sub = m.store().subscribe(move |change| {
            if let Change::Replaced(reason) = change.change {
                sink.lock().push((reason, active.get()));
            }
        });
        (seen, sub)
    }

    #[test]
    fn store_subscribers_see_the_new_active_id_on_switch() {
        let m = manager();
        let v1 = m.active_version_id();
        let v2 = m.create_version("B", "", None).unwrap();
        let (seen, _sub) = watch_replacements(&m);

        m.switch_version(&v2).unwrap();
        m.apply_remote_switch(&v1, seed()).unwrap();

        assert_eq!(
            *seen.lock(),
            vec![
                (ReplaceReason::VersionSwitch, v2),
                (ReplaceReason::VersionSwitch, v1),
            ]
        );
    }

    #[test]
    fn install_reports_the_given_reason() {
        let m = manager();
        let (seen, _sub) = watch_replacements(&m);
        let seeded = AnalysisVersion::root("Seeded", seed()).with_id("s1");
        m.install(vec![seeded.clone()], &seeded.id, seed(), ReplaceReason::Seed)
            .unwrap();
        assert_eq!(*seen.lock(), vec![(ReplaceReason::Seed, seeded.id)]);
    }

    #[test]
    fn duplicate_remote_version_is_rejected() {
        let m = manager();
        let remote = AnalysisVersion::root("Remote", seed()).with_id("r1");
        m.insert_remote(remote.clone()).unwrap();
        assert_eq!(
            m.insert_remote(remote),
            Err(VersionError::Duplicate(VersionId::new("r1")))
        );
        assert_eq!(m.len(), 2);
    }

    #[test]
    fn remote_snapshot_for_displayed_version_replaces_store() {
        let m = manager();
        let v1 = m.active_version_id();
        let v2 = m.create_version("B", "", None).unwrap();
        let edited = seed()
            .with_entity(&Hazard {
                id: "H-1".into(),
                title: "Edited elsewhere".into(),
                description: String::new(),
                severity: Severity::High,
                related_losses: vec![],
            })
            .unwrap();

        assert!(m.store_remote_snapshot(&v2, edited.clone()));
        assert_eq!(m.store().typed::<Hazard>()[0].title, "Too close");
        assert_eq!(m.version(&v2).unwrap().snapshot.typed::<Hazard>()[0].title, "Edited elsewhere");

        assert!(m.store_remote_snapshot(&v1, edited));
        assert_eq!(m.active_version_id(), v1);
        assert_eq!(m.store().typed::<Hazard>()[0].title, "Edited elsewhere");
        assert!(!m.store_remote_snapshot(&VersionId::new("ghost"), seed()));
    }
}
