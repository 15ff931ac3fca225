//! Edit session controller
//!
//! Provides [`EditSessionController`], one controller for every kind of
//! edit (table section, row dialog, inline cell) parameterized by
//! [`EditScope`]. A session remembers the value at its scope when it
//! begins; cancelling writes that value back through the store, so the
//! rollback reaches other windows like any other local edit.
//!
//! The controller knows nothing about validity. Callers that need to block
//! a commit check their own rules first and simply do not call
//! [`EditSessionController::commit`].

use crate::error::SessionError;
use crate::store::AnalysisStore;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use hazard_model::{EditScope, MutationOutcome, ScopeValue, SessionId};
use std::sync::Arc;

type Registry = Arc<DashMap<EditScope, SessionId>>;

/// Snapshot-and-restore transaction over one scope
#[derive(Debug)]
pub struct EditSession {
    id: SessionId,
    scope: EditScope,
    original: ScopeValue,
    active: bool,
    registry: Registry,
}

impl EditSession {
    /// Session id
    #[inline]
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Scope covered
    #[inline]
    #[must_use]
    pub fn scope(&self) -> &EditScope {
        &self.scope
    }

    /// Value at the scope when the session began
    #[inline]
    #[must_use]
    pub fn original(&self) -> &ScopeValue {
        &self.original
    }

    /// Check if the session can still be committed or cancelled
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    fn finish(&mut self) {
        self.active = false;
        self.registry.remove_if(&self.scope, |_, holder| *holder == self.id);
    }
}

impl Drop for EditSession {
    fn drop(&mut self) {
        if self.active {
            // Abandoned without commit or cancel (e.g. the window closed):
            // edits stay, the scope is released.
            tracing::debug!(session = %self.id, scope = %self.scope, "session dropped while active");
            self.finish();
        }
    }
}

/// Opens, commits and rolls back edit sessions against one store
#[derive(Debug, Clone)]
pub struct EditSessionController {
    store: AnalysisStore,
    registry: Registry,
}

impl EditSessionController {
    /// Create a controller for `store`
    #[must_use]
    pub fn new(store: AnalysisStore) -> Self {
        Self {
            store,
            registry: Arc::new(DashMap::new()),
        }
    }

    /// The store sessions operate on
    #[inline]
    #[must_use]
    pub fn store(&self) -> &AnalysisStore {
        &self.store
    }

    /// Begin a session over `scope`, capturing a deep copy of its value
    ///
    /// Only exact scope collisions are refused. Overlapping scopes (a row
    /// inside a table being edited) are allowed and logged; keeping them
    /// apart is the caller's job.
    ///
    /// # Errors
    /// Returns [`SessionError::ScopeBusy`] if a session already covers
    /// exactly this scope
    pub fn begin(&self, scope: EditScope) -> Result<EditSession, SessionError> {
        let id = SessionId::new();

        match self.registry.entry(scope.clone()) {
            Entry::Occupied(entry) => {
                return Err(SessionError::ScopeBusy {
                    scope,
                    holder: *entry.get(),
                });
            }
            Entry::Vacant(entry) => {
                entry.insert(id);
            }
        }

        for other in self.registry.iter() {
            if *other.key() != scope && other.key().overlaps(&scope) {
                tracing::warn!(
                    scope = %scope,
                    overlapping = %other.key(),
                    "edit session overlaps an active session"
                );
            }
        }

        let original = self.store.read(|snapshot| ScopeValue::capture(snapshot, &scope));
        tracing::debug!(session = %id, scope = %scope, "edit session started");

        Ok(EditSession {
            id,
            scope,
            original,
            active: true,
            registry: Arc::clone(&self.registry),
        })
    }

    /// Keep the edits and close the session
    ///
    /// Does not touch the store.
    ///
    /// # Errors
    /// Returns [`SessionError::NotActive`] if already closed
    pub fn commit(&self, session: &mut EditSession) -> Result<(), SessionError> {
        if !session.active {
            return Err(SessionError::NotActive(session.id));
        }
        session.finish();
        tracing::debug!(session = %session.id, scope = %session.scope, "edit session committed");
        Ok(())
    }

    /// Restore the scope to its value at `begin` and close the session
    ///
    /// The restoration is a local store mutation, so subscribers and other
    /// windows see it like any edit.
    ///
    /// # Errors
    /// Returns [`SessionError::NotActive`] if already closed
    pub fn cancel(&self, session: &mut EditSession) -> Result<MutationOutcome, SessionError> {
        if !session.active {
            return Err(SessionError::NotActive(session.id));
        }
        let outcome = match session.original.restoration(&session.scope) {
            Some(mutation) => self.store.apply(mutation),
            None => MutationOutcome::Unchanged,
        };
        session.finish();
        tracing::debug!(session = %session.id, scope = %session.scope, ?outcome, "edit session cancelled");
        Ok(outcome)
    }

    /// Check if the scope's current value differs from the original
    ///
    /// Always `false` once the session is closed.
    #[must_use]
    pub fn is_dirty(&self, session: &EditSession) -> bool {
        session.active
            && self
                .store
                .read(|snapshot| ScopeValue::capture(snapshot, &session.scope) != session.original)
    }

    /// Check if some session currently holds exactly `scope`
    #[must_use]
    pub fn is_busy(&self, scope: &EditScope) -> bool {
        self.registry.contains_key(scope)
    }

    /// Number of open sessions
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.registry.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hazard_model::{AnalysisSnapshot, Collection, FieldPatch, Hazard, Record, Severity};
    use serde_json::json;

    fn store() -> AnalysisStore {
        let mut snapshot = AnalysisSnapshot::new();
        for id in ["H-1", "H-2", "H-3"] {
            snapshot
                .insert_entity(&Hazard {
                    id: id.into(),
                    title: format!("Hazard {id}"),
                    description: String::new(),
                    severity: Severity::Medium,
                    related_losses: vec![],
                })
                .unwrap();
        }
        AnalysisStore::new(snapshot)
    }

    #[test]
    fn cancel_restores_exactly() {
        let store = store();
        let before = store.snapshot();
        let controller = EditSessionController::new(store.clone());

        let mut session = controller.begin(EditScope::collection(Collection::Hazards)).unwrap();
        store.mutate(Collection::Hazards, "H-2", FieldPatch::single("title", json!("edited")));
        store.delete(Collection::Hazards, "H-1");
        store.apply(hazard_model::EntityPatch::create(Collection::Hazards, "H-9", Record::new()).into());
        assert!(controller.is_dirty(&session));

        controller.cancel(&mut session).unwrap();
        assert!(store.snapshot().same_as(&before));
        assert!(!controller.is_dirty(&session));
        assert!(!session.is_active());
    }

    #[test]
    fn commit_keeps_edits_and_releases_scope() {
        let store = store();
        let controller = EditSessionController::new(store.clone());
        let scope = EditScope::entity(Collection::Hazards, "H-1");

        let mut session = controller.begin(scope.clone()).unwrap();
        store.mutate(Collection::Hazards, "H-1", FieldPatch::single("severity", json!("low")));
        controller.commit(&mut session).unwrap();

        assert_eq!(store.typed::<Hazard>()[0].severity, Severity::Low);
        assert!(!controller.is_busy(&scope));
        assert_eq!(controller.commit(&mut session), Err(SessionError::NotActive(session.id())));
        assert!(controller.cancel(&mut session).is_err());
    }

    #[test]
    fn same_scope_is_refused_until_released() {
        let controller = EditSessionController::new(store());
        let scope = EditScope::field(Collection::Hazards, "H-1", "title");

        let first = controller.begin(scope.clone()).unwrap();
        assert!(matches!(
            controller.begin(scope.clone()),
            Err(SessionError::ScopeBusy { .. })
        ));

        drop(first);
        assert!(controller.begin(scope).is_ok());
    }

    #[test]
    fn overlapping_scopes_are_allowed() {
        let controller = EditSessionController::new(store());
        let _table = controller.begin(EditScope::collection(Collection::Hazards)).unwrap();
        let _row = controller.begin(EditScope::entity(Collection::Hazards, "H-1")).unwrap();
        assert_eq!(controller.active_sessions(), 2);
    }

    #[test]
    fn cancel_of_new_row_removes_it() {
        let store = store();
        let controller = EditSessionController::new(store.clone());
        let mut session = controller.begin(EditScope::entity(Collection::Hazards, "H-4")).unwrap();

        store.apply(hazard_model::EntityPatch::create(Collection::Hazards, "H-4", Record::new()).into());
        assert!(store.contains(Collection::Hazards, "H-4"));

        controller.cancel(&mut session).unwrap();
        assert!(!store.contains(Collection::Hazards, "H-4"));
    }

    #[test]
    fn cancel_without_edits_is_unchanged() {
        let controller = EditSessionController::new(store());
        let mut session = controller.begin(EditScope::Analysis).unwrap();
        assert_eq!(controller.cancel(&mut session).unwrap(), MutationOutcome::Unchanged);
    }
}
