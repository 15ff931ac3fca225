//! Section views
//!
//! A section (losses table, UCA table, ...) is shown either read-only or
//! editable. [`SectionView`] is one abstraction with those two variants;
//! the editable one drives an edit session over the section's collection
//! and refuses to save while its validator reports issues.

use crate::error::ViewError;
use crate::session::{EditSession, EditSessionController};
use crate::store::AnalysisStore;
use hazard_model::{
    display_label, validate_record, Collection, EditScope, Entity, EntityId, EntityPatch,
    FieldPatch, MutationOutcome, Record,
};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// A problem that blocks saving a row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Offending row
    pub entity_id: EntityId,
    /// Human-readable description
    pub message: String,
}

/// Row-level validation rule applied before saving
pub trait RowValidator: Send + Sync + fmt::Debug {
    /// Check one row; `None` means the row is acceptable
    fn check(&self, collection: Collection, id: &EntityId, record: &Record) -> Option<ValidationIssue>;
}

/// Accepts rows that decode into the collection's typed entity
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaValidator;

impl RowValidator for SchemaValidator {
    fn check(&self, collection: Collection, id: &EntityId, record: &Record) -> Option<ValidationIssue> {
        validate_record(collection, record)
            .err()
            .map(|e| ValidationIssue {
                entity_id: id.clone(),
                message: e.to_string(),
            })
    }
}

/// Result of trying to save an editable section
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Edits committed
    Saved,
    /// Validation failed; the session stays open
    Blocked(Vec<ValidationIssue>),
}

impl SaveOutcome {
    /// Check if the save went through
    #[inline]
    #[must_use]
    pub fn is_saved(&self) -> bool {
        matches!(self, Self::Saved)
    }
}

/// Display-only section
#[derive(Debug, Clone)]
pub struct ReadOnlyView {
    store: AnalysisStore,
    collection: Collection,
}

impl ReadOnlyView {
    /// View `collection` of `store`
    #[must_use]
    pub fn new(store: AnalysisStore, collection: Collection) -> Self {
        Self { store, collection }
    }
}

/// Section that can enter an edit session
#[derive(Debug)]
pub struct EditableView {
    store: AnalysisStore,
    controller: EditSessionController,
    collection: Collection,
    validator: Arc<dyn RowValidator>,
    session: Option<EditSession>,
}

impl EditableView {
    /// Editable view of `collection`, validated by [`SchemaValidator`]
    #[must_use]
    pub fn new(controller: EditSessionController, collection: Collection) -> Self {
        Self {
            store: controller.store().clone(),
            controller,
            collection,
            validator: Arc::new(SchemaValidator),
            session: None,
        }
    }

    /// Replace the validator
    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn RowValidator>) -> Self {
        self.validator = validator;
        self
    }

    /// Enter edit mode
    ///
    /// Entering again while already editing does nothing.
    ///
    /// # Errors
    /// Returns error if another session holds this section
    pub fn enter_edit(&mut self) -> Result<(), ViewError> {
        if self.session.is_none() {
            let session = self.controller.begin(EditScope::collection(self.collection))?;
            self.session = Some(session);
        }
        Ok(())
    }

    /// Check if in edit mode
    #[inline]
    #[must_use]
    pub fn is_editing(&self) -> bool {
        self.session.is_some()
    }

    /// Check if there are unsaved edits
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| self.controller.is_dirty(s))
    }

    /// Set one cell; applied to the store immediately
    ///
    /// # Errors
    /// Returns [`ViewError::NotEditing`] outside edit mode
    pub fn set_field(
        &mut self,
        id: impl Into<EntityId>,
        field: &str,
        value: Value,
    ) -> Result<MutationOutcome, ViewError> {
        self.require_editing()?;
        Ok(self
            .store
            .mutate(self.collection, id, FieldPatch::single(field, value)))
    }

    /// Append a row; its id is taken from the record's `id` field
    ///
    /// # Errors
    /// Returns error outside edit mode, if the row lacks an id, or if the
    /// id is already taken
    pub fn add_row(&mut self, record: Record) -> Result<EntityId, ViewError> {
        self.require_editing()?;
        let id = record
            .get_str("id")
            .map(EntityId::from)
            .ok_or(ViewError::MissingId)?;
        if self.store.contains(self.collection, id.as_str()) {
            return Err(ViewError::DuplicateRow(id));
        }
        self.store
            .apply(EntityPatch::create(self.collection, id.clone(), record).into());
        Ok(id)
    }

    /// Append a typed entity
    ///
    /// # Errors
    /// As [`EditableView::add_row`], plus encoding failures
    pub fn add_entity<T: Entity>(&mut self, entity: &T) -> Result<EntityId, ViewError> {
        self.add_row(entity.to_record()?)
    }

    /// Remove a row
    ///
    /// # Errors
    /// Returns [`ViewError::NotEditing`] outside edit mode
    pub fn delete_row(&mut self, id: impl Into<EntityId>) -> Result<MutationOutcome, ViewError> {
        self.require_editing()?;
        Ok(self.store.delete(self.collection, id))
    }

    /// Current validation issues
    #[must_use]
    pub fn validate(&self) -> Vec<ValidationIssue> {
        self.store.read(|snapshot| {
            snapshot
                .collection(self.collection)
                .iter()
                .filter_map(|(id, record)| self.validator.check(self.collection, id, record))
                .collect()
        })
    }

    /// Commit the edits if every row validates
    ///
    /// # Errors
    /// Returns [`ViewError::NotEditing`] outside edit mode
    pub fn save(&mut self) -> Result<SaveOutcome, ViewError> {
        self.require_editing()?;
        let issues = self.validate();
        if !issues.is_empty() {
            tracing::debug!(collection = %self.collection, issues = issues.len(), "save blocked");
            return Ok(SaveOutcome::Blocked(issues));
        }
        if let Some(mut session) = self.session.take() {
            self.controller.commit(&mut session)?;
        }
        Ok(SaveOutcome::Saved)
    }

    /// Discard the edits, restoring the section as it was
    ///
    /// # Errors
    /// Returns [`ViewError::NotEditing`] outside edit mode
    pub fn cancel(&mut self) -> Result<MutationOutcome, ViewError> {
        let mut session = self.session.take().ok_or(ViewError::NotEditing)?;
        Ok(self.controller.cancel(&mut session)?)
    }

    fn require_editing(&self) -> Result<(), ViewError> {
        if self.session.is_some() {
            Ok(())
        } else {
            Err(ViewError::NotEditing)
        }
    }
}

/// A section in one of its two presentation modes
#[derive(Debug)]
pub enum SectionView {
    /// Display only
    ReadOnly(ReadOnlyView),
    /// Display with edit mode
    Editable(EditableView),
}

impl SectionView {
    /// Read-only view of `collection`
    #[must_use]
    pub fn read_only(store: AnalysisStore, collection: Collection) -> Self {
        Self::ReadOnly(ReadOnlyView::new(store, collection))
    }

    /// Editable view of `collection`
    #[must_use]
    pub fn editable(controller: EditSessionController, collection: Collection) -> Self {
        Self::Editable(EditableView::new(controller, collection))
    }

    /// Collection shown
    #[must_use]
    pub fn collection(&self) -> Collection {
        match self {
            Self::ReadOnly(v) => v.collection,
            Self::Editable(v) => v.collection,
        }
    }

    fn store(&self) -> &AnalysisStore {
        match self {
            Self::ReadOnly(v) => &v.store,
            Self::Editable(v) => &v.store,
        }
    }

    /// Rows in display order
    #[must_use]
    pub fn rows(&self) -> Vec<(EntityId, Record)> {
        self.store().entities(self.collection())
    }

    /// Decoded rows; malformed ones are skipped
    #[must_use]
    pub fn typed<T: Entity>(&self) -> Vec<T> {
        if T::COLLECTION == self.collection() {
            self.store().typed()
        } else {
            Vec::new()
        }
    }

    /// Label for an entity of any collection, blank if missing
    #[must_use]
    pub fn label(&self, collection: Collection, id: &str) -> String {
        self.store().read(|snapshot| display_label(snapshot, collection, id))
    }

    /// Check if the view offers editing
    #[inline]
    #[must_use]
    pub fn is_editable(&self) -> bool {
        matches!(self, Self::Editable(_))
    }

    /// Editing surface, if any
    #[must_use]
    pub fn as_editable_mut(&mut self) -> Option<&mut EditableView> {
        match self {
            Self::Editable(v) => Some(v),
            Self::ReadOnly(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hazard_model::{AnalysisSnapshot, Loss, Severity};
    use serde_json::json;

    fn loss(id: &str) -> Loss {
        Loss {
            id: id.into(),
            title: format!("Loss {id}"),
            description: String::new(),
            severity: Severity::High,
            stakeholder_ids: vec![],
        }
    }

    fn controller() -> EditSessionController {
        let snapshot = AnalysisSnapshot::new().with_entity(&loss("L-1")).unwrap();
        EditSessionController::new(AnalysisStore::new(snapshot))
    }

    #[test]
    fn read_only_view_has_no_editing_surface() {
        let c = controller();
        let mut view = SectionView::read_only(c.store().clone(), Collection::Losses);
        assert!(!view.is_editable());
        assert!(view.as_editable_mut().is_none());
        assert_eq!(view.rows().len(), 1);
        assert_eq!(view.typed::<Loss>()[0].title, "Loss L-1");
    }

    #[test]
    fn edits_require_edit_mode() {
        let mut view = EditableView::new(controller(), Collection::Losses);
        assert!(matches!(
            view.set_field("L-1", "title", json!("x")),
            Err(ViewError::NotEditing)
        ));
    }

    #[test]
    fn invalid_rows_block_save_and_keep_session() {
        let c = controller();
        let mut view = EditableView::new(c.clone(), Collection::Losses);
        view.enter_edit().unwrap();

        view.set_field("L-1", "severity", json!("apocalyptic")).unwrap();
        let outcome = view.save().unwrap();
        assert!(matches!(&outcome, SaveOutcome::Blocked(issues) if issues.len() == 1));
        assert!(view.is_editing());
        assert!(c.is_busy(&EditScope::collection(Collection::Losses)));

        view.set_field("L-1", "severity", json!("low")).unwrap();
        assert!(view.save().unwrap().is_saved());
        assert!(!view.is_editing());
        assert_eq!(c.store().typed::<Loss>()[0].severity, Severity::Low);
    }

    #[test]
    fn cancel_restores_section() {
        let c = controller();
        let before = c.store().snapshot();
        let mut view = SectionView::editable(c.clone(), Collection::Losses);
        let editable = view.as_editable_mut().unwrap();

        editable.enter_edit().unwrap();
        editable.add_entity(&loss("L-2")).unwrap();
        editable.delete_row("L-1").unwrap();
        assert!(editable.is_dirty());

        editable.cancel().unwrap();
        assert!(c.store().snapshot().same_as(&before));
        assert_eq!(view.label(Collection::Losses, "L-1"), "Loss L-1");
        assert_eq!(view.label(Collection::Losses, "L-2"), "");
    }

    #[test]
    fn add_row_rejects_duplicates_and_missing_ids() {
        let mut view = EditableView::new(controller(), Collection::Losses);
        view.enter_edit().unwrap();
        assert!(matches!(
            view.add_entity(&loss("L-1")),
            Err(ViewError::DuplicateRow(_))
        ));
        assert!(matches!(view.add_row(Record::new()), Err(ViewError::MissingId)));
    }
}
