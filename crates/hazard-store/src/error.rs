//! Error types for the store crate

use hazard_model::{EditScope, EntityId, RecordError, SessionId, VersionId};

/// Version manager errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    /// No version with this id
    #[error("unknown version: {0}")]
    Unknown(VersionId),

    /// The active version cannot be deleted
    #[error("cannot delete the active version {0}")]
    ActiveVersion(VersionId),

    /// Other versions still name this one as their parent
    #[error("version {id} has {children} child version(s)")]
    HasChildren {
        /// Version that was to be deleted
        id: VersionId,
        /// Number of children
        children: usize,
    },

    /// A version with this id already exists
    #[error("version already exists: {0}")]
    Duplicate(VersionId),
}

/// Edit session errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Another session already covers exactly this scope
    #[error("scope {scope} is already being edited by session {holder}")]
    ScopeBusy {
        /// Requested scope
        scope: EditScope,
        /// Session currently holding it
        holder: SessionId,
    },

    /// Session was already committed or cancelled
    #[error("session {0} is no longer active")]
    NotActive(SessionId),
}

/// Section view errors
#[derive(Debug, thiserror::Error)]
pub enum ViewError {
    /// Editing operation on a section that is not in edit mode
    #[error("section is not being edited")]
    NotEditing,

    /// Row has no usable `id` field
    #[error("row has no id")]
    MissingId,

    /// Row id is already taken
    #[error("row {0} already exists")]
    DuplicateRow(EntityId),

    /// Session failure
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Record encoding failure
    #[error(transparent)]
    Record(#[from] RecordError),
}
