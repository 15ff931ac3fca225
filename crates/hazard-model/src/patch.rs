//! Store mutations
//!
//! Provides [`EntityPatch`] (one operation on one entity) and
//! [`StateMutation`], the unit that is applied locally, broadcast as a
//! `STATE_UPDATE` payload and re-applied by every other window.
//!
//! # Invariants
//! Every mutation is idempotent: applying it twice yields the same state as
//! applying it once. This is what makes at-least-once delivery safe.

use crate::entity::{Collection, Entity};
use crate::ids::EntityId;
use crate::record::{FieldPatch, Record, RecordError};
use crate::snapshot::{AnalysisSnapshot, EntityMap};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Operation on a single entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum PatchOp {
    /// Insert the record, overwriting any existing one in place
    Create {
        /// Full record
        record: Record,
    },

    /// Field-level update
    ///
    /// Reports [`MutationOutcome::Missing`] if the entity does not exist.
    Update {
        /// Touched fields
        fields: FieldPatch,
    },

    /// Remove the entity
    ///
    /// Reports [`MutationOutcome::Missing`] if the entity does not exist.
    Delete,

    /// Put the record back at a given position
    ///
    /// Used by edit-session rollback so a restored row keeps its place.
    Restore {
        /// Full record
        record: Record,
        /// Position within the collection (clamped to its length)
        index: usize,
    },
}

impl PatchOp {
    /// Short operation name for logs
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            PatchOp::Create { .. } => "create",
            PatchOp::Update { .. } => "update",
            PatchOp::Delete => "delete",
            PatchOp::Restore { .. } => "restore",
        }
    }
}

/// Operation addressed to one entity of one collection
///
/// Serializes as `{ collection, entityId, patch }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityPatch {
    /// Target collection
    pub collection: Collection,
    /// Target entity
    pub entity_id: EntityId,
    /// Operation
    pub patch: PatchOp,
}

impl EntityPatch {
    /// Create new patch
    #[inline]
    #[must_use]
    pub fn new(collection: Collection, entity_id: impl Into<EntityId>, patch: PatchOp) -> Self {
        Self {
            collection,
            entity_id: entity_id.into(),
            patch,
        }
    }

    /// Insert or overwrite a record
    #[inline]
    #[must_use]
    pub fn create(collection: Collection, entity_id: impl Into<EntityId>, record: Record) -> Self {
        Self::new(collection, entity_id, PatchOp::Create { record })
    }

    /// Insert a typed entity
    ///
    /// # Errors
    /// Returns error if the entity cannot be encoded
    pub fn create_entity<T: Entity>(entity: &T) -> Result<Self, RecordError> {
        Ok(Self::create(T::COLLECTION, entity.id().clone(), entity.to_record()?))
    }

    /// Field-level update
    #[inline]
    #[must_use]
    pub fn update(collection: Collection, entity_id: impl Into<EntityId>, fields: FieldPatch) -> Self {
        Self::new(collection, entity_id, PatchOp::Update { fields })
    }

    /// Delete an entity
    #[inline]
    #[must_use]
    pub fn delete(collection: Collection, entity_id: impl Into<EntityId>) -> Self {
        Self::new(collection, entity_id, PatchOp::Delete)
    }

    /// Restore a record at a position
    #[inline]
    #[must_use]
    pub fn restore(
        collection: Collection,
        entity_id: impl Into<EntityId>,
        record: Record,
        index: usize,
    ) -> Self {
        Self::new(collection, entity_id, PatchOp::Restore { record, index })
    }
}

/// Whole-collection replacement (`{ collection, records }`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionReplacement {
    /// Target collection
    pub collection: Collection,
    /// Complete ordered contents
    pub records: EntityMap,
}

/// Whole-analysis replacement (`{ snapshot }`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotReplacement {
    /// Complete contents
    pub snapshot: AnalysisSnapshot,
}

/// A change to an analysis snapshot
///
/// The untagged representation keeps the entity form exactly
/// `{ collection, entityId, patch }` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateMutation {
    /// Single-entity operation
    Entity(EntityPatch),
    /// Replace one collection
    Collection(CollectionReplacement),
    /// Replace everything
    Snapshot(SnapshotReplacement),
}

impl StateMutation {
    /// Collection touched, if the mutation is scoped to one
    #[must_use]
    pub fn collection(&self) -> Option<Collection> {
        match self {
            StateMutation::Entity(p) => Some(p.collection),
            StateMutation::Collection(c) => Some(c.collection),
            StateMutation::Snapshot(_) => None,
        }
    }

    /// Replace one collection
    #[inline]
    #[must_use]
    pub fn replace_collection(collection: Collection, records: EntityMap) -> Self {
        StateMutation::Collection(CollectionReplacement {
            collection,
            records,
        })
    }

    /// Replace everything
    #[inline]
    #[must_use]
    pub fn replace_snapshot(snapshot: AnalysisSnapshot) -> Self {
        StateMutation::Snapshot(SnapshotReplacement { snapshot })
    }
}

impl From<EntityPatch> for StateMutation {
    fn from(patch: EntityPatch) -> Self {
        StateMutation::Entity(patch)
    }
}

impl Display for StateMutation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StateMutation::Entity(p) => {
                write!(f, "{} {}.{}", p.patch.name(), p.collection, p.entity_id)
            }
            StateMutation::Collection(c) => {
                write!(f, "replace {} ({} records)", c.collection, c.records.len())
            }
            StateMutation::Snapshot(s) => {
                write!(f, "replace snapshot ({} entities)", s.snapshot.entity_count())
            }
        }
    }
}

/// Result of applying a mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    /// State changed
    Applied,
    /// Mutation was already reflected in the state
    Unchanged,
    /// Target entity does not exist; nothing was done
    Missing,
}

impl MutationOutcome {
    /// Check if state changed
    #[inline]
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}
