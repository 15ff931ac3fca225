//! Complete analysis contents
//!
//! Provides [`AnalysisSnapshot`], one self-contained copy of every entity
//! collection, and the deterministic patch-application function every
//! window uses.

use crate::digest::{DigestError, SnapshotDigest};
use crate::entity::{Collection, Entity};
use crate::ids::EntityId;
use crate::patch::{EntityPatch, MutationOutcome, PatchOp, StateMutation};
use crate::record::{Record, RecordError};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Insertion-ordered mapping from entity id to record
pub type EntityMap = IndexMap<EntityId, Record>;

/// One complete copy of all entity collections
///
/// Cloning produces a deep copy; snapshots never share state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalysisSnapshot {
    system_description: EntityMap,
    stakeholders: EntityMap,
    losses: EntityMap,
    hazards: EntityMap,
    controllers: EntityMap,
    control_actions: EntityMap,
    ucas: EntityMap,
    causal_scenarios: EntityMap,
}

impl AnalysisSnapshot {
    /// Empty analysis
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a typed entity (builder style)
    ///
    /// # Errors
    /// Returns error if the entity cannot be encoded
    pub fn with_entity<T: Entity>(mut self, entity: &T) -> Result<Self, RecordError> {
        self.insert_entity(entity)?;
        Ok(self)
    }

    /// Insert or overwrite a typed entity
    ///
    /// # Errors
    /// Returns error if the entity cannot be encoded
    pub fn insert_entity<T: Entity>(&mut self, entity: &T) -> Result<(), RecordError> {
        let record = entity.to_record()?;
        self.collection_mut(T::COLLECTION)
            .insert(entity.id().clone(), record);
        Ok(())
    }

    /// Records of one collection
    #[must_use]
    pub fn collection(&self, collection: Collection) -> &EntityMap {
        match collection {
            Collection::SystemDescription => &self.system_description,
            Collection::Stakeholders => &self.stakeholders,
            Collection::Losses => &self.losses,
            Collection::Hazards => &self.hazards,
            Collection::Controllers => &self.controllers,
            Collection::ControlActions => &self.control_actions,
            Collection::Ucas => &self.ucas,
            Collection::CausalScenarios => &self.causal_scenarios,
        }
    }

    fn collection_mut(&mut self, collection: Collection) -> &mut EntityMap {
        match collection {
            Collection::SystemDescription => &mut self.system_description,
            Collection::Stakeholders => &mut self.stakeholders,
            Collection::Losses => &mut self.losses,
            Collection::Hazards => &mut self.hazards,
            Collection::Controllers => &mut self.controllers,
            Collection::ControlActions => &mut self.control_actions,
            Collection::Ucas => &mut self.ucas,
            Collection::CausalScenarios => &mut self.causal_scenarios,
        }
    }

    /// Ordered copy of one collection
    #[must_use]
    pub fn entities(&self, collection: Collection) -> Vec<(EntityId, Record)> {
        self.collection(collection)
            .iter()
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect()
    }

    /// Decode every record of `T`'s collection, skipping malformed ones
    #[must_use]
    pub fn typed<T: Entity>(&self) -> Vec<T> {
        self.collection(T::COLLECTION)
            .values()
            .filter_map(|record| T::from_record(record).ok())
            .collect()
    }

    /// Single record
    #[inline]
    #[must_use]
    pub fn get(&self, collection: Collection, id: &str) -> Option<&Record> {
        self.collection(collection).get(id)
    }

    /// Check if an entity exists
    #[inline]
    #[must_use]
    pub fn contains(&self, collection: Collection, id: &str) -> bool {
        self.collection(collection).contains_key(id)
    }

    /// Position of an entity within its collection
    #[inline]
    #[must_use]
    pub fn position(&self, collection: Collection, id: &str) -> Option<usize> {
        self.collection(collection).get_index_of(id)
    }

    /// Total number of entities across collections
    #[must_use]
    pub fn entity_count(&self) -> usize {
        Collection::ALL
            .iter()
            .map(|c| self.collection(*c).len())
            .sum()
    }

    /// Check if every collection is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entity_count() == 0
    }

    /// Order-sensitive equality (derived `==` ignores record order)
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Collection::ALL
            .iter()
            .all(|c| self.collection(*c).iter().eq(other.collection(*c).iter()))
    }

    /// Content digest (order-sensitive)
    ///
    /// # Errors
    /// Returns error if serialization fails
    pub fn digest(&self) -> Result<SnapshotDigest, DigestError> {
        SnapshotDigest::of(self)
    }

    /// Apply a mutation
    ///
    /// Deterministic and idempotent; this is the single patch-application
    /// function shared by local edits, remote updates and rollbacks.
    pub fn apply(&mut self, mutation: &StateMutation) -> MutationOutcome {
        match mutation {
            StateMutation::Entity(patch) => self.apply_entity(patch),
            StateMutation::Collection(replacement) => {
                let target = self.collection_mut(replacement.collection);
                if target.iter().eq(replacement.records.iter()) {
                    MutationOutcome::Unchanged
                } else {
                    target.clone_from(&replacement.records);
                    MutationOutcome::Applied
                }
            }
            StateMutation::Snapshot(replacement) => {
                if self.same_as(&replacement.snapshot) {
                    MutationOutcome::Unchanged
                } else {
                    self.clone_from(&replacement.snapshot);
                    MutationOutcome::Applied
                }
            }
        }
    }

    fn apply_entity(&mut self, patch: &EntityPatch) -> MutationOutcome {
        let target = self.collection_mut(patch.collection);
        let id = &patch.entity_id;

        match &patch.patch {
            PatchOp::Create { record } => {
                if target.get(id) == Some(record) {
                    MutationOutcome::Unchanged
                } else {
                    target.insert(id.clone(), record.clone());
                    MutationOutcome::Applied
                }
            }
            PatchOp::Update { fields } => match target.get_mut(id) {
                Some(record) => {
                    if record.apply(fields) {
                        MutationOutcome::Applied
                    } else {
                        MutationOutcome::Unchanged
                    }
                }
                None => MutationOutcome::Missing,
            },
            PatchOp::Delete => match target.shift_remove(id) {
                Some(_) => MutationOutcome::Applied,
                None => MutationOutcome::Missing,
            },
            PatchOp::Restore { record, index } => {
                if let Some((current, existing)) = target.get_full(id).map(|(i, _, r)| (i, r)) {
                    if current == (*index).min(target.len() - 1) && existing == record {
                        return MutationOutcome::Unchanged;
                    }
                    target.shift_remove(id);
                }
                let at = (*index).min(target.len());
                target.shift_insert(at, id.clone(), record.clone());
                MutationOutcome::Applied
            }
        }
    }
}
