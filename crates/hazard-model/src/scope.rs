//! Edit scopes
//!
//! Provides [`EditScope`] for addressing the part of an analysis an edit
//! session covers, and [`ScopeValue`], the deep copy taken when the session
//! begins.
//!
//! Scopes are hierarchical: `losses` covers `losses.L-1`, which covers
//! `losses.L-1.severity`. The string form joins segments with `.`.

use crate::entity::{Collection, UnknownCollection};
use crate::ids::EntityId;
use crate::patch::{EntityPatch, StateMutation};
use crate::record::{FieldPatch, Record};
use crate::snapshot::{AnalysisSnapshot, EntityMap};
use serde_json::Value;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Root scope name
const ANALYSIS: &str = "analysis";

/// Region of the analysis covered by an edit session
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EditScope {
    /// Every collection
    Analysis,
    /// One collection (a table section)
    Collection(Collection),
    /// One entity (a row dialog)
    Entity {
        /// Owning collection
        collection: Collection,
        /// Entity
        id: EntityId,
    },
    /// One field of one entity (an inline cell)
    Field {
        /// Owning collection
        collection: Collection,
        /// Entity
        id: EntityId,
        /// Field name
        field: String,
    },
}

impl EditScope {
    /// Scope covering one collection
    #[inline]
    #[must_use]
    pub fn collection(collection: Collection) -> Self {
        Self::Collection(collection)
    }

    /// Scope covering one entity
    #[inline]
    #[must_use]
    pub fn entity(collection: Collection, id: impl Into<EntityId>) -> Self {
        Self::Entity {
            collection,
            id: id.into(),
        }
    }

    /// Scope covering one field
    #[inline]
    #[must_use]
    pub fn field(collection: Collection, id: impl Into<EntityId>, field: impl Into<String>) -> Self {
        Self::Field {
            collection,
            id: id.into(),
            field: field.into(),
        }
    }

    /// Collection the scope lies within (`None` for the whole analysis)
    #[must_use]
    pub fn target_collection(&self) -> Option<Collection> {
        match self {
            Self::Analysis => None,
            Self::Collection(c) | Self::Entity { collection: c, .. } | Self::Field { collection: c, .. } => {
                Some(*c)
            }
        }
    }

    /// Path segments from the root; empty for the whole analysis
    #[must_use]
    pub fn segments(&self) -> Vec<&str> {
        match self {
            Self::Analysis => Vec::new(),
            Self::Collection(c) => vec![c.as_str()],
            Self::Entity { collection, id } => vec![collection.as_str(), id.as_str()],
            Self::Field {
                collection,
                id,
                field,
            } => vec![collection.as_str(), id.as_str(), field.as_str()],
        }
    }

    /// Check if this scope contains `other`
    #[must_use]
    pub fn contains(&self, other: &Self) -> bool {
        let mine = self.segments();
        let theirs = other.segments();
        mine.len() <= theirs.len() && mine[..] == theirs[..mine.len()]
    }

    /// Check if scopes overlap (one contains the other)
    #[inline]
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.contains(other) || other.contains(self)
    }
}

impl Display for EditScope {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Analysis => f.write_str(ANALYSIS),
            _ => f.write_str(&self.segments().join(".")),
        }
    }
}

impl FromStr for EditScope {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == ANALYSIS {
            return Ok(Self::Analysis);
        }

        let mut parts = s.splitn(3, '.');
        let collection: Collection = match parts.next() {
            Some(first) if !first.is_empty() => first.parse()?,
            _ => return Err(ScopeError::Empty),
        };

        let id = match parts.next() {
            None => return Ok(Self::Collection(collection)),
            Some(id) => validate_segment(id)?,
        };

        match parts.next() {
            None => Ok(Self::entity(collection, id)),
            Some(field) => Ok(Self::field(collection, id, validate_segment(field)?)),
        }
    }
}

fn validate_segment(segment: &str) -> Result<&str, ScopeError> {
    if segment.is_empty() {
        Err(ScopeError::EmptySegment)
    } else if segment.contains(|c: char| !c.is_alphanumeric() && c != '_' && c != '-') {
        Err(ScopeError::InvalidSegment(segment.to_string()))
    } else {
        Ok(segment)
    }
}

/// Scope parsing errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScopeError {
    /// Empty scope string
    #[error("scope cannot be empty")]
    Empty,

    /// Empty segment (e.g. `losses..severity`)
    #[error("scope contains empty segment")]
    EmptySegment,

    /// Segment contains invalid characters
    #[error("invalid scope segment: {0}")]
    InvalidSegment(String),

    /// First segment is not a collection
    #[error(transparent)]
    UnknownCollection(#[from] UnknownCollection),
}

/// Deep copy of the value at a scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeValue {
    /// Whole analysis
    Snapshot(AnalysisSnapshot),
    /// One collection, in order
    Collection(EntityMap),
    /// One entity and its position; `None` when it did not exist
    Entity {
        /// Record, if present
        record: Option<Record>,
        /// Position within the collection, if present
        index: Option<usize>,
    },
    /// One field; `None` when unset or the entity did not exist
    Field(Option<Value>),
}

impl ScopeValue {
    /// Copy the value `scope` addresses out of `snapshot`
    #[must_use]
    pub fn capture(snapshot: &AnalysisSnapshot, scope: &EditScope) -> Self {
        match scope {
            EditScope::Analysis => Self::Snapshot(snapshot.clone()),
            EditScope::Collection(c) => Self::Collection(snapshot.collection(*c).clone()),
            EditScope::Entity { collection, id } => {
                match snapshot.collection(*collection).get_full(id) {
                    Some((index, _, record)) => Self::Entity {
                        record: Some(record.clone()),
                        index: Some(index),
                    },
                    None => Self::Entity {
                        record: None,
                        index: None,
                    },
                }
            }
            EditScope::Field {
                collection,
                id,
                field,
            } => Self::Field(
                snapshot
                    .get(*collection, id.as_str())
                    .and_then(|r| r.get(field))
                    .cloned(),
            ),
        }
    }

    /// Mutation that puts this value back at `scope`
    ///
    /// An entity that did not exist is deleted; a field that was unset is
    /// unset again. A field whose entity has since been deleted cannot be
    /// restored and the resulting update reports missing. Returns `None` if
    /// the value was captured for a different kind of scope.
    #[must_use]
    pub fn restoration(&self, scope: &EditScope) -> Option<StateMutation> {
        let mutation = match (self, scope) {
            (Self::Snapshot(snapshot), EditScope::Analysis) => {
                StateMutation::replace_snapshot(snapshot.clone())
            }
            (Self::Collection(records), EditScope::Collection(c)) => {
                StateMutation::replace_collection(*c, records.clone())
            }
            (Self::Entity { record, index }, EditScope::Entity { collection, id }) => {
                match (record, index) {
                    (Some(record), Some(index)) => {
                        EntityPatch::restore(*collection, id.clone(), record.clone(), *index).into()
                    }
                    _ => EntityPatch::delete(*collection, id.clone()).into(),
                }
            }
            (
                Self::Field(value),
                EditScope::Field {
                    collection,
                    id,
                    field,
                },
            ) => EntityPatch::update(
                *collection,
                id.clone(),
                FieldPatch::single(field.clone(), value.clone().unwrap_or(Value::Null)),
            )
            .into(),
            _ => return None,
        };
        Some(mutation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Entity, Loss, Severity};
    use serde_json::json;

    fn sample() -> AnalysisSnapshot {
        let mut s = AnalysisSnapshot::new();
        for (id, severity) in [("L-1", Severity::High), ("L-2", Severity::Low)] {
            s.insert_entity(&Loss {
                id: id.into(),
                title: format!("Loss {id}"),
                description: String::new(),
                severity,
                stakeholder_ids: vec![],
            })
            .unwrap();
        }
        s
    }

    #[test]
    fn parse_and_display_round_trip() {
        for text in ["analysis", "losses", "losses.L-1", "ucas.UCA-7.context"] {
            let scope: EditScope = text.parse().unwrap();
            assert_eq!(scope.to_string(), text);
        }
        assert_eq!(
            "hazards.H-3".parse::<EditScope>().unwrap(),
            EditScope::entity(Collection::Hazards, "H-3")
        );
    }

    #[test]
    fn parse_rejects_bad_scopes() {
        assert_eq!("".parse::<EditScope>(), Err(ScopeError::Empty));
        assert_eq!("losses..x".parse::<EditScope>(), Err(ScopeError::EmptySegment));
        assert!(matches!(
            "losses.L 1".parse::<EditScope>(),
            Err(ScopeError::InvalidSegment(_))
        ));
        assert!(matches!(
            "widgets".parse::<EditScope>(),
            Err(ScopeError::UnknownCollection(_))
        ));
    }

    #[test]
    fn overlap_is_prefix_based() {
        let table = EditScope::collection(Collection::Losses);
        let row = EditScope::entity(Collection::Losses, "L-1");
        let cell = EditScope::field(Collection::Losses, "L-1", "severity");
        let other = EditScope::entity(Collection::Losses, "L-2");

        assert!(table.overlaps(&cell));
        assert!(cell.overlaps(&row));
        assert!(!row.overlaps(&other));
        assert!(EditScope::Analysis.contains(&cell));
        assert!(!cell.contains(&table));
    }

    #[test]
    fn restoring_entity_that_did_not_exist_deletes_it() {
        let scope = EditScope::entity(Collection::Losses, "L-9");
        let captured = ScopeValue::capture(&sample(), &scope);

        let mut edited = sample();
        edited
            .insert_entity(&Loss {
                id: "L-9".into(),
                title: "new".into(),
                description: String::new(),
                severity: Severity::Low,
                stakeholder_ids: vec![],
            })
            .unwrap();
        edited.apply(&captured.restoration(&scope).unwrap());
        assert!(edited.same_as(&sample()));
    }

    #[test]
    fn restoring_field_unsets_added_value() {
        let scope = EditScope::field(Collection::Losses, "L-1", "description");
        let mut s = sample();
        let captured = ScopeValue::capture(&s, &scope);
        s.apply(
            &EntityPatch::update(
                Collection::Losses,
                "L-1",
                FieldPatch::single("description", json!("edited")),
            )
            .into(),
        );
        s.apply(&captured.restoration(&scope).unwrap());
        assert!(s.same_as(&sample()));
        assert_eq!(
            Loss::from_record(s.get(Collection::Losses, "L-1").unwrap()).unwrap().description,
            ""
        );
    }

    #[test]
    fn mismatched_scope_has_no_restoration() {
        let captured = ScopeValue::capture(&sample(), &EditScope::collection(Collection::Losses));
        assert!(captured
            .restoration(&EditScope::entity(Collection::Losses, "L-1"))
            .is_none());
    }

    #[test]
    fn restoring_collection_restores_order_and_rows() {
        let scope = EditScope::collection(Collection::Losses);
        let captured = ScopeValue::capture(&sample(), &scope);

        let mut s = sample();
        s.apply(&EntityPatch::delete(Collection::Losses, "L-1").into());
        s.apply(&EntityPatch::create(Collection::Losses, "L-1", Record::new()).into());
        s.apply(&captured.restoration(&scope).unwrap());
        assert!(s.same_as(&sample()));
    }
}
