//! Reference integrity helpers
//!
//! The store never enforces cross-references and deletion never cascades.
//! Consumers use these helpers to find and render references whose target
//! has gone missing, degrading to a blank label instead of failing.

use crate::entity::Collection;
use crate::ids::EntityId;
use crate::snapshot::AnalysisSnapshot;
use serde::Serialize;

/// A cross-reference whose target entity does not exist
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DanglingReference {
    /// Collection holding the referencing entity
    pub collection: Collection,
    /// Referencing entity
    pub entity_id: EntityId,
    /// Field holding the reference
    pub field: &'static str,
    /// Referenced id that could not be resolved
    pub missing_id: EntityId,
    /// Collection the reference points into
    pub target: Collection,
}

/// Every unresolved cross-reference in the snapshot, in collection order
#[must_use]
pub fn dangling_references(snapshot: &AnalysisSnapshot) -> Vec<DanglingReference> {
    let mut dangling = Vec::new();

    for collection in Collection::ALL {
        for (entity_id, record) in snapshot.collection(collection) {
            for &(field, target) in collection.reference_fields() {
                for missing_id in record.references(field) {
                    if !snapshot.contains(target, missing_id.as_str()) {
                        dangling.push(DanglingReference {
                            collection,
                            entity_id: entity_id.clone(),
                            field,
                            missing_id,
                            target,
                        });
                    }
                }
            }
        }
    }

    dangling
}

/// Human label for an entity, blank if it does not exist
///
/// Prefers `title`, then `name`, then the id itself.
#[must_use]
pub fn display_label(snapshot: &AnalysisSnapshot, collection: Collection, id: &str) -> String {
    match snapshot.get(collection, id) {
        Some(record) => record
            .get_str("title")
            .or_else(|| record.get_str("name"))
            .unwrap_or(id)
            .to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Hazard, Loss, Severity, Uca, UcaType};
    use crate::patch::EntityPatch;

    fn snapshot() -> AnalysisSnapshot {
        AnalysisSnapshot::new()
            .with_entity(&Loss {
                id: "L-1".into(),
                title: "Loss of life".into(),
                description: String::new(),
                severity: Severity::Critical,
                stakeholder_ids: vec![],
            })
            .unwrap()
            .with_entity(&Hazard {
                id: "H-1".into(),
                title: "Insufficient separation".into(),
                description: String::new(),
                severity: Severity::High,
                related_losses: vec!["L-1".into()],
            })
            .unwrap()
            .with_entity(&Uca {
                id: "UCA-1".into(),
                control_action_id: "CA-1".into(),
                uca_type: UcaType::NotProvided,
                context: String::new(),
                hazard_ids: vec!["H-1".into()],
            })
            .unwrap()
    }

    #[test]
    fn reports_missing_targets() {
        let dangling = dangling_references(&snapshot());
        assert_eq!(dangling.len(), 1);
        assert_eq!(dangling[0].field, "controlActionId");
        assert_eq!(dangling[0].missing_id, EntityId::new("CA-1"));
    }

    #[test]
    fn deleting_a_target_does_not_cascade() {
        let mut s = snapshot();
        s.apply(&EntityPatch::delete(Collection::Losses, "L-1").into());
        assert!(s.contains(Collection::Hazards, "H-1"));

        let dangling = dangling_references(&s);
        assert!(dangling
            .iter()
            .any(|d| d.entity_id.as_str() == "H-1" && d.target == Collection::Losses));
    }

    #[test]
    fn label_degrades_to_blank() {
        let s = snapshot();
        assert_eq!(display_label(&s, Collection::Hazards, "H-1"), "Insufficient separation");
        assert_eq!(display_label(&s, Collection::Ucas, "UCA-1"), "UCA-1");
        assert_eq!(display_label(&s, Collection::Hazards, "H-404"), "");
    }
}
