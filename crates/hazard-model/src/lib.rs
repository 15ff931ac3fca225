//! Hazard Analysis Model
//!
//! Entity collections, field-level patches and self-contained snapshots for
//! multi-framework safety and security analyses.
//!
//! # Core Concepts
//!
//! - [`AnalysisSnapshot`]: One complete, deep-copyable set of collections
//! - [`Entity`]: Sealed trait for typed records (losses, hazards, UCAs, ...)
//! - [`StateMutation`]: Idempotent change applied locally and by every peer
//! - [`EditScope`]: Hierarchical address of what an edit session covers
//! - [`SnapshotDigest`]: Blake3 hash for convergence checks
//!
//! # Example
//!
//! ```rust,ignore
//! use hazard_model::{AnalysisSnapshot, Collection, EntityPatch, FieldPatch};
//!
//! let mut snapshot = AnalysisSnapshot::new().with_entity(&hazard)?;
//! let patch = EntityPatch::update(
//!     Collection::Hazards,
//!     "H-3",
//!     FieldPatch::single("severity", json!("critical")),
//! );
//! snapshot.apply(&patch.into());
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod digest;
mod entity;
mod ids;
mod integrity;
mod patch;
mod record;
mod scope;
mod snapshot;
mod version;

pub use digest::{DigestError, SnapshotDigest};
pub use entity::{
    validate_record, CausalScenario, Collection, ControlAction, Controller, ControllerKind,
    Entity, Hazard, Loss, Severity, Stakeholder, SystemDescription, Uca, UcaType,
    UnknownCollection,
};
pub use ids::{EntityId, SessionId, VersionId, WindowId};
pub use integrity::{dangling_references, display_label, DanglingReference};
pub use patch::{
    CollectionReplacement, EntityPatch, MutationOutcome, PatchOp, SnapshotReplacement,
    StateMutation,
};
pub use record::{FieldPatch, Record, RecordError};
pub use scope::{EditScope, ScopeError, ScopeValue};
pub use snapshot::{AnalysisSnapshot, EntityMap};
pub use version::{AnalysisVersion, VersionSummary};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod integration_tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn seed() -> AnalysisSnapshot {
        let mut s = AnalysisSnapshot::new();
        for i in 0..4 {
            s.insert_entity(&Hazard {
                id: format!("H-{i}").into(),
                title: format!("Hazard {i}"),
                description: String::new(),
                severity: Severity::Medium,
                related_losses: vec![],
            })
            .unwrap();
        }
        s
    }

    fn arb_mutation() -> impl Strategy<Value = StateMutation> {
        let id = (0..6u8).prop_map(|i| format!("H-{i}"));
        let severity = prop_oneof![
            Just("low"),
            Just("medium"),
            Just("high"),
            Just("critical")
        ];
        prop_oneof![
            (id.clone(), severity).prop_map(|(id, sev)| {
                EntityPatch::update(
                    Collection::Hazards,
                    id,
                    FieldPatch::single("severity", json!(sev)),
                )
                .into()
            }),
            id.clone().prop_map(|id| EntityPatch::delete(Collection::Hazards, id).into()),
            (id.clone(), 0..8usize).prop_map(|(id, index)| {
                let mut record = Record::new();
                record.set("id", json!(id.clone()));
                record.set("title", json!("restored"));
                EntityPatch::restore(Collection::Hazards, id, record, index).into()
            }),
            id.prop_map(|id| {
                let mut record = Record::new();
                record.set("id", json!(id.clone()));
                EntityPatch::create(Collection::Hazards, id, record).into()
            }),
        ]
    }

    proptest! {
        #[test]
        fn every_mutation_is_idempotent(m in arb_mutation()) {
            let mut once = seed();
            once.apply(&m);
            let mut twice = once.clone();
            let second = twice.apply(&m);
            prop_assert!(twice.same_as(&once));
            prop_assert_ne!(second, MutationOutcome::Applied);
        }

        #[test]
        fn same_sequence_gives_same_digest(ms in proptest::collection::vec(arb_mutation(), 0..20)) {
            let mut a = seed();
            let mut b = seed();
            for m in &ms {
                a.apply(m);
                b.apply(m);
                // duplicate delivery on one side only
                b.apply(m);
            }
            prop_assert_eq!(a.digest().unwrap(), b.digest().unwrap());
        }

        #[test]
        fn capture_then_restore_is_exact(ms in proptest::collection::vec(arb_mutation(), 0..10)) {
            let original = seed();
            let scope = EditScope::collection(Collection::Hazards);
            let captured = ScopeValue::capture(&original, &scope);
            let mut edited = original.clone();
            for m in &ms {
                edited.apply(m);
            }
            edited.apply(&captured.restoration(&scope).unwrap());
            prop_assert!(edited.same_as(&original));
        }
    }

    #[test]
    fn scope_and_digest_integration() {
        let scope: EditScope = "hazards.H-1.severity".parse().unwrap();
        assert_eq!(scope.target_collection(), Some(Collection::Hazards));

        let digest = seed().digest().unwrap();
        assert_eq!(digest.short().len(), 16);
        assert_eq!(digest, seed().digest().unwrap());
    }
}
