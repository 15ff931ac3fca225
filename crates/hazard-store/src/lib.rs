//! Hazard Analysis Store
//!
//! Per-window state: the analysis store, the version list, edit sessions
//! and the section views built on them.
//!
//! # Core Concepts
//!
//! - [`AnalysisStore`]: Live contents of the active version, with
//!   synchronous change notification
//! - [`VersionManager`]: Copy-on-branch versions and atomic switching
//! - [`EditSessionController`]: Scope-parameterized snapshot/restore
//!   sessions
//! - [`SectionView`]: Read-only or editable presentation of a collection
//! - [`SeedProvider`]: Initial contents when no peer can supply them
//!
//! # Example
//!
//! ```rust,ignore
//! use hazard_store::{AnalysisStore, DemoAnalysisSeed, EditSessionController, SeedProvider, VersionManager};
//!
//! let store = AnalysisStore::empty();
//! let versions = VersionManager::bootstrap(store.clone(), "Baseline", DemoAnalysisSeed.seed()?);
//! let sessions = EditSessionController::new(store.clone());
//!
//! let mut session = sessions.begin("hazards.H-1".parse()?)?;
//! store.mutate(Collection::Hazards, "H-1", FieldPatch::single("severity", json!("low")));
//! sessions.cancel(&mut session)?; // H-1 is back to its original value
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod error;
mod listeners;
mod seed;
mod session;
mod store;
mod version;
mod view;

pub use error::{SessionError, VersionError, ViewError};
pub use listeners::Subscription;
pub use seed::{DemoAnalysisSeed, EmptySeed, SeedProvider, StaticSeed};
pub use session::{EditSession, EditSessionController};
pub use store::{AnalysisStore, Change, ChangeOrigin, ReplaceReason, StoreChange};
pub use version::{ActiveVersion, VersionEvent, VersionEventKind, VersionManager};
pub use view::{
    EditableView, ReadOnlyView, RowValidator, SaveOutcome, SchemaValidator, SectionView,
    ValidationIssue,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod integration_tests {
    use super::*;
    use hazard_model::{Collection, EditScope, FieldPatch, Hazard, MutationOutcome};
    use proptest::prelude::*;
    use serde_json::json;

    fn demo() -> (AnalysisStore, VersionManager, EditSessionController) {
        let store = AnalysisStore::empty();
        let versions =
            VersionManager::bootstrap(store.clone(), "Baseline", DemoAnalysisSeed.seed().unwrap());
        let sessions = EditSessionController::new(store.clone());
        (store, versions, sessions)
    }

    #[derive(Debug, Clone)]
    enum Edit {
        Severity(usize, &'static str),
        Delete(usize),
        Title(usize, String),
    }

    fn arb_edit() -> impl Strategy<Value = Edit> {
        prop_oneof![
            (0..3usize, prop_oneof![Just("low"), Just("high"), Just("critical")])
                .prop_map(|(i, s)| Edit::Severity(i, s)),
            (0..3usize).prop_map(Edit::Delete),
            (0..3usize, "[a-z ]{0,12}").prop_map(|(i, t)| Edit::Title(i, t)),
        ]
    }

    fn run(store: &AnalysisStore, edit: &Edit) {
        let id = |i: &usize| format!("H-{}", i + 1);
        match edit {
            Edit::Severity(i, s) => {
                store.mutate(Collection::Hazards, id(i), FieldPatch::single("severity", json!(s)));
            }
            Edit::Delete(i) => {
                store.delete(Collection::Hazards, id(i));
            }
            Edit::Title(i, t) => {
                store.mutate(Collection::Hazards, id(i), FieldPatch::single("title", json!(t)));
            }
        }
    }

    proptest! {
        #[test]
        fn cancel_restores_bit_for_bit(edits in proptest::collection::vec(arb_edit(), 0..12)) {
            let (store, _versions, sessions) = demo();
            let before = store.digest().unwrap();

            let mut session = sessions.begin(EditScope::collection(Collection::Hazards)).unwrap();
            for edit in &edits {
                run(&store, edit);
            }
            sessions.cancel(&mut session).unwrap();

            prop_assert_eq!(store.digest().unwrap(), before);
        }

        #[test]
        fn switching_back_and_forth_preserves_both(edits in proptest::collection::vec(arb_edit(), 0..8)) {
            let (store, versions, _sessions) = demo();
            let v1 = versions.active_version_id();
            let v2 = versions.create_version("What-if", "", None).unwrap();
            let baseline = store.snapshot();

            versions.switch_version(&v2).unwrap();
            for edit in &edits {
                run(&store, edit);
            }
            let branch = store.snapshot();

            versions.switch_version(&v1).unwrap();
            prop_assert!(store.snapshot().same_as(&baseline));
            versions.switch_version(&v2).unwrap();
            prop_assert!(store.snapshot().same_as(&branch));
        }
    }

    #[test]
    fn demo_round_trip() {
        let (store, versions, sessions) = demo();
        let mut session = sessions
            .begin("hazards.H-1.severity".parse().unwrap())
            .unwrap();
        assert_eq!(
            store.mutate(Collection::Hazards, "H-1", FieldPatch::single("severity", json!("low"))),
            MutationOutcome::Applied
        );
        sessions.cancel(&mut session).unwrap();
        assert_eq!(
            store.typed::<Hazard>()[0].severity,
            hazard_model::Severity::Critical
        );
        assert_eq!(versions.list_versions().len(), 1);
    }
}
