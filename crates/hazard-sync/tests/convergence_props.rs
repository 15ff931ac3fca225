//! Property tests: serialized edits from any window converge everywhere

use hazard_model::{Collection, EditScope, FieldPatch, VersionId};
use hazard_sync::{InMemoryBus, SyncWindow};
use hazard_test_utils::{assert_converged, loss, Cluster};
use proptest::prelude::*;
use serde_json::json;

#[derive(Debug, Clone)]
enum Op {
    Retitle { window: usize, hazard: usize, title: String },
    AddLoss { window: usize, n: u8 },
    DeleteLoss { window: usize, n: u8 },
    Branch { window: usize },
    Switch { window: usize, pick: usize },
    CancelledEdit { window: usize, hazard: usize },
}

const HAZARDS: [&str; 2] = ["H-1", "H-2"];

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..3usize, 0..2usize, "[a-z]{1,8}")
            .prop_map(|(window, hazard, title)| Op::Retitle { window, hazard, title }),
        (0..3usize, 0..4u8).prop_map(|(window, n)| Op::AddLoss { window, n }),
        (0..3usize, 0..4u8).prop_map(|(window, n)| Op::DeleteLoss { window, n }),
        (0..3usize).prop_map(|window| Op::Branch { window }),
        (0..3usize, 0..8usize).prop_map(|(window, pick)| Op::Switch { window, pick }),
        (0..3usize, 0..2usize).prop_map(|(window, hazard)| Op::CancelledEdit { window, hazard }),
    ]
}

fn run(window: &SyncWindow, op: &Op) {
    match op {
        Op::Retitle { hazard, title, .. } => {
            window.store().mutate(
                Collection::Hazards,
                HAZARDS[*hazard],
                FieldPatch::single("title", json!(title)),
            );
        }
        Op::AddLoss { n, .. } => {
            window.store().insert(&loss(&format!("L-X{n}"), "added")).unwrap();
        }
        Op::DeleteLoss { n, .. } => {
            window.store().delete(Collection::Losses, format!("L-X{n}"));
        }
        Op::Branch { .. } => {
            window.versions().create_version("branch", "", None).unwrap();
        }
        Op::Switch { pick, .. } => {
            let versions = window.versions().list_versions();
            let target: VersionId = versions[pick % versions.len()].id.clone();
            window.versions().switch_version(&target).unwrap();
        }
        Op::CancelledEdit { hazard, .. } => {
            let mut session = window
                .sessions()
                .begin(EditScope::entity(Collection::Hazards, HAZARDS[*hazard]))
                .unwrap();
            window.store().mutate(
                Collection::Hazards,
                HAZARDS[*hazard],
                FieldPatch::single("description", json!("scratch")),
            );
            window.sessions().cancel(&mut session).unwrap();
        }
    }
}

fn window_of(op: &Op) -> usize {
    match op {
        Op::Retitle { window, .. }
        | Op::AddLoss { window, .. }
        | Op::DeleteLoss { window, .. }
        | Op::Branch { window }
        | Op::Switch { window, .. }
        | Op::CancelledEdit { window, .. } => *window,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn serialized_operations_converge(ops in prop::collection::vec(op(), 1..30)) {
        let cluster = Cluster::seeded(3);
        for op in &ops {
            run(cluster.window(window_of(op)), op);
            cluster.settle();
        }
        assert_converged(&cluster);

        let active = cluster.window(0).versions().active_version_id();
        let listed: Vec<VersionId> =
            cluster.window(0).versions().list_versions().into_iter().map(|v| v.id).collect();
        for window in &cluster.windows {
            prop_assert_eq!(window.versions().active_version_id(), active.clone());
            let ids: Vec<VersionId> =
                window.versions().list_versions().into_iter().map(|v| v.id).collect();
            prop_assert_eq!(ids, listed.clone());
        }
    }

    #[test]
    fn duplicate_delivery_converges(ops in prop::collection::vec(op(), 1..20)) {
        let cluster = Cluster::on_bus(InMemoryBus::new("dup").with_duplicate_delivery(true), 3);
        for op in &ops {
            run(cluster.window(window_of(op)), op);
            cluster.settle();
        }
        assert_converged(&cluster);
    }

    #[test]
    fn wire_encoding_converges(ops in prop::collection::vec(op(), 1..20)) {
        let cluster = Cluster::on_bus(InMemoryBus::new("wire").with_wire_encoding(true), 2);
        for op in &ops {
            run(cluster.window(window_of(op) % 2), op);
            cluster.settle();
        }
        assert_converged(&cluster);
    }
}
