//! End-to-end synchronization scenarios across windows on one bus

use hazard_model::{Collection, EditScope, FieldPatch, Hazard, Loss, Severity, Uca, VersionId};
use hazard_store::DemoAnalysisSeed;
use hazard_sync::{
    BootstrapOutcome, BroadcastPort, InMemoryBus, InProcessLauncher, StandaloneWindowManager,
    SyncConfig, SyncWindow, WindowOptions, WindowTarget,
};
use hazard_test_utils::{assert_converged, hazard, loss, quick_config, uca, Cluster};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

#[test]
fn created_loss_reaches_open_window() {
    let cluster = Cluster::seeded(2);
    let (a, b) = (cluster.window(0), cluster.window(1));

    let mut l1 = loss("L-9", "Loss of mission");
    l1.severity = Severity::High;
    a.store().insert(&l1).unwrap();
    cluster.settle();

    let seen: Vec<Loss> = b.store().typed();
    let found = seen.iter().find(|l| l.id.as_str() == "L-9").unwrap();
    assert_eq!(found.severity, Severity::High);
    assert_converged(&cluster);
}

#[test]
fn cancelled_session_restores_every_window() {
    let cluster = Cluster::seeded(2);
    let (a, b) = (cluster.window(0), cluster.window(1));
    a.store()
        .insert(&hazard("H-3", "Loss of braking authority", &["L-1"]))
        .unwrap();
    cluster.settle();
    let before = b.store().get(Collection::Hazards, "H-3").unwrap();

    let mut session = a
        .sessions()
        .begin(EditScope::entity(Collection::Hazards, "H-3"))
        .unwrap();
    a.store().mutate(
        Collection::Hazards,
        "H-3",
        FieldPatch::single("description", json!("brakes fade on long descents")),
    );
    cluster.settle();
    assert_eq!(
        b.store().get(Collection::Hazards, "H-3").unwrap().get_str("description"),
        Some("brakes fade on long descents")
    );

    a.sessions().cancel(&mut session).unwrap();
    cluster.settle();

    assert_eq!(a.store().get(Collection::Hazards, "H-3").unwrap(), before);
    assert_eq!(b.store().get(Collection::Hazards, "H-3").unwrap(), before);
    assert_converged(&cluster);
}

#[test]
fn branch_edits_leave_parent_untouched() {
    let cluster = Cluster::seeded(2);
    let a = cluster.window(0);
    let v1 = VersionId::new("v1");
    let parent_before = a.versions().version(&v1).unwrap().snapshot;

    let v2 = a.versions().create_version("v2", "branch", Some(&v1)).unwrap();
    a.versions().switch_version(&v2).unwrap();
    a.store().mutate(
        Collection::Hazards,
        "H-1",
        FieldPatch::single("title", json!("only on the branch")),
    );
    cluster.settle();

    for window in &cluster.windows {
        assert_eq!(window.versions().active_version_id(), v2);
        let parent = window.versions().version(&v1).unwrap();
        assert!(parent.snapshot.same_as(&parent_before));
        assert_eq!(parent.snapshot.typed::<Hazard>()[0].title, parent_before.typed::<Hazard>()[0].title);
    }
    assert_converged(&cluster);
}

#[test]
fn joining_window_matches_active_version() {
    let mut cluster = Cluster::seeded(1);
    let a = Arc::clone(&cluster.windows[0]);
    let v2 = a.versions().create_version("v2", "", None).unwrap();
    a.versions().switch_version(&v2).unwrap();
    a.store().delete(Collection::CausalScenarios, "CS-1");

    let joined = cluster.join();

    assert!(joined.is_ready());
    assert!(!joined.store().snapshot().is_empty());
    assert_eq!(joined.versions().active_version_id(), v2);
    assert_eq!(joined.versions().len(), 2);
    assert!(joined.store().snapshot().same_as(&a.store().snapshot()));
}

#[test]
fn joining_window_keeps_edits_newer_than_its_buffer() {
    let mut cluster = Cluster::seeded(2);

    // The newcomer is attached but has not asked for state yet.
    let port: Arc<dyn BroadcastPort> = cluster.bus.clone();
    let newcomer = SyncWindow::new(port, quick_config());
    cluster.windows.push(Arc::clone(&newcomer));

    let (a, c) = (Arc::clone(&cluster.windows[0]), Arc::clone(&cluster.windows[1]));
    c.store()
        .mutate(Collection::Hazards, "H-1", FieldPatch::single("title", json!("from C")));
    cluster.settle();
    a.store()
        .mutate(Collection::Hazards, "H-1", FieldPatch::single("title", json!("from A later")));
    cluster.settle();
    assert_eq!(newcomer.buffered(), 2);

    newcomer.request_full_sync().unwrap();
    cluster.settle();

    assert!(newcomer.is_ready());
    for i in 0..3 {
        assert_eq!(cluster.window(i).store().typed::<Hazard>()[0].title, "from A later");
    }
    assert_converged(&cluster);
}

#[test]
fn switch_overtaking_its_creation_is_followed() {
    let mut cluster = Cluster::seeded(2);
    let v2 = cluster.window(0).versions().create_version("v2", "", None).unwrap();

    // Attached after the creation went out, so C only ever sees B's switch.
    let port: Arc<dyn BroadcastPort> = cluster.bus.clone();
    let c = SyncWindow::new(port, quick_config());
    c.start_primary(&DemoAnalysisSeed).unwrap();
    cluster.windows.push(Arc::clone(&c));
    cluster.settle();

    cluster.window(1).versions().switch_version(&v2).unwrap();
    cluster.settle();

    for window in &cluster.windows {
        assert_eq!(window.versions().active_version_id(), v2);
        assert_eq!(window.versions().len(), 2);
    }
    assert_eq!(c.versions().version(&v2).unwrap().label, "v2");
    assert_converged(&cluster);
}

#[test]
fn window_not_following_switches_keeps_its_version() {
    let bus = Arc::new(InMemoryBus::new("pinned"));
    let port: Arc<dyn BroadcastPort> = bus.clone();
    let leader = SyncWindow::new(Arc::clone(&port), quick_config());
    let pinned = SyncWindow::new(port, quick_config().with_follow_remote_switches(false));
    leader.start_primary(&DemoAnalysisSeed).unwrap();
    pinned.start_primary(&DemoAnalysisSeed).unwrap();
    let v1 = VersionId::new("v1");

    let v2 = leader.versions().create_version("v2", "", None).unwrap();
    leader.versions().switch_version(&v2).unwrap();
    leader
        .store()
        .mutate(Collection::Hazards, "H-1", FieldPatch::single("title", json!("leader on v2")));
    pinned.pump();

    assert_eq!(pinned.versions().active_version_id(), v1);
    assert_ne!(pinned.store().typed::<Hazard>()[0].title, "leader on v2");
    let stored = pinned.versions().version(&v2).unwrap().snapshot;
    assert!(stored.same_as(&leader.store().snapshot()));

    // A switch to the version the pinned window shows lands in its store.
    leader.versions().switch_version(&v1).unwrap();
    pinned.pump();
    assert_eq!(pinned.versions().active_version_id(), v1);
    assert!(pinned.store().snapshot().same_as(&leader.store().snapshot()));
}

#[tokio::test]
async fn standalone_window_is_synced_before_use() {
    let launcher = InProcessLauncher::new(SyncConfig::default(), Arc::new(DemoAnalysisSeed));
    let manager = StandaloneWindowManager::new("acc", Arc::new(launcher));
    let main = manager.open(WindowTarget::Main, WindowOptions::default()).await.unwrap();
    main.window.store().delete(Collection::Hazards, "H-2");

    let popup = manager
        .open(WindowTarget::Section(Collection::Ucas), WindowOptions::default())
        .await
        .unwrap();

    assert_eq!(popup.outcome, BootstrapOutcome::Synced { from: main.id });
    assert!(!popup.window.store().contains(Collection::Hazards, "H-2"));
    assert!(popup.window.store().snapshot().same_as(&main.window.store().snapshot()));
    manager.close_all().await;
}

#[test]
fn concurrent_field_edits_resolve_by_receipt_order() {
    let cluster = Cluster::seeded(2);
    let (a, b) = (cluster.window(0), cluster.window(1));
    a.store().insert(&uca("UCA-7", "CA-1", &["H-1"])).unwrap();
    cluster.settle();

    // Both edit before either receives the other's update.
    a.store()
        .mutate(Collection::Ucas, "UCA-7", FieldPatch::single("context", json!("from A")));
    b.store()
        .mutate(Collection::Ucas, "UCA-7", FieldPatch::single("context", json!("from B")));
    cluster.settle();

    let context = |w: &SyncWindow| {
        w.store()
            .typed::<Uca>()
            .into_iter()
            .find(|u| u.id.as_str() == "UCA-7")
            .map(|u| u.context)
    };
    // Each window applied the other's broadcast last.
    assert_eq!(context(a).as_deref(), Some("from B"));
    assert_eq!(context(b).as_deref(), Some("from A"));
    assert!(!cluster.converged());

    // A later serialized edit brings them back together.
    a.store()
        .mutate(Collection::Ucas, "UCA-7", FieldPatch::single("context", json!("agreed")));
    cluster.settle();
    assert_eq!(context(b).as_deref(), Some("agreed"));
    assert_converged(&cluster);
}

#[test]
fn duplicate_delivery_is_harmless() {
    let cluster = Cluster::on_bus(InMemoryBus::new("dup").with_duplicate_delivery(true), 3);
    let a = cluster.window(0);

    a.store().insert(&loss("L-7", "Reputation")).unwrap();
    a.store().mutate(
        Collection::Losses,
        "L-7",
        FieldPatch::single("description", json!("press coverage")),
    );
    let v2 = a.versions().create_version("What-if", "", None).unwrap();
    a.versions().switch_version(&v2).unwrap();
    a.store().delete(Collection::Losses, "L-7");
    cluster.settle();

    assert_converged(&cluster);
    for window in &cluster.windows {
        assert_eq!(window.versions().len(), 2);
        assert!(!window.store().contains(Collection::Losses, "L-7"));
    }
}

#[test]
fn late_update_lands_in_inactive_version() {
    let cluster = Cluster::seeded(2);
    let (a, b) = (cluster.window(0), cluster.window(1));
    let v1 = VersionId::new("v1");
    let v2 = b.versions().create_version("v2", "", None).unwrap();
    cluster.settle();

    // A edits v1 while B's switch to v2 is still in flight.
    b.versions().switch_version(&v2).unwrap();
    a.store().mutate(
        Collection::Hazards,
        "H-2",
        FieldPatch::single("title", json!("late edit")),
    );
    cluster.settle();

    let stored = b.versions().version(&v1).unwrap().snapshot;
    let h2 = stored.get(Collection::Hazards, "H-2").unwrap();
    assert_eq!(h2.get_str("title"), Some("late edit"));
}
