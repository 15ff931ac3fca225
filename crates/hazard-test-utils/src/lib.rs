//! Testing utilities for the hazard analysis workspace
//!
//! Shared test helpers, fixtures, and assertions.

#![allow(missing_docs)]

use hazard_model::{
    AnalysisSnapshot, ControlAction, Controller, ControllerKind, EntityId, Hazard, Loss, Severity,
    SnapshotDigest, Uca, UcaType,
};
use hazard_store::{DemoAnalysisSeed, SeedProvider};
use hazard_sync::{BroadcastPort, InMemoryBus, RetryPolicy, SyncConfig, SyncWindow};
use std::sync::Arc;

pub fn loss(id: &str, title: &str) -> Loss {
    Loss {
        id: id.into(),
        title: title.to_string(),
        description: String::new(),
        severity: Severity::High,
        stakeholder_ids: vec![],
    }
}

pub fn hazard(id: &str, title: &str, losses: &[&str]) -> Hazard {
    Hazard {
        id: id.into(),
        title: title.to_string(),
        description: String::new(),
        severity: Severity::Medium,
        related_losses: losses.iter().map(|l| EntityId::from(*l)).collect(),
    }
}

pub fn controller(id: &str, name: &str) -> Controller {
    Controller {
        id: id.into(),
        name: name.to_string(),
        kind: ControllerKind::default(),
        responsibilities: vec![],
        parent_id: None,
    }
}

pub fn control_action(id: &str, controller_id: &str) -> ControlAction {
    ControlAction {
        id: id.into(),
        name: format!("action {id}"),
        controller_id: controller_id.into(),
        controlled_process: String::new(),
        description: String::new(),
    }
}

pub fn uca(id: &str, control_action_id: &str, hazards: &[&str]) -> Uca {
    Uca {
        id: id.into(),
        control_action_id: control_action_id.into(),
        uca_type: UcaType::Provided,
        context: String::new(),
        hazard_ids: hazards.iter().map(|h| EntityId::from(*h)).collect(),
    }
}

/// Two losses, two hazards, one controller with one action and one UCA
pub fn small_snapshot() -> AnalysisSnapshot {
    let mut snapshot = AnalysisSnapshot::new();
    snapshot.insert_entity(&loss("L-1", "Loss of life")).unwrap();
    snapshot.insert_entity(&loss("L-2", "Loss of vehicle")).unwrap();
    snapshot.insert_entity(&hazard("H-1", "Insufficient separation", &["L-1", "L-2"])).unwrap();
    snapshot.insert_entity(&hazard("H-2", "Unintended acceleration", &["L-1"])).unwrap();
    snapshot.insert_entity(&controller("C-1", "Cruise controller")).unwrap();
    snapshot.insert_entity(&control_action("CA-1", "C-1")).unwrap();
    snapshot.insert_entity(&uca("UCA-1", "CA-1", &["H-1"])).unwrap();
    snapshot
}

pub fn demo_snapshot() -> AnalysisSnapshot {
    DemoAnalysisSeed.seed().unwrap()
}

/// Config with short full-sync waits
pub fn quick_config() -> SyncConfig {
    SyncConfig::default().with_full_sync(RetryPolicy {
        max_attempts: 2,
        initial_backoff_ms: 5,
        max_backoff_ms: 10,
        multiplier: 2.0,
    })
}

/// Windows of one analysis on a shared in-memory bus, driven by pumping
pub struct Cluster {
    pub bus: Arc<InMemoryBus>,
    pub windows: Vec<Arc<SyncWindow>>,
}

impl Cluster {
    /// `count` windows, each started from the demo seed
    pub fn seeded(count: usize) -> Self {
        Self::on_bus(InMemoryBus::new("test:acc"), count)
    }

    /// `count` seeded windows on `bus`
    pub fn on_bus(bus: InMemoryBus, count: usize) -> Self {
        let bus = Arc::new(bus);
        let windows = (0..count)
            .map(|_| {
                let port: Arc<dyn BroadcastPort> = bus.clone();
                let window = SyncWindow::new(port, quick_config());
                window.start_primary(&DemoAnalysisSeed).unwrap();
                window
            })
            .collect();
        Self { bus, windows }
    }

    /// Add a window that joins by full sync, pumping until it is ready
    pub fn join(&mut self) -> Arc<SyncWindow> {
        let port: Arc<dyn BroadcastPort> = self.bus.clone();
        let window = SyncWindow::new(port, quick_config());
        window.request_full_sync().unwrap();
        self.windows.push(Arc::clone(&window));
        self.settle();
        window
    }

    pub fn window(&self, index: usize) -> &SyncWindow {
        &self.windows[index]
    }

    /// Pump every window until no messages remain
    pub fn settle(&self) -> usize {
        let mut total = 0;
        loop {
            let handled: usize = self.windows.iter().map(|w| w.pump()).sum();
            if handled == 0 {
                return total;
            }
            total += handled;
        }
    }

    pub fn digests(&self) -> Vec<SnapshotDigest> {
        self.windows.iter().map(|w| w.store().digest().unwrap()).collect()
    }

    pub fn converged(&self) -> bool {
        let digests = self.digests();
        digests.windows(2).all(|pair| pair[0] == pair[1])
    }
}

#[track_caller]
pub fn assert_converged(cluster: &Cluster) {
    let digests = cluster.digests();
    assert!(
        cluster.converged(),
        "windows diverged: {:?}",
        digests.iter().map(SnapshotDigest::short).collect::<Vec<_>>()
    );
}
