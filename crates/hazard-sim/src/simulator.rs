//! Convergence simulator
//!
//! Drives randomized edits, edit sessions and version operations across
//! several windows sharing one in-memory bus, then checks what the
//! synchronization layer promises:
//! - Serialized delivery (every message handled before the next operation)
//!   keeps all windows identical after every step
//! - Cancelling a session restores the scope exactly
//! - A window joining late ends identical to the window that answered it
//!
//! With `interleave` set, deliveries are randomly delayed. Windows may then
//! end with different values for concurrently edited fields; that
//! last-write-wins asymmetry is counted, not treated as a violation.

use hazard_model::{
    Collection, DigestError, EditScope, FieldPatch, Loss, RecordError, ScopeValue, Severity,
    VersionId,
};
use hazard_store::DemoAnalysisSeed;
use hazard_sync::{BroadcastPort, InMemoryBus, SyncConfig, SyncError, SyncWindow};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;
use serde_json::json;
use std::fmt::Write as _;
use std::sync::Arc;

/// Simulation failure unrelated to synchronization semantics
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    Digest(#[from] DigestError),
}

/// Simulator configuration
#[derive(Debug, Clone, Serialize)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Windows attached to the analysis
    pub windows: usize,
    /// Operations to generate
    pub operations: u64,
    /// Randomly delay deliveries instead of settling after every operation
    pub interleave: bool,
    /// Deliver every message twice
    pub duplicate_delivery: bool,
    /// Round-trip every delivery through JSON
    pub wire_encoding: bool,
    /// Stop at the first violation
    pub stop_on_first_violation: bool,
    /// Window settings
    pub sync: SyncConfig,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            windows: 3,
            operations: 500,
            interleave: false,
            duplicate_delivery: false,
            wire_encoding: false,
            stop_on_first_violation: true,
            sync: SyncConfig::default(),
        }
    }
}

/// Generated operations
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum SimulatedOperation {
    /// Set one field of an existing entity
    EditField {
        window: usize,
        collection: Collection,
        entity: String,
        field: String,
        value: String,
    },
    /// Create a loss (or overwrite it with the same contents)
    AddLoss { window: usize, id: String },
    /// Delete a loss, leaving references to it dangling
    DeleteLoss { window: usize, id: String },
    /// Begin a session on a hazard, edit it, cancel
    CancelledEdit { window: usize, entity: String },
    /// Branch from the active version
    CreateVersion { window: usize },
    /// Switch the active version
    SwitchVersion { window: usize, version: VersionId },
    /// Delete a version (refused for active or parent versions)
    DeleteVersion { window: usize, version: VersionId },
    /// Handle one window's queued messages (interleaved mode only)
    Deliver { window: usize },
}

/// A violation detected during simulation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Violation {
    /// Cancel left the scope different from its value at session start
    CancelNotRestored { window: usize, entity: String },
    /// Windows hold different contents after serialized delivery
    Diverged { operation: u64, digests: Vec<String> },
    /// Windows disagree on the version list or the active version
    VersionsDiverged { operation: u64 },
    /// A window that joined by full sync differs from its responder
    JoinMismatch { responder: String, joiner: String },
}

/// Statistics for simulation
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimulatorStats {
    pub operations: u64,
    pub edits: u64,
    pub losses_added: u64,
    pub losses_deleted: u64,
    pub sessions_cancelled: u64,
    pub versions_created: u64,
    pub switches: u64,
    pub version_deletions: u64,
    pub deletions_refused: u64,
    pub deliveries: u64,
    pub messages_published: u64,
    pub messages_delivered: u64,
    /// Windows ending with different contents than window 0 (interleaved mode)
    pub accepted_asymmetries: u64,
}

/// Final report from simulator
#[derive(Debug, Clone, Serialize)]
pub struct SimulatorReport {
    pub config: SimulatorConfig,
    pub stats: SimulatorStats,
    pub violations: Vec<Violation>,
    pub final_digests: Vec<String>,
}

impl SimulatorReport {
    /// Check if simulation passed all criteria
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Check if every window ended with identical contents
    #[must_use]
    pub fn converged(&self) -> bool {
        self.final_digests.windows(2).all(|pair| pair[0] == pair[1])
    }

    /// Render as JSON
    ///
    /// # Errors
    /// Returns error if serialization fails
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Generate text report
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut report = String::new();
        let mode = if self.config.interleave { "interleaved" } else { "serialized" };

        let _ = writeln!(report, "=== Window Sync Simulator Report ===\n");
        let _ = writeln!(report, "Seed: {}", self.config.seed);
        let _ = writeln!(report, "Windows: {}", self.config.windows);
        let _ = writeln!(report, "Delivery: {mode}{}", if self.config.duplicate_delivery { ", duplicated" } else { "" });
        let _ = writeln!(report, "Operations: {}", self.stats.operations);
        let _ = writeln!(report, "  Field edits: {}", self.stats.edits);
        let _ = writeln!(report, "  Losses added/deleted: {}/{}", self.stats.losses_added, self.stats.losses_deleted);
        let _ = writeln!(report, "  Sessions cancelled: {}", self.stats.sessions_cancelled);
        let _ = writeln!(report, "  Versions created: {}", self.stats.versions_created);
        let _ = writeln!(report, "  Switches: {}", self.stats.switches);
        let _ = writeln!(
            report,
            "  Version deletions: {} ({} refused)",
            self.stats.version_deletions, self.stats.deletions_refused
        );
        let _ = writeln!(
            report,
            "Messages: {} published, {} delivered, {} handled",
            self.stats.messages_published, self.stats.messages_delivered, self.stats.deliveries
        );
        let _ = writeln!(report, "Converged: {}", if self.converged() { "yes" } else { "no" });
        if self.config.interleave {
            let _ = writeln!(report, "Accepted LWW asymmetries: {}", self.stats.accepted_asymmetries);
        }
        for (i, digest) in self.final_digests.iter().enumerate() {
            let _ = writeln!(report, "  window {i}: {}", &digest[..digest.len().min(16)]);
        }
        let _ = writeln!(report, "Violations: {}", self.violations.len());

        if !self.violations.is_empty() {
            report.push_str("\n=== Violations ===\n");
            for (i, v) in self.violations.iter().enumerate() {
                let _ = writeln!(report, "{}. {v:?}", i + 1);
            }
        }

        let _ = writeln!(report, "\n=== Result: {} ===", if self.passed() { "PASS" } else { "FAIL" });
        report
    }
}

/// Run the simulator
///
/// # Errors
/// Returns error if a window cannot be seeded or a snapshot cannot be
/// digested
pub fn run_simulator(config: SimulatorConfig) -> Result<SimulatorReport, SimulationError> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let bus = Arc::new(
        InMemoryBus::new(config.sync.channel_name("simulation"))
            .with_duplicate_delivery(config.duplicate_delivery)
            .with_wire_encoding(config.wire_encoding),
    );

    let mut windows = Vec::with_capacity(config.windows.max(1));
    for _ in 0..config.windows.max(1) {
        let port: Arc<dyn BroadcastPort> = bus.clone();
        let window = SyncWindow::new(port, config.sync.clone());
        window.start_primary(&DemoAnalysisSeed)?;
        windows.push(window);
    }
    tracing::info!(
        seed = config.seed,
        windows = windows.len(),
        operations = config.operations,
        interleave = config.interleave,
        "simulation started"
    );

    let mut stats = SimulatorStats::default();
    let mut violations = Vec::new();

    for n in 0..config.operations {
        let operation = generate_operation(&mut rng, &windows, config.interleave);
        tracing::debug!(?operation, "operation");
        stats.operations += 1;

        if let Some(violation) = execute_operation(&operation, &windows, &mut stats)? {
            violations.push(violation);
            if config.stop_on_first_violation {
                break;
            }
        }

        if !config.interleave {
            stats.deliveries += settle(&windows);
            if let Some(violation) = check_converged(n, &windows)? {
                violations.push(violation);
                if config.stop_on_first_violation {
                    break;
                }
            }
        }
    }

    stats.deliveries += settle(&windows);
    let digests = digests(&windows)?;
    if config.interleave {
        stats.accepted_asymmetries = digests.iter().skip(1).filter(|d| **d != digests[0]).count() as u64;
        if stats.accepted_asymmetries > 0 {
            tracing::info!(
                windows = stats.accepted_asymmetries,
                "windows differ after concurrent edits (last write wins)"
            );
        }
    }

    if let Some(violation) = check_late_join(&bus, &mut windows, &config.sync, &mut stats)? {
        violations.push(violation);
    }

    let bus_stats = bus.stats();
    stats.messages_published = bus_stats.published;
    stats.messages_delivered = bus_stats.delivered;
    tracing::info!(violations = violations.len(), "simulation finished");

    Ok(SimulatorReport {
        config,
        stats,
        violations,
        final_digests: digests,
    })
}

const FIELDS: [(Collection, &str); 6] = [
    (Collection::Hazards, "title"),
    (Collection::Hazards, "description"),
    (Collection::Losses, "title"),
    (Collection::Losses, "description"),
    (Collection::Ucas, "context"),
    (Collection::Controllers, "name"),
];

/// Generate a random operation against the state `windows` hold
fn generate_operation(rng: &mut StdRng, windows: &[Arc<SyncWindow>], interleave: bool) -> SimulatedOperation {
    let window = rng.gen_range(0..windows.len());
    let target = &windows[window];

    if interleave && rng.gen_bool(0.3) {
        return SimulatedOperation::Deliver { window };
    }

    match rng.gen_range(0..20) {
        0..=8 => {
            let (collection, field) = FIELDS[rng.gen_range(0..FIELDS.len())];
            let entities = target.store().entities(collection);
            if entities.is_empty() {
                return SimulatedOperation::AddLoss {
                    window,
                    id: format!("L-S{}", rng.gen_range(0..20)),
                };
            }
            let (id, _) = &entities[rng.gen_range(0..entities.len())];
            SimulatedOperation::EditField {
                window,
                collection,
                entity: id.to_string(),
                field: field.to_string(),
                value: format!("{field}-{}", rng.gen_range(0..1000)),
            }
        }
        9..=10 => SimulatedOperation::AddLoss {
            window,
            id: format!("L-S{}", rng.gen_range(0..20)),
        },
        11..=12 => {
            let losses = target.store().entities(Collection::Losses);
            if losses.is_empty() {
                return SimulatedOperation::CreateVersion { window };
            }
            let (id, _) = &losses[rng.gen_range(0..losses.len())];
            SimulatedOperation::DeleteLoss {
                window,
                id: id.to_string(),
            }
        }
        13..=14 => {
            let hazards = target.store().entities(Collection::Hazards);
            if hazards.is_empty() {
                return SimulatedOperation::CreateVersion { window };
            }
            let (id, _) = &hazards[rng.gen_range(0..hazards.len())];
            SimulatedOperation::CancelledEdit {
                window,
                entity: id.to_string(),
            }
        }
        15 => SimulatedOperation::CreateVersion { window },
        16..=18 => {
            let versions = target.versions().list_versions();
            let version = versions[rng.gen_range(0..versions.len())].id.clone();
            SimulatedOperation::SwitchVersion { window, version }
        }
        _ => {
            let versions = target.versions().list_versions();
            let version = versions[rng.gen_range(0..versions.len())].id.clone();
            SimulatedOperation::DeleteVersion { window, version }
        }
    }
}

/// Execute an operation, reporting a violation it exposes directly
fn execute_operation(
    operation: &SimulatedOperation,
    windows: &[Arc<SyncWindow>],
    stats: &mut SimulatorStats,
) -> Result<Option<Violation>, SimulationError> {
    match operation {
        SimulatedOperation::EditField {
            window,
            collection,
            entity,
            field,
            value,
        } => {
            windows[*window].store().mutate(
                *collection,
                entity.as_str(),
                FieldPatch::single(field.as_str(), json!(value)),
            );
            stats.edits += 1;
        }
        SimulatedOperation::AddLoss { window, id } => {
            let loss = Loss {
                id: id.as_str().into(),
                title: "Simulated loss".to_string(),
                description: String::new(),
                severity: Severity::Medium,
                stakeholder_ids: vec![],
            };
            windows[*window].store().insert(&loss)?;
            stats.losses_added += 1;
        }
        SimulatedOperation::DeleteLoss { window, id } => {
            windows[*window].store().delete(Collection::Losses, id.as_str());
            stats.losses_deleted += 1;
        }
        SimulatedOperation::CancelledEdit { window, entity } => {
            return Ok(cancelled_edit(*window, &windows[*window], entity, stats));
        }
        SimulatedOperation::CreateVersion { window } => {
            let versions = windows[*window].versions();
            let label = format!("sim-{}", versions.len());
            if versions.create_version(&label, "simulated branch", None).is_ok() {
                stats.versions_created += 1;
            }
        }
        SimulatedOperation::SwitchVersion { window, version } => {
            if windows[*window].versions().switch_version(version).is_ok() {
                stats.switches += 1;
            }
        }
        SimulatedOperation::DeleteVersion { window, version } => {
            match windows[*window].versions().delete_version(version) {
                Ok(()) => stats.version_deletions += 1,
                Err(_) => stats.deletions_refused += 1,
            }
        }
        SimulatedOperation::Deliver { window } => {
            stats.deliveries += windows[*window].pump() as u64;
        }
    }
    Ok(None)
}

fn cancelled_edit(
    index: usize,
    window: &SyncWindow,
    entity: &str,
    stats: &mut SimulatorStats,
) -> Option<Violation> {
    let scope = EditScope::entity(Collection::Hazards, entity);
    let before = window.store().read(|snapshot| ScopeValue::capture(snapshot, &scope));

    let mut session = match window.sessions().begin(scope.clone()) {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!(window = index, error = %e, "could not begin session");
            return None;
        }
    };
    window.store().mutate(
        Collection::Hazards,
        entity,
        FieldPatch::single("description", json!("scratch edit")),
    );
    if let Err(e) = window.sessions().cancel(&mut session) {
        tracing::warn!(window = index, error = %e, "cancel failed");
    }
    stats.sessions_cancelled += 1;

    let after = window.store().read(|snapshot| ScopeValue::capture(snapshot, &scope));
    (before != after).then(|| Violation::CancelNotRestored {
        window: index,
        entity: entity.to_string(),
    })
}

/// Pump every window until no messages remain
fn settle(windows: &[Arc<SyncWindow>]) -> u64 {
    let mut total = 0;
    loop {
        let handled: usize = windows.iter().map(|w| w.pump()).sum();
        if handled == 0 {
            return total;
        }
        total += handled as u64;
    }
}

fn digests(windows: &[Arc<SyncWindow>]) -> Result<Vec<String>, DigestError> {
    windows
        .iter()
        .map(|w| w.store().digest().map(|d| d.to_string()))
        .collect()
}

fn check_converged(operation: u64, windows: &[Arc<SyncWindow>]) -> Result<Option<Violation>, SimulationError> {
    let digests = digests(windows)?;
    if digests.windows(2).any(|pair| pair[0] != pair[1]) {
        return Ok(Some(Violation::Diverged { operation, digests }));
    }

    let reference = &windows[0];
    let listing = |w: &SyncWindow| -> Vec<VersionId> {
        w.versions().list_versions().into_iter().map(|v| v.id).collect()
    };
    let versions = listing(reference);
    let active = reference.versions().active_version_id();
    let agree = windows
        .iter()
        .all(|w| w.versions().active_version_id() == active && listing(w) == versions);
    Ok((!agree).then_some(Violation::VersionsDiverged { operation }))
}

/// Attach one more window by full sync and compare it with its responder
fn check_late_join(
    bus: &Arc<InMemoryBus>,
    windows: &mut Vec<Arc<SyncWindow>>,
    sync: &SyncConfig,
    stats: &mut SimulatorStats,
) -> Result<Option<Violation>, SimulationError> {
    let port: Arc<dyn BroadcastPort> = bus.clone();
    let joiner = SyncWindow::new(port, sync.clone());
    joiner.request_full_sync()?;

    // Window 0 is pumped first, so its answer is the one installed.
    let responder = Arc::clone(&windows[0]);
    windows.push(Arc::clone(&joiner));
    stats.deliveries += settle(windows);
    windows.pop();
    joiner.close();

    let expected = responder.store().digest()?.to_string();
    let actual = joiner.store().digest()?.to_string();
    let same_version = responder.versions().active_version_id() == joiner.versions().active_version_id();
    if joiner.is_ready() && expected == actual && same_version {
        return Ok(None);
    }
    Ok(Some(Violation::JoinMismatch {
        responder: expected,
        joiner: actual,
    }))
}
