//! Seed data providers
//!
//! A window that cannot obtain state from its peers starts from a seed.
//! [`DemoAnalysisSeed`] supplies a small adaptive cruise control analysis.

use hazard_model::{
    AnalysisSnapshot, CausalScenario, ControlAction, Controller, ControllerKind, Hazard, Loss,
    RecordError, Severity, Stakeholder, SystemDescription, Uca, UcaType,
};
use std::fmt::Debug;

/// Source of an initial analysis snapshot
pub trait SeedProvider: Send + Sync + Debug {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Build the initial snapshot
    ///
    /// # Errors
    /// Returns error if a seed entity cannot be encoded
    fn seed(&self) -> Result<AnalysisSnapshot, RecordError>;
}

/// Seed with no entities
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptySeed;

impl SeedProvider for EmptySeed {
    fn name(&self) -> &str {
        "empty"
    }

    fn seed(&self) -> Result<AnalysisSnapshot, RecordError> {
        Ok(AnalysisSnapshot::new())
    }
}

/// Fixed snapshot supplied by the caller
#[derive(Debug, Clone, Default)]
pub struct StaticSeed(pub AnalysisSnapshot);

impl SeedProvider for StaticSeed {
    fn name(&self) -> &str {
        "static"
    }

    fn seed(&self) -> Result<AnalysisSnapshot, RecordError> {
        Ok(self.0.clone())
    }
}

/// Demo STPA analysis of an adaptive cruise control system
#[derive(Debug, Clone, Copy, Default)]
pub struct DemoAnalysisSeed;

impl SeedProvider for DemoAnalysisSeed {
    fn name(&self) -> &str {
        "demo-acc"
    }

    fn seed(&self) -> Result<AnalysisSnapshot, RecordError> {
        AnalysisSnapshot::new()
            .with_entity(&SystemDescription {
                id: "SD-1".into(),
                title: "Adaptive Cruise Control".into(),
                purpose: "Maintain a driver-selected speed and a safe gap to the lead vehicle".into(),
                boundary: "Radar, ACC ECU, brake and throttle actuators, driver".into(),
                assumptions: vec!["Driver remains attentive".into()],
            })?
            .with_entity(&Stakeholder {
                id: "SH-1".into(),
                name: "Vehicle occupants".into(),
                role: "Users".into(),
                interests: vec!["Physical safety".into()],
            })?
            .with_entity(&Stakeholder {
                id: "SH-2".into(),
                name: "Other road users".into(),
                role: "Bystanders".into(),
                interests: vec!["Physical safety".into()],
            })?
            .with_entity(&Loss {
                id: "L-1".into(),
                title: "Loss of life or injury".into(),
                description: String::new(),
                severity: Severity::Critical,
                stakeholder_ids: vec!["SH-1".into(), "SH-2".into()],
            })?
            .with_entity(&Loss {
                id: "L-2".into(),
                title: "Damage to the vehicle".into(),
                description: String::new(),
                severity: Severity::High,
                stakeholder_ids: vec!["SH-1".into()],
            })?
            .with_entity(&Hazard {
                id: "H-1".into(),
                title: "Vehicle violates minimum separation".into(),
                description: "Gap to lead vehicle falls below the safe following distance".into(),
                severity: Severity::Critical,
                related_losses: vec!["L-1".into(), "L-2".into()],
            })?
            .with_entity(&Hazard {
                id: "H-2".into(),
                title: "Unexpected hard braking".into(),
                description: String::new(),
                severity: Severity::High,
                related_losses: vec!["L-1".into()],
            })?
            .with_entity(&Controller {
                id: "C-1".into(),
                name: "Driver".into(),
                kind: ControllerKind::Human,
                responsibilities: vec!["Set target speed".into(), "Override ACC".into()],
                parent_id: None,
            })?
            .with_entity(&Controller {
                id: "C-2".into(),
                name: "ACC ECU".into(),
                kind: ControllerKind::Software,
                responsibilities: vec!["Hold speed and gap".into()],
                parent_id: Some("C-1".into()),
            })?
            .with_entity(&ControlAction {
                id: "CA-1".into(),
                name: "Brake".into(),
                controller_id: "C-2".into(),
                controlled_process: "Brake actuator".into(),
                description: String::new(),
            })?
            .with_entity(&ControlAction {
                id: "CA-2".into(),
                name: "Accelerate".into(),
                controller_id: "C-2".into(),
                controlled_process: "Throttle".into(),
                description: String::new(),
            })?
            .with_entity(&Uca {
                id: "UCA-1".into(),
                control_action_id: "CA-1".into(),
                uca_type: UcaType::NotProvided,
                context: "Lead vehicle decelerates sharply".into(),
                hazard_ids: vec!["H-1".into()],
            })?
            .with_entity(&Uca {
                id: "UCA-2".into(),
                control_action_id: "CA-1".into(),
                uca_type: UcaType::Provided,
                context: "No obstacle ahead (radar ghost target)".into(),
                hazard_ids: vec!["H-2".into()],
            })?
            .with_entity(&Uca {
                id: "UCA-3".into(),
                control_action_id: "CA-2".into(),
                uca_type: UcaType::WrongDuration,
                context: "Acceleration continues after lead vehicle cuts in".into(),
                hazard_ids: vec!["H-1".into()],
            })?
            .with_entity(&CausalScenario {
                id: "CS-1".into(),
                uca_id: "UCA-1".into(),
                description: "Radar misclassifies a stationary vehicle as roadside clutter".into(),
                causal_factors: vec!["Sensor limitation".into(), "Filtering heuristic".into()],
                hazard_ids: vec!["H-1".into()],
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hazard_model::{dangling_references, Collection};

    #[test]
    fn demo_seed_is_consistent() {
        let snapshot = DemoAnalysisSeed.seed().unwrap();
        assert_eq!(snapshot.collection(Collection::Ucas).len(), 3);
        assert!(dangling_references(&snapshot).is_empty());
    }

    #[test]
    fn empty_seed_is_empty() {
        assert!(EmptySeed.seed().unwrap().is_empty());
    }
}
