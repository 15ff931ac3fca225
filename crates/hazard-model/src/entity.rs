//! Entity collections and their typed records
//!
//! Defines the [`Collection`] enumeration and the sealed [`Entity`] trait
//! implemented by each typed record (losses, hazards, UCAs, ...). The store
//! itself works on untyped [`Record`]s; typed entities are what rendering
//! and validation code decode them into.

use crate::ids::EntityId;
use crate::record::{Record, RecordError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug, Display, Formatter};
use std::str::FromStr;

/// Named set of analysis records
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Collection {
    /// System description (usually a single record)
    SystemDescription,
    /// Stakeholders
    Stakeholders,
    /// Losses
    Losses,
    /// Hazards
    Hazards,
    /// Controllers in the control structure
    Controllers,
    /// Control actions issued by controllers
    ControlActions,
    /// Unsafe control actions
    Ucas,
    /// Causal scenarios
    CausalScenarios,
}

impl Collection {
    /// Every collection, in snapshot order
    pub const ALL: [Collection; 8] = [
        Collection::SystemDescription,
        Collection::Stakeholders,
        Collection::Losses,
        Collection::Hazards,
        Collection::Controllers,
        Collection::ControlActions,
        Collection::Ucas,
        Collection::CausalScenarios,
    ];

    /// Wire/scope name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Collection::SystemDescription => "systemDescription",
            Collection::Stakeholders => "stakeholders",
            Collection::Losses => "losses",
            Collection::Hazards => "hazards",
            Collection::Controllers => "controllers",
            Collection::ControlActions => "controlActions",
            Collection::Ucas => "ucas",
            Collection::CausalScenarios => "causalScenarios",
        }
    }

    /// Cross-reference fields and the collection each one points into
    #[must_use]
    pub const fn reference_fields(&self) -> &'static [(&'static str, Collection)] {
        match self {
            Collection::SystemDescription | Collection::Stakeholders => &[],
            Collection::Losses => &[("stakeholderIds", Collection::Stakeholders)],
            Collection::Hazards => &[("relatedLosses", Collection::Losses)],
            Collection::Controllers => &[("parentId", Collection::Controllers)],
            Collection::ControlActions => &[("controllerId", Collection::Controllers)],
            Collection::Ucas => &[
                ("controlActionId", Collection::ControlActions),
                ("hazardIds", Collection::Hazards),
            ],
            Collection::CausalScenarios => &[
                ("ucaId", Collection::Ucas),
                ("hazardIds", Collection::Hazards),
            ],
        }
    }
}

impl Display for Collection {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = UnknownCollection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Collection::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| UnknownCollection(s.to_string()))
    }
}

/// Collection name did not match any known collection
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown collection: {0}")]
pub struct UnknownCollection(pub String);

/// Sealed trait support
#[doc(hidden)]
pub mod private {
    /// Sealed trait marker
    pub trait Sealed {}
}

/// Typed analysis entity
///
/// This trait is **sealed**: the set of collections is fixed.
pub trait Entity:
    Serialize + DeserializeOwned + Debug + Clone + PartialEq + Send + Sync + 'static + private::Sealed
{
    /// Collection this entity lives in
    const COLLECTION: Collection;

    /// Stable identifier
    fn id(&self) -> &EntityId;

    /// Encode into an untyped record
    ///
    /// # Errors
    /// Returns error if serialization fails
    fn to_record(&self) -> Result<Record, RecordError> {
        Record::encode(self)
    }

    /// Decode from an untyped record
    ///
    /// # Errors
    /// Returns error if the record is malformed for this entity type
    fn from_record(record: &Record) -> Result<Self, RecordError> {
        record.decode()
    }
}

/// Severity rating shared by losses and hazards
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Negligible impact
    Low,
    /// Noticeable impact
    #[default]
    Medium,
    /// Serious impact
    High,
    /// Catastrophic impact
    Critical,
}

/// Controller classification in the control structure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerKind {
    /// Human operator
    Human,
    /// Software controller
    #[default]
    Software,
    /// Hardware/physical controller
    Hardware,
    /// Organizational controller (policy, management)
    Organizational,
}

/// The four ways a control action can be unsafe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UcaType {
    /// Not providing the action causes a hazard
    NotProvided,
    /// Providing the action causes a hazard
    Provided,
    /// Too early, too late or out of order
    WrongTiming,
    /// Stopped too soon or applied too long
    WrongDuration,
}

/// Description of the analysed system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemDescription {
    pub id: EntityId,
    pub title: String,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub boundary: String,
    #[serde(default)]
    pub assumptions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stakeholder {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub interests: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Loss {
    pub id: EntityId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub severity: Severity,
    #[serde(default)]
    pub stakeholder_ids: Vec<EntityId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hazard {
    pub id: EntityId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub severity: Severity,
    #[serde(default)]
    pub related_losses: Vec<EntityId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Controller {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub kind: ControllerKind,
    #[serde(default)]
    pub responsibilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<EntityId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlAction {
    pub id: EntityId,
    pub name: String,
    pub controller_id: EntityId,
    #[serde(default)]
    pub controlled_process: String,
    #[serde(default)]
    pub description: String,
}

/// Unsafe control action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Uca {
    pub id: EntityId,
    pub control_action_id: EntityId,
    pub uca_type: UcaType,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub hazard_ids: Vec<EntityId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CausalScenario {
    pub id: EntityId,
    pub uca_id: EntityId,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub causal_factors: Vec<String>,
    #[serde(default)]
    pub hazard_ids: Vec<EntityId>,
}

macro_rules! impl_entity {
    ($($ty:ty => $collection:expr),* $(,)?) => {
        $(
            impl private::Sealed for $ty {}

            impl Entity for $ty {
                const COLLECTION: Collection = $collection;

                fn id(&self) -> &EntityId {
                    &self.id
                }
            }
        )*
    };
}

impl_entity! {
    SystemDescription => Collection::SystemDescription,
    Stakeholder => Collection::Stakeholders,
    Loss => Collection::Losses,
    Hazard => Collection::Hazards,
    Controller => Collection::Controllers,
    ControlAction => Collection::ControlActions,
    Uca => Collection::Ucas,
    CausalScenario => Collection::CausalScenarios,
}

/// Decode a record using the typed schema of `collection`
///
/// Used by validators that only know the collection at runtime.
///
/// # Errors
/// Returns the decoding error for malformed records
pub fn validate_record(collection: Collection, record: &Record) -> Result<(), RecordError> {
    match collection {
        Collection::SystemDescription => SystemDescription::from_record(record).map(drop),
        Collection::Stakeholders => Stakeholder::from_record(record).map(drop),
        Collection::Losses => Loss::from_record(record).map(drop),
        Collection::Hazards => Hazard::from_record(record).map(drop),
        Collection::Controllers => Controller::from_record(record).map(drop),
        Collection::ControlActions => ControlAction::from_record(record).map(drop),
        Collection::Ucas => Uca::from_record(record).map(drop),
        Collection::CausalScenarios => CausalScenario::from_record(record).map(drop),
    }
}
