//! Broadcast message protocol
//!
//! Every message has the wire shape
//! `{ kind, versionId, payload, originWindowId, timestamp }`, plus a
//! `sequence` once a window has sent it. Internally the payload is a typed
//! [`MessageBody`] chosen by `kind`; conversion goes through
//! [`WireMessage`] so the two can never disagree.
//!
//! | kind                 | versionId           | payload                                        |
//! |----------------------|---------------------|------------------------------------------------|
//! | `STATE_UPDATE`       | version edited      | `{ collection, entityId, patch }` (or a replacement) |
//! | `VERSION_SWITCHED`   | newly active        | `{ snapshot, version? }`                       |
//! | `VERSION_CREATED`    | new version         | `{ version }`                                  |
//! | `VERSION_DELETED`    | deleted version     | `{}`                                           |
//! | `FULL_SYNC_REQUEST`  | requester's active  | `{}`                                           |
//! | `FULL_SYNC_RESPONSE` | responder's active  | `{ requester, snapshot, versions, seen }`      |
//!
//! `sequence` counts each sender's messages from 1. A full sync response
//! reports, per origin, the highest sequence the responder had handled, so
//! the requester can tell which of its buffered messages the snapshot
//! already contains.

use crate::error::ChannelError;
use chrono::{DateTime, Utc};
use hazard_model::{AnalysisSnapshot, AnalysisVersion, StateMutation, VersionId, WindowId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};

/// Highest sequence handled, per origin window
pub type SeenSequences = HashMap<WindowId, u64>;

/// Message kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    /// A store mutation
    StateUpdate,
    /// The sender switched its active version
    VersionSwitched,
    /// The sender created a version
    VersionCreated,
    /// The sender deleted a version
    VersionDeleted,
    /// A starting window asks for the full state
    FullSyncRequest,
    /// Answer to a full sync request
    FullSyncResponse,
}

impl Display for MessageKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::StateUpdate => "STATE_UPDATE",
            Self::VersionSwitched => "VERSION_SWITCHED",
            Self::VersionCreated => "VERSION_CREATED",
            Self::VersionDeleted => "VERSION_DELETED",
            Self::FullSyncRequest => "FULL_SYNC_REQUEST",
            Self::FullSyncResponse => "FULL_SYNC_RESPONSE",
        };
        f.write_str(name)
    }
}

/// `VERSION_SWITCHED` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchPayload {
    /// Contents of the newly active version
    pub snapshot: AnalysisSnapshot,
    /// Its metadata, for receivers whose `VERSION_CREATED` is still in flight
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<SwitchedVersion>,
}

impl SwitchPayload {
    /// Payload announcing a switch to `version`
    #[must_use]
    pub fn of(version: &AnalysisVersion) -> Self {
        Self {
            snapshot: version.snapshot.clone(),
            version: Some(SwitchedVersion::of(version)),
        }
    }
}

/// Version metadata without contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchedVersion {
    pub label: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_version_id: Option<VersionId>,
    pub created_at: DateTime<Utc>,
}

impl SwitchedVersion {
    /// Metadata of `version`
    #[must_use]
    pub fn of(version: &AnalysisVersion) -> Self {
        Self {
            label: version.label.clone(),
            description: version.description.clone(),
            parent_version_id: version.parent_version_id.clone(),
            created_at: version.created_at,
        }
    }

    /// Rebuild the full version `id` holding `snapshot`
    #[must_use]
    pub fn into_version(self, id: VersionId, snapshot: AnalysisSnapshot) -> AnalysisVersion {
        AnalysisVersion {
            id,
            label: self.label,
            description: self.description,
            parent_version_id: self.parent_version_id,
            created_at: self.created_at,
            snapshot,
        }
    }
}

/// `VERSION_CREATED` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedPayload {
    /// The new version, with its snapshot
    pub version: AnalysisVersion,
}

/// `FULL_SYNC_RESPONSE` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullSyncPayload {
    /// Window the response answers
    pub requester: WindowId,
    /// Live contents of the responder's active version
    pub snapshot: AnalysisSnapshot,
    /// Every version the responder knows
    pub versions: Vec<AnalysisVersion>,
    /// Highest sequence the responder had handled from each origin,
    /// its own sent messages included
    #[serde(default)]
    pub seen: SeenSequences,
}

/// Typed message payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    StateUpdate(StateMutation),
    VersionSwitched(SwitchPayload),
    VersionCreated(CreatedPayload),
    VersionDeleted,
    FullSyncRequest,
    FullSyncResponse(FullSyncPayload),
}

impl MessageBody {
    /// Kind tag for this body
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::StateUpdate(_) => MessageKind::StateUpdate,
            Self::VersionSwitched(_) => MessageKind::VersionSwitched,
            Self::VersionCreated(_) => MessageKind::VersionCreated,
            Self::VersionDeleted => MessageKind::VersionDeleted,
            Self::FullSyncRequest => MessageKind::FullSyncRequest,
            Self::FullSyncResponse(_) => MessageKind::FullSyncResponse,
        }
    }

    fn to_payload(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::StateUpdate(m) => serde_json::to_value(m),
            Self::VersionSwitched(p) => serde_json::to_value(p),
            Self::VersionCreated(p) => serde_json::to_value(p),
            Self::VersionDeleted | Self::FullSyncRequest => Ok(Value::Object(serde_json::Map::new())),
            Self::FullSyncResponse(p) => serde_json::to_value(p),
        }
    }

    fn from_payload(kind: MessageKind, payload: Value) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            MessageKind::StateUpdate => Self::StateUpdate(serde_json::from_value(payload)?),
            MessageKind::VersionSwitched => Self::VersionSwitched(serde_json::from_value(payload)?),
            MessageKind::VersionCreated => Self::VersionCreated(serde_json::from_value(payload)?),
            MessageKind::VersionDeleted => Self::VersionDeleted,
            MessageKind::FullSyncRequest => Self::FullSyncRequest,
            MessageKind::FullSyncResponse => Self::FullSyncResponse(serde_json::from_value(payload)?),
        })
    }
}

/// Message exchanged between windows of one analysis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireMessage", into = "WireMessage")]
pub struct BroadcastMessage {
    /// Version the message concerns
    pub version_id: VersionId,
    /// Sending window
    pub origin_window_id: WindowId,
    /// Send time, milliseconds since the Unix epoch
    pub timestamp: i64,
    /// Position among the sender's messages, from 1; 0 until sent
    pub sequence: u64,
    /// Kind and payload
    pub body: MessageBody,
}

impl BroadcastMessage {
    /// Create a message stamped with the current time
    #[must_use]
    pub fn new(origin: WindowId, version_id: VersionId, body: MessageBody) -> Self {
        Self {
            version_id,
            origin_window_id: origin,
            timestamp: Utc::now().timestamp_millis(),
            sequence: 0,
            body,
        }
    }

    /// Stamp with the sender's sequence number
    #[inline]
    #[must_use]
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// `STATE_UPDATE` for a mutation of `version_id`
    #[must_use]
    pub fn state_update(origin: WindowId, version_id: VersionId, mutation: StateMutation) -> Self {
        Self::new(origin, version_id, MessageBody::StateUpdate(mutation))
    }

    /// `FULL_SYNC_REQUEST`
    #[must_use]
    pub fn full_sync_request(origin: WindowId, version_id: VersionId) -> Self {
        Self::new(origin, version_id, MessageBody::FullSyncRequest)
    }

    /// Message kind
    #[inline]
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        self.body.kind()
    }

    /// Encode as JSON text
    ///
    /// # Errors
    /// Returns error if serialization fails
    pub fn to_json(&self) -> Result<String, ChannelError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from JSON text
    ///
    /// # Errors
    /// Returns error if the text is not a valid message
    pub fn from_json(text: &str) -> Result<Self, ChannelError> {
        Ok(serde_json::from_str(text)?)
    }
}

impl Display for BroadcastMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} v={} from={}", self.kind(), self.version_id, self.origin_window_id)?;
        if let MessageBody::StateUpdate(m) = &self.body {
            write!(f, " ({m})")?;
        }
        Ok(())
    }
}

/// Wire form of [`BroadcastMessage`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    pub kind: MessageKind,
    pub version_id: VersionId,
    pub payload: Value,
    pub origin_window_id: WindowId,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "is_unsent")]
    pub sequence: u64,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_unsent(sequence: &u64) -> bool {
    *sequence == 0
}

impl TryFrom<WireMessage> for BroadcastMessage {
    type Error = ChannelError;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        let body = MessageBody::from_payload(wire.kind, wire.payload).map_err(|e| {
            ChannelError::Malformed {
                kind: wire.kind.to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(Self {
            version_id: wire.version_id,
            origin_window_id: wire.origin_window_id,
            timestamp: wire.timestamp,
            sequence: wire.sequence,
            body,
        })
    }
}

impl From<BroadcastMessage> for WireMessage {
    fn from(message: BroadcastMessage) -> Self {
        // Payload types serialize infallibly: string-keyed maps and plain data.
        let payload = message.body.to_payload().unwrap_or(Value::Null);
        Self {
            kind: message.body.kind(),
            version_id: message.version_id,
            payload,
            origin_window_id: message.origin_window_id,
            timestamp: message.timestamp,
            sequence: message.sequence,
        }
    }
}
