//! Analysis versions
//!
//! A version is a named, self-contained snapshot with an optional parent.
//! Branching copies the parent's snapshot, so versions never share state.

use crate::ids::VersionId;
use crate::snapshot::AnalysisSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named, immutable-once-inactive snapshot of an analysis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisVersion {
    /// Unique identifier
    pub id: VersionId,
    /// Short display label
    pub label: String,
    /// Free-form description
    #[serde(default)]
    pub description: String,
    /// Version this one was branched from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_version_id: Option<VersionId>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Complete contents
    pub snapshot: AnalysisSnapshot,
}

impl AnalysisVersion {
    /// Create a root version (no parent) with a generated id
    #[must_use]
    pub fn root(label: impl Into<String>, snapshot: AnalysisSnapshot) -> Self {
        Self {
            id: VersionId::generate(),
            label: label.into(),
            description: String::new(),
            parent_version_id: None,
            created_at: Utc::now(),
            snapshot,
        }
    }

    /// Create a branch of `parent` with a generated id
    ///
    /// The branch receives a deep copy of `snapshot`, which the caller
    /// supplies because the parent's live contents may differ from its
    /// stored snapshot.
    #[must_use]
    pub fn branch(
        parent: &VersionId,
        label: impl Into<String>,
        description: impl Into<String>,
        snapshot: AnalysisSnapshot,
    ) -> Self {
        Self {
            id: VersionId::generate(),
            label: label.into(),
            description: description.into(),
            parent_version_id: Some(parent.clone()),
            created_at: Utc::now(),
            snapshot,
        }
    }

    /// Override the generated id
    #[inline]
    #[must_use]
    pub fn with_id(mut self, id: impl Into<VersionId>) -> Self {
        self.id = id.into();
        self
    }

    /// Set description
    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Version metadata without the snapshot
    #[must_use]
    pub fn summary(&self) -> VersionSummary {
        VersionSummary {
            id: self.id.clone(),
            label: self.label.clone(),
            parent_version_id: self.parent_version_id.clone(),
            created_at: self.created_at,
            entity_count: self.snapshot.entity_count(),
        }
    }
}

/// Lightweight listing entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionSummary {
    pub id: VersionId,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_version_id: Option<VersionId>,
    pub created_at: DateTime<Utc>,
    pub entity_count: usize,
}
