//! Synchronization configuration
//!
//! Loaded from TOML or built in code; every field has a default so a
//! partial file is valid.

use crate::error::SyncError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Bounded retry policy for `FULL_SYNC_REQUEST`
///
/// Attempt `n` (from 0) waits `initial_backoff_ms * multiplier^n`, capped
/// at `max_backoff_ms`, for a response before re-issuing the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Requests issued before giving up
    pub max_attempts: u32,
    /// Wait after the first request
    pub initial_backoff_ms: u64,
    /// Upper bound on any single wait
    pub max_backoff_ms: u64,
    /// Growth factor between attempts
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Wait after attempt `attempt` (0-based)
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(i32::try_from(attempt).unwrap_or(i32::MAX));
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let millis = (self.initial_backoff_ms as f64 * factor).min(self.max_backoff_ms as f64) as u64;
        Duration::from_millis(millis)
    }

    /// Total time spent before falling back
    #[must_use]
    pub fn total_budget(&self) -> Duration {
        (0..self.max_attempts).map(|n| self.backoff(n)).sum()
    }
}

/// Window synchronization settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Prefix of per-analysis channel names
    pub channel_prefix: String,
    /// Follow other windows' version switches
    pub follow_remote_switches: bool,
    /// Use the seed provider when no peer answers
    pub fallback_to_seed: bool,
    /// Id of the root version created from a seed
    pub root_version_id: String,
    /// Label of the root version created from a seed
    pub root_version_label: String,
    /// Full sync retry policy
    pub full_sync: RetryPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            channel_prefix: "analysis-sync".to_string(),
            follow_remote_switches: true,
            fallback_to_seed: true,
            root_version_id: "v1".to_string(),
            root_version_label: "Baseline".to_string(),
            full_sync: RetryPolicy::default(),
        }
    }
}

impl SyncConfig {
    /// Set channel prefix
    #[inline]
    #[must_use]
    pub fn with_channel_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.channel_prefix = prefix.into();
        self
    }

    /// Set retry policy
    #[inline]
    #[must_use]
    pub fn with_full_sync(mut self, policy: RetryPolicy) -> Self {
        self.full_sync = policy;
        self
    }

    /// Set switch-following policy
    #[inline]
    #[must_use]
    pub fn with_follow_remote_switches(mut self, follow: bool) -> Self {
        self.follow_remote_switches = follow;
        self
    }

    /// Set seed fallback
    #[inline]
    #[must_use]
    pub fn with_fallback_to_seed(mut self, fallback: bool) -> Self {
        self.fallback_to_seed = fallback;
        self
    }

    /// Channel name for one analysis
    #[must_use]
    pub fn channel_name(&self, analysis: &str) -> String {
        format!("{}:{}", self.channel_prefix, analysis)
    }

    /// Parse from TOML text
    ///
    /// # Errors
    /// Returns error on malformed TOML or inconsistent values
    pub fn from_toml_str(text: &str) -> Result<Self, SyncError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Check value consistency
    ///
    /// # Errors
    /// Returns [`SyncError::InvalidConfig`] describing the first problem
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.root_version_id.is_empty() {
            return Err(SyncError::InvalidConfig("root_version_id is empty".into()));
        }
        if self.full_sync.multiplier < 1.0 {
            return Err(SyncError::InvalidConfig(format!(
                "full_sync.multiplier must be >= 1.0, got {}",
                self.full_sync.multiplier
            )));
        }
        if self.full_sync.initial_backoff_ms > self.full_sync.max_backoff_ms {
            return Err(SyncError::InvalidConfig(
                "full_sync.initial_backoff_ms exceeds max_backoff_ms".into(),
            ));
        }
        Ok(())
    }
}
