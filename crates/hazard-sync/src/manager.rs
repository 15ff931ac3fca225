//! Standalone window manager
//!
//! Opens secondary windows scoped to one analysis section or framework
//! view. A new window shares nothing with its opener except the analysis
//! channel: it boots its own store and converges through
//! `FULL_SYNC_REQUEST` like any other window.

use crate::bus::ChannelHub;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::port::BroadcastPort;
use crate::window::{BootstrapOutcome, SyncWindow};
use dashmap::DashMap;
use hazard_model::{Collection, WindowId};
use hazard_store::SeedProvider;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Whole-analysis framework views
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnalysisFramework {
    /// System-Theoretic Process Analysis
    Stpa,
    /// STPA for security
    StpaSec,
    /// Threat modelling by STRIDE category
    Stride,
}

impl AnalysisFramework {
    /// Path segment
    #[must_use]
    pub fn slug(self) -> &'static str {
        match self {
            Self::Stpa => "stpa",
            Self::StpaSec => "stpa-sec",
            Self::Stride => "stride",
        }
    }
}

/// What a window shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowTarget {
    /// The full analysis workspace
    Main,
    /// One section (collection) in isolation
    Section(Collection),
    /// A whole framework view
    Framework(AnalysisFramework),
}

impl WindowTarget {
    fn default_title(self) -> String {
        match self {
            Self::Main => "Analysis".to_string(),
            Self::Section(collection) => collection.as_str().to_string(),
            Self::Framework(framework) => framework.slug().to_uppercase(),
        }
    }
}

/// Options for [`StandaloneWindowManager::open`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowOptions {
    /// Window title; derived from the target if unset
    pub title: Option<String>,
    /// Spawn a task that receives messages for the window
    pub background: bool,
}

impl Default for WindowOptions {
    fn default() -> Self {
        Self {
            title: None,
            background: true,
        }
    }
}

impl WindowOptions {
    /// Set title
    #[inline]
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set whether a receive task is spawned
    #[inline]
    #[must_use]
    pub fn with_background(mut self, background: bool) -> Self {
        self.background = background;
        self
    }
}

/// An opened window
#[derive(Debug, Clone)]
pub struct WindowHandle {
    /// Window id
    pub id: WindowId,
    /// Address the window was opened at
    pub url: String,
    /// What it shows
    pub target: WindowTarget,
    /// Title
    pub title: String,
    /// How it got its initial contents
    pub outcome: BootstrapOutcome,
    /// The window itself
    pub window: Arc<SyncWindow>,
}

/// Creates windows attached to an analysis channel
#[async_trait::async_trait]
pub trait WindowLauncher: Send + Sync + fmt::Debug {
    /// Create a window for `analysis` and run its startup sequence
    ///
    /// # Errors
    /// Returns error if the window cannot obtain initial contents
    async fn launch(&self, analysis: &str) -> Result<(Arc<SyncWindow>, BootstrapOutcome), SyncError>;
}

/// Launches windows in this process on a [`ChannelHub`]
///
/// The first window on a channel starts from the seed; later windows
/// bootstrap from their peers. Channels are named by the config's
/// `channel_prefix` unless another hub is supplied.
#[derive(Clone)]
pub struct InProcessLauncher {
    hub: ChannelHub,
    config: SyncConfig,
    seed: Arc<dyn SeedProvider>,
}

impl InProcessLauncher {
    /// Create a launcher with a hub built from `config`
    #[must_use]
    pub fn new(config: SyncConfig, seed: Arc<dyn SeedProvider>) -> Self {
        Self {
            hub: ChannelHub::from_config(&config),
            config,
            seed,
        }
    }

    /// Launch on `hub` instead
    #[inline]
    #[must_use]
    pub fn with_hub(mut self, hub: ChannelHub) -> Self {
        self.hub = hub;
        self
    }

    /// Channel registry
    #[inline]
    #[must_use]
    pub fn hub(&self) -> &ChannelHub {
        &self.hub
    }
}

impl fmt::Debug for InProcessLauncher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InProcessLauncher")
            .field("hub", &self.hub)
            .field("seed", &self.seed.name())
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl WindowLauncher for InProcessLauncher {
    async fn launch(&self, analysis: &str) -> Result<(Arc<SyncWindow>, BootstrapOutcome), SyncError> {
        let channel = self.hub.channel(analysis);
        let port: Arc<dyn BroadcastPort> = channel.clone();
        let window = SyncWindow::new(port, self.config.clone());

        let outcome = if channel.subscriber_count() <= 1 {
            window.start_primary(self.seed.as_ref())?;
            BootstrapOutcome::Seeded
        } else {
            window.bootstrap(self.seed.as_ref()).await?
        };
        Ok((window, outcome))
    }
}

/// Opens and tracks the windows of one analysis
pub struct StandaloneWindowManager {
    analysis: String,
    base_url: String,
    launcher: Arc<dyn WindowLauncher>,
    windows: DashMap<WindowId, WindowHandle>,
    tasks: DashMap<WindowId, JoinHandle<()>>,
}

impl StandaloneWindowManager {
    /// Create a manager for `analysis`
    #[must_use]
    pub fn new(analysis: impl Into<String>, launcher: Arc<dyn WindowLauncher>) -> Self {
        Self {
            analysis: analysis.into(),
            base_url: String::new(),
            launcher,
            windows: DashMap::new(),
            tasks: DashMap::new(),
        }
    }

    /// Prefix URLs with `base_url`
    #[inline]
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Analysis name
    #[inline]
    #[must_use]
    pub fn analysis(&self) -> &str {
        &self.analysis
    }

    /// Address of a window showing `target`
    #[must_use]
    pub fn url_for(&self, target: WindowTarget) -> String {
        let root = format!("{}/analysis/{}", self.base_url, self.analysis);
        match target {
            WindowTarget::Main => root,
            WindowTarget::Section(collection) => {
                format!("{root}/section/{}?standalone=true", collection.as_str())
            }
            WindowTarget::Framework(framework) => {
                format!("{root}/{}?standalone=true", framework.slug())
            }
        }
    }

    /// Open a window showing `target`
    ///
    /// Returns once the window has its initial contents.
    ///
    /// # Errors
    /// Returns error if the launcher fails
    pub async fn open(&self, target: WindowTarget, options: WindowOptions) -> Result<WindowHandle, SyncError> {
        let (window, outcome) = self.launcher.launch(&self.analysis).await?;
        let handle = WindowHandle {
            id: window.id(),
            url: self.url_for(target),
            target,
            title: options.title.unwrap_or_else(|| target.default_title()),
            outcome,
            window: Arc::clone(&window),
        };

        if options.background {
            self.tasks.insert(handle.id, tokio::spawn(window.run()));
        }
        self.windows.insert(handle.id, handle.clone());
        tracing::info!(window = %handle.id, url = %handle.url, ?outcome, "window opened");
        Ok(handle)
    }

    /// Close a window
    ///
    /// # Errors
    /// Returns [`SyncError::UnknownWindow`] if `id` is not open
    pub async fn close(&self, id: WindowId) -> Result<(), SyncError> {
        let (_, handle) = self.windows.remove(&id).ok_or(SyncError::UnknownWindow(id))?;
        handle.window.close();
        if let Some((_, task)) = self.tasks.remove(&id) {
            // The receive loop ends once the inbox drains.
            if let Err(e) = task.await {
                tracing::warn!(window = %id, error = %e, "receive task failed");
            }
        }
        Ok(())
    }

    /// Close every window
    pub async fn close_all(&self) {
        let ids: Vec<WindowId> = self.windows.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Err(e) = self.close(id).await {
                // Closed concurrently by another caller.
                tracing::debug!(window = %id, error = %e, "window already closed");
            }
        }
    }

    /// Handle of an open window
    #[must_use]
    pub fn get(&self, id: WindowId) -> Option<WindowHandle> {
        self.windows.get(&id).map(|entry| entry.value().clone())
    }

    /// Every open window
    #[must_use]
    pub fn windows(&self) -> Vec<WindowHandle> {
        self.windows.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Number of open windows
    #[must_use]
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// Check if no window is open
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

impl fmt::Debug for StandaloneWindowManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StandaloneWindowManager")
            .field("analysis", &self.analysis)
            .field("launcher", &self.launcher)
            .field("windows", &self.windows.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hazard_model::FieldPatch;
    use hazard_store::DemoAnalysisSeed;
    use serde_json::json;
    use std::time::Duration;

    fn manager() -> StandaloneWindowManager {
        let launcher = InProcessLauncher::new(SyncConfig::default(), Arc::new(DemoAnalysisSeed));
        StandaloneWindowManager::new("acc", Arc::new(launcher)).with_base_url("https://hazard.local/")
    }

    #[test]
    fn urls_are_scoped_to_target() {
        let manager = manager();
        assert_eq!(manager.url_for(WindowTarget::Main), "https://hazard.local/analysis/acc");
        assert_eq!(
            manager.url_for(WindowTarget::Section(Collection::Hazards)),
            "https://hazard.local/analysis/acc/section/hazards?standalone=true"
        );
        assert_eq!(
            manager.url_for(WindowTarget::Framework(AnalysisFramework::StpaSec)),
            "https://hazard.local/analysis/acc/stpa-sec?standalone=true"
        );
    }

    #[tokio::test]
    async fn standalone_window_catches_up_through_channel() {
        let manager = manager();
        let main = manager.open(WindowTarget::Main, WindowOptions::default()).await.unwrap();
        assert_eq!(main.outcome, BootstrapOutcome::Seeded);

        main.window
            .store()
            .mutate(Collection::Hazards, "H-2", FieldPatch::single("title", json!("edited in main")));

        let section = manager
            .open(WindowTarget::Section(Collection::Hazards), WindowOptions::default())
            .await
            .unwrap();
        assert_eq!(section.outcome, BootstrapOutcome::Synced { from: main.id });
        assert_eq!(section.title, "hazards");
        assert!(section.window.store().snapshot().same_as(&main.window.store().snapshot()));

        section
            .window
            .store()
            .mutate(Collection::Hazards, "H-1", FieldPatch::single("title", json!("edited in section")));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(main.window.store().snapshot().same_as(&section.window.store().snapshot()));

        manager.close_all().await;
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn launcher_names_channels_by_configured_prefix() {
        let config = SyncConfig::default().with_channel_prefix("hazard-tabs");
        let launcher = Arc::new(InProcessLauncher::new(config, Arc::new(DemoAnalysisSeed)));
        let manager = StandaloneWindowManager::new("acc", launcher.clone());
        manager.open(WindowTarget::Main, WindowOptions::default()).await.unwrap();

        let channel = launcher.hub().channel("acc");
        assert_eq!(channel.name(), "hazard-tabs:acc");
        assert_eq!(channel.subscriber_count(), 1);
        assert_eq!(launcher.hub().len(), 1);
        manager.close_all().await;
    }

    #[tokio::test]
    async fn closing_unknown_window_fails() {
        let manager = manager();
        let result = manager.close(WindowId::new()).await;
        assert!(matches!(result, Err(SyncError::UnknownWindow(_))));
    }
}
