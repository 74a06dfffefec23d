//! Drives every artifact plugin through the per-test lifecycle

use std::path::PathBuf;

use pilot_core::prelude::*;
use pilot_core::TestSummary;

use crate::api::ArtifactsApi;
use crate::plugin::ArtifactPlugin;

/// Owns the run's artifact locations and plugins.
///
/// A failing plugin is logged and skipped; it never fails the test or keeps
/// the other plugins from running.
#[derive(Debug)]
pub struct ArtifactsManager {
    api: ArtifactsApi,
    plugins: Vec<ArtifactPlugin>,
    terminated: bool,
}

impl ArtifactsManager {
    pub fn new(api: ArtifactsApi, plugins: Vec<ArtifactPlugin>) -> Self {
        Self {
            api,
            plugins,
            terminated: false,
        }
    }

    pub fn api(&self) -> &ArtifactsApi {
        &self.api
    }

    pub fn plugins(&self) -> &[ArtifactPlugin] {
        &self.plugins
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Device artifacts are captured from, once acquired
    pub fn set_device_id(&mut self, device_id: impl Into<String>) {
        self.api.set_device_id(device_id);
    }

    pub async fn prepare_path_for_artifact(
        &self,
        name: &str,
        summary: &TestSummary,
    ) -> Result<PathBuf> {
        self.api.prepare_path_for_artifact(name, summary).await
    }

    pub async fn on_before_test(&mut self, summary: &TestSummary) {
        if self.terminated {
            return;
        }
        for plugin in &mut self.plugins {
            if let Err(e) = plugin.on_before_test(&self.api, summary).await {
                warn!(
                    "{} plugin failed before test '{}': {}",
                    plugin.name(),
                    summary.full_name,
                    e
                );
            }
        }
    }

    pub async fn on_after_test(&mut self, summary: &TestSummary) {
        if self.terminated {
            return;
        }
        for plugin in &mut self.plugins {
            if let Err(e) = plugin.on_after_test(&self.api, summary).await {
                warn!(
                    "{} plugin failed after test '{}': {}",
                    plugin.name(),
                    summary.full_name,
                    e
                );
            }
        }
    }

    /// Dispose of in-flight artifacts; later calls do nothing
    pub async fn on_terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        for plugin in &mut self.plugins {
            if let Err(e) = plugin.on_terminate().await {
                warn!("{} plugin failed to terminate: {}", plugin.name(), e);
            }
        }
        debug!("Artifacts manager terminated");
    }

    /// Synchronous teardown for abrupt process exit
    pub fn on_kill(&mut self) {
        self.terminated = true;
        for plugin in &mut self.plugins {
            plugin.on_kill();
        }
    }
}
