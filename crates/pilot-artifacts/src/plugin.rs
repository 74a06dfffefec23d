//! Artifact plugins the manager can drive

use pilot_core::prelude::*;
use pilot_core::TestSummary;

use crate::api::ArtifactsApi;
use crate::logcat::LogcatRecorder;
use crate::screenshot::{AdbScreenshotter, SimulatorScreenshotter};
use crate::templates::{TwoSnapshotsPerTest, WholeTestRecording};

#[cfg(any(test, feature = "test-helpers"))]
use crate::test_utils::RecordingPlugin;

/// One artifact plugin of a run
#[derive(Debug)]
pub enum ArtifactPlugin {
    AdbScreenshots(TwoSnapshotsPerTest<AdbScreenshotter>),
    SimulatorScreenshots(TwoSnapshotsPerTest<SimulatorScreenshotter>),
    Logcat(WholeTestRecording<LogcatRecorder>),
    #[cfg(any(test, feature = "test-helpers"))]
    Recording(RecordingPlugin),
}

impl ArtifactPlugin {
    pub fn name(&self) -> &'static str {
        match self {
            ArtifactPlugin::AdbScreenshots(_) | ArtifactPlugin::SimulatorScreenshots(_) => {
                "screenshot"
            }
            ArtifactPlugin::Logcat(_) => "log",
            #[cfg(any(test, feature = "test-helpers"))]
            ArtifactPlugin::Recording(_) => "recording",
        }
    }

    pub async fn on_before_test(&mut self, api: &ArtifactsApi, summary: &TestSummary) -> Result<()> {
        match self {
            ArtifactPlugin::AdbScreenshots(p) => p.on_before_test(api, summary).await,
            ArtifactPlugin::SimulatorScreenshots(p) => p.on_before_test(api, summary).await,
            ArtifactPlugin::Logcat(p) => p.on_before_test(api, summary).await,
            #[cfg(any(test, feature = "test-helpers"))]
            ArtifactPlugin::Recording(p) => p.on_before_test(api, summary).await,
        }
    }

    pub async fn on_after_test(&mut self, api: &ArtifactsApi, summary: &TestSummary) -> Result<()> {
        match self {
            ArtifactPlugin::AdbScreenshots(p) => p.on_after_test(api, summary).await,
            ArtifactPlugin::SimulatorScreenshots(p) => p.on_after_test(api, summary).await,
            ArtifactPlugin::Logcat(p) => p.on_after_test(api, summary).await,
            #[cfg(any(test, feature = "test-helpers"))]
            ArtifactPlugin::Recording(p) => p.on_after_test(api, summary).await,
        }
    }

    pub async fn on_terminate(&mut self) -> Result<()> {
        match self {
            ArtifactPlugin::AdbScreenshots(p) => p.on_terminate().await,
            ArtifactPlugin::SimulatorScreenshots(p) => p.on_terminate().await,
            ArtifactPlugin::Logcat(p) => p.on_terminate().await,
            #[cfg(any(test, feature = "test-helpers"))]
            ArtifactPlugin::Recording(p) => p.on_terminate().await,
        }
    }

    pub fn on_kill(&mut self) {
        match self {
            ArtifactPlugin::AdbScreenshots(p) => p.on_kill(),
            ArtifactPlugin::SimulatorScreenshots(p) => p.on_kill(),
            ArtifactPlugin::Logcat(p) => p.on_kill(),
            #[cfg(any(test, feature = "test-helpers"))]
            ArtifactPlugin::Recording(p) => p.on_kill(),
        }
    }
}
