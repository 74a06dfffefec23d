//! # pilot-artifacts - Per-Test Evidence Capture
//!
//! Screenshots and device logs captured around every test, kept or dropped
//! according to the run's [`CaptureMode`](pilot_core::CaptureMode).
//!
//! ## Public API
//!
//! - [`ArtifactsManager`] - Drives all plugins through the test lifecycle
//! - [`ArtifactsApi`] - Run directory and per-test artifact paths
//! - [`ArtifactPlugin`] - The closed set of plugins
//! - [`TwoSnapshotsPerTest`], [`WholeTestRecording`] - Plugin lifecycles
//! - [`TestArtifact`] - Temp-file backed artifact with save/discard/kill

pub mod api;
pub mod artifact;
pub mod logcat;
pub mod manager;
pub mod plugin;
pub mod screenshot;
pub mod templates;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;

pub use api::{escape_path_component, ArtifactsApi};
pub use artifact::{ArtifactState, Recorder, Snapshotter, TestArtifact};
pub use logcat::LogcatRecorder;
pub use manager::ArtifactsManager;
pub use plugin::ArtifactPlugin;
pub use screenshot::{AdbScreenshotter, SimulatorScreenshotter};
pub use templates::{TwoSnapshotsPerTest, WholeTestRecording};
