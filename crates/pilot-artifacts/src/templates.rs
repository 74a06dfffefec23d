//! Reusable plugin lifecycles
//!
//! [`TwoSnapshotsPerTest`] takes one snapshot before and one after each test.
//! [`WholeTestRecording`] records from the start of a test to its end. Both
//! keep or drop what they captured according to their [`CaptureMode`].

use pilot_core::prelude::*;
use pilot_core::{CaptureMode, TestSummary};

use crate::api::ArtifactsApi;
use crate::artifact::{Recorder, Snapshotter, TestArtifact};

/// Artifact names of the two snapshots, by index
const SNAPSHOT_NAMES: [&str; 2] = ["before", "after"];

/// Plugin lifecycle for before/after snapshots
#[derive(Debug)]
pub struct TwoSnapshotsPerTest<S> {
    mode: CaptureMode,
    snapshotter: S,
    snapshots: [Option<TestArtifact>; 2],
}

impl<S: Snapshotter + Sync> TwoSnapshotsPerTest<S> {
    pub fn new(mode: CaptureMode, snapshotter: S) -> Self {
        Self {
            mode,
            snapshotter,
            snapshots: [None, None],
        }
    }

    pub fn mode(&self) -> CaptureMode {
        self.mode
    }

    pub fn snapshotter(&self) -> &S {
        &self.snapshotter
    }

    /// Snapshots captured for the current test and not yet disposed of
    pub fn in_flight(&self) -> usize {
        self.snapshots.iter().flatten().count()
    }

    pub async fn on_before_test(&mut self, api: &ArtifactsApi, _summary: &TestSummary) -> Result<()> {
        if !self.mode.is_enabled() {
            return Ok(());
        }
        // Leftovers from a test whose after-hook never ran
        self.discard_all().await;
        self.take_snapshot(api, 0).await
    }

    pub async fn on_after_test(&mut self, api: &ArtifactsApi, summary: &TestSummary) -> Result<()> {
        if !self.mode.is_enabled() {
            return Ok(());
        }
        let taken = self.take_snapshot(api, 1).await;

        if self.mode.should_keep(summary) {
            self.save_all(api, summary).await?;
        } else {
            self.discard_all().await;
        }
        taken
    }

    pub async fn on_terminate(&mut self) -> Result<()> {
        self.discard_all().await;
        Ok(())
    }

    pub fn on_kill(&mut self) {
        for snapshot in self.snapshots.iter_mut().flatten() {
            snapshot.kill();
        }
        self.snapshots = [None, None];
    }

    async fn take_snapshot(&mut self, api: &ArtifactsApi, index: usize) -> Result<()> {
        let device_id = api.device_id()?;
        let mut artifact = TestArtifact::create(Snapshotter::extension(&self.snapshotter))?;
        match artifact.take(&self.snapshotter, device_id).await {
            Ok(()) => {
                self.snapshots[index] = Some(artifact);
                Ok(())
            }
            Err(e) => {
                artifact.kill();
                Err(e)
            }
        }
    }

    /// Save in index order so "before" always lands first
    async fn save_all(&mut self, api: &ArtifactsApi, summary: &TestSummary) -> Result<()> {
        let extension = Snapshotter::extension(&self.snapshotter);
        for (index, slot) in self.snapshots.iter_mut().enumerate() {
            let Some(mut snapshot) = slot.take() else {
                continue;
            };
            let name = format!("{}{}", SNAPSHOT_NAMES[index], extension);
            let path = match api.prepare_path_for_artifact(&name, summary).await {
                Ok(path) => path,
                Err(e) => {
                    snapshot.kill();
                    return Err(e);
                }
            };
            snapshot.save(&path).await?;
        }
        Ok(())
    }

    async fn discard_all(&mut self) {
        for slot in self.snapshots.iter_mut() {
            if let Some(mut snapshot) = slot.take() {
                if let Err(e) = snapshot.discard().await {
                    warn!("Failed to discard snapshot: {}", e);
                }
            }
        }
    }
}

/// Plugin lifecycle for one recording spanning the whole test
#[derive(Debug)]
pub struct WholeTestRecording<R> {
    mode: CaptureMode,
    recorder: R,
    current: Option<TestArtifact>,
}

impl<R: Recorder + Sync> WholeTestRecording<R> {
    pub fn new(mode: CaptureMode, recorder: R) -> Self {
        Self {
            mode,
            recorder,
            current: None,
        }
    }

    pub fn mode(&self) -> CaptureMode {
        self.mode
    }

    pub fn is_recording(&self) -> bool {
        self.current.is_some()
    }

    pub async fn on_before_test(&mut self, api: &ArtifactsApi, _summary: &TestSummary) -> Result<()> {
        if !self.mode.is_enabled() {
            return Ok(());
        }
        self.discard_current().await;

        let device_id = api.device_id()?;
        let mut recording = TestArtifact::create(".log")?;
        match recording.start(&self.recorder, device_id).await {
            Ok(()) => {
                self.current = Some(recording);
                Ok(())
            }
            Err(e) => {
                recording.kill();
                Err(e)
            }
        }
    }

    pub async fn on_after_test(&mut self, api: &ArtifactsApi, summary: &TestSummary) -> Result<()> {
        let Some(mut recording) = self.current.take() else {
            return Ok(());
        };
        recording.stop().await;

        if !self.mode.should_keep(summary) {
            return recording.discard().await;
        }
        let name = Recorder::artifact_name(&self.recorder);
        match api.prepare_path_for_artifact(name, summary).await {
            Ok(path) => recording.save(&path).await,
            Err(e) => {
                recording.kill();
                Err(e)
            }
        }
    }

    pub async fn on_terminate(&mut self) -> Result<()> {
        self.discard_current().await;
        Ok(())
    }

    pub fn on_kill(&mut self) {
        if let Some(mut recording) = self.current.take() {
            recording.kill();
        }
    }

    async fn discard_current(&mut self) {
        if let Some(mut recording) = self.current.take() {
            if let Err(e) = recording.discard().await {
                warn!("Failed to discard recording: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeRecorder, FakeSnapshotter};
    use pilot_core::TestStatus;

    fn api(dir: &std::path::Path) -> ArtifactsApi {
        let mut api = ArtifactsApi::new(dir, "cfg");
        api.set_device_id("emulator-5554");
        api
    }

    fn summary(status: TestStatus) -> TestSummary {
        TestSummary::new("taps", "Login taps", status)
    }

    fn saved_files(api: &ArtifactsApi) -> Vec<String> {
        let dir = api.run_dir().join("Login taps");
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_snapshots_saved_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let api = api(dir.path());
        let mut plugin = TwoSnapshotsPerTest::new(CaptureMode::All, FakeSnapshotter::new());

        plugin.on_before_test(&api, &summary(TestStatus::Running)).await.unwrap();
        assert_eq!(plugin.in_flight(), 1);
        plugin.on_after_test(&api, &summary(TestStatus::Passed)).await.unwrap();

        assert_eq!(plugin.in_flight(), 0);
        assert_eq!(saved_files(&api), vec!["after.png", "before.png"]);
        let test_dir = api.run_dir().join("Login taps");
        assert_eq!(
            std::fs::read_to_string(test_dir.join("before.png")).unwrap(),
            "snapshot 1 of emulator-5554"
        );
        assert_eq!(
            std::fs::read_to_string(test_dir.join("after.png")).unwrap(),
            "snapshot 2 of emulator-5554"
        );
    }

    #[tokio::test]
    async fn test_failing_mode_discards_passed_tests() {
        let dir = tempfile::tempdir().unwrap();
        let api = api(dir.path());
        let snapshotter = FakeSnapshotter::new();
        let mut plugin = TwoSnapshotsPerTest::new(CaptureMode::Failing, snapshotter.clone());

        plugin.on_before_test(&api, &summary(TestStatus::Running)).await.unwrap();
        plugin.on_after_test(&api, &summary(TestStatus::Passed)).await.unwrap();
        assert!(saved_files(&api).is_empty());
        assert_eq!(snapshotter.captures(), 2);

        plugin.on_before_test(&api, &summary(TestStatus::Running)).await.unwrap();
        plugin.on_after_test(&api, &summary(TestStatus::Failed)).await.unwrap();
        assert_eq!(saved_files(&api), vec!["after.png", "before.png"]);
    }

    #[tokio::test]
    async fn test_disabled_plugin_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let api = api(dir.path());
        let snapshotter = FakeSnapshotter::new();
        let mut plugin = TwoSnapshotsPerTest::new(CaptureMode::None, snapshotter.clone());

        plugin.on_before_test(&api, &summary(TestStatus::Running)).await.unwrap();
        plugin.on_after_test(&api, &summary(TestStatus::Failed)).await.unwrap();
        plugin.on_terminate().await.unwrap();
        plugin.on_kill();

        assert_eq!(snapshotter.captures(), 0);
        assert!(!api.run_dir().exists());
    }

    #[tokio::test]
    async fn test_terminate_discards_in_flight_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let api = api(dir.path());
        let mut plugin = TwoSnapshotsPerTest::new(CaptureMode::All, FakeSnapshotter::new());

        plugin.on_before_test(&api, &summary(TestStatus::Running)).await.unwrap();
        plugin.on_terminate().await.unwrap();

        assert_eq!(plugin.in_flight(), 0);
        assert!(!api.run_dir().exists());
    }

    #[tokio::test]
    async fn test_kill_removes_temp_files_synchronously() {
        let dir = tempfile::tempdir().unwrap();
        let api = api(dir.path());
        let snapshotter = FakeSnapshotter::new();
        let mut plugin = TwoSnapshotsPerTest::new(CaptureMode::All, snapshotter.clone());

        plugin.on_before_test(&api, &summary(TestStatus::Running)).await.unwrap();
        let temp = snapshotter.last_destination().unwrap();
        assert!(temp.exists());

        plugin.on_kill();
        assert!(!temp.exists());
        assert_eq!(plugin.in_flight(), 0);
    }

    #[test]
    fn test_kill_before_any_take() {
        let mut plugin = TwoSnapshotsPerTest::new(CaptureMode::All, FakeSnapshotter::new());
        plugin.on_kill();
        assert_eq!(plugin.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_snapshot_without_device_fails() {
        let dir = tempfile::tempdir().unwrap();
        let api = ArtifactsApi::new(dir.path(), "cfg");
        let mut plugin = TwoSnapshotsPerTest::new(CaptureMode::All, FakeSnapshotter::new());

        let err = plugin
            .on_before_test(&api, &summary(TestStatus::Running))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Artifact { .. }));
    }

    #[tokio::test]
    async fn test_recording_saved_for_failed_test() {
        let dir = tempfile::tempdir().unwrap();
        let api = api(dir.path());
        let mut plugin = WholeTestRecording::new(CaptureMode::Failing, FakeRecorder::new("line\n"));

        plugin.on_before_test(&api, &summary(TestStatus::Running)).await.unwrap();
        assert!(plugin.is_recording());
        plugin.on_after_test(&api, &summary(TestStatus::Failed)).await.unwrap();

        assert!(!plugin.is_recording());
        assert_eq!(saved_files(&api), vec!["device.log"]);
        let log = api.run_dir().join("Login taps").join("device.log");
        assert_eq!(std::fs::read_to_string(log).unwrap(), "line\n");
    }

    #[tokio::test]
    async fn test_recording_discarded_for_passed_test() {
        let dir = tempfile::tempdir().unwrap();
        let api = api(dir.path());
        let recorder = FakeRecorder::new("line\n");
        let mut plugin = WholeTestRecording::new(CaptureMode::Failing, recorder.clone());

        plugin.on_before_test(&api, &summary(TestStatus::Running)).await.unwrap();
        let temp = recorder.last_destination().unwrap();
        plugin.on_after_test(&api, &summary(TestStatus::Passed)).await.unwrap();

        assert!(saved_files(&api).is_empty());
        assert!(!temp.exists());
    }

    #[tokio::test]
    async fn test_recording_kill_and_terminate() {
        let dir = tempfile::tempdir().unwrap();
        let api = api(dir.path());
        let recorder = FakeRecorder::new("x");
        let mut plugin = WholeTestRecording::new(CaptureMode::All, recorder.clone());

        plugin.on_before_test(&api, &summary(TestStatus::Running)).await.unwrap();
        let temp = recorder.last_destination().unwrap();
        plugin.on_kill();
        assert!(!temp.exists());
        assert!(!plugin.is_recording());

        plugin.on_before_test(&api, &summary(TestStatus::Running)).await.unwrap();
        plugin.on_terminate().await.unwrap();
        assert!(!plugin.is_recording());
        assert_eq!(recorder.starts(), 2);
    }
}
