//! Per-test artifact objects and their capture seams

use std::path::Path;
use std::time::Duration;

use tempfile::NamedTempFile;

use pilot_core::prelude::*;
use pilot_device::BackgroundProcess;

/// Grace period for a recording process to exit after being stopped
const RECORDING_STOP_GRACE: Duration = Duration::from_secs(3);

/// Lifecycle of one artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactState {
    Idle,
    Recording,
    Stopped,
    Saved,
    Discarded,
    Killed,
}

impl ArtifactState {
    /// Whether save/discard/kill already disposed of the artifact
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            ArtifactState::Saved | ArtifactState::Discarded | ArtifactState::Killed
        )
    }
}

/// Captures a single snapshot of a device into a file
#[trait_variant::make(Snapshotter: Send)]
pub trait LocalSnapshotter {
    /// File suffix of produced snapshots, e.g. `.png`
    fn extension(&self) -> &'static str;

    async fn capture(&self, device_id: &str, destination: &Path) -> Result<()>;
}

/// Streams device output into a file until stopped
#[trait_variant::make(Recorder: Send)]
pub trait LocalRecorder {
    /// Name of the saved artifact, e.g. `device.log`
    fn artifact_name(&self) -> &'static str;

    async fn start(&self, device_id: &str, destination: &Path) -> Result<BackgroundProcess>;
}

/// An artifact backed by a temporary file it owns until disposed of.
///
/// `save` and `discard` are mutually exclusive; `kill` is accepted in every
/// state and never suspends.
#[derive(Debug)]
pub struct TestArtifact {
    temp: Option<NamedTempFile>,
    process: Option<BackgroundProcess>,
    state: ArtifactState,
}

impl TestArtifact {
    pub fn create(suffix: &str) -> Result<Self> {
        let temp = tempfile::Builder::new()
            .prefix("pilot-")
            .suffix(suffix)
            .tempfile()?;
        Ok(Self {
            temp: Some(temp),
            process: None,
            state: ArtifactState::Idle,
        })
    }

    pub fn state(&self) -> ArtifactState {
        self.state
    }

    /// Path of the backing temporary file while it exists
    pub fn temp_path(&self) -> Option<&Path> {
        self.temp.as_ref().map(NamedTempFile::path)
    }

    /// Capture a single snapshot into the temporary file
    pub async fn take<S: Snapshotter + Sync>(&mut self, snapshotter: &S, device_id: &str) -> Result<()> {
        let path = self.live_path()?.to_path_buf();
        Snapshotter::capture(snapshotter, device_id, &path).await?;
        self.state = ArtifactState::Stopped;
        Ok(())
    }

    /// Start streaming into the temporary file
    pub async fn start<R: Recorder + Sync>(&mut self, recorder: &R, device_id: &str) -> Result<()> {
        let path = self.live_path()?.to_path_buf();
        self.process = Some(Recorder::start(recorder, device_id, &path).await?);
        self.state = ArtifactState::Recording;
        Ok(())
    }

    /// Stop a recording; the file stays in place for save/discard
    pub async fn stop(&mut self) {
        if let Some(mut process) = self.process.take() {
            process.stop(RECORDING_STOP_GRACE).await;
        }
        if self.state == ArtifactState::Recording {
            self.state = ArtifactState::Stopped;
        }
    }

    /// Move the captured file to `destination`
    pub async fn save(&mut self, destination: &Path) -> Result<()> {
        self.ensure_open("save")?;
        self.stop().await;
        let temp = self
            .temp
            .take()
            .ok_or_else(|| Error::artifact("artifact has no backing file"))?;
        self.state = ArtifactState::Saved;

        debug!("Moving {} to {}", temp.path().display(), destination.display());
        if let Err(e) = temp.persist(destination) {
            // Rename fails across filesystems; fall back to a copy
            let temp = e.file;
            tokio::fs::copy(temp.path(), destination).await?;
        }
        Ok(())
    }

    /// Remove the captured file
    pub async fn discard(&mut self) -> Result<()> {
        self.ensure_open("discard")?;
        self.stop().await;
        self.state = ArtifactState::Discarded;
        if let Some(temp) = self.temp.take() {
            debug!("Removing temp file {}", temp.path().display());
            temp.close()?;
        }
        Ok(())
    }

    /// Abrupt-termination path: stop the recorder and remove the file
    pub fn kill(&mut self) {
        if let Some(mut process) = self.process.take() {
            process.kill();
        }
        // Dropping the handle removes the file synchronously
        self.temp = None;
        if !self.state.is_final() {
            self.state = ArtifactState::Killed;
        }
    }

    fn live_path(&self) -> Result<&Path> {
        self.ensure_open("capture")?;
        self.temp_path()
            .ok_or_else(|| Error::artifact("artifact has no backing file"))
    }

    fn ensure_open(&self, operation: &str) -> Result<()> {
        if self.state.is_final() {
            return Err(Error::artifact(format!(
                "cannot {operation} an artifact that is already {:?}",
                self.state
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeSnapshotter;

    #[tokio::test]
    async fn test_take_then_save_moves_file() {
        let out = tempfile::tempdir().unwrap();
        let snapshotter = FakeSnapshotter::new();
        let mut artifact = TestArtifact::create(".png").unwrap();
        let temp = artifact.temp_path().unwrap().to_path_buf();

        artifact.take(&snapshotter, "emulator-5554").await.unwrap();
        let dest = out.path().join("before.png");
        artifact.save(&dest).await.unwrap();

        assert_eq!(artifact.state(), ArtifactState::Saved);
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "snapshot 1 of emulator-5554");
        assert!(!temp.exists());
    }

    #[tokio::test]
    async fn test_save_and_discard_are_exclusive() {
        let out = tempfile::tempdir().unwrap();
        let mut artifact = TestArtifact::create(".png").unwrap();
        artifact.take(&FakeSnapshotter::new(), "device").await.unwrap();

        artifact.discard().await.unwrap();
        assert!(artifact.save(&out.path().join("x.png")).await.is_err());
        assert!(artifact.discard().await.is_err());
        assert!(!out.path().join("x.png").exists());
        assert_eq!(artifact.state(), ArtifactState::Discarded);
    }

    #[test]
    fn test_kill_without_take_removes_temp_file() {
        let mut artifact = TestArtifact::create(".png").unwrap();
        let temp = artifact.temp_path().unwrap().to_path_buf();
        assert!(temp.exists());

        artifact.kill();
        assert!(!temp.exists());
        assert_eq!(artifact.state(), ArtifactState::Killed);

        // Idempotent
        artifact.kill();
        assert_eq!(artifact.state(), ArtifactState::Killed);
    }

    #[tokio::test]
    async fn test_kill_after_save_keeps_saved_file() {
        let out = tempfile::tempdir().unwrap();
        let mut artifact = TestArtifact::create(".png").unwrap();
        artifact.take(&FakeSnapshotter::new(), "device").await.unwrap();
        let dest = out.path().join("after.png");
        artifact.save(&dest).await.unwrap();

        artifact.kill();
        assert!(dest.exists());
        assert_eq!(artifact.state(), ArtifactState::Saved);
    }

    #[tokio::test]
    async fn test_failed_capture_leaves_artifact_open() {
        let snapshotter = FakeSnapshotter::failing();
        let mut artifact = TestArtifact::create(".png").unwrap();
        assert!(artifact.take(&snapshotter, "device").await.is_err());
        assert_eq!(artifact.state(), ArtifactState::Idle);
        artifact.discard().await.unwrap();
    }
}
