//! Screenshot snapshotters for Android devices and iOS simulators

use std::path::Path;

use chrono::Utc;

use pilot_core::prelude::*;
use pilot_device::{take_screenshot, Adb, CommandRunner, ProcessRunner};

use crate::artifact::Snapshotter;

/// Directory on the device that `screencap` writes into
const DEVICE_SCREENSHOT_DIR: &str = "/sdcard";

/// `screencap` on the device, pulled into the artifact file
#[derive(Debug, Clone)]
pub struct AdbScreenshotter<R = ProcessRunner> {
    adb: Adb<R>,
}

impl<R: CommandRunner + Sync> AdbScreenshotter<R> {
    pub fn new(adb: Adb<R>) -> Self {
        Self { adb }
    }
}

impl<R: CommandRunner + Sync> Snapshotter for AdbScreenshotter<R> {
    fn extension(&self) -> &'static str {
        ".png"
    }

    async fn capture(&self, device_id: &str, destination: &Path) -> Result<()> {
        let device_path = format!(
            "{}/pilot-{}.png",
            DEVICE_SCREENSHOT_DIR,
            Utc::now().timestamp_millis()
        );
        self.adb.screencap(device_id, &device_path).await?;
        let pulled = self.adb.pull(device_id, &device_path, destination).await;
        if let Err(e) = self.adb.rm(device_id, &device_path).await {
            warn!("Failed to remove {} from {}: {}", device_path, device_id, e);
        }
        pulled
    }
}

/// `simctl io screenshot` straight into the artifact file
#[derive(Debug, Clone)]
pub struct SimulatorScreenshotter<R = ProcessRunner> {
    runner: R,
    xcrun: String,
}

impl<R: CommandRunner + Sync> SimulatorScreenshotter<R> {
    pub fn new(runner: R, xcrun: impl Into<String>) -> Self {
        Self {
            runner,
            xcrun: xcrun.into(),
        }
    }
}

impl<R: CommandRunner + Sync> Snapshotter for SimulatorScreenshotter<R> {
    fn extension(&self) -> &'static str {
        ".png"
    }

    async fn capture(&self, device_id: &str, destination: &Path) -> Result<()> {
        take_screenshot(&self.runner, &self.xcrun, device_id, destination).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pilot_device::test_utils::ScriptedRunner;

    #[tokio::test]
    async fn test_adb_screenshot_pulls_and_cleans_up() {
        let runner = ScriptedRunner::new();
        let shooter = AdbScreenshotter::new(Adb::new(runner.clone(), "adb"));

        Snapshotter::capture(&shooter, "emulator-5554", Path::new("/tmp/shot.png"))
            .await
            .unwrap();

        let commands = runner.commands();
        assert_eq!(commands.len(), 3);
        assert!(commands[0].starts_with("\"adb\" -s emulator-5554 shell \"screencap -p /sdcard/pilot-"));
        assert!(commands[1].starts_with("\"adb\" -s emulator-5554 pull /sdcard/pilot-"));
        assert!(commands[1].ends_with(" /tmp/shot.png"));
        assert!(commands[2].contains("rm -f /sdcard/pilot-"));
    }

    #[tokio::test]
    async fn test_adb_screenshot_removes_device_file_when_pull_fails() {
        let runner = ScriptedRunner::new();
        runner.fail(" pull ", "remote object does not exist");
        let shooter = AdbScreenshotter::new(Adb::new(runner.clone(), "adb"));

        let result =
            Snapshotter::capture(&shooter, "emulator-5554", Path::new("/tmp/shot.png")).await;
        assert!(matches!(result, Err(Error::CommandFailed { .. })));
        assert!(runner.ran("rm -f /sdcard/pilot-"));
    }

    #[tokio::test]
    async fn test_simulator_screenshot() {
        let runner = ScriptedRunner::new();
        let shooter = SimulatorScreenshotter::new(runner.clone(), "xcrun");

        Snapshotter::capture(&shooter, "BBB-172", Path::new("/tmp/shot.png"))
            .await
            .unwrap();
        assert_eq!(
            runner.commands(),
            vec!["\"xcrun\" simctl io BBB-172 screenshot /tmp/shot.png".to_string()]
        );
    }
}
