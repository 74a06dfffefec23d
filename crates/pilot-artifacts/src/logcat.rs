//! Device log recording through `adb logcat`

use std::path::Path;

use pilot_core::prelude::*;
use pilot_device::{Adb, BackgroundProcess, CommandRunner, ProcessRunner};

use crate::artifact::Recorder;

/// Streams the device log of one test into a file
#[derive(Debug, Clone)]
pub struct LogcatRecorder<R = ProcessRunner> {
    adb: Adb<R>,
}

impl<R: CommandRunner + Sync> LogcatRecorder<R> {
    pub fn new(adb: Adb<R>) -> Self {
        Self { adb }
    }
}

impl<R: CommandRunner + Sync> Recorder for LogcatRecorder<R> {
    fn artifact_name(&self) -> &'static str {
        "device.log"
    }

    async fn start(&self, device_id: &str, destination: &Path) -> Result<BackgroundProcess> {
        // Each test's log starts empty
        if let Err(e) = self.adb.clear_logcat(device_id).await {
            warn!("Failed to clear logcat on {}: {}", device_id, e);
        }
        self.adb.spawn_logcat(device_id, destination)
    }
}
