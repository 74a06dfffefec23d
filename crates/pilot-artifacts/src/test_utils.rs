//! Test utilities for the artifact pipeline

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use pilot_core::prelude::*;
use pilot_core::TestSummary;
use pilot_device::BackgroundProcess;

use crate::api::ArtifactsApi;
use crate::artifact::{Recorder, Snapshotter};

#[derive(Debug, Default)]
struct CaptureLog {
    count: usize,
    last_destination: Option<PathBuf>,
}

/// Snapshotter writing `snapshot <n> of <device>` into each file
#[derive(Debug, Clone, Default)]
pub struct FakeSnapshotter {
    log: Arc<Mutex<CaptureLog>>,
    failing: bool,
}

impl FakeSnapshotter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A snapshotter whose every capture fails
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn captures(&self) -> usize {
        self.log.lock().unwrap().count
    }

    pub fn last_destination(&self) -> Option<PathBuf> {
        self.log.lock().unwrap().last_destination.clone()
    }
}

impl Snapshotter for FakeSnapshotter {
    fn extension(&self) -> &'static str {
        ".png"
    }

    async fn capture(&self, device_id: &str, destination: &Path) -> Result<()> {
        if self.failing {
            return Err(Error::device("screen capture failed"));
        }
        let count = {
            let mut log = self.log.lock().unwrap();
            log.count += 1;
            log.last_destination = Some(destination.to_path_buf());
            log.count
        };
        tokio::fs::write(destination, format!("snapshot {count} of {device_id}")).await?;
        Ok(())
    }
}

/// Recorder writing fixed contents and returning a process-less handle
#[derive(Debug, Clone)]
pub struct FakeRecorder {
    contents: String,
    log: Arc<Mutex<CaptureLog>>,
}

impl FakeRecorder {
    pub fn new(contents: &str) -> Self {
        Self {
            contents: contents.to_string(),
            log: Arc::default(),
        }
    }

    pub fn starts(&self) -> usize {
        self.log.lock().unwrap().count
    }

    pub fn last_destination(&self) -> Option<PathBuf> {
        self.log.lock().unwrap().last_destination.clone()
    }
}

impl Recorder for FakeRecorder {
    fn artifact_name(&self) -> &'static str {
        "device.log"
    }

    async fn start(&self, device_id: &str, destination: &Path) -> Result<BackgroundProcess> {
        {
            let mut log = self.log.lock().unwrap();
            log.count += 1;
            log.last_destination = Some(destination.to_path_buf());
        }
        tokio::fs::write(destination, &self.contents).await?;
        Ok(BackgroundProcess::detached(format!("record {device_id}")))
    }
}

/// Plugin recording every hook call, in order.
///
/// Events look like `before:<full name>`, `after:<full name>:<status>`,
/// `terminate` and `kill`.
#[derive(Debug, Clone, Default)]
pub struct RecordingPlugin {
    events: Arc<Mutex<Vec<String>>>,
}

impl RecordingPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    pub async fn on_before_test(&mut self, _api: &ArtifactsApi, summary: &TestSummary) -> Result<()> {
        self.push(format!("before:{}", summary.full_name));
        Ok(())
    }

    pub async fn on_after_test(&mut self, _api: &ArtifactsApi, summary: &TestSummary) -> Result<()> {
        let status = format!("{:?}", summary.status).to_lowercase();
        self.push(format!("after:{}:{}", summary.full_name, status));
        Ok(())
    }

    pub async fn on_terminate(&mut self) -> Result<()> {
        self.push("terminate".to_string());
        Ok(())
    }

    pub fn on_kill(&mut self) {
        self.push("kill".to_string());
    }
}
