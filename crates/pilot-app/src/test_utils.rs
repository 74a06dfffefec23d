//! Test utilities for the orchestrator
//!
//! [`FakeToolkit`] hands out a [`FakeDriver`], a shared
//! [`FakeAppClient`] and a [`RecordingPlugin`], so a whole session can run
//! without devices or sockets.

use std::sync::{Arc, Mutex};

use pilot_artifacts::test_utils::RecordingPlugin;
use pilot_artifacts::ArtifactPlugin;
use pilot_client::test_utils::FakeAppClient;
use pilot_core::prelude::*;
use pilot_core::{DeviceConfig, DeviceType, SessionConfig};
use pilot_device::DeviceDriver;

use crate::settings::Settings;
use crate::toolkit::Toolkit;

/// Id every fake driver acquires
pub const FAKE_DEVICE_ID: &str = "fake-device-1";

#[derive(Debug, Default)]
struct DriverLog {
    calls: Vec<&'static str>,
    launches: Vec<SessionConfig>,
}

/// Driver recording calls into a log shared with its toolkit
#[derive(Debug)]
pub struct FakeDriver {
    log: Arc<Mutex<DriverLog>>,
    device_id: Option<String>,
    fail_acquire: bool,
}

impl FakeDriver {
    fn record(&self, call: &'static str) {
        self.log.lock().unwrap().calls.push(call);
    }
}

impl DeviceDriver for FakeDriver {
    fn platform(&self) -> &'static str {
        "fake"
    }

    fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    async fn acquire(&mut self) -> Result<String> {
        self.record("acquire");
        if self.fail_acquire {
            return Err(Error::device_not_found("fake device"));
        }
        self.device_id = Some(FAKE_DEVICE_ID.to_string());
        Ok(FAKE_DEVICE_ID.to_string())
    }

    async fn install_app(&mut self) -> Result<()> {
        self.record("install_app");
        Ok(())
    }

    async fn uninstall_app(&mut self) -> Result<()> {
        self.record("uninstall_app");
        Ok(())
    }

    async fn launch_app(&mut self, session: &SessionConfig) -> Result<u32> {
        let mut log = self.log.lock().unwrap();
        log.calls.push("launch_app");
        log.launches.push(session.clone());
        Ok(4242 + log.launches.len() as u32)
    }

    async fn terminate_app(&mut self) -> Result<()> {
        self.record("terminate_app");
        Ok(())
    }

    async fn cleanup(&mut self) -> Result<()> {
        self.record("cleanup");
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.record("shutdown");
        Ok(())
    }

    fn kill(&mut self) {
        self.record("kill");
    }
}

/// Toolkit whose products all report to shared recorders
#[derive(Debug, Clone, Default)]
pub struct FakeToolkit {
    driver_log: Arc<Mutex<DriverLog>>,
    clients: Arc<Mutex<Vec<SessionConfig>>>,
    client: FakeAppClient,
    plugin: RecordingPlugin,
    fail_acquire: bool,
}

impl FakeToolkit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drivers from this toolkit find no device
    pub fn failing_acquire() -> Self {
        Self {
            fail_acquire: true,
            ..Self::default()
        }
    }

    pub fn client(&self) -> &FakeAppClient {
        &self.client
    }

    pub fn plugin(&self) -> &RecordingPlugin {
        &self.plugin
    }

    pub fn driver_calls(&self) -> Vec<&'static str> {
        self.driver_log.lock().unwrap().calls.clone()
    }

    pub fn driver_count(&self, call: &str) -> usize {
        self.driver_calls().iter().filter(|c| **c == call).count()
    }

    /// Sessions the app was launched with, in order
    pub fn launches(&self) -> Vec<SessionConfig> {
        self.driver_log.lock().unwrap().launches.clone()
    }

    /// Sessions clients were created for
    pub fn client_sessions(&self) -> Vec<SessionConfig> {
        self.clients.lock().unwrap().clone()
    }
}

impl Toolkit for FakeToolkit {
    type Driver = FakeDriver;
    type Client = FakeAppClient;

    fn create_driver(
        &self,
        _device_type: DeviceType,
        _config: &DeviceConfig,
    ) -> Result<Self::Driver> {
        Ok(FakeDriver {
            log: Arc::clone(&self.driver_log),
            device_id: None,
            fail_acquire: self.fail_acquire,
        })
    }

    fn create_client(&self, session: &SessionConfig) -> Self::Client {
        self.clients.lock().unwrap().push(session.clone());
        self.client.clone()
    }

    fn create_plugins(
        &self,
        _device_type: DeviceType,
        _config: &DeviceConfig,
        _settings: &Settings,
    ) -> Vec<ArtifactPlugin> {
        vec![ArtifactPlugin::Recording(self.plugin.clone())]
    }
}
