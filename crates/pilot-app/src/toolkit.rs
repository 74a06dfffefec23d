//! Factory seam for the orchestrator's collaborators

use pilot_artifacts::{
    AdbScreenshotter, ArtifactPlugin, LogcatRecorder, SimulatorScreenshotter, TwoSnapshotsPerTest,
    WholeTestRecording,
};
use pilot_client::{AppClient, WsClient};
use pilot_core::prelude::*;
use pilot_core::{DeviceConfig, DeviceType, SessionConfig};
use pilot_device::{Adb, AnyDriver, DeviceDriver, ProcessRunner, ToolPaths};

use crate::settings::Settings;

/// Builds the driver, sync client and artifact plugins of one session
pub trait Toolkit {
    type Driver: DeviceDriver;
    type Client: AppClient + Sync;

    fn create_driver(&self, device_type: DeviceType, config: &DeviceConfig)
        -> Result<Self::Driver>;

    fn create_client(&self, session: &SessionConfig) -> Self::Client;

    /// Every plugin for the platform, enabled or not
    fn create_plugins(
        &self,
        device_type: DeviceType,
        config: &DeviceConfig,
        settings: &Settings,
    ) -> Vec<ArtifactPlugin>;
}

/// Real devices over adb/simctl and a WebSocket sync client
#[derive(Debug, Clone)]
pub struct NativeToolkit {
    tools: ToolPaths,
}

impl NativeToolkit {
    /// Locate the device tools on this machine
    pub fn new() -> Self {
        Self::with_tools(ToolPaths::locate())
    }

    pub fn with_tools(tools: ToolPaths) -> Self {
        Self { tools }
    }

    pub fn tools(&self) -> &ToolPaths {
        &self.tools
    }
}

impl Default for NativeToolkit {
    fn default() -> Self {
        Self::new()
    }
}

impl Toolkit for NativeToolkit {
    type Driver = AnyDriver;
    type Client = WsClient;

    fn create_driver(
        &self,
        device_type: DeviceType,
        config: &DeviceConfig,
    ) -> Result<Self::Driver> {
        AnyDriver::for_config(device_type, config, &self.tools)
    }

    fn create_client(&self, session: &SessionConfig) -> Self::Client {
        WsClient::new(session.clone())
    }

    fn create_plugins(
        &self,
        device_type: DeviceType,
        _config: &DeviceConfig,
        settings: &Settings,
    ) -> Vec<ArtifactPlugin> {
        if device_type.is_android() {
            let adb = Adb::with_path(&self.tools.adb);
            vec![
                ArtifactPlugin::AdbScreenshots(TwoSnapshotsPerTest::new(
                    settings.take_screenshots,
                    AdbScreenshotter::new(adb.clone()),
                )),
                ArtifactPlugin::Logcat(WholeTestRecording::new(
                    settings.record_logs,
                    LogcatRecorder::new(adb),
                )),
            ]
        } else {
            vec![ArtifactPlugin::SimulatorScreenshots(TwoSnapshotsPerTest::new(
                settings.take_screenshots,
                SimulatorScreenshotter::new(ProcessRunner, &self.tools.xcrun),
            ))]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pilot_core::CaptureMode;

    fn toolkit() -> NativeToolkit {
        NativeToolkit::with_tools(ToolPaths::default())
    }

    #[test]
    fn test_android_plugins() {
        let config = DeviceConfig::new("android.attached", "SERIAL")
            .with_binary("app.apk")
            .with_package("com.example");
        let settings = Settings {
            take_screenshots: CaptureMode::Failing,
            ..Settings::default()
        };

        let plugins = toolkit().create_plugins(DeviceType::AndroidAttached, &config, &settings);
        let names: Vec<_> = plugins.iter().map(ArtifactPlugin::name).collect();
        assert_eq!(names, vec!["screenshot", "log"]);
        match &plugins[0] {
            ArtifactPlugin::AdbScreenshots(p) => assert_eq!(p.mode(), CaptureMode::Failing),
            other => panic!("unexpected plugin {other:?}"),
        }
    }

    #[test]
    fn test_simulator_plugins() {
        let config = DeviceConfig::new("ios.simulator", "iPhone 15")
            .with_binary("Example.app")
            .with_package("com.example.Example");
        let plugins =
            toolkit().create_plugins(DeviceType::IosSimulator, &config, &Settings::default());
        assert!(matches!(plugins[..], [ArtifactPlugin::SimulatorScreenshots(_)]));
    }

    #[test]
    fn test_driver_and_client() {
        let config = DeviceConfig::new("ios.simulator", "iPhone 15")
            .with_binary("Example.app")
            .with_package("com.example.Example");
        let driver = toolkit()
            .create_driver(DeviceType::IosSimulator, &config)
            .unwrap();
        assert_eq!(driver.platform(), "ios");

        let session = SessionConfig::new("ws://127.0.0.1:8099", "abc");
        let client = toolkit().create_client(&session);
        assert_eq!(client.session(), &session);
    }
}
