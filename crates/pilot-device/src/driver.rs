//! The device driver seam
//!
//! A driver owns one device for the lifetime of an orchestrator: it acquires
//! it, (re)installs and launches the app under test, and releases it.

use pilot_core::prelude::*;
use pilot_core::{DeviceConfig, DeviceType, SessionConfig};

use crate::android::AndroidDriver;
use crate::simulator::SimulatorDriver;
use crate::tools::ToolPaths;

/// Launch argument carrying the relay server URL
pub const SERVER_ARG: &str = "pilotServer";
/// Launch argument carrying the session id
pub const SESSION_ID_ARG: &str = "pilotSessionId";

/// Device lifecycle operations
#[trait_variant::make(DeviceDriver: Send)]
pub trait LocalDeviceDriver {
    /// Platform label for logs
    fn platform(&self) -> &'static str;

    /// Identifier of the acquired device (adb serial or simulator UDID)
    fn device_id(&self) -> Option<&str>;

    /// Find or boot the configured device and make it ready for installs
    async fn acquire(&mut self) -> Result<String>;

    async fn install_app(&mut self) -> Result<()>;

    async fn uninstall_app(&mut self) -> Result<()>;

    /// Launch a fresh app instance bound to `session`, returning its PID
    async fn launch_app(&mut self, session: &SessionConfig) -> Result<u32>;

    async fn terminate_app(&mut self) -> Result<()>;

    /// Release per-session resources; the device keeps running
    async fn cleanup(&mut self) -> Result<()>;

    /// Power the device down
    async fn shutdown(&mut self) -> Result<()>;

    /// Abrupt-termination path; never suspends
    fn kill(&mut self);
}

/// The production drivers
#[derive(Debug)]
pub enum AnyDriver {
    Android(AndroidDriver),
    Simulator(SimulatorDriver),
}

impl AnyDriver {
    /// Build the driver for a parsed device type
    pub fn for_config(
        device_type: DeviceType,
        config: &DeviceConfig,
        tools: &ToolPaths,
    ) -> Result<Self> {
        match device_type {
            DeviceType::AndroidEmulator | DeviceType::AndroidAttached => Ok(AnyDriver::Android(
                AndroidDriver::from_config(device_type, config, tools)?,
            )),
            DeviceType::IosSimulator => Ok(AnyDriver::Simulator(SimulatorDriver::from_config(
                config, tools,
            )?)),
        }
    }
}

impl DeviceDriver for AnyDriver {
    fn platform(&self) -> &'static str {
        match self {
            AnyDriver::Android(d) => DeviceDriver::platform(d),
            AnyDriver::Simulator(d) => DeviceDriver::platform(d),
        }
    }

    fn device_id(&self) -> Option<&str> {
        match self {
            AnyDriver::Android(d) => DeviceDriver::device_id(d),
            AnyDriver::Simulator(d) => DeviceDriver::device_id(d),
        }
    }

    async fn acquire(&mut self) -> Result<String> {
        match self {
            AnyDriver::Android(d) => DeviceDriver::acquire(d).await,
            AnyDriver::Simulator(d) => DeviceDriver::acquire(d).await,
        }
    }

    async fn install_app(&mut self) -> Result<()> {
        match self {
            AnyDriver::Android(d) => DeviceDriver::install_app(d).await,
            AnyDriver::Simulator(d) => DeviceDriver::install_app(d).await,
        }
    }

    async fn uninstall_app(&mut self) -> Result<()> {
        match self {
            AnyDriver::Android(d) => DeviceDriver::uninstall_app(d).await,
            AnyDriver::Simulator(d) => DeviceDriver::uninstall_app(d).await,
        }
    }

    async fn launch_app(&mut self, session: &SessionConfig) -> Result<u32> {
        match self {
            AnyDriver::Android(d) => DeviceDriver::launch_app(d, session).await,
            AnyDriver::Simulator(d) => DeviceDriver::launch_app(d, session).await,
        }
    }

    async fn terminate_app(&mut self) -> Result<()> {
        match self {
            AnyDriver::Android(d) => DeviceDriver::terminate_app(d).await,
            AnyDriver::Simulator(d) => DeviceDriver::terminate_app(d).await,
        }
    }

    async fn cleanup(&mut self) -> Result<()> {
        match self {
            AnyDriver::Android(d) => DeviceDriver::cleanup(d).await,
            AnyDriver::Simulator(d) => DeviceDriver::cleanup(d).await,
        }
    }

    async fn shutdown(&mut self) -> Result<()> {
        match self {
            AnyDriver::Android(d) => DeviceDriver::shutdown(d).await,
            AnyDriver::Simulator(d) => DeviceDriver::shutdown(d).await,
        }
    }

    fn kill(&mut self) {
        match self {
            AnyDriver::Android(d) => DeviceDriver::kill(d),
            AnyDriver::Simulator(d) => DeviceDriver::kill(d),
        }
    }
}
