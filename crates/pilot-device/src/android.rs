//! Android driver for attached devices and emulators

use std::collections::HashSet;
use std::time::{Duration, Instant};

use pilot_core::prelude::*;
use pilot_core::{DeviceConfig, DeviceType, SessionConfig};

use crate::adb::{Adb, DeviceListing};
use crate::avd;
use crate::console::{EmulatorConsole, TelnetConsole};
use crate::descriptor::DeviceDescriptor;
use crate::driver::{DeviceDriver, SERVER_ARG, SESSION_ID_ARG};
use crate::exec::{BackgroundProcess, CommandRunner, ProcessRunner};
use crate::tools::ToolPaths;

/// Time allowed for a freshly booted emulator to appear and finish booting
const DEFAULT_BOOT_TIMEOUT: Duration = Duration::from_secs(300);
/// Time allowed for the app process to show up after instrumentation starts
const DEFAULT_PID_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Grace period for the instrumentation process to exit after a kill
const INSTRUMENTATION_STOP_GRACE: Duration = Duration::from_secs(2);

/// Driver for `android.attached` and `android.emulator` configurations
#[derive(Debug)]
pub struct AndroidDriver<R = ProcessRunner, C = TelnetConsole> {
    device_type: DeviceType,
    adb: Adb<R>,
    console: C,
    emulator_path: String,
    /// AVD name or adb serial
    target: String,
    binary_path: String,
    test_binary_path: Option<String>,
    package: String,
    serial: Option<String>,
    instrumentation: Option<BackgroundProcess>,
    /// Host port forwarded to the device for a loopback session server
    reversed_port: Option<u16>,
    boot_timeout: Duration,
    pid_timeout: Duration,
}

impl AndroidDriver {
    pub fn from_config(
        device_type: DeviceType,
        config: &DeviceConfig,
        tools: &ToolPaths,
    ) -> Result<Self> {
        Self::with_parts(
            device_type,
            config,
            Adb::with_path(&tools.adb),
            TelnetConsole::new(),
            &tools.emulator,
        )
    }
}

impl<R, C> AndroidDriver<R, C>
where
    R: CommandRunner + Sync,
    C: EmulatorConsole + Sync,
{
    pub fn with_parts(
        device_type: DeviceType,
        config: &DeviceConfig,
        adb: Adb<R>,
        console: C,
        emulator_path: &str,
    ) -> Result<Self> {
        if !device_type.is_android() {
            return Err(Error::unsupported_device_type(device_type.as_str()));
        }
        let package = config
            .package
            .clone()
            .ok_or_else(|| Error::config(format!("'{}' needs a package", config.name)))?;
        if config.name.is_empty() {
            return Err(Error::config(format!("{device_type} configuration needs a name")));
        }

        Ok(Self {
            device_type,
            adb,
            console,
            emulator_path: emulator_path.to_string(),
            target: config.name.clone(),
            binary_path: config.binary_path.clone(),
            test_binary_path: config.test_binary_path.clone(),
            package,
            serial: None,
            instrumentation: None,
            reversed_port: None,
            boot_timeout: DEFAULT_BOOT_TIMEOUT,
            pid_timeout: DEFAULT_PID_TIMEOUT,
        })
    }

    pub fn with_timeouts(mut self, boot_timeout: Duration, pid_timeout: Duration) -> Self {
        self.boot_timeout = boot_timeout;
        self.pid_timeout = pid_timeout;
        self
    }

    pub fn adb(&self) -> &Adb<R> {
        &self.adb
    }

    fn serial(&self) -> Result<&str> {
        self.serial
            .as_deref()
            .ok_or_else(|| Error::device("no Android device acquired"))
    }

    /// Package name of the instrumentation APK
    fn test_package(&self) -> String {
        format!("{}.test", self.package)
    }

    async fn acquire_attached(&self) -> Result<String> {
        let listing = self.adb.devices().await?;
        let device = listing
            .find(&self.target)
            .ok_or_else(|| Error::device_not_found(&self.target))?;
        if !device.is_online() {
            return Err(Error::device(format!(
                "{} is {}",
                device.adb_name, device.status
            )));
        }
        Ok(device.adb_name.clone())
    }

    /// First online emulator in the listing running the target AVD
    async fn find_running_emulator(&self, listing: &DeviceListing) -> Option<String> {
        for device in listing
            .devices
            .iter()
            .filter(|d| d.kind.is_emulator() && d.is_online())
        {
            if self.runs_target(device).await {
                return Some(device.adb_name.clone());
            }
        }
        None
    }

    async fn runs_target(&self, device: &DeviceDescriptor) -> bool {
        match device.query_name(&self.console).await {
            Ok(Some(name)) => name == self.target,
            Ok(None) => false,
            Err(e) => {
                warn!("Cannot query AVD name of {}: {}", device.adb_name, e);
                false
            }
        }
    }

    async fn acquire_emulator(&self) -> Result<String> {
        let listing = self.adb.devices().await?;
        if let Some(serial) = self.find_running_emulator(&listing).await {
            info!("Reusing running emulator {} ({})", serial, self.target);
            return Ok(serial);
        }

        let known: HashSet<String> = listing
            .devices
            .iter()
            .filter(|d| d.kind.is_emulator())
            .map(|d| d.adb_name.clone())
            .collect();

        avd::boot_avd(self.adb.runner(), &self.emulator_path, &self.target).await?;
        let serial = self.wait_for_new_emulator(&known).await?;
        self.adb.wait_for_boot(&serial, self.boot_timeout).await?;
        Ok(serial)
    }

    /// Poll `adb devices` until an emulator not in `known` runs the target AVD
    async fn wait_for_new_emulator(&self, known: &HashSet<String>) -> Result<String> {
        let start = Instant::now();
        loop {
            match self.adb.devices().await {
                Ok(listing) => {
                    for device in listing
                        .devices
                        .iter()
                        .filter(|d| d.kind.is_emulator() && !known.contains(&d.adb_name))
                    {
                        if self.runs_target(device).await {
                            info!("{} appeared as {}", self.target, device.adb_name);
                            return Ok(device.adb_name.clone());
                        }
                    }
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => debug!("adb devices failed while waiting for boot: {}", e),
            }

            if start.elapsed() >= self.boot_timeout {
                return Err(Error::timeout(format!(
                    "waiting for emulator {} to appear",
                    self.target
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn wait_for_pid(&self, serial: &str) -> Result<u32> {
        let start = Instant::now();
        loop {
            if let Some(pid) = self.adb.pidof(serial, &self.package).await? {
                return Ok(pid);
            }
            if self
                .instrumentation
                .as_ref()
                .is_some_and(BackgroundProcess::has_exited)
            {
                return Err(Error::device(format!(
                    "instrumentation for {} exited before the app started",
                    self.package
                )));
            }
            if start.elapsed() >= self.pid_timeout {
                return Err(Error::timeout(format!("waiting for {} to start", self.package)));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn stop_instrumentation(&mut self) {
        if let Some(mut process) = self.instrumentation.take() {
            process.stop(INSTRUMENTATION_STOP_GRACE).await;
        }
    }

    /// Make a server on this host's loopback reachable from the device
    async fn forward_session_port(&mut self, serial: &str, session: &SessionConfig) -> Result<()> {
        let Some(port) = session.loopback_port() else {
            return Ok(());
        };
        if self.reversed_port == Some(port) {
            return Ok(());
        }
        self.remove_session_port().await;
        self.adb.reverse(serial, port).await?;
        debug!("Forwarding tcp:{} on {} to the host", port, serial);
        self.reversed_port = Some(port);
        Ok(())
    }

    async fn remove_session_port(&mut self) {
        let Some(port) = self.reversed_port.take() else {
            return;
        };
        let Some(serial) = self.serial.as_deref() else {
            return;
        };
        if let Err(e) = self.adb.remove_reverse(serial, port).await {
            warn!("Failed to remove port forward tcp:{} on {}: {}", port, serial, e);
        }
    }
}

impl<R, C> DeviceDriver for AndroidDriver<R, C>
where
    R: CommandRunner + Sync,
    C: EmulatorConsole + Sync,
{
    fn platform(&self) -> &'static str {
        "android"
    }

    fn device_id(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    async fn acquire(&mut self) -> Result<String> {
        let serial = match self.device_type {
            DeviceType::AndroidEmulator => self.acquire_emulator().await?,
            _ => self.acquire_attached().await?,
        };
        self.adb.unlock_screen(&serial).await?;
        info!("Acquired {} ({})", serial, self.target);
        self.serial = Some(serial.clone());
        Ok(serial)
    }

    async fn install_app(&mut self) -> Result<()> {
        let serial = self.serial()?;
        self.adb.install(serial, &self.binary_path).await?;
        if let Some(test_binary) = &self.test_binary_path {
            self.adb.install(serial, test_binary).await?;
        }
        Ok(())
    }

    async fn uninstall_app(&mut self) -> Result<()> {
        let serial = self.serial()?;
        self.adb.uninstall(serial, &self.package).await?;
        if self.test_binary_path.is_some() {
            self.adb.uninstall(serial, &self.test_package()).await?;
        }
        Ok(())
    }

    async fn launch_app(&mut self, session: &SessionConfig) -> Result<u32> {
        self.stop_instrumentation().await;

        let serial = self.serial()?.to_string();
        self.forward_session_port(&serial, session).await?;
        let runner = self
            .adb
            .instrumentation_runner(&serial, &self.package)
            .await?;
        let extras = [
            (SERVER_ARG, session.server.as_str()),
            (SESSION_ID_ARG, session.session_id.as_str()),
        ];
        self.instrumentation = Some(self.adb.spawn_instrumentation(&serial, &runner, &extras)?);

        let pid = self.wait_for_pid(&serial).await?;
        info!("{} launched on {} with pid {}", self.package, serial, pid);
        Ok(pid)
    }

    async fn terminate_app(&mut self) -> Result<()> {
        self.stop_instrumentation().await;
        let serial = self.serial()?;
        self.adb.terminate(serial, &self.package).await
    }

    async fn cleanup(&mut self) -> Result<()> {
        self.stop_instrumentation().await;
        self.remove_session_port().await;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.stop_instrumentation().await;
        self.remove_session_port().await;
        let Some(serial) = self.serial.take() else {
            return Ok(());
        };
        if self.device_type == DeviceType::AndroidEmulator {
            info!("Shutting down emulator {}", serial);
            self.adb.emu_kill(&serial).await?;
        }
        Ok(())
    }

    fn kill(&mut self) {
        if let Some(mut process) = self.instrumentation.take() {
            process.kill();
        }
    }
}
