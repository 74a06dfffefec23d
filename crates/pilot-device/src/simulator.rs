//! iOS simulator driver built on `xcrun simctl`

use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};

use serde::Deserialize;

use pilot_core::prelude::*;
use pilot_core::{DeviceConfig, SessionConfig};

use crate::driver::{DeviceDriver, SERVER_ARG, SESSION_ID_ARG};
use crate::exec::{CommandRunner, CommandSpec, ExecOptions, ProcessRunner};
use crate::tools::ToolPaths;

const DEFAULT_BOOT_TIMEOUT: Duration = Duration::from_secs(120);
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A simulator listed by `simctl list devices -j`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IosSimulator {
    pub udid: String,
    pub name: String,
    /// Friendly runtime name, e.g. "iOS 17.2"
    pub runtime: String,
    pub state: SimulatorState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatorState {
    Shutdown,
    Booted,
    Booting,
    Unknown,
}

impl From<&str> for SimulatorState {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "shutdown" => SimulatorState::Shutdown,
            "booted" => SimulatorState::Booted,
            "booting" => SimulatorState::Booting,
            _ => SimulatorState::Unknown,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SimctlOutput {
    devices: HashMap<String, Vec<SimctlDevice>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SimctlDevice {
    udid: String,
    name: String,
    state: String,
    is_available: Option<bool>,
}

/// Parse `simctl list devices -j`, dropping unavailable simulators
pub fn parse_simctl_devices(json: &str) -> Result<Vec<IosSimulator>> {
    let parsed: SimctlOutput = serde_json::from_str(json)
        .map_err(|e| Error::parse(format!("Failed to parse simctl output: {e}")))?;

    let mut simulators: Vec<IosSimulator> = parsed
        .devices
        .into_iter()
        .flat_map(|(runtime_key, devices)| {
            let runtime = parse_runtime_name(&runtime_key);
            devices
                .into_iter()
                .filter(|d| d.is_available != Some(false))
                .map(move |d| IosSimulator {
                    udid: d.udid,
                    name: d.name,
                    runtime: runtime.clone(),
                    state: SimulatorState::from(d.state.as_str()),
                })
        })
        .collect();

    // Newest runtime first, then by name
    simulators.sort_by(|a, b| b.runtime.cmp(&a.runtime).then_with(|| a.name.cmp(&b.name)));
    Ok(simulators)
}

/// "com.apple.CoreSimulator.SimRuntime.iOS-17-2" -> "iOS 17.2"
fn parse_runtime_name(identifier: &str) -> String {
    match identifier.strip_prefix("com.apple.CoreSimulator.SimRuntime.") {
        Some(suffix) => match suffix.split_once('-') {
            Some((os_name, version)) => format!("{} {}", os_name, version.replace('-', ".")),
            None => suffix.to_string(),
        },
        None => identifier.to_string(),
    }
}

/// Pick the simulator matching `query` by UDID or name, optionally restricted
/// to a runtime. Booted candidates win over shut down ones.
pub fn select_simulator<'a>(
    simulators: &'a [IosSimulator],
    query: &str,
    os: Option<&str>,
) -> Option<&'a IosSimulator> {
    let mut candidates = simulators.iter().filter(|sim| {
        (sim.udid == query || sim.name == query) && os.map_or(true, |os| sim.runtime == os)
    });
    let first = candidates.next()?;
    if first.state == SimulatorState::Booted {
        return Some(first);
    }
    candidates
        .find(|sim| sim.state == SimulatorState::Booted)
        .or(Some(first))
}

/// Extract the PID from `simctl launch` output (`<bundle>: <pid>`)
fn parse_launch_pid(output: &str, bundle_id: &str) -> Result<u32> {
    output
        .lines()
        .filter_map(|line| line.trim().split_once(": "))
        .find(|(bundle, _)| *bundle == bundle_id)
        .and_then(|(_, pid)| pid.trim().parse().ok())
        .ok_or_else(|| Error::parse(format!("no PID for {bundle_id} in launch output: {output:?}")))
}

/// `simctl io <udid> screenshot <path>`
pub async fn take_screenshot<R: CommandRunner>(
    runner: &R,
    xcrun: &str,
    udid: &str,
    path: &Path,
) -> Result<()> {
    let path = path.to_string_lossy();
    let spec = CommandSpec::new(xcrun).args(["simctl", "io", udid, "screenshot", &*path]);
    runner.execute(&spec, &ExecOptions::default()).await?;
    Ok(())
}

/// Driver for `ios.simulator` configurations
#[derive(Debug)]
pub struct SimulatorDriver<R = ProcessRunner> {
    runner: R,
    xcrun: String,
    /// Simulator name or UDID
    target: String,
    os: Option<String>,
    binary_path: String,
    bundle_id: String,
    udid: Option<String>,
    boot_timeout: Duration,
}

impl SimulatorDriver {
    pub fn from_config(config: &DeviceConfig, tools: &ToolPaths) -> Result<Self> {
        Self::with_runner(config, ProcessRunner::new(), &tools.xcrun)
    }
}

impl<R: CommandRunner + Sync> SimulatorDriver<R> {
    pub fn with_runner(config: &DeviceConfig, runner: R, xcrun: &str) -> Result<Self> {
        let bundle_id = config
            .package
            .clone()
            .ok_or_else(|| Error::config(format!("'{}' needs a bundle id", config.name)))?;
        if config.name.is_empty() {
            return Err(Error::config("ios.simulator configuration needs a name"));
        }

        Ok(Self {
            runner,
            xcrun: xcrun.to_string(),
            target: config.name.clone(),
            os: config.os.clone(),
            binary_path: config.binary_path.clone(),
            bundle_id,
            udid: None,
            boot_timeout: DEFAULT_BOOT_TIMEOUT,
        })
    }

    pub fn with_boot_timeout(mut self, boot_timeout: Duration) -> Self {
        self.boot_timeout = boot_timeout;
        self
    }

    fn simctl<'a>(&self, args: impl IntoIterator<Item = &'a str>) -> CommandSpec {
        CommandSpec::new(&self.xcrun).arg("simctl").args(args)
    }

    fn udid(&self) -> Result<&str> {
        self.udid
            .as_deref()
            .ok_or_else(|| Error::device("no simulator acquired"))
    }

    pub async fn list(&self) -> Result<Vec<IosSimulator>> {
        let output = self
            .runner
            .execute(
                &self.simctl(["list", "devices", "-j"]),
                &ExecOptions::default(),
            )
            .await?;
        parse_simctl_devices(&output.stdout)
    }

    async fn is_booted(&self, udid: &str) -> Result<bool> {
        Ok(self
            .list()
            .await?
            .iter()
            .any(|sim| sim.udid == udid && sim.state == SimulatorState::Booted))
    }

    async fn boot(&self, udid: &str) -> Result<()> {
        info!("Booting simulator {}", udid);
        match self
            .runner
            .execute(&self.simctl(["boot", udid]), &ExecOptions::default())
            .await
        {
            Ok(_) => {}
            // "Unable to boot device in current state: Booted"
            Err(Error::CommandFailed { ref stderr, .. }) if stderr.contains("Booted") => {}
            Err(e) => return Err(e),
        }

        let start = Instant::now();
        while start.elapsed() < self.boot_timeout {
            if self.is_booted(udid).await? {
                return Ok(());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        Err(Error::timeout(format!("booting simulator {udid}")))
    }

    /// Save a screenshot of the acquired simulator to `path`
    pub async fn screenshot(&self, path: &Path) -> Result<()> {
        take_screenshot(&self.runner, &self.xcrun, self.udid()?, path).await
    }
}

impl<R: CommandRunner + Sync> DeviceDriver for SimulatorDriver<R> {
    fn platform(&self) -> &'static str {
        "ios"
    }

    fn device_id(&self) -> Option<&str> {
        self.udid.as_deref()
    }

    async fn acquire(&mut self) -> Result<String> {
        let simulators = self.list().await?;
        let sim = select_simulator(&simulators, &self.target, self.os.as_deref())
            .ok_or_else(|| match &self.os {
                Some(os) => Error::device_not_found(format!("{} ({})", self.target, os)),
                None => Error::device_not_found(&self.target),
            })?
            .clone();

        if sim.state != SimulatorState::Booted {
            self.boot(&sim.udid).await?;
        }
        debug!("Acquired simulator {} ({}, {})", sim.name, sim.udid, sim.runtime);
        self.udid = Some(sim.udid.clone());
        Ok(sim.udid)
    }

    async fn install_app(&mut self) -> Result<()> {
        let udid = self.udid()?;
        self.runner
            .execute(
                &self.simctl(["install", udid, self.binary_path.as_str()]),
                &ExecOptions::default(),
            )
            .await?;
        Ok(())
    }

    async fn uninstall_app(&mut self) -> Result<()> {
        let udid = self.udid()?;
        self.runner
            .execute(
                &self.simctl(["uninstall", udid, self.bundle_id.as_str()]),
                &ExecOptions::default(),
            )
            .await?;
        Ok(())
    }

    async fn launch_app(&mut self, session: &SessionConfig) -> Result<u32> {
        let udid = self.udid()?;
        let server_flag = format!("-{SERVER_ARG}");
        let session_flag = format!("-{SESSION_ID_ARG}");
        let spec = self.simctl(["launch", udid, self.bundle_id.as_str(), "--args"]).args([
            server_flag.as_str(),
            session.server.as_str(),
            session_flag.as_str(),
            session.session_id.as_str(),
        ]);
        let output = self.runner.execute(&spec, &ExecOptions::default()).await?;
        let pid = parse_launch_pid(&output.stdout, &self.bundle_id)?;
        info!("Launched {} on {} as pid {}", self.bundle_id, udid, pid);
        Ok(pid)
    }

    async fn terminate_app(&mut self) -> Result<()> {
        let udid = self.udid()?;
        match self
            .runner
            .execute(
                &self.simctl(["terminate", udid, self.bundle_id.as_str()]),
                &ExecOptions::default(),
            )
            .await
        {
            Ok(_) => Ok(()),
            // Terminating an app that is not running is fine
            Err(Error::CommandFailed { ref stderr, .. }) if stderr.contains("found nothing to terminate") => {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn cleanup(&mut self) -> Result<()> {
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        let Some(udid) = self.udid.take() else {
            return Ok(());
        };
        match self
            .runner
            .execute(&self.simctl(["shutdown", udid.as_str()]), &ExecOptions::default())
            .await
        {
            Ok(_) => Ok(()),
            // "Unable to shutdown device in current state: Shutdown"
            Err(Error::CommandFailed { ref stderr, .. }) if stderr.contains("Shutdown") => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn kill(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ScriptedRunner;

    const LISTING: &str = r#"{
        "devices": {
            "com.apple.CoreSimulator.SimRuntime.iOS-17-2": [
                {"udid": "AAA-172", "name": "iPhone 15", "state": "Shutdown", "isAvailable": true},
                {"udid": "BBB-172", "name": "iPhone 15 Pro", "state": "Booted", "isAvailable": true}
            ],
            "com.apple.CoreSimulator.SimRuntime.iOS-16-4": [
                {"udid": "CCC-164", "name": "iPhone 15", "state": "Booted", "isAvailable": true},
                {"udid": "DDD-164", "name": "iPhone 8", "state": "Shutdown", "isAvailable": false}
            ]
        }
    }"#;

    fn driver(runner: ScriptedRunner, name: &str, os: Option<&str>) -> SimulatorDriver<ScriptedRunner> {
        let mut config = DeviceConfig::new("ios.simulator", name)
            .with_binary("/build/App.app")
            .with_package("com.example.App");
        config.os = os.map(str::to_string);
        SimulatorDriver::with_runner(&config, runner, "xcrun")
            .unwrap()
            .with_boot_timeout(Duration::from_secs(5))
    }

    #[test]
    fn test_parse_runtime_name() {
        assert_eq!(
            parse_runtime_name("com.apple.CoreSimulator.SimRuntime.iOS-17-2"),
            "iOS 17.2"
        );
        assert_eq!(
            parse_runtime_name("com.apple.CoreSimulator.SimRuntime.watchOS-10-5"),
            "watchOS 10.5"
        );
        assert_eq!(parse_runtime_name("custom"), "custom");
    }

    #[test]
    fn test_simulator_state_from_str() {
        assert_eq!(SimulatorState::from("Booted"), SimulatorState::Booted);
        assert_eq!(SimulatorState::from("shutdown"), SimulatorState::Shutdown);
        assert_eq!(SimulatorState::from("Creating"), SimulatorState::Unknown);
    }

    #[test]
    fn test_parse_simctl_devices_skips_unavailable() {
        let sims = parse_simctl_devices(LISTING).unwrap();
        assert_eq!(sims.len(), 3);
        assert_eq!(sims[0].runtime, "iOS 17.2");
        assert!(sims.iter().all(|s| s.udid != "DDD-164"));
    }

    #[test]
    fn test_parse_simctl_devices_rejects_garbage() {
        let err = parse_simctl_devices("not json").unwrap_err();
        assert!(err.is_parse_failure());
    }

    #[test]
    fn test_select_simulator() {
        let sims = parse_simctl_devices(LISTING).unwrap();

        // Booted copy preferred across runtimes
        assert_eq!(select_simulator(&sims, "iPhone 15", None).unwrap().udid, "CCC-164");
        assert_eq!(
            select_simulator(&sims, "iPhone 15", Some("iOS 17.2")).unwrap().udid,
            "AAA-172"
        );
        assert_eq!(select_simulator(&sims, "BBB-172", None).unwrap().name, "iPhone 15 Pro");
        assert!(select_simulator(&sims, "iPhone 15", Some("iOS 15.0")).is_none());
        assert!(select_simulator(&sims, "iPad", None).is_none());
    }

    #[test]
    fn test_parse_launch_pid() {
        assert_eq!(parse_launch_pid("com.example.App: 4242\n", "com.example.App").unwrap(), 4242);
        assert!(parse_launch_pid("An error was encountered", "com.example.App").is_err());
    }

    #[test]
    fn test_requires_bundle_id() {
        let config = DeviceConfig::new("ios.simulator", "iPhone 15").with_binary("App.app");
        let err = SimulatorDriver::with_runner(&config, ScriptedRunner::new(), "xcrun").unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[tokio::test]
    async fn test_acquire_booted_simulator() {
        let runner = ScriptedRunner::new();
        runner.respond("list devices -j", LISTING);
        let mut driver = driver(runner.clone(), "iPhone 15 Pro", None);

        assert_eq!(DeviceDriver::acquire(&mut driver).await.unwrap(), "BBB-172");
        assert_eq!(DeviceDriver::device_id(&driver), Some("BBB-172"));
        assert!(!runner.ran("simctl boot"));
    }

    #[tokio::test]
    async fn test_acquire_boots_shutdown_simulator() {
        let booted = LISTING.replace(
            r#""udid": "AAA-172", "name": "iPhone 15", "state": "Shutdown""#,
            r#""udid": "AAA-172", "name": "iPhone 15", "state": "Booted""#,
        );
        let runner = ScriptedRunner::new();
        runner.respond_sequence("list devices -j", [LISTING, booted.as_str()]);
        runner.fail("simctl boot", "Unable to boot device in current state: Booted");
        let mut driver = driver(runner.clone(), "iPhone 15", Some("iOS 17.2"));

        assert_eq!(DeviceDriver::acquire(&mut driver).await.unwrap(), "AAA-172");
        assert!(runner.ran("\"xcrun\" simctl boot AAA-172"));
    }

    #[tokio::test]
    async fn test_acquire_missing_simulator() {
        let runner = ScriptedRunner::new();
        runner.respond("list devices -j", LISTING);
        let mut driver = driver(runner, "iPad Pro", Some("iOS 17.2"));

        let err = DeviceDriver::acquire(&mut driver).await.unwrap_err();
        assert!(matches!(err, Error::DeviceNotFound { .. }));
    }

    #[tokio::test]
    async fn test_install_launch_and_terminate() {
        let runner = ScriptedRunner::new();
        runner.respond("list devices -j", LISTING);
        runner.respond("simctl launch", "com.example.App: 777\n");
        runner.fail("simctl terminate", "found nothing to terminate");
        let mut driver = driver(runner.clone(), "iPhone 15 Pro", None);
        DeviceDriver::acquire(&mut driver).await.unwrap();

        DeviceDriver::install_app(&mut driver).await.unwrap();
        let session = SessionConfig::new("ws://localhost:8099", "abc");
        let pid = DeviceDriver::launch_app(&mut driver, &session).await.unwrap();
        DeviceDriver::terminate_app(&mut driver).await.unwrap();

        assert_eq!(pid, 777);
        assert!(runner.ran("\"xcrun\" simctl install BBB-172 /build/App.app"));
        assert!(runner.ran(
            "\"xcrun\" simctl launch BBB-172 com.example.App --args -pilotServer ws://localhost:8099 -pilotSessionId abc"
        ));
    }

    #[tokio::test]
    async fn test_operations_need_acquired_simulator() {
        let mut driver = driver(ScriptedRunner::new(), "iPhone 15", None);
        assert!(DeviceDriver::install_app(&mut driver).await.is_err());
        assert!(driver.screenshot(Path::new("/tmp/shot.png")).await.is_err());
        // Nothing to shut down
        DeviceDriver::shutdown(&mut driver).await.unwrap();
    }

    #[tokio::test]
    async fn test_screenshot_and_shutdown() {
        let runner = ScriptedRunner::new();
        runner.respond("list devices -j", LISTING);
        let mut driver = driver(runner.clone(), "iPhone 15 Pro", None);
        DeviceDriver::acquire(&mut driver).await.unwrap();

        driver.screenshot(Path::new("/tmp/shot.png")).await.unwrap();
        DeviceDriver::shutdown(&mut driver).await.unwrap();

        assert!(runner.ran("\"xcrun\" simctl io BBB-172 screenshot /tmp/shot.png"));
        assert!(runner.ran("\"xcrun\" simctl shutdown BBB-172"));
        assert_eq!(DeviceDriver::device_id(&driver), None);
    }
}
