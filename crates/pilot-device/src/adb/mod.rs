//! Android Debug Bridge operations
//!
//! [`Adb`] builds `adb` command lines, runs them through a [`CommandRunner`]
//! with the attempt counts from [`RetryPolicy`], and parses the results.

pub mod parse;

use std::path::Path;
use std::time::{Duration, Instant};

use pilot_core::prelude::*;

use crate::descriptor::DeviceDescriptor;
use crate::exec::{
    BackgroundProcess, CommandOutput, CommandRunner, CommandSpec, ExecOptions, ProcessRunner,
    RetryPolicy, Verbosity,
};

pub use parse::{KeyEvent, PowerState, Wakefulness};

/// First API level supporting `install -g` (runtime permissions)
const RUNTIME_PERMISSIONS_API: u32 = 23;

const BOOT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Result of `adb devices`
#[derive(Debug, Clone)]
pub struct DeviceListing {
    pub devices: Vec<DeviceDescriptor>,
    /// Raw output, kept for diagnostics
    pub stdout: String,
}

impl DeviceListing {
    pub fn find(&self, adb_name: &str) -> Option<&DeviceDescriptor> {
        self.devices.iter().find(|d| d.adb_name == adb_name)
    }
}

/// Handle to the `adb` binary
#[derive(Debug, Clone)]
pub struct Adb<R = ProcessRunner> {
    runner: R,
    path: String,
    retries: RetryPolicy,
}

impl Adb<ProcessRunner> {
    /// `adb` from the given path, executed as real processes
    pub fn with_path(path: impl Into<String>) -> Self {
        Self::new(ProcessRunner, path)
    }
}

impl<R: CommandRunner> Adb<R> {
    pub fn new(runner: R, path: impl Into<String>) -> Self {
        Self {
            runner,
            path: path.into(),
            retries: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retries: RetryPolicy) -> Self {
        self.retries = retries;
        self
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn command(&self, serial: &str) -> CommandSpec {
        CommandSpec::new(&self.path).args(["-s", serial])
    }

    async fn run(&self, spec: CommandSpec, options: ExecOptions) -> Result<CommandOutput> {
        self.runner.execute(&spec, &options).await
    }

    async fn run_with_retries(&self, spec: CommandSpec, retries: u32) -> Result<CommandOutput> {
        self.run(spec, ExecOptions::default().with_retries(retries))
            .await
    }

    // ─────────────────────────────────────────────────────────────
    // Enumeration
    // ─────────────────────────────────────────────────────────────

    /// List attached devices; emulator names are not queried here
    pub async fn devices(&self) -> Result<DeviceListing> {
        let spec = CommandSpec::new(&self.path).arg("devices");
        let options = ExecOptions::default()
            .with_retries(self.retries.default)
            .with_verbosity(Verbosity::High);

        let output = self.run(spec, options).await?;
        let devices = parse::parse_devices(&output.stdout)?;
        debug!("adb devices: {} device(s)", devices.len());

        Ok(DeviceListing {
            devices,
            stdout: output.stdout,
        })
    }

    // ─────────────────────────────────────────────────────────────
    // Shell queries
    // ─────────────────────────────────────────────────────────────

    /// Run `command` through the device shell
    pub async fn shell(&self, serial: &str, command: &str) -> Result<String> {
        self.shell_with_retries(serial, command, self.retries.shell)
            .await
    }

    async fn shell_with_retries(&self, serial: &str, command: &str, retries: u32) -> Result<String> {
        let spec = self.command(serial).arg("shell").arg(command);
        let output = self.run_with_retries(spec, retries).await?;
        Ok(output.stdout)
    }

    pub async fn api_level(&self, serial: &str) -> Result<u32> {
        let stdout = self
            .shell_with_retries(serial, "getprop ro.build.version.sdk", self.retries.api_level)
            .await?;
        parse::parse_api_level(&stdout)
    }

    pub async fn is_boot_completed(&self, serial: &str) -> Result<bool> {
        let stdout = self.shell(serial, "getprop sys.boot_completed").await?;
        Ok(stdout.trim() == "1")
    }

    /// Poll `sys.boot_completed` until it reads `1`
    pub async fn wait_for_boot(&self, serial: &str, max_wait: Duration) -> Result<()> {
        let start = Instant::now();
        loop {
            match self.is_boot_completed(serial).await {
                Ok(true) => {
                    info!("{} finished booting", serial);
                    return Ok(());
                }
                Ok(false) => trace!("{} still booting", serial),
                Err(e @ Error::ToolNotFound { .. }) => return Err(e),
                Err(e) => debug!("boot poll on {} failed: {}", serial, e),
            }

            if start.elapsed() >= max_wait {
                return Err(Error::timeout(format!("waiting for {serial} to boot")));
            }
            tokio::time::sleep(BOOT_POLL_INTERVAL).await;
        }
    }

    /// PID of a running process, `None` when it is not running
    pub async fn pidof(&self, serial: &str, process: &str) -> Result<Option<u32>> {
        let stdout = self.shell(serial, "ps -A").await?;
        Ok(parse::parse_pidof(&stdout, process))
    }

    pub async fn instrumentation_runner(&self, serial: &str, package: &str) -> Result<String> {
        let stdout = self.shell(serial, "pm list instrumentation").await?;
        parse::parse_instrumentation_runner(&stdout, package)
    }

    // ─────────────────────────────────────────────────────────────
    // Screen state
    // ─────────────────────────────────────────────────────────────

    pub async fn power_state(&self, serial: &str) -> Result<PowerState> {
        let stdout = self.shell(serial, "dumpsys power").await?;
        parse::parse_power_state(&stdout)
    }

    pub async fn press_key(&self, serial: &str, key: KeyEvent) -> Result<()> {
        self.shell(serial, &format!("input keyevent {}", key.keycode()))
            .await?;
        Ok(())
    }

    /// Wake the screen and dismiss the keyguard as needed
    pub async fn unlock_screen(&self, serial: &str) -> Result<()> {
        let state = self.power_state(serial).await?;
        let keys = parse::unlock_sequence(&state);
        if keys.is_empty() {
            debug!("{} is awake and unlocked", serial);
        }
        for key in keys {
            debug!("unlock {}: {}", serial, key.keycode());
            self.press_key(serial, key).await?;
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────
    // Packages
    // ─────────────────────────────────────────────────────────────

    /// Install an APK from the host, granting runtime permissions where supported
    pub async fn install(&self, serial: &str, apk_path: &str) -> Result<()> {
        let api_level = self.api_level(serial).await?;
        let flags = if api_level >= RUNTIME_PERMISSIONS_API {
            "-rg"
        } else {
            "-r"
        };
        let spec = self.command(serial).args(["install", flags]).arg(apk_path);
        self.run_with_retries(spec, self.retries.install).await?;
        info!("Installed {} on {}", apk_path, serial);
        Ok(())
    }

    /// Install an APK that was already pushed to the device
    pub async fn remote_install(&self, serial: &str, device_path: &str) -> Result<()> {
        self.shell_with_retries(
            serial,
            &format!("pm install -r -g -t {device_path}"),
            self.retries.install,
        )
        .await?;
        Ok(())
    }

    pub async fn uninstall(&self, serial: &str, package: &str) -> Result<()> {
        let spec = self.command(serial).args(["uninstall", package]);
        self.run_with_retries(spec, self.retries.default).await?;
        Ok(())
    }

    /// Force-stop an application
    pub async fn terminate(&self, serial: &str, package: &str) -> Result<()> {
        self.shell(serial, &format!("am force-stop {package}"))
            .await?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────
    // Files
    // ─────────────────────────────────────────────────────────────

    pub async fn push(&self, serial: &str, source: &str, destination: &str) -> Result<()> {
        let spec = self.command(serial).args(["push", source, destination]);
        self.run_with_retries(spec, self.retries.default).await?;
        Ok(())
    }

    pub async fn pull(&self, serial: &str, source: &str, destination: &Path) -> Result<()> {
        let spec = self
            .command(serial)
            .args(["pull", source])
            .arg(destination.to_string_lossy());
        self.run_with_retries(spec, self.retries.default).await?;
        Ok(())
    }

    pub async fn rm(&self, serial: &str, device_path: &str) -> Result<()> {
        self.shell(serial, &format!("rm -f {device_path}")).await?;
        Ok(())
    }

    pub async fn screencap(&self, serial: &str, device_path: &str) -> Result<()> {
        self.shell(serial, &format!("screencap -p {device_path}"))
            .await?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────
    // Emulator control and long-running processes
    // ─────────────────────────────────────────────────────────────

    pub async fn emu_kill(&self, serial: &str) -> Result<()> {
        let spec = self.command(serial).args(["emu", "kill"]);
        self.run_with_retries(spec, self.retries.default).await?;
        Ok(())
    }

    /// Forward `tcp:<port>` on the device to the same port on this host
    pub async fn reverse(&self, serial: &str, port: u16) -> Result<()> {
        let tcp = format!("tcp:{port}");
        let spec = self.command(serial).args(["reverse", tcp.as_str(), tcp.as_str()]);
        self.run_with_retries(spec, self.retries.default).await?;
        Ok(())
    }

    pub async fn remove_reverse(&self, serial: &str, port: u16) -> Result<()> {
        let spec = self
            .command(serial)
            .args(["reverse", "--remove"])
            .arg(format!("tcp:{port}"));
        self.run_with_retries(spec, self.retries.default).await?;
        Ok(())
    }

    /// Start an instrumentation run in the background
    pub fn spawn_instrumentation(
        &self,
        serial: &str,
        runner: &str,
        extras: &[(&str, &str)],
    ) -> Result<BackgroundProcess> {
        let mut spec = self.command(serial).args(["shell", "am", "instrument", "-w", "-r"]);
        for (key, value) in extras {
            spec = spec.args(["-e", *key, *value]);
        }
        self.runner.spawn(&spec.arg(runner))
    }

    /// Stream `logcat -v threadtime` into `path`
    pub fn spawn_logcat(&self, serial: &str, path: &Path) -> Result<BackgroundProcess> {
        let spec = self.command(serial).args(["logcat", "-v", "threadtime"]);
        self.runner.spawn_to_file(&spec, path)
    }

    pub async fn clear_logcat(&self, serial: &str) -> Result<()> {
        let spec = self.command(serial).args(["logcat", "-c"]);
        self.run_with_retries(spec, self.retries.default).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DeviceKind;
    use crate::test_utils::ScriptedRunner;

    const ADB: &str = "/Android/sdk-mock/platform-tools/adb";

    fn adb(runner: &ScriptedRunner) -> Adb<ScriptedRunner> {
        Adb::new(runner.clone(), ADB)
    }

    #[tokio::test]
    async fn test_devices_invokes_adb_once() {
        let runner = ScriptedRunner::new();
        runner.respond("devices", "List of devices attached\n");

        let listing = adb(&runner).devices().await.unwrap();
        assert!(listing.devices.is_empty());

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].command, format!("\"{ADB}\" devices"));
        assert_eq!(calls[0].options.verbosity, Verbosity::High);
        assert_eq!(calls[0].options.retries, 1);
    }

    #[tokio::test]
    async fn test_devices_returns_raw_stdout() {
        let raw = "List of devices attached\nMOCK_SERIAL\tdevice\nemulator-5554\tdevice\n\n";
        let runner = ScriptedRunner::new();
        runner.respond("devices", raw);

        let listing = adb(&runner).devices().await.unwrap();
        assert_eq!(listing.stdout, raw);
        assert_eq!(
            listing.find("emulator-5554").map(|d| d.kind),
            Some(DeviceKind::Emulator { port: 5554 })
        );
    }

    #[tokio::test]
    async fn test_install_queries_api_level_then_installs() {
        let runner = ScriptedRunner::new();
        runner.respond("getprop ro.build.version.sdk", "29\n");

        adb(&runner)
            .install("emulator-5556", "path inside \"quotes\" to/app")
            .await
            .unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0]
            .command
            .ends_with("adb\" -s emulator-5556 shell \"getprop ro.build.version.sdk\""));
        assert_eq!(calls[0].options.retries, 5);
        assert!(calls[1]
            .command
            .ends_with(r#"adb" -s emulator-5556 install -rg "path inside \"quotes\" to/app""#));
        assert_eq!(calls[1].options.retries, 5);
    }

    #[tokio::test]
    async fn test_install_on_old_api_skips_grant_flag() {
        let runner = ScriptedRunner::new();
        runner.respond("getprop ro.build.version.sdk", "22\n");

        adb(&runner).install("emulator-5556", "/tmp/app.apk").await.unwrap();
        assert!(runner.calls()[1].command.ends_with("install -r /tmp/app.apk"));
    }

    #[tokio::test]
    async fn test_remote_install() {
        let runner = ScriptedRunner::new();
        adb(&runner)
            .remote_install("mockEmulator", "/mock-path/filename.mock")
            .await
            .unwrap();

        let calls = runner.calls();
        assert!(calls[0]
            .command
            .contains("-s mockEmulator shell \"pm install -r -g -t /mock-path/filename.mock\""));
    }

    #[tokio::test]
    async fn test_push() {
        let runner = ScriptedRunner::new();
        adb(&runner)
            .push("mockEmulator", "/mock-source/file.xyz", "/sdcard/file.abc")
            .await
            .unwrap();

        assert!(runner.calls()[0]
            .command
            .contains("-s mockEmulator push /mock-source/file.xyz /sdcard/file.abc"));
    }

    #[tokio::test]
    async fn test_uninstall_and_terminate_run_one_command_each() {
        let runner = ScriptedRunner::new();
        let adb = adb(&runner);

        adb.uninstall("emulator-5554", "com.package").await.unwrap();
        assert_eq!(runner.calls().len(), 1);

        adb.terminate("emulator-5554", "com.package").await.unwrap();
        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].command.contains("\"am force-stop com.package\""));
    }

    #[tokio::test]
    async fn test_pidof() {
        let runner = ScriptedRunner::new();
        runner.respond(
            "ps -A",
            "u0_a19        2199  1701 3554600  70264 0                   0 s com.google.android.ext.services ",
        );
        let adb = adb(&runner);

        assert_eq!(
            adb.pidof("", "com.google.android.ext.services").await.unwrap(),
            Some(2199)
        );
        assert_eq!(adb.pidof("", "com.other").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unlock_asleep_locked_sends_power_then_menu() {
        let runner = ScriptedRunner::new();
        runner.respond(
            "dumpsys power",
            "mWakefulness=Asleep\nmUserActivityTimeoutOverrideFromWindowManager=10000\n",
        );

        adb(&runner).unlock_screen("emulator-5554").await.unwrap();

        let keys: Vec<String> = runner
            .calls()
            .into_iter()
            .map(|c| c.command)
            .filter(|c| c.contains("input keyevent"))
            .collect();
        assert_eq!(keys.len(), 2);
        assert!(keys[0].contains("KEYCODE_POWER"));
        assert!(keys[1].contains("KEYCODE_MENU"));
    }

    #[tokio::test]
    async fn test_unlock_awake_unlocked_sends_nothing() {
        let runner = ScriptedRunner::new();
        runner.respond(
            "dumpsys power",
            "mWakefulness=Awake\nmUserActivityTimeoutOverrideFromWindowManager=-1\n",
        );

        adb(&runner).unlock_screen("emulator-5554").await.unwrap();
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_instrumentation_runner_lists_instrumentation() {
        let runner = ScriptedRunner::new();
        runner.respond(
            "pm list instrumentation",
            "instrumentation:com.example.test/androidx.test.runner.AndroidJUnitRunner (target=com.example)\n",
        );

        let found = adb(&runner)
            .instrumentation_runner("aDeviceId", "com.example")
            .await
            .unwrap();
        assert_eq!(found, "com.example.test/androidx.test.runner.AndroidJUnitRunner");
        assert!(runner.calls()[0]
            .command
            .contains("-s aDeviceId shell \"pm list instrumentation\""));
    }

    #[tokio::test]
    async fn test_wait_for_boot_polls_until_completed() {
        let runner = ScriptedRunner::new();
        runner.respond_sequence("sys.boot_completed", ["", "0", "1"]);

        adb(&runner)
            .wait_for_boot("emulator-5554", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(runner.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_failed_command_surfaces_attempts() {
        let runner = ScriptedRunner::new();
        runner.fail("getprop ro.build.version.sdk", "device offline");

        let err = adb(&runner).api_level("emulator-5554").await.unwrap_err();
        assert!(matches!(err, Error::CommandFailed { attempts: 5, .. }));
    }

    #[test]
    fn test_spawn_instrumentation_arguments() {
        let runner = ScriptedRunner::new();
        adb(&runner)
            .spawn_instrumentation(
                "emulator-5554",
                "com.example.test/androidx.test.runner.AndroidJUnitRunner",
                &[("pilotServer", "ws://localhost:8099"), ("pilotSessionId", "abc")],
            )
            .unwrap();

        assert_eq!(
            runner.spawned(),
            vec![format!(
                "\"{ADB}\" -s emulator-5554 shell am instrument -w -r -e pilotServer ws://localhost:8099 -e pilotSessionId abc com.example.test/androidx.test.runner.AndroidJUnitRunner"
            )]
        );
    }

    #[tokio::test]
    async fn test_reverse_and_remove() {
        let runner = ScriptedRunner::new();
        let adb = adb(&runner);
        adb.reverse("MOCK_SERIAL", 40123).await.unwrap();
        adb.remove_reverse("MOCK_SERIAL", 40123).await.unwrap();

        assert_eq!(
            runner.commands(),
            vec![
                format!("\"{ADB}\" -s MOCK_SERIAL reverse tcp:40123 tcp:40123"),
                format!("\"{ADB}\" -s MOCK_SERIAL reverse --remove tcp:40123"),
            ]
        );
    }

    #[test]
    fn test_spawn_logcat_arguments() {
        let runner = ScriptedRunner::new();
        let log = tempfile::NamedTempFile::new().unwrap();
        adb(&runner).spawn_logcat("emulator-5554", log.path()).unwrap();

        assert_eq!(
            runner.spawned(),
            vec![format!("\"{ADB}\" -s emulator-5554 logcat -v threadtime")]
        );
    }
}
