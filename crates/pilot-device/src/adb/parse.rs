//! Parsers for `adb` text output
//!
//! Pure functions over captured stdout so they can be tested without a device.

use std::sync::LazyLock;

use regex::Regex;

use pilot_core::encode_base64;
use pilot_core::prelude::*;

use crate::descriptor::{DeviceDescriptor, DeviceKind, DeviceStatus};

/// `instrumentation:<runner> (target=<package>)`
static INSTRUMENTATION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^instrumentation:(\S+)\s+\(target=([^)]+)\)")
        .expect("Invalid instrumentation pattern regex")
});

static WAKEFULNESS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"mWakefulness=(\w+)").expect("Invalid wakefulness pattern regex")
});

static ACTIVITY_OVERRIDE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"mUserActivityTimeoutOverrideFromWindowManager=(-?\d+)")
        .expect("Invalid activity override pattern regex")
});

const EMULATOR_PREFIX: &str = "emulator-";

// ─────────────────────────────────────────────────────────────────
// adb devices
// ─────────────────────────────────────────────────────────────────

/// Parse `adb devices` output into descriptors
///
/// The header, daemon start-up chatter and blank lines are skipped; every
/// other line yields one descriptor. The status is the whole column after the
/// tab and is empty when missing. An `emulator-` serial without a numeric
/// port aborts the whole listing.
pub fn parse_devices(raw: &str) -> Result<Vec<DeviceDescriptor>> {
    let mut devices = Vec::new();

    for line in raw.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty()
            || line.starts_with("List of devices attached")
            || line.starts_with('*')
        {
            continue;
        }

        let (adb_name, status) = match line.split_once('\t') {
            Some((adb_name, status)) => (adb_name.trim(), status.trim()),
            None => (line.trim(), ""),
        };

        let kind = device_kind(adb_name, line, raw)?;
        devices.push(DeviceDescriptor::new(
            kind,
            adb_name,
            DeviceStatus::from_adb(status),
        ));
    }

    Ok(devices)
}

fn device_kind(adb_name: &str, line: &str, raw: &str) -> Result<DeviceKind> {
    if let Some(port) = adb_name.strip_prefix(EMULATOR_PREFIX) {
        return port
            .parse::<u16>()
            .map(|port| DeviceKind::Emulator { port })
            .map_err(|_| Error::PortResolution {
                adb_name: adb_name.to_string(),
                line: line.to_string(),
                raw_base64: encode_base64(raw),
            });
    }

    if adb_name.contains(':') {
        Ok(DeviceKind::Genymotion)
    } else {
        Ok(DeviceKind::Physical)
    }
}

// ─────────────────────────────────────────────────────────────────
// dumpsys power
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wakefulness {
    Awake,
    Asleep,
    /// Dreaming, Dozing or anything newer
    Other,
}

/// The two `dumpsys power` fields the unlock logic reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerState {
    pub wakefulness: Wakefulness,
    /// `-1` means no override, i.e. the keyguard is not engaged
    pub activity_timeout_override: i64,
}

impl PowerState {
    pub fn is_unlocked(&self) -> bool {
        self.activity_timeout_override == -1
    }
}

/// Key events sent by the unlock sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEvent {
    Power,
    Menu,
}

impl KeyEvent {
    pub fn keycode(&self) -> &'static str {
        match self {
            KeyEvent::Power => "KEYCODE_POWER",
            KeyEvent::Menu => "KEYCODE_MENU",
        }
    }
}

pub fn parse_power_state(dumpsys: &str) -> Result<PowerState> {
    let wakefulness = WAKEFULNESS_PATTERN
        .captures(dumpsys)
        .and_then(|c| c.get(1))
        .map(|m| match m.as_str() {
            "Awake" => Wakefulness::Awake,
            "Asleep" => Wakefulness::Asleep,
            _ => Wakefulness::Other,
        })
        .ok_or_else(|| Error::parse("mWakefulness missing from dumpsys power"))?;

    let activity_timeout_override = ACTIVITY_OVERRIDE_PATTERN
        .captures(dumpsys)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<i64>().ok())
        .ok_or_else(|| {
            Error::parse("mUserActivityTimeoutOverrideFromWindowManager missing from dumpsys power")
        })?;

    Ok(PowerState {
        wakefulness,
        activity_timeout_override,
    })
}

/// Key presses needed to bring the device to an awake, unlocked state
pub fn unlock_sequence(state: &PowerState) -> Vec<KeyEvent> {
    let mut keys = Vec::new();
    if state.wakefulness == Wakefulness::Asleep {
        keys.push(KeyEvent::Power);
    }
    if !state.is_unlocked() {
        keys.push(KeyEvent::Menu);
    }
    keys
}

// ─────────────────────────────────────────────────────────────────
// Process and package listings
// ─────────────────────────────────────────────────────────────────

/// Find the PID of `process` in `ps` output
///
/// The matching row is the one whose last column equals the process name;
/// the PID is its second column.
pub fn parse_pidof(ps_output: &str, process: &str) -> Option<u32> {
    ps_output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.last() == Some(&process) {
                fields.get(1).copied()
            } else {
                None
            }
        })
        .find_map(|pid| pid.parse().ok())
}

/// Find the instrumentation runner declared for `package`
pub fn parse_instrumentation_runner(output: &str, package: &str) -> Result<String> {
    output
        .lines()
        .filter_map(|line| INSTRUMENTATION_PATTERN.captures(line.trim()))
        .find(|caps| &caps[2] == package)
        .map(|caps| caps[1].to_string())
        .ok_or_else(|| Error::RunnerNotFound {
            package: package.to_string(),
        })
}

pub fn parse_api_level(output: &str) -> Result<u32> {
    output
        .trim()
        .parse()
        .map_err(|_| Error::parse(format!("Unexpected API level: {:?}", output.trim())))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FOUR_DEVICES: &str = "List of devices attached\n\
        MOCK_SERIAL\tdevice\n\
        192.168.60.101:6666\tdevice\n\
        emulator-5554\tdevice\n\
        emulator-5556\toffline\n\
        \n";

    #[test]
    fn test_parse_devices_all_kinds() {
        let devices = parse_devices(FOUR_DEVICES).unwrap();
        assert_eq!(devices.len(), 4);

        assert_eq!(devices[0].kind, DeviceKind::Physical);
        assert_eq!(devices[0].adb_name, "MOCK_SERIAL");
        assert_eq!(devices[0].status, DeviceStatus::Online);

        assert_eq!(devices[1].kind, DeviceKind::Genymotion);
        assert_eq!(devices[1].adb_name, "192.168.60.101:6666");

        assert_eq!(devices[2].kind, DeviceKind::Emulator { port: 5554 });
        assert_eq!(devices[2].status, DeviceStatus::Online);

        assert_eq!(devices[3].kind, DeviceKind::Emulator { port: 5556 });
        assert_eq!(devices[3].status, DeviceStatus::Offline);
    }

    #[test]
    fn test_parse_devices_empty_listing() {
        let devices = parse_devices("List of devices attached\n").unwrap();
        assert!(devices.is_empty());
    }

    #[test]
    fn test_parse_devices_tolerates_crlf_and_daemon_chatter() {
        let raw = "* daemon not running; starting now at tcp:5037\r\n\
                   * daemon started successfully\r\n\
                   List of devices attached\r\n\
                   sx432wsds\tunauthorized\r\n\r\n";
        let devices = parse_devices(raw).unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].status, DeviceStatus::Unauthorized);
    }

    #[test]
    fn test_parse_devices_keeps_multi_word_status() {
        let raw = "List of devices attached\n\
                   0123456789ABCDEF\tno permissions (missing udev rules)\n";
        let devices = parse_devices(raw).unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(
            devices[0].status,
            DeviceStatus::Other("no permissions (missing udev rules)".to_string())
        );
    }

    #[test]
    fn test_parse_devices_line_without_status() {
        let raw = "List of devices attached\nMOCK_SERIAL\nemulator-5554\tdevice\n";
        let devices = parse_devices(raw).unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].adb_name, "MOCK_SERIAL");
        assert_eq!(devices[0].status, DeviceStatus::Other(String::new()));
        assert!(!devices[0].is_online());
        assert_eq!(devices[1].kind, DeviceKind::Emulator { port: 5554 });
    }

    #[test]
    fn test_parse_devices_unparseable_port() {
        let raw = "List of devices attached\nemulator-\tdevice\n";
        let err = parse_devices(raw).unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("Failed to determine telnet port for emulator device 'emulator-'!"));
        assert!(msg.contains(&encode_base64(raw)));
        assert!(err.is_fatal());
    }

    fn dumpsys(wakefulness: &str, activity_override: &str) -> String {
        format!(
            "POWER MANAGER (dumpsys power)\n\
             Power Manager State:\n  \
             mDirty=0x0\n  \
             mWakefulness={wakefulness}\n  \
             mWakefulnessChanging=false\n  \
             mIsPowered=true\n  \
             mUserActivityTimeoutOverrideFromWindowManager={activity_override}\n  \
             mUserInactiveOverrideFromWindowManager=false\n"
        )
    }

    #[test]
    fn test_unlock_awake_and_unlocked() {
        let state = parse_power_state(&dumpsys("Awake", "-1")).unwrap();
        assert!(unlock_sequence(&state).is_empty());
    }

    #[test]
    fn test_unlock_awake_but_locked() {
        let state = parse_power_state(&dumpsys("Awake", "10000")).unwrap();
        assert_eq!(unlock_sequence(&state), vec![KeyEvent::Menu]);
    }

    #[test]
    fn test_unlock_asleep_and_unlocked() {
        let state = parse_power_state(&dumpsys("Asleep", "-1")).unwrap();
        assert_eq!(unlock_sequence(&state), vec![KeyEvent::Power]);
    }

    #[test]
    fn test_unlock_asleep_and_locked() {
        let state = parse_power_state(&dumpsys("Asleep", "10000")).unwrap();
        assert_eq!(
            unlock_sequence(&state),
            vec![KeyEvent::Power, KeyEvent::Menu]
        );
    }

    #[test]
    fn test_parse_power_state_missing_fields() {
        assert!(parse_power_state("nothing here").unwrap_err().is_parse_failure());
    }

    #[test]
    fn test_pidof_found() {
        let ps = "u0_a19        2199  1701 3554600  70264 0                   0 s com.google.android.ext.services ";
        assert_eq!(
            parse_pidof(ps, "com.google.android.ext.services"),
            Some(2199)
        );
    }

    #[test]
    fn test_pidof_ignores_prefix_matches() {
        let ps = "USER PID PPID VSZ RSS WCHAN ADDR S NAME\n\
                  u0_a19 2199 1701 3554600 70264 0 0 s com.example.app:remote\n\
                  u0_a20 2300 1701 3554600 70264 0 0 s com.example.app\n";
        assert_eq!(parse_pidof(ps, "com.example.app"), Some(2300));
    }

    #[test]
    fn test_pidof_not_running() {
        assert_eq!(parse_pidof("", "com.google.android.ext.services"), None);
    }

    #[test]
    fn test_instrumentation_runner() {
        let output = "instrumentation:com.android.emulator.smoketests/android.support.test.runner.AndroidJUnitRunner (target=com.android.emulator.smoketests)\n\
            instrumentation:com.android.smoketest.tests/com.android.smoketest.SmokeTestRunner (target=com.android.smoketest)\n\
            instrumentation:com.example.test/androidx.test.runner.AndroidJUnitRunner (target=com.example)\n\
            instrumentation:org.chromium.webview_shell/.WebViewLayoutTestRunner (target=org.chromium.webview_shell)\n";

        assert_eq!(
            parse_instrumentation_runner(output, "com.example").unwrap(),
            "com.example.test/androidx.test.runner.AndroidJUnitRunner"
        );
    }

    #[test]
    fn test_instrumentation_runner_missing() {
        let err = parse_instrumentation_runner("", "com.example").unwrap_err();
        assert!(matches!(err, Error::RunnerNotFound { ref package } if package == "com.example"));
    }

    #[test]
    fn test_parse_api_level() {
        assert_eq!(parse_api_level("33\n").unwrap(), 33);
        assert!(parse_api_level("").is_err());
    }
}
