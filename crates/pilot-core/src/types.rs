//! Domain types shared between drivers, the sync client, artifacts and the orchestrator

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ─────────────────────────────────────────────────────────────────
// Device configuration
// ─────────────────────────────────────────────────────────────────

/// Device types with a driver implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    /// An Android Virtual Device, booted on demand
    AndroidEmulator,
    /// A physical device or Genymotion instance already visible to adb
    AndroidAttached,
    /// An iOS simulator managed through `xcrun simctl`
    IosSimulator,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::AndroidEmulator => "android.emulator",
            DeviceType::AndroidAttached => "android.attached",
            DeviceType::IosSimulator => "ios.simulator",
        }
    }

    pub fn is_android(&self) -> bool {
        matches!(
            self,
            DeviceType::AndroidEmulator | DeviceType::AndroidAttached
        )
    }
}

impl FromStr for DeviceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "android.emulator" => Ok(DeviceType::AndroidEmulator),
            "android.attached" => Ok(DeviceType::AndroidAttached),
            "ios.simulator" => Ok(DeviceType::IosSimulator),
            other => Err(Error::unsupported_device_type(other)),
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One named device configuration, as loaded by the configuration collaborator
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    /// Raw device type; parsed into [`DeviceType`] at init
    #[serde(rename = "type", default)]
    pub device_type: String,

    /// AVD name, adb serial, or simulator name/UDID
    #[serde(default)]
    pub name: String,

    /// Simulator runtime filter (e.g. "iOS 17.2")
    #[serde(default)]
    pub os: Option<String>,

    /// Application binary (APK or .app bundle)
    #[serde(default)]
    pub binary_path: String,

    /// Android test APK carrying the instrumentation runner
    #[serde(default)]
    pub test_binary_path: Option<String>,

    /// Android application id or iOS bundle id
    #[serde(default)]
    pub package: Option<String>,

    /// Session pinned to this configuration; wins over any other session source
    #[serde(default)]
    pub session: Option<SessionConfig>,
}

impl DeviceConfig {
    pub fn new(device_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            device_type: device_type.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_binary(mut self, binary_path: impl Into<String>) -> Self {
        self.binary_path = binary_path.into();
        self
    }

    pub fn with_package(mut self, package: impl Into<String>) -> Self {
        self.package = Some(package.into());
        self
    }

    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = Some(session);
        self
    }

    /// Parse the configured device type
    pub fn parsed_type(&self) -> Result<DeviceType> {
        self.device_type.parse()
    }
}

/// Connection parameters binding the sync client to one app-under-test instance
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// WebSocket URL of the relay server
    pub server: String,
    /// Session identifier shared by the tester and the app
    pub session_id: String,
}

impl SessionConfig {
    pub fn new(server: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            session_id: session_id.into(),
        }
    }

    /// Validate the server URL; only `ws` and `wss` are accepted
    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.server)
            .map_err(|e| Error::config(format!("Invalid session server '{}': {e}", self.server)))?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(Error::config(format!(
                "Session server must be a ws:// or wss:// URL, got '{}'",
                self.server
            )));
        }
        if self.session_id.trim().is_empty() {
            return Err(Error::config("Session id must not be empty"));
        }
        Ok(())
    }

    /// Port of the server when it listens on the host's loopback interface.
    ///
    /// A device resolves loopback to itself, so such a port has to be
    /// forwarded before an app on the device can reach the server.
    pub fn loopback_port(&self) -> Option<u16> {
        let url = url::Url::parse(&self.server).ok()?;
        let is_loopback = match url.host()? {
            url::Host::Domain(domain) => domain.eq_ignore_ascii_case("localhost"),
            url::Host::Ipv4(ip) => ip.is_loopback(),
            url::Host::Ipv6(ip) => ip.is_loopback(),
        };
        if is_loopback {
            url.port_or_known_default()
        } else {
            None
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Test summaries
// ─────────────────────────────────────────────────────────────────

/// Status reported by the test framework for the current test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Running,
    Passed,
    Failed,
}

/// Per-hook description of the current test
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSummary {
    pub title: String,
    pub full_name: String,
    pub status: TestStatus,
}

impl TestSummary {
    pub fn new(title: impl Into<String>, full_name: impl Into<String>, status: TestStatus) -> Self {
        Self {
            title: title.into(),
            full_name: full_name.into(),
            status,
        }
    }

    pub fn running(title: impl Into<String>, full_name: impl Into<String>) -> Self {
        Self::new(title, full_name, TestStatus::Running)
    }

    pub fn with_status(mut self, status: TestStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_failed(&self) -> bool {
        self.status == TestStatus::Failed
    }
}

// ─────────────────────────────────────────────────────────────────
// Capture settings
// ─────────────────────────────────────────────────────────────────

/// Which tests keep their artifacts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    #[default]
    None,
    Failing,
    All,
}

impl CaptureMode {
    pub fn is_enabled(&self) -> bool {
        *self != CaptureMode::None
    }

    /// Whether artifacts of a test with this summary are kept
    pub fn should_keep(&self, summary: &TestSummary) -> bool {
        match self {
            CaptureMode::None => false,
            CaptureMode::Failing => summary.is_failed(),
            CaptureMode::All => true,
        }
    }
}

impl FromStr for CaptureMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" | "false" => Ok(CaptureMode::None),
            "failing" => Ok(CaptureMode::Failing),
            "all" | "true" => Ok(CaptureMode::All),
            other => Err(Error::config(format!(
                "Unknown capture mode '{other}' (expected none, failing or all)"
            ))),
        }
    }
}
