//! Run settings
//!
//! Settings are fixed at orchestrator construction. They come from the
//! environment ([`Settings::from_env`]) or are built programmatically.

use std::path::PathBuf;
use std::time::Duration;

use pilot_core::prelude::*;
use pilot_core::CaptureMode;

pub const ENV_CONFIGURATION: &str = "PILOT_CONFIGURATION";
pub const ENV_CLEANUP: &str = "PILOT_CLEANUP";
pub const ENV_TAKE_SCREENSHOTS: &str = "PILOT_TAKE_SCREENSHOTS";
pub const ENV_RECORD_LOGS: &str = "PILOT_RECORD_LOGS";
pub const ENV_ARTIFACTS_LOCATION: &str = "PILOT_ARTIFACTS_LOCATION";
pub const ENV_REUSE: &str = "PILOT_REUSE";
/// Launch timeout in seconds
pub const ENV_LAUNCH_TIMEOUT: &str = "PILOT_LAUNCH_TIMEOUT";

const DEFAULT_ARTIFACTS_LOCATION: &str = "artifacts";
const DEFAULT_LAUNCH_TIMEOUT: Duration = Duration::from_secs(120);

/// Construction-time settings of an orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Named device configuration; `None` picks the only one
    pub configuration: Option<String>,
    /// Shut the device down on cleanup
    pub cleanup: bool,
    pub take_screenshots: CaptureMode,
    pub record_logs: CaptureMode,
    pub artifacts_location: PathBuf,
    /// Keep the installed app between runs
    pub reuse: bool,
    /// Deadline for the app to report ready after a launch
    pub launch_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            configuration: None,
            cleanup: false,
            take_screenshots: CaptureMode::None,
            record_logs: CaptureMode::None,
            artifacts_location: PathBuf::from(DEFAULT_ARTIFACTS_LOCATION),
            reuse: false,
            launch_timeout: DEFAULT_LAUNCH_TIMEOUT,
        }
    }
}

impl Settings {
    /// Read settings from `PILOT_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`; unset keys keep their defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut settings = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(name) = get(ENV_CONFIGURATION) {
            settings.configuration = Some(name.trim().to_string());
        }
        if let Some(value) = get(ENV_CLEANUP) {
            settings.cleanup = parse_flag(ENV_CLEANUP, &value)?;
        }
        if let Some(value) = get(ENV_TAKE_SCREENSHOTS) {
            settings.take_screenshots = value.parse().context(ENV_TAKE_SCREENSHOTS)?;
        }
        if let Some(value) = get(ENV_RECORD_LOGS) {
            settings.record_logs = value.parse().context(ENV_RECORD_LOGS)?;
        }
        if let Some(value) = get(ENV_ARTIFACTS_LOCATION) {
            settings.artifacts_location = PathBuf::from(value);
        }
        if let Some(value) = get(ENV_REUSE) {
            settings.reuse = parse_flag(ENV_REUSE, &value)?;
        }
        if let Some(value) = get(ENV_LAUNCH_TIMEOUT) {
            let secs: u64 = value.trim().parse().map_err(|_| {
                Error::config(format!("{ENV_LAUNCH_TIMEOUT} must be whole seconds, got '{value}'"))
            })?;
            settings.launch_timeout = Duration::from_secs(secs);
        }

        debug!("Settings: {:?}", settings);
        Ok(settings)
    }

    pub fn with_configuration(mut self, name: impl Into<String>) -> Self {
        self.configuration = Some(name.into());
        self
    }

    pub fn with_artifacts_location(mut self, location: impl Into<PathBuf>) -> Self {
        self.artifacts_location = location.into();
        self
    }

    /// Whether any artifact plugin will capture something
    pub fn captures_artifacts(&self) -> bool {
        self.take_screenshots.is_enabled() || self.record_logs.is_enabled()
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::config(format!(
            "{key} must be a boolean, got '{other}'"
        ))),
    }
}
