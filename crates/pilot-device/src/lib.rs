//! # pilot-device - Device Tooling and Drivers
//!
//! Runs the platform command-line tools and drives one device through an
//! orchestrated test run.
//!
//! ## Public API
//!
//! ### Command Execution
//! - [`CommandRunner`] - Run a [`CommandSpec`] with retries, or spawn it in the background
//! - [`ProcessRunner`] - Production runner on `tokio::process`
//! - [`BackgroundProcess`] - Handle to a spawned long-running command
//!
//! ### Android
//! - [`Adb`] - `adb` operations (devices, install, pidof, unlock, push/pull, logcat)
//! - [`DeviceDescriptor`] - One line of `adb devices`
//! - [`TelnetConsole`] - Emulator console used to resolve AVD names
//! - [`AndroidDriver`] - Attached device and emulator lifecycle
//!
//! ### iOS
//! - [`SimulatorDriver`] - Simulator lifecycle via `xcrun simctl`
//!
//! ### Drivers
//! - [`DeviceDriver`] - Lifecycle seam used by the orchestrator
//! - [`AnyDriver`] - Driver picked from a device type

pub mod adb;
pub mod android;
pub mod avd;
pub mod console;
pub mod descriptor;
pub mod driver;
pub mod exec;
pub mod simulator;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;
pub mod tools;

pub use adb::parse::{KeyEvent, PowerState, Wakefulness};
pub use adb::{Adb, DeviceListing};
pub use android::AndroidDriver;
pub use avd::{boot_avd, list_avds, AndroidAvd};
pub use console::{EmulatorConsole, TelnetConsole};
pub use descriptor::{DeviceDescriptor, DeviceKind, DeviceStatus};
pub use driver::{AnyDriver, DeviceDriver, SERVER_ARG, SESSION_ID_ARG};
pub use exec::{
    BackgroundProcess, CommandOutput, CommandRunner, CommandSpec, ExecOptions, ProcessRunner,
    RetryPolicy, Verbosity,
};
pub use simulator::{take_screenshot, IosSimulator, SimulatorDriver, SimulatorState};
pub use tools::ToolPaths;
