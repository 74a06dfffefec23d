//! # pilot-app - Test Session Orchestration
//!
//! Composes a device driver, the app sync client and the artifact pipeline
//! into one session that a test framework drives through its hooks.
//!
//! ## Public API
//!
//! - [`Orchestrator`] - init / before_each / after_each / terminate / cleanup / kill
//! - [`Settings`] - Construction-time settings, read from `PILOT_*` variables
//! - [`Configurations`] - Named device configurations and their selection
//! - [`Toolkit`] / [`NativeToolkit`] - Factory for drivers, clients and plugins
//! - [`wait_for_signal`] - Resolves on SIGINT/SIGTERM

pub mod config;
pub mod orchestrator;
pub mod settings;
pub mod signals;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;
pub mod toolkit;

pub use config::{generate_session_id, resolve_session, Configurations, SessionSource};
pub use orchestrator::{DeviceHandle, InitOptions, Orchestrator};
pub use settings::Settings;
pub use signals::wait_for_signal;
pub use toolkit::{NativeToolkit, Toolkit};
