//! # pilot-core - Core Domain Types
//!
//! Foundation crate for device-pilot. Provides the error taxonomy, logging setup
//! and the domain types shared by drivers, the sync client, the artifact
//! pipeline and the orchestrator.
//!
//! This crate has **zero internal dependencies**.
//!
//! ## Public API
//!
//! ### Domain Types (`types`)
//! - [`DeviceConfig`] / [`DeviceType`] - A named device configuration and its parsed type
//! - [`SessionConfig`] - Sync channel connection parameters
//! - [`TestSummary`] / [`TestStatus`] - Per-hook test description
//! - [`CaptureMode`] - none / failing / all artifact capture
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Error enum with `fatal` vs `recoverable` classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ## Prelude
//!
//! ```rust
//! use pilot_core::prelude::*;
//! ```

pub mod encoding;
pub mod error;
pub mod logging;
pub mod prelude;
pub mod types;

pub use encoding::encode_base64;
pub use error::{Error, Result, ResultExt};
pub use types::{
    CaptureMode, DeviceConfig, DeviceType, SessionConfig, TestStatus, TestSummary,
};
