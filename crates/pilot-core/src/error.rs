//! Error taxonomy shared by every device-pilot crate

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors organized by layer
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // External Command Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Command failed after {attempts} attempt(s): {command} (exit code: {exit_code:?}){}", format_stderr(.stderr))]
    CommandFailed {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
        attempts: u32,
    },

    #[error("Failed to spawn {command}: {reason}")]
    CommandSpawn { command: String, reason: String },

    #[error("Tool not found: {tool}. Ensure it is installed and in your PATH.")]
    ToolNotFound { tool: String },

    // ─────────────────────────────────────────────────────────────
    // Parse Errors
    // ─────────────────────────────────────────────────────────────
    #[error(
        "Failed to determine telnet port for emulator device '{adb_name}'! \
         Offending line: '{line}'. Raw adb output (base64): {raw_base64}"
    )]
    PortResolution {
        adb_name: String,
        line: String,
        raw_base64: String,
    },

    #[error("Parse error: {message}")]
    Parse { message: String },

    #[error("No instrumentation runner found for package: {package}")]
    RunnerNotFound { package: String },

    // ─────────────────────────────────────────────────────────────
    // Device Errors
    // ─────────────────────────────────────────────────────────────
    #[error("No device found matching: {query}")]
    DeviceNotFound { query: String },

    #[error("Device error: {message}")]
    Device { message: String },

    #[error("Emulator console error: {message}")]
    Telnet { message: String },

    #[error("Timed out: {operation}")]
    Timeout { operation: String },

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Unsupported device type: '{device_type}'")]
    UnsupportedDeviceType { device_type: String },

    #[error("Configuration not found: {name}")]
    ConfigurationNotFound { name: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    // ─────────────────────────────────────────────────────────────
    // Synchronization Channel Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Connection error: {message}")]
    Connection { message: String },

    #[error("Connection to the app closed while a request was outstanding")]
    ConnectionLost,

    #[error("Channel send error: {message}")]
    ChannelSend { message: String },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("App reported an error: {message}")]
    App { message: String },

    #[error("A ready request is already outstanding on this client")]
    ReadyAlreadyPending,

    // ─────────────────────────────────────────────────────────────
    // Artifact Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Artifact error: {message}")]
    Artifact { message: String },

    #[error("Artifact path could not be prepared: {path}")]
    ArtifactPath { path: PathBuf },

    // ─────────────────────────────────────────────────────────────
    // Orchestrator Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Orchestrator is not initialized")]
    NotInitialized,

    #[error("Orchestrator is already initialized")]
    AlreadyInitialized,
}

fn format_stderr(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {}", trimmed)
    }
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    pub fn device(message: impl Into<String>) -> Self {
        Self::Device {
            message: message.into(),
        }
    }

    pub fn telnet(message: impl Into<String>) -> Self {
        Self::Telnet {
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn channel_send(message: impl Into<String>) -> Self {
        Self::ChannelSend {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn app(message: impl Into<String>) -> Self {
        Self::App {
            message: message.into(),
        }
    }

    pub fn artifact(message: impl Into<String>) -> Self {
        Self::Artifact {
            message: message.into(),
        }
    }

    pub fn unsupported_device_type(device_type: impl Into<String>) -> Self {
        Self::UnsupportedDeviceType {
            device_type: device_type.into(),
        }
    }

    pub fn device_not_found(query: impl Into<String>) -> Self {
        Self::DeviceNotFound {
            query: query.into(),
        }
    }

    /// Check if this error leaves the session usable
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Connection { .. }
                | Error::ConnectionLost
                | Error::ChannelSend { .. }
                | Error::Protocol { .. }
                | Error::App { .. }
                | Error::Timeout { .. }
                | Error::Artifact { .. }
        )
    }

    /// Check if this error must abort initialization
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedDeviceType { .. }
                | Error::ConfigurationNotFound { .. }
                | Error::ToolNotFound { .. }
                | Error::PortResolution { .. }
        )
    }

    /// Check if this error came from parsing tool output
    pub fn is_parse_failure(&self) -> bool {
        matches!(
            self,
            Error::PortResolution { .. } | Error::Parse { .. } | Error::RunnerNotFound { .. }
        )
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Log the error with context before propagating it
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", f(), err);
            err
        })
    }
}
