//! Devices reported by `adb devices`

use std::fmt;

use tokio::sync::OnceCell;

use pilot_core::prelude::*;

use crate::console::EmulatorConsole;

/// How a listed device is attached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Physical,
    Genymotion,
    Emulator { port: u16 },
}

impl DeviceKind {
    pub fn is_emulator(&self) -> bool {
        matches!(self, DeviceKind::Emulator { .. })
    }
}

/// Connection status column of `adb devices`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceStatus {
    /// `device`
    Online,
    Offline,
    Unauthorized,
    Other(String),
}

impl DeviceStatus {
    pub fn from_adb(status: &str) -> Self {
        match status {
            "device" => DeviceStatus::Online,
            "offline" => DeviceStatus::Offline,
            "unauthorized" => DeviceStatus::Unauthorized,
            other => DeviceStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            DeviceStatus::Online => "device",
            DeviceStatus::Offline => "offline",
            DeviceStatus::Unauthorized => "unauthorized",
            DeviceStatus::Other(raw) => raw,
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of `adb devices`.
///
/// The AVD name of an emulator is not part of the listing; it is resolved on
/// first [`query_name`](Self::query_name) over the emulator console and cached.
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    pub kind: DeviceKind,
    pub adb_name: String,
    pub status: DeviceStatus,
    name: OnceCell<String>,
}

impl PartialEq for DeviceDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.adb_name == other.adb_name && self.status == other.status
    }
}

impl Eq for DeviceDescriptor {}

impl DeviceDescriptor {
    pub fn new(kind: DeviceKind, adb_name: impl Into<String>, status: DeviceStatus) -> Self {
        Self {
            kind,
            adb_name: adb_name.into(),
            status,
            name: OnceCell::new(),
        }
    }

    pub fn is_online(&self) -> bool {
        self.status == DeviceStatus::Online
    }

    pub fn port(&self) -> Option<u16> {
        match self.kind {
            DeviceKind::Emulator { port } => Some(port),
            _ => None,
        }
    }

    /// AVD name if already resolved
    pub fn cached_name(&self) -> Option<&str> {
        self.name.get().map(String::as_str)
    }

    /// Resolve the AVD name of an emulator, opening the console at most once
    ///
    /// Non-emulator devices have no AVD name and never touch the network.
    pub async fn query_name<C: EmulatorConsole + Sync>(&self, console: &C) -> Result<Option<String>> {
        let Some(port) = self.port() else {
            return Ok(None);
        };

        let name = self
            .name
            .get_or_try_init(|| async {
                debug!("Querying AVD name of {} on port {}", self.adb_name, port);
                console.avd_name(port).await
            })
            .await?;

        Ok(Some(name.clone()))
    }
}
