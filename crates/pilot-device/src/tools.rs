//! Locating the native tools the drivers shell out to
//!
//! `adb` and `emulator` are looked up on `PATH` first, then under
//! `ANDROID_HOME` / `ANDROID_SDK_ROOT`. `xcrun` is only looked up on `PATH`.

use std::path::PathBuf;

/// Resolved paths of the device tools
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub adb: String,
    pub emulator: String,
    pub xcrun: String,
}

impl Default for ToolPaths {
    /// Bare program names, resolved by the OS at spawn time
    fn default() -> Self {
        Self {
            adb: "adb".to_string(),
            emulator: "emulator".to_string(),
            xcrun: "xcrun".to_string(),
        }
    }
}

impl ToolPaths {
    /// Resolve every tool, falling back to the bare name when nothing is found
    ///
    /// A missing tool is not an error here; the first command that needs it
    /// fails with `ToolNotFound`.
    pub fn locate() -> Self {
        let defaults = Self::default();
        Self {
            adb: Self::find("adb", &["platform-tools"]).unwrap_or(defaults.adb),
            emulator: Self::find("emulator", &["emulator"]).unwrap_or(defaults.emulator),
            xcrun: Self::find("xcrun", &[]).unwrap_or(defaults.xcrun),
        }
    }

    fn find(tool: &str, sdk_subdirs: &[&str]) -> Option<String> {
        if let Ok(path) = which::which(tool) {
            tracing::debug!("{} found on PATH: {}", tool, path.display());
            return Some(path.to_string_lossy().into_owned());
        }

        Self::sdk_candidates(tool, sdk_subdirs)
            .into_iter()
            .find(|candidate| candidate.is_file())
            .map(|candidate| {
                tracing::debug!("{} found in SDK: {}", tool, candidate.display());
                candidate.to_string_lossy().into_owned()
            })
    }

    /// Candidate paths under the Android SDK environment variables
    fn sdk_candidates(tool: &str, sdk_subdirs: &[&str]) -> Vec<PathBuf> {
        let mut candidates = Vec::new();
        for var in ["ANDROID_HOME", "ANDROID_SDK_ROOT"] {
            if let Ok(root) = std::env::var(var) {
                for subdir in sdk_subdirs {
                    candidates.push(PathBuf::from(&root).join(subdir).join(tool));
                }
            }
        }
        candidates
    }
}
