//! Android Virtual Device discovery and boot
//!
//! Wraps `emulator -list-avds` and `emulator -avd <name>`.

use std::sync::LazyLock;

use regex::Regex;

use pilot_core::prelude::*;

use crate::exec::{CommandRunner, CommandSpec, ExecOptions};

/// API level suffix in AVD names
static API_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_API_(\d+)").expect("Invalid API pattern regex"));

/// An Android Virtual Device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AndroidAvd {
    /// AVD name (used for boot command)
    pub name: String,
    /// API level parsed from the name, if it follows the `_API_<n>` convention
    pub api_level: Option<u32>,
}

/// List all AVDs known to the emulator binary
pub async fn list_avds<R: CommandRunner>(runner: &R, emulator: &str) -> Result<Vec<AndroidAvd>> {
    let spec = CommandSpec::new(emulator).arg("-list-avds");
    let output = runner.execute(&spec, &ExecOptions::default()).await?;
    Ok(parse_avd_list(&output.stdout))
}

/// Parse the output of `emulator -list-avds`
///
/// One AVD name per line; the emulator may also print `INFO` chatter.
fn parse_avd_list(output: &str) -> Vec<AndroidAvd> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("INFO"))
        .map(|name| AndroidAvd {
            name: name.to_string(),
            api_level: API_PATTERN
                .captures(name)
                .and_then(|caps| caps.get(1))
                .and_then(|m| m.as_str().parse().ok()),
        })
        .collect()
}

/// Boot an AVD in the background.
///
/// Returns as soon as the emulator process is started; the caller waits for
/// the new serial to appear in `adb devices` and finish booting.
pub async fn boot_avd<R: CommandRunner>(runner: &R, emulator: &str, avd_name: &str) -> Result<()> {
    let avds = list_avds(runner, emulator).await?;
    if !avds.iter().any(|avd| avd.name == avd_name) {
        return Err(Error::device_not_found(format!("AVD '{avd_name}'")));
    }

    info!("Booting AVD {}", avd_name);
    let spec = CommandSpec::new(emulator).args(["-avd", avd_name, "-no-snapshot-load"]);
    runner.spawn_detached(&spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ScriptedRunner;

    #[test]
    fn test_parse_avd_list() {
        let avds = parse_avd_list("Pixel_6_API_33\nNexus_5X_API_29_x86\nMy_Custom_AVD\n");

        assert_eq!(avds.len(), 3);
        assert_eq!(avds[0].name, "Pixel_6_API_33");
        assert_eq!(avds[0].api_level, Some(33));
        assert_eq!(avds[1].api_level, Some(29));
        assert_eq!(avds[2].api_level, None);
    }

    #[test]
    fn test_parse_avd_list_skips_blank_and_info_lines() {
        let avds = parse_avd_list("INFO    | Storing crashdata in: /tmp/android/emu-crash.db\n\n  Pixel_6_API_33  \n");
        assert_eq!(avds.len(), 1);
        assert_eq!(avds[0].name, "Pixel_6_API_33");
    }

    #[tokio::test]
    async fn test_boot_avd_spawns_emulator() {
        let runner = ScriptedRunner::new();
        runner.respond("-list-avds", "Pixel_6_API_33\n");

        boot_avd(&runner, "emulator", "Pixel_6_API_33").await.unwrap();
        assert_eq!(
            runner.spawned(),
            vec!["\"emulator\" -avd Pixel_6_API_33 -no-snapshot-load".to_string()]
        );
    }

    #[tokio::test]
    async fn test_boot_unknown_avd() {
        let runner = ScriptedRunner::new();
        runner.respond("-list-avds", "Pixel_6_API_33\n");

        let err = boot_avd(&runner, "emulator", "Missing_AVD").await.unwrap_err();
        assert!(matches!(err, Error::DeviceNotFound { .. }));
        assert!(runner.spawned().is_empty());
    }
}
