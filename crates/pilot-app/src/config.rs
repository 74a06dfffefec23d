//! Device configurations and session resolution

use std::collections::BTreeMap;
use std::path::Path;

use rand::Rng;
use serde::Deserialize;

use pilot_core::prelude::*;
use pilot_core::{DeviceConfig, SessionConfig};

/// Length of generated session ids
const SESSION_ID_LEN: usize = 24;

/// Named device configurations of a project
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Configurations {
    #[serde(default)]
    configurations: BTreeMap<String, DeviceConfig>,
    /// Session shared by every configuration that has none of its own
    #[serde(default)]
    session: Option<SessionConfig>,
}

impl Configurations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `{ "configurations": { "<name>": { ... } }, "session": ... }`
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("Cannot read {}: {e}", path.display())))?;
        Self::from_json(&contents)
    }

    pub fn with(mut self, name: impl Into<String>, config: DeviceConfig) -> Self {
        self.configurations.insert(name.into(), config);
        self
    }

    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = Some(session);
        self
    }

    pub fn session(&self) -> Option<&SessionConfig> {
        self.session.as_ref()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.configurations.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.configurations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configurations.is_empty()
    }

    /// Pick the configuration named `key`, or the only one when `key` is `None`
    pub fn select(&self, key: Option<&str>) -> Result<(&str, &DeviceConfig)> {
        match key {
            Some(key) => self
                .configurations
                .get_key_value(key)
                .map(|(name, config)| (name.as_str(), config))
                .ok_or_else(|| Error::ConfigurationNotFound {
                    name: key.to_string(),
                }),
            None => {
                let mut iter = self.configurations.iter();
                match (iter.next(), iter.next()) {
                    (Some((name, config)), None) => Ok((name.as_str(), config)),
                    (None, _) => Err(Error::ConfigurationNotFound {
                        name: "<default>".to_string(),
                    }),
                    _ => Err(Error::config(format!(
                        "Several configurations exist ({}); select one by name",
                        self.names().collect::<Vec<_>>().join(", ")
                    ))),
                }
            }
        }
    }
}

/// Where the session of a run comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSource {
    /// Attached to the selected device configuration
    Device(SessionConfig),
    /// Passed when the orchestrator was built
    Provided(SessionConfig),
    /// Nothing given: run an embedded relay with a fresh id
    Generated,
}

/// Resolve the session, highest priority first: device, provided, generated
pub fn resolve_session(device: &DeviceConfig, provided: Option<&SessionConfig>) -> SessionSource {
    if let Some(session) = &device.session {
        SessionSource::Device(session.clone())
    } else if let Some(session) = provided {
        SessionSource::Provided(session.clone())
    } else {
        SessionSource::Generated
    }
}

/// A random alphanumeric session id
pub fn generate_session_id() -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(SESSION_ID_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn android() -> DeviceConfig {
        DeviceConfig::new("android.emulator", "Pixel_6_API_33")
            .with_binary("app.apk")
            .with_package("com.example")
    }

    fn ios() -> DeviceConfig {
        DeviceConfig::new("ios.simulator", "iPhone 15")
            .with_binary("Example.app")
            .with_package("com.example.Example")
    }

    #[test]
    fn test_select_by_key() {
        let configs = Configurations::new().with("android", android()).with("ios", ios());
        let (name, config) = configs.select(Some("ios")).unwrap();
        assert_eq!(name, "ios");
        assert_eq!(config.device_type, "ios.simulator");
    }

    #[test]
    fn test_select_unknown_key() {
        let configs = Configurations::new().with("android", android());
        let err = configs.select(Some("ios")).unwrap_err();
        assert!(matches!(err, Error::ConfigurationNotFound { ref name } if name == "ios"));
    }

    #[test]
    fn test_select_without_key() {
        let single = Configurations::new().with("android", android());
        assert_eq!(single.select(None).unwrap().0, "android");

        let several = Configurations::new().with("android", android()).with("ios", ios());
        assert!(matches!(several.select(None), Err(Error::Config { .. })));

        assert!(matches!(
            Configurations::new().select(None),
            Err(Error::ConfigurationNotFound { .. })
        ));
    }

    #[test]
    fn test_from_json() {
        let configs = Configurations::from_json(
            r#"{
                "session": { "server": "ws://localhost:8099", "sessionId": "shared" },
                "configurations": {
                    "android.emu": {
                        "type": "android.emulator",
                        "name": "Pixel_6_API_33",
                        "binaryPath": "app.apk",
                        "package": "com.example"
                    }
                }
            }"#,
        )
        .unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs.session().unwrap().session_id, "shared");
        assert!(Configurations::from_json("{ nope").is_err());
    }

    #[test]
    fn test_session_priority() {
        let provided = SessionConfig::new("ws://localhost:9000", "provided");
        let attached = SessionConfig::new("ws://localhost:9001", "attached");

        assert_eq!(
            resolve_session(&android().with_session(attached.clone()), Some(&provided)),
            SessionSource::Device(attached)
        );
        assert_eq!(
            resolve_session(&android(), Some(&provided)),
            SessionSource::Provided(provided)
        );
        assert_eq!(resolve_session(&android(), None), SessionSource::Generated);
    }

    #[test]
    fn test_generated_session_ids_differ() {
        let a = generate_session_id();
        let b = generate_session_id();
        assert_eq!(a.len(), SESSION_ID_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }
}
