//! Artifact locations for one test run

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

use pilot_core::prelude::*;
use pilot_core::TestSummary;

/// Characters that cannot appear in a directory name on common filesystems
const PATH_UNSAFE: &AsciiSet = &CONTROLS
    .add(b'/')
    .add(b'\\')
    .add(b':')
    .add(b'*')
    .add(b'?')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'|')
    .add(b'%');

/// Directory name used when a test has no full name
const UNNAMED_TEST_DIR: &str = "_unnamed";

/// Shared facts handed to every plugin hook
#[derive(Debug, Clone)]
pub struct ArtifactsApi {
    device_id: Option<String>,
    root: PathBuf,
    run_dir: PathBuf,
}

impl ArtifactsApi {
    /// Run directory `<root>/<configuration>.<timestamp>`
    pub fn new(root: impl Into<PathBuf>, configuration: &str) -> Self {
        Self::at(root, configuration, Utc::now())
    }

    pub fn at(root: impl Into<PathBuf>, configuration: &str, started: DateTime<Utc>) -> Self {
        let root = root.into();
        let run_dir = root.join(format!(
            "{}.{}",
            escape_path_component(configuration),
            started.format("%Y-%m-%dT%H-%M-%S%.3fZ")
        ));
        Self {
            device_id: None,
            root,
            run_dir,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn set_device_id(&mut self, device_id: impl Into<String>) {
        self.device_id = Some(device_id.into());
    }

    /// Id of the device artifacts are captured from
    pub fn device_id(&self) -> Result<&str> {
        self.device_id
            .as_deref()
            .ok_or_else(|| Error::artifact("no device has been acquired"))
    }

    /// Path for artifact `name` of the test, creating its directory.
    ///
    /// Layout: `<run dir>/<escaped full name>/<name>`.
    pub async fn prepare_path_for_artifact(
        &self,
        name: &str,
        summary: &TestSummary,
    ) -> Result<PathBuf> {
        let dir = self.run_dir.join(test_dir_name(summary));
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|_| Error::ArtifactPath { path: dir.clone() })?;
        Ok(dir.join(name))
    }
}

fn test_dir_name(summary: &TestSummary) -> String {
    let name = summary.full_name.trim();
    if name.is_empty() {
        UNNAMED_TEST_DIR.to_string()
    } else {
        escape_path_component(name)
    }
}

/// Percent-encode characters that are unsafe in a single path component
pub fn escape_path_component(name: &str) -> String {
    let escaped = utf8_percent_encode(name, PATH_UNSAFE).to_string();
    match escaped.as_str() {
        "." | ".." => escaped.replace('.', "%2E"),
        _ => escaped,
    }
}
