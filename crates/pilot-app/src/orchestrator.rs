//! Test session orchestration
//!
//! An [`Orchestrator`] owns one device, one sync client and one artifacts
//! manager for a test run:
//!
//! ```text
//! Uninitialized ──init()──▶ Initialized ──terminate()/cleanup()/kill()──▶ Terminated
//! ```
//!
//! `before_each`/`after_each` run between the two. `kill()` is the only
//! teardown that never suspends; it is meant for signal handlers.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use pilot_artifacts::{ArtifactsApi, ArtifactsManager};
use pilot_client::{AppClient, AppCrash, RelayServer};
use pilot_core::prelude::*;
use pilot_core::{DeviceType, SessionConfig, TestSummary};
use pilot_device::DeviceDriver;

use crate::config::{generate_session_id, resolve_session, Configurations, SessionSource};
use crate::settings::Settings;
use crate::toolkit::{NativeToolkit, Toolkit};

/// Deadline for each step of a graceful teardown
const TEARDOWN_STEP_TIMEOUT: Duration = Duration::from_secs(10);

/// Options of a single `init()` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitOptions {
    /// Hand the device out through [`Orchestrator::exported_device`]
    pub init_globals: bool,
    /// Overrides [`Settings::reuse`] for this session
    pub reuse: Option<bool>,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            init_globals: true,
            reuse: None,
        }
    }
}

/// The device of a live session, as published to test code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    pub id: String,
    pub platform: &'static str,
    pub device_type: DeviceType,
    pub configuration: String,
    pub session: SessionConfig,
}

/// Everything owned by an initialized orchestrator
struct Live<T: Toolkit> {
    session: SessionConfig,
    relay: Option<RelayServer>,
    driver: T::Driver,
    client: T::Client,
    artifacts: ArtifactsManager,
    device: Option<DeviceHandle>,
    export_device: bool,
}

impl<T: Toolkit> Live<T> {
    /// Acquire the device, install, connect and launch
    async fn bring_up(
        &mut self,
        device_type: DeviceType,
        configuration: &str,
        reuse: bool,
        launch_timeout: Duration,
    ) -> Result<()> {
        let device_id = self.driver.acquire().await?;
        info!(
            "Acquired {} device {} for '{}'",
            self.driver.platform(),
            device_id,
            configuration
        );
        self.artifacts.set_device_id(&device_id);
        self.device = Some(DeviceHandle {
            id: device_id,
            platform: self.driver.platform(),
            device_type,
            configuration: configuration.to_string(),
            session: self.session.clone(),
        });

        if reuse {
            debug!("Reusing the installed app");
        } else {
            if let Err(e) = self.driver.uninstall_app().await {
                debug!("Uninstall before install failed: {}", e);
            }
            self.driver.install_app().await?;
        }

        self.client.connect().await?;
        self.launch(launch_timeout).await
    }

    /// Launch a new app instance and wait until it reports ready
    async fn launch(&mut self, launch_timeout: Duration) -> Result<()> {
        let pid = self.driver.launch_app(&self.session).await?;
        info!("App launched (pid {}), waiting until ready", pid);
        tokio::time::timeout(launch_timeout, self.client.wait_until_ready())
            .await
            .map_err(|_| Error::timeout(format!("app ready after {launch_timeout:?}")))??;
        info!("App is ready");
        Ok(())
    }

    /// Terminate the running instance, then launch a new one
    async fn relaunch(&mut self, launch_timeout: Duration) -> Result<()> {
        if let Err(e) = self.driver.terminate_app().await {
            debug!("Terminating the crashed app failed: {}", e);
        }
        self.launch(launch_timeout).await
    }

    /// Graceful teardown; every step runs even if an earlier one fails
    async fn teardown(&mut self) {
        self.artifacts.on_terminate().await;

        let cleaned = tokio::time::timeout(TEARDOWN_STEP_TIMEOUT, self.client.cleanup()).await;
        match cleaned {
            Ok(Err(e)) => warn!("App cleanup failed: {}", e),
            Err(_) => warn!("App cleanup timed out"),
            Ok(Ok(())) => {}
        }
        let closed = tokio::time::timeout(TEARDOWN_STEP_TIMEOUT, self.client.close()).await;
        match closed {
            Ok(Err(e)) => warn!("Closing the sync connection failed: {}", e),
            Err(_) => {
                warn!("Closing the sync connection timed out");
                self.client.kill();
            }
            Ok(Ok(())) => {}
        }
        if let Err(e) = self.driver.cleanup().await {
            warn!("Driver cleanup failed: {}", e);
        }
        if let Some(relay) = self.relay.take() {
            relay.shutdown().await;
        }
    }

    /// Abort a session that never finished starting
    fn abort(&mut self) {
        self.artifacts.on_kill();
        self.client.kill();
        self.driver.kill();
    }
}

enum Phase<T: Toolkit> {
    Uninitialized,
    Initialized(Box<Live<T>>),
    /// Torn down; the driver is kept for a later device shutdown
    Terminated(Option<T::Driver>),
}

impl<T: Toolkit> Phase<T> {
    fn name(&self) -> &'static str {
        match self {
            Phase::Uninitialized => "uninitialized",
            Phase::Initialized(_) => "initialized",
            Phase::Terminated(_) => "terminated",
        }
    }
}

/// Drives one device through a test run
pub struct Orchestrator<T: Toolkit = NativeToolkit> {
    toolkit: T,
    settings: Settings,
    configurations: Configurations,
    session: Option<SessionConfig>,
    phase: Phase<T>,
}

impl<T: Toolkit> fmt::Debug for Orchestrator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("phase", &self.phase.name())
            .field("configuration", &self.settings.configuration)
            .finish()
    }
}

impl Orchestrator {
    /// Orchestrator driving real devices
    pub fn native(settings: Settings, configurations: Configurations) -> Self {
        Self::new(NativeToolkit::new(), settings, configurations)
    }
}

impl<T: Toolkit> Orchestrator<T> {
    pub fn new(toolkit: T, settings: Settings, configurations: Configurations) -> Self {
        Self {
            toolkit,
            settings,
            configurations,
            session: None,
            phase: Phase::Uninitialized,
        }
    }

    /// Session used when the device configuration carries none
    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = Some(session);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn toolkit(&self) -> &T {
        &self.toolkit
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.phase, Phase::Initialized(_))
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self.phase, Phase::Terminated(_))
    }

    /// Session of the live run
    pub fn session(&self) -> Option<&SessionConfig> {
        match &self.phase {
            Phase::Initialized(live) => Some(&live.session),
            _ => None,
        }
    }

    /// Device for test code, unless `init_globals` was turned off
    pub fn exported_device(&self) -> Option<&DeviceHandle> {
        match &self.phase {
            Phase::Initialized(live) if live.export_device => live.device.as_ref(),
            _ => None,
        }
    }

    /// Run directory of the live session's artifacts
    pub fn artifacts_dir(&self) -> Option<&Path> {
        match &self.phase {
            Phase::Initialized(live) => Some(live.artifacts.api().run_dir()),
            _ => None,
        }
    }

    /// Sync client of the live session
    pub fn client(&self) -> Result<&T::Client> {
        Ok(&self.live()?.client)
    }

    fn live(&self) -> Result<&Live<T>> {
        match &self.phase {
            Phase::Initialized(live) => Ok(live),
            _ => Err(Error::NotInitialized),
        }
    }

    fn live_mut(&mut self) -> Result<&mut Live<T>> {
        match &mut self.phase {
            Phase::Initialized(live) => Ok(live),
            _ => Err(Error::NotInitialized),
        }
    }

    /// Start a session: select the configuration, acquire the device, launch
    /// the app and wait for it to become ready.
    ///
    /// Nothing of a failed start is kept; the orchestrator stays where it was.
    pub async fn init(&mut self, options: InitOptions) -> Result<()> {
        if self.is_initialized() {
            return Err(Error::AlreadyInitialized);
        }

        let (configuration, device_config) = self
            .configurations
            .select(self.settings.configuration.as_deref())?;
        let device_type = device_config.parsed_type()?;
        let configuration = configuration.to_string();
        let device_config = device_config.clone();

        let provided = self.session.as_ref().or(self.configurations.session());
        let (session, relay) = match resolve_session(&device_config, provided) {
            SessionSource::Device(session) | SessionSource::Provided(session) => (session, None),
            SessionSource::Generated => {
                let relay = RelayServer::bind(0).await?;
                let session = SessionConfig::new(relay.url(), generate_session_id());
                info!("Started embedded relay at {}", relay.url());
                (session, Some(relay))
            }
        };
        session.validate()?;

        let driver = self.toolkit.create_driver(device_type, &device_config)?;
        let client = self.toolkit.create_client(&session);
        let plugins = self
            .toolkit
            .create_plugins(device_type, &device_config, &self.settings);
        let api = ArtifactsApi::new(&self.settings.artifacts_location, &configuration);

        let mut live = Live::<T> {
            session,
            relay,
            driver,
            client,
            artifacts: ArtifactsManager::new(api, plugins),
            device: None,
            export_device: options.init_globals,
        };

        let reuse = options.reuse.unwrap_or(self.settings.reuse);
        if let Err(e) = live
            .bring_up(device_type, &configuration, reuse, self.settings.launch_timeout)
            .await
        {
            error!("Failed to start session for '{}': {}", configuration, e);
            live.abort();
            return Err(e);
        }

        self.phase = Phase::Initialized(Box::new(live));
        Ok(())
    }

    /// Per-test start hook
    pub async fn before_each(&mut self, summary: &TestSummary) -> Result<()> {
        let live = self.live_mut()?;
        trace!("before_each: {}", summary.full_name);
        live.artifacts.on_before_test(summary).await;
        Ok(())
    }

    /// Per-test end hook.
    ///
    /// When the app crashed during the test it is relaunched before artifacts
    /// are collected, and the crash is returned.
    pub async fn after_each(&mut self, summary: &TestSummary) -> Result<Option<AppCrash>> {
        let launch_timeout = self.settings.launch_timeout;
        let live = self.live_mut()?;
        trace!("after_each: {} ({:?})", summary.full_name, summary.status);

        let crash = live.client.take_pending_crash();
        let relaunched = match &crash {
            Some(crash) => {
                warn!("{} during '{}', relaunching", crash, summary.full_name);
                live.relaunch(launch_timeout).await
            }
            None => Ok(()),
        };

        live.artifacts.on_after_test(summary).await;
        relaunched?;
        Ok(crash)
    }

    /// Launch a new app instance in the live session
    pub async fn relaunch_app(&mut self) -> Result<()> {
        let launch_timeout = self.settings.launch_timeout;
        self.live_mut()?.relaunch(launch_timeout).await
    }

    /// Tear the session down; later calls do nothing
    pub async fn terminate(&mut self) -> Result<()> {
        if !self.is_initialized() {
            debug!("terminate: orchestrator is {}", self.phase.name());
            return Ok(());
        }
        info!("Terminating session");
        if let Phase::Initialized(live) = &mut self.phase {
            live.teardown().await;
        }

        if let Phase::Initialized(live) = std::mem::replace(&mut self.phase, Phase::Uninitialized) {
            self.phase = Phase::Terminated(Some(live.driver));
        }
        Ok(())
    }

    /// Terminate, then shut the device down when `cleanup` is set.
    ///
    /// Safe to call in any state.
    pub async fn cleanup(&mut self) -> Result<()> {
        self.terminate().await?;
        if !self.settings.cleanup {
            return Ok(());
        }
        if let Phase::Terminated(driver) = &mut self.phase {
            if let Some(mut driver) = driver.take() {
                info!("Shutting down the device");
                if let Err(e) = driver.shutdown().await {
                    warn!("Device shutdown failed: {}", e);
                }
            }
        }
        Ok(())
    }

    /// Abrupt teardown for process exit; never suspends
    pub fn kill(&mut self) {
        match std::mem::replace(&mut self.phase, Phase::Terminated(None)) {
            Phase::Initialized(mut live) => {
                warn!("Killing session");
                live.abort();
            }
            Phase::Terminated(Some(mut driver)) => driver.kill(),
            Phase::Terminated(None) | Phase::Uninitialized => {}
        }
    }
}
