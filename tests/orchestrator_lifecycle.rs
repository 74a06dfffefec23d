//! Orchestrator sessions over the embedded relay with a simulated app

use std::sync::{Arc, Mutex};
use std::time::Duration;

use pilot_app::{Configurations, InitOptions, Orchestrator, Settings, Toolkit};
use pilot_artifacts::test_utils::RecordingPlugin;
use pilot_artifacts::ArtifactPlugin;
use pilot_client::test_utils::MockApp;
use pilot_client::WsClient;
use pilot_core::{DeviceConfig, DeviceType, Result, SessionConfig, TestStatus, TestSummary};
use pilot_device::DeviceDriver;

/// Apps started by the driver, newest last
type Apps = Arc<Mutex<Vec<MockApp>>>;

/// Driver whose "app" is a mock connecting to the session it was launched with
struct MockAppDriver {
    apps: Apps,
    launches: Arc<Mutex<u32>>,
    device_id: Option<String>,
}

impl DeviceDriver for MockAppDriver {
    fn platform(&self) -> &'static str {
        "mock"
    }

    fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    async fn acquire(&mut self) -> Result<String> {
        self.device_id = Some("mock-1".to_string());
        Ok("mock-1".to_string())
    }

    async fn install_app(&mut self) -> Result<()> {
        Ok(())
    }

    async fn uninstall_app(&mut self) -> Result<()> {
        Ok(())
    }

    async fn launch_app(&mut self, session: &SessionConfig) -> Result<u32> {
        let app = MockApp::connect(&session.server, &session.session_id).await?;
        self.apps.lock().unwrap().push(app);
        let mut launches = self.launches.lock().unwrap();
        *launches += 1;
        Ok(1000 + *launches)
    }

    async fn terminate_app(&mut self) -> Result<()> {
        let app = self.apps.lock().unwrap().pop();
        if let Some(app) = app {
            app.disconnect().await;
            // Let the relay notice the app is gone
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        Ok(())
    }

    async fn cleanup(&mut self) -> Result<()> {
        let apps: Vec<MockApp> = self.apps.lock().unwrap().drain(..).collect();
        for app in apps {
            app.disconnect().await;
        }
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.device_id = None;
        Ok(())
    }

    fn kill(&mut self) {
        self.apps.lock().unwrap().clear();
    }
}

#[derive(Clone, Default)]
struct MockAppToolkit {
    apps: Apps,
    launches: Arc<Mutex<u32>>,
    plugin: RecordingPlugin,
}

impl MockAppToolkit {
    fn launches(&self) -> u32 {
        *self.launches.lock().unwrap()
    }

    fn running_apps(&self) -> usize {
        self.apps.lock().unwrap().len()
    }
}

impl Toolkit for MockAppToolkit {
    type Driver = MockAppDriver;
    type Client = WsClient;

    fn create_driver(&self, _device_type: DeviceType, _config: &DeviceConfig) -> Result<MockAppDriver> {
        Ok(MockAppDriver {
            apps: Arc::clone(&self.apps),
            launches: Arc::clone(&self.launches),
            device_id: None,
        })
    }

    fn create_client(&self, session: &SessionConfig) -> WsClient {
        WsClient::new(session.clone())
    }

    fn create_plugins(
        &self,
        _device_type: DeviceType,
        _config: &DeviceConfig,
        _settings: &Settings,
    ) -> Vec<ArtifactPlugin> {
        vec![ArtifactPlugin::Recording(self.plugin.clone())]
    }
}

fn orchestrator(toolkit: &MockAppToolkit) -> Orchestrator<MockAppToolkit> {
    let configurations = Configurations::new().with(
        "android.att",
        DeviceConfig::new("android.attached", "MOCK_SERIAL")
            .with_binary("app.apk")
            .with_package("com.example"),
    );
    let settings = Settings {
        launch_timeout: Duration::from_secs(5),
        artifacts_location: std::env::temp_dir().join("pilot-lifecycle-tests"),
        ..Settings::default()
    };
    Orchestrator::new(toolkit.clone(), settings, configurations)
}

#[tokio::test]
async fn test_session_with_crash_and_relaunch() {
    let toolkit = MockAppToolkit::default();
    let mut orch = orchestrator(&toolkit);

    orch.init(InitOptions::default()).await.unwrap();
    let session = orch.session().unwrap().clone();
    assert!(session.server.starts_with("ws://127.0.0.1:"));
    assert_eq!(orch.exported_device().unwrap().id, "mock-1");
    assert_eq!(toolkit.launches(), 1);

    let first = TestSummary::running("opens", "App opens");
    orch.before_each(&first).await.unwrap();
    let crash = orch
        .after_each(&first.clone().with_status(TestStatus::Passed))
        .await
        .unwrap();
    assert!(crash.is_none());

    let second = TestSummary::running("taps", "App taps");
    orch.before_each(&second).await.unwrap();
    toolkit.apps.lock().unwrap().last().unwrap().crash("SIGABRT");
    tokio::time::sleep(Duration::from_millis(300)).await;

    let crash = orch
        .after_each(&second.clone().with_status(TestStatus::Failed))
        .await
        .unwrap();
    assert_eq!(crash.unwrap().details, "SIGABRT");
    assert_eq!(toolkit.launches(), 2);
    assert_eq!(toolkit.running_apps(), 1);

    orch.cleanup().await.unwrap();
    assert!(orch.is_terminated());
    assert_eq!(toolkit.running_apps(), 0);
    assert_eq!(
        toolkit.plugin.events(),
        vec![
            "before:App opens",
            "after:App opens:passed",
            "before:App taps",
            "after:App taps:failed",
            "terminate",
        ]
    );
}

#[tokio::test]
async fn test_kill_mid_session() {
    let toolkit = MockAppToolkit::default();
    let mut orch = orchestrator(&toolkit);
    orch.init(InitOptions::default()).await.unwrap();
    orch.before_each(&TestSummary::running("a", "Suite a"))
        .await
        .unwrap();

    orch.kill();

    assert!(orch.is_terminated());
    assert_eq!(toolkit.running_apps(), 0);
    assert_eq!(toolkit.plugin.events(), vec!["before:Suite a", "kill"]);

    // Graceful teardown after a kill is a no-op
    orch.cleanup().await.unwrap();
}
