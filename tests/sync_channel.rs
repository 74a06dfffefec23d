//! Sync channel over real sockets: tester client, embedded relay, mock app

use std::time::Duration;

use serde_json::json;

use pilot_client::test_utils::MockApp;
use pilot_client::{Action, AppClient, RelayServer, WsClient};
use pilot_core::{Error, SessionConfig};

const DEADLINE: Duration = Duration::from_secs(5);

async fn tester(relay: &RelayServer, session_id: &str) -> WsClient {
    let mut client = WsClient::new(SessionConfig::new(relay.url(), session_id));
    client.connect().await.unwrap();
    client
}

#[tokio::test]
async fn test_actions_round_trip_through_relay() {
    let relay = RelayServer::bind(0).await.unwrap();
    let mut client = tester(&relay, "round-trip").await;
    let app = MockApp::connect(&relay.url(), "round-trip").await.unwrap();

    tokio::time::timeout(DEADLINE, client.wait_until_ready())
        .await
        .unwrap()
        .unwrap();
    assert!(client.is_app_connected());

    let status = client.current_status().await.unwrap();
    assert_eq!(status["state"], "idle");

    let echoed = client.invoke(json!({ "target": "button" })).await.unwrap();
    assert_eq!(echoed, json!({ "target": "button" }));

    client.cleanup().await.unwrap();
    assert_eq!(
        app.received(),
        vec!["isReady", "currentStatus", "invoke", "cleanup"]
    );

    client.close().await.unwrap();
    app.disconnect().await;
    relay.shutdown().await;
}

#[tokio::test]
async fn test_ready_waits_for_a_late_app() {
    let relay = RelayServer::bind(0).await.unwrap();
    let client = tester(&relay, "late").await;
    assert!(!client.is_app_connected());

    let url = relay.url();
    let (ready, app) = tokio::join!(
        tokio::time::timeout(DEADLINE, client.wait_until_ready()),
        async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            MockApp::connect(&url, "late").await.unwrap()
        }
    );
    ready.unwrap().unwrap();
    assert_eq!(app.received(), vec!["isReady"]);

    app.disconnect().await;
    relay.shutdown().await;
}

#[tokio::test]
async fn test_crash_is_reported_once() {
    let relay = RelayServer::bind(0).await.unwrap();
    let client = tester(&relay, "crash").await;
    let app = MockApp::connect(&relay.url(), "crash").await.unwrap();
    tokio::time::timeout(DEADLINE, client.wait_until_ready())
        .await
        .unwrap()
        .unwrap();

    app.crash("java.lang.IllegalStateException");

    let crash = tokio::time::timeout(DEADLINE, async {
        loop {
            if let Some(crash) = client.take_pending_crash() {
                return crash;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(crash.details, "java.lang.IllegalStateException");
    assert!(client.take_pending_crash().is_none());

    app.disconnect().await;
    relay.shutdown().await;
}

#[tokio::test]
async fn test_app_leaving_fails_in_flight_action() {
    let relay = RelayServer::bind(0).await.unwrap();
    let client = tester(&relay, "leaves").await;
    let app = MockApp::connect_unresponsive(&relay.url(), "leaves")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (result, ()) = tokio::join!(
        tokio::time::timeout(DEADLINE, client.invoke(json!({ "target": "list" }))),
        async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert_eq!(app.received(), vec!["invoke"]);
            app.disconnect().await;
        }
    );
    let err = result.unwrap().unwrap_err();
    assert!(matches!(err, Error::ConnectionLost), "got {err:?}");
    assert!(!client.is_app_connected());

    relay.shutdown().await;
}

#[tokio::test]
async fn test_crash_rejects_in_flight_action() {
    let relay = RelayServer::bind(0).await.unwrap();
    let client = tester(&relay, "crashes").await;
    let app = MockApp::connect_unresponsive(&relay.url(), "crashes")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (result, ()) = tokio::join!(
        tokio::time::timeout(DEADLINE, client.current_status()),
        async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            app.crash("java.lang.OutOfMemoryError");
        }
    );
    let err = result.unwrap().unwrap_err();
    assert!(matches!(err, Error::App { .. }), "got {err:?}");
    assert_eq!(
        client.take_pending_crash().unwrap().details,
        "java.lang.OutOfMemoryError"
    );

    app.disconnect().await;
    relay.shutdown().await;
}

#[tokio::test]
async fn test_action_without_app_is_rejected() {
    let relay = RelayServer::bind(0).await.unwrap();
    let client = tester(&relay, "no-app").await;

    let err = client.send(Action::CurrentStatus).await.unwrap_err();
    assert!(matches!(err, Error::Protocol { .. }), "got {err:?}");

    relay.shutdown().await;
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let relay = RelayServer::bind(0).await.unwrap();
    let client = tester(&relay, "session-a").await;
    let other_app = MockApp::connect(&relay.url(), "session-b").await.unwrap();

    let err = client.send(Action::CurrentStatus).await.unwrap_err();
    assert!(matches!(err, Error::Protocol { .. }));
    assert!(other_app.received().is_empty());

    other_app.disconnect().await;
    relay.shutdown().await;
}

#[tokio::test]
async fn test_relay_shutdown_fails_waiting_tester() {
    let relay = RelayServer::bind(0).await.unwrap();
    let client = tester(&relay, "shutdown").await;

    let (ready, ()) = tokio::join!(
        tokio::time::timeout(DEADLINE, client.wait_until_ready()),
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            relay.shutdown().await;
        }
    );
    let err = ready.unwrap().unwrap_err();
    assert!(matches!(err, Error::ConnectionLost), "got {err:?}");
}
