//! Test utilities for the sync channel
//!
//! [`MockApp`] plays the app side of a relay session over a real socket;
//! [`FakeAppClient`] stands in for the tester client without any socket.

use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;

use pilot_core::prelude::*;

use crate::client::AppClient;
use crate::protocol::{
    AppCrash, Envelope, LoginParams, Role, APP_WILL_TERMINATE_WITH_ERROR, CLEANUP, CLEANUP_DONE,
    CURRENT_STATUS, CURRENT_STATUS_RESULT, INVOKE, INVOKE_RESULT, IS_READY, LOGIN, READY,
    RELOAD_REACT_NATIVE, UNSOLICITED_ID,
};

/// App side of a session that answers every action with its reply type
pub struct MockApp {
    outgoing: mpsc::UnboundedSender<Envelope>,
    received: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl MockApp {
    /// Connect to `url`, log into `session_id` as the app and start answering
    pub async fn connect(url: &str, session_id: &str) -> Result<Self> {
        Self::start(url, session_id, true).await
    }

    /// Like [`MockApp::connect`], but the app records requests and never replies
    pub async fn connect_unresponsive(url: &str, session_id: &str) -> Result<Self> {
        Self::start(url, session_id, false).await
    }

    async fn start(url: &str, session_id: &str, answers: bool) -> Result<Self> {
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| Error::connection(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();

        let login = Envelope::new(
            LOGIN,
            serde_json::to_value(LoginParams {
                session_id: session_id.to_string(),
                role: Role::App,
            })?,
            0,
        );
        sink.send(WsMessage::Text(login.to_json()?.into()))
            .await
            .map_err(|e| Error::connection(e.to_string()))?;
        // loginSuccess
        match stream.next().await {
            Some(Ok(WsMessage::Text(_))) => {}
            other => return Err(Error::protocol(format!("no login reply: {other:?}"))),
        }

        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Envelope>();
        let received: Arc<Mutex<Vec<String>>> = Arc::default();
        let log = Arc::clone(&received);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = stream.next() => {
                        let Some(Ok(WsMessage::Text(text))) = frame else { break };
                        let Ok(request) = Envelope::parse(text.as_str()) else { continue };
                        log.lock().unwrap().push(request.kind.clone());
                        if !answers {
                            continue;
                        }
                        if let Some(reply) = reply_for(&request) {
                            let json = reply.to_json().unwrap();
                            if sink.send(WsMessage::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    envelope = outgoing_rx.recv() => {
                        let Some(envelope) = envelope else { break };
                        let json = envelope.to_json().unwrap();
                        if sink.send(WsMessage::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                }
            }
            let _ = sink.close().await;
        });

        Ok(Self {
            outgoing,
            received,
            task,
        })
    }

    /// Report a crash to the tester
    pub fn crash(&self, details: &str) {
        let _ = self.outgoing.send(Envelope::new(
            APP_WILL_TERMINATE_WITH_ERROR,
            json!({ "errorDetails": details }),
            UNSOLICITED_ID,
        ));
    }

    /// Request types received so far
    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    /// Close the app side of the session
    pub async fn disconnect(self) {
        drop(self.outgoing);
        let _ = self.task.await;
    }
}

fn reply_for(request: &Envelope) -> Option<Envelope> {
    let (kind, params) = match request.kind.as_str() {
        IS_READY | RELOAD_REACT_NATIVE => (READY, json!({})),
        CURRENT_STATUS => (CURRENT_STATUS_RESULT, json!({ "state": "idle" })),
        CLEANUP => (CLEANUP_DONE, json!({})),
        INVOKE => (INVOKE_RESULT, request.params.clone()),
        _ => return None,
    };
    Some(Envelope::new(kind, params, request.message_id))
}

/// Recorded state of a [`FakeAppClient`]
#[derive(Debug, Default)]
struct FakeClientState {
    calls: Vec<&'static str>,
    pending_crash: Option<AppCrash>,
    fail_ready: bool,
}

/// In-memory client recording every call.
///
/// Clones share state, so a test can keep one clone while another is owned
/// by the code under test.
#[derive(Debug, Clone, Default)]
pub struct FakeAppClient {
    state: Arc<Mutex<FakeClientState>>,
}

impl FakeAppClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| **c == call).count()
    }

    pub fn set_pending_crash(&self, details: &str) {
        self.state.lock().unwrap().pending_crash = Some(AppCrash {
            details: details.to_string(),
        });
    }

    /// Make `wait_until_ready` fail with an app error
    pub fn fail_ready(&self) {
        self.state.lock().unwrap().fail_ready = true;
    }

    fn record(&self, call: &'static str) {
        self.state.lock().unwrap().calls.push(call);
    }
}

impl AppClient for FakeAppClient {
    async fn connect(&mut self) -> Result<()> {
        self.record("connect");
        Ok(())
    }

    async fn wait_until_ready(&self) -> Result<()> {
        self.record("wait_until_ready");
        if self.state.lock().unwrap().fail_ready {
            return Err(Error::app("app never became ready"));
        }
        Ok(())
    }

    async fn reload_react_native(&self) -> Result<()> {
        self.record("reload_react_native");
        Ok(())
    }

    async fn current_status(&self) -> Result<Value> {
        self.record("current_status");
        Ok(json!({ "state": "idle" }))
    }

    async fn invoke(&self, params: Value) -> Result<Value> {
        self.record("invoke");
        Ok(params)
    }

    async fn cleanup(&self) -> Result<()> {
        self.record("cleanup");
        Ok(())
    }

    fn take_pending_crash(&self) -> Option<AppCrash> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("take_pending_crash");
        state.pending_crash.take()
    }

    async fn close(&mut self) -> Result<()> {
        self.record("close");
        Ok(())
    }

    fn kill(&mut self) {
        self.record("kill");
    }
}
