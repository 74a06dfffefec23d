//! WebSocket client for the app sync channel.
//!
//! [`WsClient`] logs into a relay session as the tester, sends actions to the
//! app, and routes replies back to callers through oneshot channels.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                        WsClient                            │
//! │                                                            │
//! │  ┌──────────────┐        ┌──────────────────────────────┐  │
//! │  │  Public API  │        │  Background Task             │  │
//! │  │              │        │                              │  │
//! │  │  send() ─────┼──cmd──▶│  WebSocket read/write loop   │  │
//! │  │              │  chan  │                              │  │
//! │  │  take_pending│        │  reply → RequestTracker      │  │
//! │  │  _crash() ◀──┼─shared─│  app event → Shared state    │  │
//! │  └──────────────┘        └──────────────────────────────┘  │
//! └───────────────────────────────────────────────────────────┘
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use pilot_core::prelude::*;
use pilot_core::SessionConfig;

use crate::protocol::{
    Action, AppCrash, Envelope, APP_CONNECTED, APP_DISCONNECTED, APP_NONRESPONSIVE_DETECTED,
    APP_WILL_TERMINATE_WITH_ERROR, UNSOLICITED_ID,
};
use crate::tracker::RequestTracker;

/// Capacity of the command channel
const CMD_CHANNEL_CAPACITY: usize = 32;

// ---------------------------------------------------------------------------
// AppClient
// ---------------------------------------------------------------------------

/// Sync channel operations the orchestrator relies on.
///
/// None of the calls carry a timeout; callers wrap them in their own deadline.
#[trait_variant::make(AppClient: Send)]
pub trait LocalAppClient {
    /// Open the connection and log into the session
    async fn connect(&mut self) -> Result<()>;

    /// Resolve once the app reports it is idle and ready.
    ///
    /// Only one call may be outstanding per client.
    async fn wait_until_ready(&self) -> Result<()>;

    async fn reload_react_native(&self) -> Result<()>;

    async fn current_status(&self) -> Result<Value>;

    async fn invoke(&self, params: Value) -> Result<Value>;

    /// Ask a connected app to release its test-session state
    async fn cleanup(&self) -> Result<()>;

    /// Return the stored crash, if any, and clear it
    fn take_pending_crash(&self) -> Option<AppCrash>;

    /// Close the connection gracefully
    async fn close(&mut self) -> Result<()>;

    /// Drop the connection without a close handshake; never suspends
    fn kill(&mut self);
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Connection state of a [`WsClient`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// State written by the background task and read by the public API
#[derive(Debug)]
struct Shared {
    state: RwLock<ConnectionState>,
    pending_crash: Mutex<Option<AppCrash>>,
    app_connected: AtomicBool,
    /// Woken whenever app presence or the connection changes
    presence: Notify,
    ready_pending: AtomicBool,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: RwLock::new(ConnectionState::Disconnected),
            pending_crash: Mutex::new(None),
            app_connected: AtomicBool::new(false),
            presence: Notify::new(),
            ready_pending: AtomicBool::new(false),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn state(&self) -> ConnectionState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn set_app_connected(&self, connected: bool) {
        self.app_connected.store(connected, Ordering::Release);
        self.presence.notify_waiters();
    }

    fn store_crash(&self, crash: AppCrash) {
        *self.pending_crash.lock().unwrap_or_else(|e| e.into_inner()) = Some(crash);
    }

    fn take_crash(&self) -> Option<AppCrash> {
        self.pending_crash
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }
}

/// Holds the single ready slot until dropped
struct ReadyGuard<'a>(&'a AtomicBool);

impl<'a> ReadyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::ReadyAlreadyPending)?;
        Ok(Self(flag))
    }
}

impl Drop for ReadyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Internal command type
// ---------------------------------------------------------------------------

enum ClientCommand {
    Send {
        action: Action,
        response_tx: oneshot::Sender<Result<Envelope>>,
    },
    Close,
}

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

// ---------------------------------------------------------------------------
// WsClient
// ---------------------------------------------------------------------------

/// Tester-side connection to a relay session
pub struct WsClient {
    session: SessionConfig,
    cmd_tx: Option<mpsc::Sender<ClientCommand>>,
    task: Option<JoinHandle<()>>,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for WsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsClient")
            .field("server", &self.session.server)
            .field("session_id", &self.session.session_id)
            .field("state", &self.shared.state())
            .finish()
    }
}

impl WsClient {
    pub fn new(session: SessionConfig) -> Self {
        Self {
            session,
            cmd_tx: None,
            task: None,
            shared: Arc::new(Shared::new()),
        }
    }

    pub fn session(&self) -> &SessionConfig {
        &self.session
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Whether the relay reported an app in the session
    pub fn is_app_connected(&self) -> bool {
        self.shared.app_connected.load(Ordering::Acquire)
    }

    /// Resolve once an app has joined the session
    async fn wait_for_app(&self) -> Result<()> {
        if self.cmd_tx.is_none() {
            return Err(Error::connection("client is not connected"));
        }
        loop {
            let notified = self.shared.presence.notified();
            tokio::pin!(notified);
            // Register before checking so a wakeup in between is not lost
            notified.as_mut().enable();

            if self.is_app_connected() {
                return Ok(());
            }
            if self.shared.state() == ConnectionState::Disconnected {
                return Err(Error::ConnectionLost);
            }
            debug!("Waiting for the app to join the session");
            notified.await;
        }
    }

    /// Send an action and wait for its reply
    pub async fn send(&self, action: Action) -> Result<Envelope> {
        let cmd_tx = self
            .cmd_tx
            .as_ref()
            .ok_or_else(|| Error::connection("client is not connected"))?;
        let (response_tx, response_rx) = oneshot::channel();
        cmd_tx
            .send(ClientCommand::Send {
                action,
                response_tx,
            })
            .await
            .map_err(|_| Error::channel_send("sync connection task has exited"))?;
        response_rx.await.map_err(|_| Error::ConnectionLost)?
    }
}

impl AppClient for WsClient {
    async fn connect(&mut self) -> Result<()> {
        if self.cmd_tx.is_some() {
            return Ok(());
        }
        self.session.validate()?;

        info!(
            "Connecting to {} (session {})",
            self.session.server, self.session.session_id
        );
        let (ws_stream, _response) = connect_async(self.session.server.as_str())
            .await
            .map_err(|e| {
                Error::connection(format!("Failed to connect to {}: {e}", self.session.server))
            })?;

        let (cmd_tx, cmd_rx) = mpsc::channel(CMD_CHANNEL_CAPACITY);
        self.shared.set_state(ConnectionState::Connected);
        self.task = Some(tokio::spawn(run_client_task(
            ws_stream,
            cmd_rx,
            Arc::clone(&self.shared),
        )));
        self.cmd_tx = Some(cmd_tx);

        let reply = self
            .send(Action::Login {
                session_id: self.session.session_id.clone(),
            })
            .await?;
        let app_connected = reply
            .params
            .get("appConnected")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        // An appConnected frame may already have raised the flag
        if app_connected {
            self.shared.set_app_connected(true);
        }
        debug!("Logged in, app connected: {}", app_connected);
        Ok(())
    }

    async fn wait_until_ready(&self) -> Result<()> {
        let _guard = ReadyGuard::acquire(&self.shared.ready_pending)?;
        self.wait_for_app().await?;
        self.send(Action::IsReady).await?;
        Ok(())
    }

    async fn reload_react_native(&self) -> Result<()> {
        self.send(Action::ReloadReactNative).await?;
        Ok(())
    }

    async fn current_status(&self) -> Result<Value> {
        Ok(self.send(Action::CurrentStatus).await?.params)
    }

    async fn invoke(&self, params: Value) -> Result<Value> {
        Ok(self.send(Action::Invoke(params)).await?.params)
    }

    async fn cleanup(&self) -> Result<()> {
        if self.cmd_tx.is_none() || !self.is_app_connected() {
            return Ok(());
        }
        self.send(Action::Cleanup { stop_runner: true }).await?;
        Ok(())
    }

    fn take_pending_crash(&self) -> Option<AppCrash> {
        self.shared.take_crash()
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(cmd_tx) = self.cmd_tx.take() {
            let _ = cmd_tx.send(ClientCommand::Close).await;
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Sync connection task ended abnormally: {}", e);
            }
        }
        Ok(())
    }

    fn kill(&mut self) {
        self.cmd_tx = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.shared.set_state(ConnectionState::Disconnected);
    }
}

// ---------------------------------------------------------------------------
// Background task
// ---------------------------------------------------------------------------

async fn run_client_task(
    ws_stream: WsStream,
    mut cmd_rx: mpsc::Receiver<ClientCommand>,
    shared: Arc<Shared>,
) {
    let mut tracker = RequestTracker::new();
    let (mut ws_sink, mut ws_stream) = ws_stream.split();

    loop {
        tokio::select! {
            frame = ws_stream.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        handle_frame(text.as_str(), &mut tracker, &shared);
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        debug!("Sync connection closed by server");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!("Sync connection read error: {}", err);
                        break;
                    }
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ClientCommand::Send { action, response_tx }) => {
                        handle_send(action, response_tx, &mut tracker, &mut ws_sink).await;
                    }
                    Some(ClientCommand::Close) | None => {
                        let _ = ws_sink.send(WsMessage::Close(None)).await;
                        let _ = ws_sink.close().await;
                        break;
                    }
                }
            }
        }
    }

    let failed = tracker.fail_all();
    if failed > 0 {
        warn!("Sync connection lost with {} request(s) outstanding", failed);
    }
    shared.set_state(ConnectionState::Disconnected);
    shared.set_app_connected(false);
    debug!("Sync client task exiting");
}

/// Route an incoming frame to the tracker or the shared state
fn handle_frame(text: &str, tracker: &mut RequestTracker, shared: &Shared) {
    let envelope = match Envelope::parse(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            let preview: String = text.chars().take(120).collect();
            warn!("{}: {}", e, preview);
            return;
        }
    };

    match envelope.kind.as_str() {
        APP_WILL_TERMINATE_WITH_ERROR => {
            let crash = AppCrash::from_envelope(&envelope);
            warn!("{}", crash);
            let message = crash.to_string();
            shared.store_crash(crash);
            let rejected = tracker.reject_all(|| Error::app(message.clone()));
            if rejected > 0 {
                debug!("Rejected {} request(s) after the crash", rejected);
            }
        }
        APP_NONRESPONSIVE_DETECTED => {
            warn!("App is not responding: {}", envelope.params);
        }
        APP_CONNECTED => {
            info!("App connected to the session");
            shared.set_app_connected(true);
        }
        APP_DISCONNECTED => {
            info!("App disconnected from the session");
            shared.set_app_connected(false);
            let failed = tracker.fail_all();
            if failed > 0 {
                warn!("App left with {} request(s) outstanding", failed);
            }
        }
        _ => {
            let id = envelope.message_id;
            let kind = envelope.kind.clone();
            if !tracker.complete(envelope) {
                if id == UNSOLICITED_ID {
                    debug!("Ignoring unsolicited '{}' frame", kind);
                } else {
                    debug!("Received '{}' for unknown message id {}", kind, id);
                }
            }
        }
    }
}

/// Register the action, write its frame, and forward the reply to the caller
async fn handle_send(
    action: Action,
    response_tx: oneshot::Sender<Result<Envelope>>,
    tracker: &mut RequestTracker,
    ws_sink: &mut SplitSink<WsStream, WsMessage>,
) {
    // Register before writing so a fast reply finds its slot
    let (id, response_rx) = tracker.register(action.reply_type());
    let envelope = action.envelope(id);

    let json = match envelope.to_json() {
        Ok(json) => json,
        Err(e) => {
            tracker.fail(id, e);
            forward_reply(response_rx, response_tx);
            return;
        }
    };

    trace!("-> {}", json);
    if let Err(err) = ws_sink.send(WsMessage::Text(json.into())).await {
        tracker.fail(
            id,
            Error::connection(format!("Failed to send '{}': {err}", envelope.kind)),
        );
    }
    forward_reply(response_rx, response_tx);
}

fn forward_reply(
    response_rx: oneshot::Receiver<Result<Envelope>>,
    response_tx: oneshot::Sender<Result<Envelope>>,
) {
    tokio::spawn(async move {
        let reply = response_rx.await.unwrap_or(Err(Error::ConnectionLost));
        let _ = response_tx.send(reply);
    });
}
