//! Embedded relay server
//!
//! Pairs one tester connection with one app connection per session id and
//! forwards frames between them. Used when no external session server is
//! configured.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{accept_async, WebSocketStream};

use pilot_core::prelude::*;

use crate::protocol::{
    Envelope, LoginParams, Role, APP_CONNECTED, APP_DISCONNECTED, LOGIN, LOGIN_SUCCESS,
    SERVER_ERROR, UNSOLICITED_ID,
};

static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Write half of one connection
#[derive(Debug, Clone)]
struct Peer {
    conn_id: u64,
    tx: mpsc::UnboundedSender<WsMessage>,
}

impl Peer {
    fn send_envelope(&self, envelope: &Envelope) {
        match envelope.to_json() {
            Ok(json) => {
                let _ = self.tx.send(WsMessage::Text(json.into()));
            }
            Err(e) => warn!("Relay: cannot encode '{}': {}", envelope.kind, e),
        }
    }
}

#[derive(Debug, Default)]
struct SessionPeers {
    tester: Option<Peer>,
    app: Option<Peer>,
}

impl SessionPeers {
    fn slot(&mut self, role: Role) -> &mut Option<Peer> {
        match role {
            Role::Tester => &mut self.tester,
            Role::App => &mut self.app,
        }
    }

    fn get(&self, role: Role) -> Option<&Peer> {
        match role {
            Role::Tester => self.tester.as_ref(),
            Role::App => self.app.as_ref(),
        }
    }

    fn is_empty(&self) -> bool {
        self.tester.is_none() && self.app.is_none()
    }
}

type Sessions = Arc<Mutex<HashMap<String, SessionPeers>>>;

/// Handle to a running relay server
#[derive(Debug)]
pub struct RelayServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl RelayServer {
    /// Bind on `127.0.0.1:<port>`; port 0 picks a free one
    pub async fn bind(port: u16) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        info!("Relay server listening on {}", addr);
        let task = tokio::spawn(run_accept_loop(listener, shutdown_rx));

        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// WebSocket URL clients connect to
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Stop accepting, drop every connection and wait for the server task
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        debug!("Relay server on {} stopped", self.addr);
    }
}

impl Drop for RelayServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn run_accept_loop(listener: TcpListener, mut shutdown_rx: oneshot::Receiver<()>) {
    let sessions: Sessions = Arc::default();
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer_addr)) => {
                        while connections.try_join_next().is_some() {}
                        connections.spawn(handle_connection(
                            stream,
                            peer_addr,
                            Arc::clone(&sessions),
                        ));
                    }
                    Err(e) => warn!("Relay: accept failed: {}", e),
                }
            }
        }
    }

    connections.shutdown().await;
}

async fn handle_connection(stream: TcpStream, peer_addr: SocketAddr, sessions: Sessions) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!("Relay: handshake with {} failed: {}", peer_addr, e);
            return;
        }
    };
    let (mut ws_sink, mut ws_stream) = ws.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if ws_sink.send(message).await.is_err() {
                break;
            }
        }
        let _ = ws_sink.close().await;
    });

    let peer = Peer {
        conn_id: CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed),
        tx,
    };

    let Some((login, message_id)) = read_login(&mut ws_stream).await else {
        debug!("Relay: {} closed before logging in", peer_addr);
        drop(peer);
        let _ = writer.await;
        return;
    };
    let login = match login {
        Ok(login) => login,
        Err(message) => {
            peer.send_envelope(&Envelope::new(
                SERVER_ERROR,
                json!({ "message": message }),
                message_id,
            ));
            drop(peer);
            let _ = writer.await;
            return;
        }
    };

    register(&sessions, &login, &peer, message_id);
    debug!(
        "Relay: {} joined session {} as {}",
        peer_addr,
        login.session_id,
        login.role.as_str()
    );

    relay_frames(&mut ws_stream, &sessions, &login, &peer).await;

    unregister(&sessions, &login, &peer);
    debug!(
        "Relay: {} left session {}",
        login.role.as_str(),
        login.session_id
    );
    drop(peer);
    let _ = writer.await;
}

/// Wait for the first text frame and interpret it as a login.
///
/// `None` when the socket closes first; `Some(Err)` carries the reason a
/// frame was rejected, together with the id to answer on.
async fn read_login(
    ws_stream: &mut SplitStream<WebSocketStream<TcpStream>>,
) -> Option<(std::result::Result<LoginParams, String>, i64)> {
    loop {
        match ws_stream.next().await? {
            Ok(WsMessage::Text(text)) => {
                let envelope = match Envelope::parse(text.as_str()) {
                    Ok(envelope) => envelope,
                    Err(e) => return Some((Err(e.to_string()), UNSOLICITED_ID)),
                };
                let id = envelope.message_id;
                if envelope.kind != LOGIN {
                    return Some((
                        Err(format!("expected login, got '{}'", envelope.kind)),
                        id,
                    ));
                }
                let login = serde_json::from_value::<LoginParams>(envelope.params)
                    .map_err(|e| format!("invalid login: {e}"));
                return Some((login, id));
            }
            Ok(WsMessage::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

fn register(sessions: &Sessions, login: &LoginParams, peer: &Peer, message_id: i64) {
    let mut sessions = sessions.lock().unwrap_or_else(|e| e.into_inner());
    let peers = sessions.entry(login.session_id.clone()).or_default();

    let app_connected = match login.role {
        Role::Tester => peers.app.is_some(),
        Role::App => true,
    };
    peer.send_envelope(&Envelope::new(
        LOGIN_SUCCESS,
        json!({ "appConnected": app_connected, "role": login.role }),
        message_id,
    ));

    if peers.slot(login.role).replace(peer.clone()).is_some() {
        warn!(
            "Relay: a new {} replaced the previous one in session {}",
            login.role.as_str(),
            login.session_id
        );
    }
    if login.role == Role::App {
        if let Some(tester) = peers.get(Role::Tester) {
            tester.send_envelope(&Envelope::new(APP_CONNECTED, json!({}), UNSOLICITED_ID));
        }
    }
}

fn unregister(sessions: &Sessions, login: &LoginParams, peer: &Peer) {
    let mut sessions = sessions.lock().unwrap_or_else(|e| e.into_inner());
    let Some(peers) = sessions.get_mut(&login.session_id) else {
        return;
    };

    let slot = peers.slot(login.role);
    if slot.as_ref().is_some_and(|p| p.conn_id == peer.conn_id) {
        *slot = None;
        if login.role == Role::App {
            if let Some(tester) = peers.get(Role::Tester) {
                tester.send_envelope(&Envelope::new(
                    APP_DISCONNECTED,
                    json!({}),
                    UNSOLICITED_ID,
                ));
            }
        }
    }
    if peers.is_empty() {
        sessions.remove(&login.session_id);
    }
}

async fn relay_frames(
    ws_stream: &mut SplitStream<WebSocketStream<TcpStream>>,
    sessions: &Sessions,
    login: &LoginParams,
    peer: &Peer,
) {
    while let Some(frame) = ws_stream.next().await {
        let text = match frame {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!("Relay: read error in session {}: {}", login.session_id, e);
                break;
            }
        };

        let target = {
            let sessions = sessions.lock().unwrap_or_else(|e| e.into_inner());
            sessions
                .get(&login.session_id)
                .and_then(|peers| peers.get(login.role.peer()))
                .cloned()
        };

        match target {
            Some(target) => {
                let _ = target.tx.send(WsMessage::Text(text));
            }
            None if login.role == Role::Tester => {
                let message_id = Envelope::parse(text.as_str())
                    .map(|e| e.message_id)
                    .unwrap_or(UNSOLICITED_ID);
                peer.send_envelope(&Envelope::new(
                    SERVER_ERROR,
                    json!({ "message": "Cannot forward the message: no app is connected to this session" }),
                    message_id,
                ));
            }
            None => trace!(
                "Relay: dropping app frame, no tester in session {}",
                login.session_id
            ),
        }
    }
}
