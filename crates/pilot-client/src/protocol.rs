//! Sync channel wire format
//!
//! Every frame is a JSON text frame holding one [`Envelope`]. Requests carry a
//! `messageId`; replies echo it. Unsolicited app events carry the id of the
//! request they interrupted, or `-1`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use pilot_core::prelude::*;

/// `messageId` used on frames that answer nothing
pub const UNSOLICITED_ID: i64 = -1;

// ─────────────────────────────────────────────────────────────────
// Message types
// ─────────────────────────────────────────────────────────────────

pub const LOGIN: &str = "login";
pub const LOGIN_SUCCESS: &str = "loginSuccess";
pub const IS_READY: &str = "isReady";
pub const READY: &str = "ready";
pub const CURRENT_STATUS: &str = "currentStatus";
pub const CURRENT_STATUS_RESULT: &str = "currentStatusResult";
pub const CLEANUP: &str = "cleanup";
pub const CLEANUP_DONE: &str = "cleanupDone";
pub const RELOAD_REACT_NATIVE: &str = "reloadReactNative";
pub const INVOKE: &str = "invoke";
pub const INVOKE_RESULT: &str = "invokeResult";

pub const APP_CONNECTED: &str = "appConnected";
pub const APP_DISCONNECTED: &str = "appDisconnected";
pub const APP_WILL_TERMINATE_WITH_ERROR: &str = "AppWillTerminateWithError";
pub const APP_NONRESPONSIVE_DETECTED: &str = "AppNonresponsiveDetected";

pub const ERROR: &str = "error";
pub const SERVER_ERROR: &str = "serverError";

/// One sync channel frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "empty_params")]
    pub params: Value,
    #[serde(rename = "messageId", default = "unsolicited_id")]
    pub message_id: i64,
}

fn empty_params() -> Value {
    json!({})
}

fn unsolicited_id() -> i64 {
    UNSOLICITED_ID
}

impl Envelope {
    pub fn new(kind: impl Into<String>, params: Value, message_id: i64) -> Self {
        Self {
            kind: kind.into(),
            params,
            message_id,
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| Error::protocol(format!("malformed sync frame: {e}")))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// String parameter, if present
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    pub fn is_error(&self) -> bool {
        self.kind == ERROR || self.kind == SERVER_ERROR
    }

    /// Error carried by an `error`/`serverError` frame
    pub fn to_error(&self) -> Error {
        let message = self
            .param_str("error")
            .or_else(|| self.param_str("message"))
            .map(str::to_string)
            .unwrap_or_else(|| self.params.to_string());
        if self.kind == SERVER_ERROR {
            Error::protocol(message)
        } else {
            Error::app(message)
        }
    }
}

/// Which side of a session a connection speaks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Tester,
    App,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Tester => "tester",
            Role::App => "app",
        }
    }

    pub fn peer(&self) -> Role {
        match self {
            Role::Tester => Role::App,
            Role::App => Role::Tester,
        }
    }
}

/// Parameters of a `login` frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginParams {
    pub session_id: String,
    pub role: Role,
}

/// A request the tester sends and the reply type that completes it
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Login { session_id: String },
    IsReady,
    CurrentStatus,
    Cleanup { stop_runner: bool },
    ReloadReactNative,
    Invoke(Value),
}

impl Action {
    pub fn request_type(&self) -> &'static str {
        match self {
            Action::Login { .. } => LOGIN,
            Action::IsReady => IS_READY,
            Action::CurrentStatus => CURRENT_STATUS,
            Action::Cleanup { .. } => CLEANUP,
            Action::ReloadReactNative => RELOAD_REACT_NATIVE,
            Action::Invoke(_) => INVOKE,
        }
    }

    pub fn reply_type(&self) -> &'static str {
        match self {
            Action::Login { .. } => LOGIN_SUCCESS,
            Action::IsReady | Action::ReloadReactNative => READY,
            Action::CurrentStatus => CURRENT_STATUS_RESULT,
            Action::Cleanup { .. } => CLEANUP_DONE,
            Action::Invoke(_) => INVOKE_RESULT,
        }
    }

    pub fn params(&self) -> Value {
        match self {
            Action::Login { session_id } => json!({
                "sessionId": session_id,
                "role": Role::Tester,
            }),
            Action::Cleanup { stop_runner } => json!({ "stopRunner": stop_runner }),
            Action::Invoke(params) => params.clone(),
            Action::IsReady | Action::CurrentStatus | Action::ReloadReactNative => json!({}),
        }
    }

    pub fn envelope(&self, message_id: i64) -> Envelope {
        Envelope::new(self.request_type(), self.params(), message_id)
    }
}

/// Crash report captured from `AppWillTerminateWithError`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppCrash {
    pub details: String,
}

impl AppCrash {
    pub fn from_envelope(envelope: &Envelope) -> Self {
        let details = envelope
            .param_str("errorDetails")
            .map(str::to_string)
            .unwrap_or_else(|| envelope.params.to_string());
        Self { details }
    }
}

impl std::fmt::Display for AppCrash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "The app has crashed: {}", self.details)
    }
}
