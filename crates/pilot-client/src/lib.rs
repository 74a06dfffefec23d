//! # pilot-client - App Synchronization Channel
//!
//! Exchanges correlated request/reply frames with the app under test to find
//! out when it is ready and whether it crashed.
//!
//! ## Public API
//!
//! - [`AppClient`] - Sync channel operations used by the orchestrator
//! - [`WsClient`] - WebSocket implementation with a background connection task
//! - [`RequestTracker`] - Matches replies to outstanding actions by `messageId`
//! - [`RelayServer`] - Embedded server pairing a tester with an app per session
//! - [`Envelope`], [`Action`], [`AppCrash`] - Wire format

pub mod client;
pub mod protocol;
pub mod relay;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;
pub mod tracker;

pub use client::{AppClient, ConnectionState, WsClient};
pub use protocol::{Action, AppCrash, Envelope, LoginParams, Role};
pub use relay::RelayServer;
pub use tracker::RequestTracker;
