//! Correlates outbound actions with their replies

use std::collections::HashMap;

use tokio::sync::oneshot;

use pilot_core::prelude::*;

use crate::protocol::Envelope;

/// A caller waiting for the reply to one action
struct PendingRequest {
    reply_type: &'static str,
    response_tx: oneshot::Sender<Result<Envelope>>,
}

/// Tracks pending requests and matches replies by `messageId`.
///
/// Owned by the connection task, so it needs no locking. Ids start at 1 and
/// only ever grow.
#[derive(Default)]
pub struct RequestTracker {
    next_id: i64,
    pending: HashMap<i64, PendingRequest>,
}

impl std::fmt::Debug for RequestTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestTracker")
            .field("next_id", &self.next_id)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh id and a slot resolved by the reply of `reply_type`
    pub fn register(
        &mut self,
        reply_type: &'static str,
    ) -> (i64, oneshot::Receiver<Result<Envelope>>) {
        self.next_id += 1;
        let id = self.next_id;
        let (response_tx, response_rx) = oneshot::channel();
        self.pending.insert(
            id,
            PendingRequest {
                reply_type,
                response_tx,
            },
        );
        (id, response_rx)
    }

    /// Route a reply to its waiter. Returns false when no request has its id.
    ///
    /// Error frames reject the request; a reply of an unexpected type is a
    /// protocol error.
    pub fn complete(&mut self, envelope: Envelope) -> bool {
        let Some(pending) = self.pending.remove(&envelope.message_id) else {
            return false;
        };

        let result = if envelope.is_error() {
            Err(envelope.to_error())
        } else if envelope.kind != pending.reply_type {
            Err(Error::protocol(format!(
                "expected '{}' for message {}, got '{}'",
                pending.reply_type, envelope.message_id, envelope.kind
            )))
        } else {
            Ok(envelope)
        };
        let _ = pending.response_tx.send(result);
        true
    }

    /// Reject a single request, e.g. when its frame could not be written
    pub fn fail(&mut self, id: i64, error: Error) {
        if let Some(pending) = self.pending.remove(&id) {
            let _ = pending.response_tx.send(Err(error));
        }
    }

    /// Fail every outstanding request with [`Error::ConnectionLost`]
    pub fn fail_all(&mut self) -> usize {
        self.reject_all(|| Error::ConnectionLost)
    }

    /// Fail every outstanding request with an error built per waiter
    pub fn reject_all(&mut self, error: impl Fn() -> Error) -> usize {
        let count = self.pending.len();
        for (_, pending) in self.pending.drain() {
            let _ = pending.response_tx.send(Err(error()));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
