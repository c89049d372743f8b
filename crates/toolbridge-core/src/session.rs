//! Session Layer (C3): the duplex JSON-frame protocol workers speak, and the bookkeeping
//! that lets the router push a frame at whichever session currently represents a worker.
//!
//! Transport-agnostic: this module knows nothing about websockets or axum. A session's
//! outbound side is a plain [`tokio::sync::mpsc::Sender<Frame>`]; the HTTP layer owns pumping
//! that channel onto an actual socket and decoding incoming text frames back into [`Frame`].

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::DispatchError;
use crate::worker::{ToolSchema, WorkerId};

/// Interval between keep-alive pings sent to a worker.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// How long a worker has to answer a ping with a pong before its session is closed.
pub const PONG_DEADLINE: Duration = Duration::from_secs(5);

/// A single frame of the worker session protocol. Both directions share one wire shape,
/// discriminated by `type`; which variants a peer is allowed to send is enforced by the
/// HTTP layer's session loop, not by this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Worker → server. Announces identity and the tools currently offered.
    Register {
        worker_id: String,
        worker_token: String,
        tools: Vec<ToolSchema>,
    },
    /// Worker → server. Voluntary withdrawal; the worker remains connected but offers
    /// nothing until it registers again.
    Unregister { worker_id: String },
    /// Server → worker. A tool invocation to execute.
    ToolRequest {
        request_id: String,
        tool_name: String,
        args: Value,
    },
    /// Worker → server. The outcome of a previously dispatched [`Frame::ToolRequest`].
    ToolResponse {
        request_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Either direction keep-alive probe.
    Ping { timestamp: Value },
    /// Either direction keep-alive reply.
    Pong { timestamp: Value },
    /// Either direction. A protocol-level complaint (malformed frame, unknown tool, etc.)
    /// that does not itself close the session.
    Error {
        code: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
}

/// The server-side handle to a connected session's outbound direction.
#[derive(Clone)]
pub struct SessionHandle {
    pub session_id: String,
    outbound: mpsc::Sender<Frame>,
}

impl SessionHandle {
    pub fn new(session_id: String, outbound: mpsc::Sender<Frame>) -> Self {
        Self { session_id, outbound }
    }

    /// Enqueues `frame` for delivery to the worker. Fails only once the session's receive
    /// loop has already torn the channel down.
    pub fn send(&self, frame: Frame) -> Result<(), DispatchError> {
        self.outbound
            .try_send(frame)
            .map_err(|_| DispatchError::WorkerDisconnected)
    }
}

/// Generates a fresh session id. Never reused; collisions are cryptographically negligible.
pub fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}

/// Tracks which session currently represents each worker, and lets the router address a
/// worker by id without knowing its session id.
///
/// Claim-wins: registering a worker id that already has a session returns the id of the
/// session being displaced, so the caller can close it before committing the new one.
pub struct SessionLayer {
    sessions: RwLock<HashMap<String, SessionHandle>>,
    current_session_of_worker: RwLock<HashMap<WorkerId, String>>,
}

impl Default for SessionLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionLayer {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            current_session_of_worker: RwLock::new(HashMap::new()),
        }
    }

    /// Registers `handle` as the session for `worker_id`. If another session already claims
    /// that worker id, its session id is returned so the caller can tear it down — the new
    /// registration always wins.
    pub fn claim(&self, worker_id: WorkerId, handle: SessionHandle) -> Option<String> {
        let displaced = self
            .current_session_of_worker
            .write()
            .insert(worker_id, handle.session_id.clone());

        self.sessions.write().insert(handle.session_id.clone(), handle);
        displaced
    }

    /// Removes a session entirely. If `worker_id` is given and it still points at this
    /// session, the worker→session mapping is cleared too (guards against a stale close
    /// racing a claim-wins replacement, mirroring the worker registry's own guard).
    pub fn remove(&self, session_id: &str, worker_id: Option<&WorkerId>) {
        self.sessions.write().remove(session_id);
        if let Some(worker_id) = worker_id {
            let mut current = self.current_session_of_worker.write();
            if current.get(worker_id).map(String::as_str) == Some(session_id) {
                current.remove(worker_id);
            }
        }
    }

    pub fn get(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions.read().get(session_id).cloned()
    }

    /// Sends `frame` to whichever session currently represents `worker_id`. Returns the
    /// id of the session the frame was actually handed to, so a caller tracking an
    /// in-flight request (the Invocation Router) can later tell a stale close of some
    /// *other*, already-displaced session apart from the one its request is really riding.
    pub fn send_to_worker(&self, worker_id: &WorkerId, frame: Frame) -> Result<String, DispatchError> {
        let session_id = self
            .current_session_of_worker
            .read()
            .get(worker_id)
            .cloned()
            .ok_or(DispatchError::WorkerDisconnected)?;

        let handle = self
            .sessions
            .read()
            .get(&session_id)
            .cloned()
            .ok_or(DispatchError::WorkerDisconnected)?;

        handle.send(frame)?;
        Ok(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> (SessionHandle, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(8);
        (SessionHandle::new(new_session_id(), tx), rx)
    }

    #[test]
    fn claim_reports_the_displaced_session() {
        let layer = SessionLayer::new();
        let worker_id = WorkerId::from_token("w1");
        let (h1, _rx1) = handle();
        let (h2, _rx2) = handle();

        assert_eq!(layer.claim(worker_id.clone(), h1.clone()), None);
        let displaced = layer.claim(worker_id, h2);
        assert_eq!(displaced, Some(h1.session_id));
    }

    #[test]
    fn send_to_worker_reaches_the_current_session() {
        let layer = SessionLayer::new();
        let worker_id = WorkerId::from_token("w1");
        let (h1, mut rx1) = handle();
        layer.claim(worker_id.clone(), h1);

        layer
            .send_to_worker(
                &worker_id,
                Frame::ToolRequest {
                    request_id: "r1".into(),
                    tool_name: "echo".into(),
                    args: Value::Null,
                },
            )
            .unwrap();

        let received = rx1.try_recv().unwrap();
        assert!(matches!(received, Frame::ToolRequest { .. }));
    }

    #[test]
    fn stale_remove_does_not_clear_a_replaced_worker_mapping() {
        let layer = SessionLayer::new();
        let worker_id = WorkerId::from_token("w1");
        let (h1, _rx1) = handle();
        let (h2, _rx2) = handle();
        layer.claim(worker_id.clone(), h1.clone());
        layer.claim(worker_id.clone(), h2.clone());

        layer.remove(&h1.session_id, Some(&worker_id));

        assert!(layer
            .send_to_worker(&worker_id, Frame::Ping { timestamp: Value::Null })
            .is_ok());
    }

    #[test]
    fn unknown_worker_is_disconnected() {
        let layer = SessionLayer::new();
        let worker_id = WorkerId::from_token("ghost");
        let err = layer
            .send_to_worker(&worker_id, Frame::Ping { timestamp: Value::Null })
            .unwrap_err();
        assert!(matches!(err, DispatchError::WorkerDisconnected));
    }
}
