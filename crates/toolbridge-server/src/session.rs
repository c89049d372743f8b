//! Worker session transport (C3): the websocket upgrade at `GET /worker/session`, the
//! reader/writer task pair per connection, and the `Opened -> Active -> Closed` state
//! machine from `spec.md` §4.3.
//!
//! This module is the only place that knows sessions ride websockets — everything it talks
//! to (`SessionLayer`, `WorkerRegistry`, `InvocationRouter`) is transport-agnostic.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tracing::{info, warn};

use toolbridge_core::router::ToolOutcome;
use toolbridge_core::session::{new_session_id, Frame, SessionHandle, KEEP_ALIVE_INTERVAL, PONG_DEADLINE};
use toolbridge_core::worker::WorkerId;

use crate::state::AppState;

/// How long a newly-opened session has to send its `register` frame before being closed.
const HANDSHAKE_WINDOW: Duration = Duration::from_secs(10);

/// Per-session close signals, keyed by session-id. The Worker/Session registries in
/// `toolbridge-core` own the *bookkeeping* of which session currently represents a worker;
/// this registry is the server's own means of reaching into a live websocket task and
/// telling it to stop, which claim-wins needs to actually close the displaced connection
/// rather than merely forget about it.
#[derive(Clone, Default)]
pub struct SessionCloseRegistry {
    signals: Arc<Mutex<HashMap<String, Arc<Notify>>>>,
}

impl SessionCloseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, session_id: &str) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.signals.lock().insert(session_id.to_string(), notify.clone());
        notify
    }

    fn unregister(&self, session_id: &str) {
        self.signals.lock().remove(session_id);
    }

    /// Signals the named session to close, if it's still live. A miss just means the
    /// session already tore itself down through some other path.
    fn close(&self, session_id: &str) {
        if let Some(notify) = self.signals.lock().remove(session_id) {
            notify.notify_one();
        }
    }

    /// Signals every currently-registered session to close. Used on process shutdown
    /// (`spec.md` §5: "close all sessions with a normal-close reason").
    pub fn close_all(&self) {
        let signals: Vec<Arc<Notify>> = self.signals.lock().drain().map(|(_, notify)| notify).collect();
        for notify in signals {
            notify.notify_one();
        }
    }
}

fn error_body(message: &str, code: &'static str) -> Json<serde_json::Value> {
    Json(json!({ "error": message, "code": code }))
}

/// `GET /worker/session`. Rejects the upgrade outright when no bearer is presented
/// (`spec.md` §4.3: "The session endpoint rejects the upgrade when no bearer is presented").
pub async fn upgrade(State(state): State<AppState>, headers: HeaderMap, ws: WebSocketUpgrade) -> Response {
    let presented = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let Some(worker_token) = presented else {
        return (StatusCode::UNAUTHORIZED, error_body("missing Authorization header", "MISSING_AUTH_HEADER")).into_response();
    };

    let Some(expected) = state.config.worker_auth_token() else {
        return (StatusCode::INTERNAL_SERVER_ERROR, error_body("no worker auth token configured", "INTERNAL")).into_response();
    };

    if worker_token != expected {
        return (StatusCode::FORBIDDEN, error_body("unknown worker token", "UNKNOWN_TOKEN")).into_response();
    }

    let worker_token = worker_token.to_string();
    ws.on_upgrade(move |socket| run_session(socket, state, worker_token))
}

/// Drives one session end to end: handshake, active frame loop with keep-alive, and the
/// teardown that fails pending invocations and marks the worker disconnected.
async fn run_session(socket: WebSocket, state: AppState, presented_worker_token: String) {
    let session_id = new_session_id();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Frame>(64);

    let handle = SessionHandle::new(session_id.clone(), outbound_tx);
    let close_signal = state.session_closers.register(&session_id);

    // Opened: wait for the first frame, which must be `register`, within the handshake
    // window. Anything else closes the session per `spec.md`'s state machine.
    let first = tokio::time::timeout(HANDSHAKE_WINDOW, ws_rx.next()).await;
    let worker_id = match first {
        Ok(Some(Ok(Message::Text(text)))) => match serde_json::from_str::<Frame>(&text) {
            Ok(Frame::Register { worker_id, worker_token, tools }) => {
                if worker_token != presented_worker_token {
                    warn!(session_id = %session_id, "register worker_token mismatch with bearer");
                    state.session_closers.unregister(&session_id);
                    return;
                }
                let expected_id = WorkerId::from_token(&worker_token);
                if worker_id != expected_id.as_str() {
                    warn!(session_id = %session_id, "register worker_id does not match hash(worker_token)");
                    state.session_closers.unregister(&session_id);
                    return;
                }

                // Claim-wins: close whichever session currently represents this worker
                // before committing the new registration.
                if let Some(displaced) = state.sessions.claim(expected_id.clone(), handle.clone()) {
                    if let Some(displaced_handle) = state.sessions.get(&displaced) {
                        let _ = displaced_handle.send(Frame::Error {
                            code: "REPLACED".to_string(),
                            message: "replaced by a newer registration".to_string(),
                            request_id: None,
                        });
                    }
                    state.session_closers.close(&displaced);
                    state.router.fail_all_for_worker(&expected_id, &displaced, true);
                    state.sessions.remove(&displaced, None);
                }

                state.workers.upsert(expected_id.clone(), worker_token, tools, session_id.clone());
                info!(worker_id = %expected_id.as_str(), session_id = %session_id, "worker connected");
                expected_id
            }
            _ => {
                warn!(session_id = %session_id, "first frame was not a valid register");
                state.session_closers.unregister(&session_id);
                return;
            }
        },
        _ => {
            warn!(session_id = %session_id, "handshake window elapsed without register");
            state.session_closers.unregister(&session_id);
            return;
        }
    };

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let Ok(text) = serde_json::to_string(&frame) else { continue };
            if ws_tx.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    active_loop(&mut ws_rx, &state, &worker_id, &session_id, &handle, &close_signal).await;

    writer.abort();
    state.session_closers.unregister(&session_id);
    state.workers.mark_disconnected(&worker_id, &session_id);
    state.sessions.remove(&session_id, Some(&worker_id));
    state.router.fail_all_for_worker(&worker_id, &session_id, false);
    info!(worker_id = %worker_id.as_str(), session_id = %session_id, "worker disconnected");
}

/// The `Active` state: reads frames until the socket closes, the keep-alive deadline
/// elapses without a pong, or the session is closed out from under it by a claim-wins
/// replacement.
async fn active_loop(
    ws_rx: &mut SplitStream<WebSocket>,
    state: &AppState,
    worker_id: &WorkerId,
    session_id: &str,
    handle: &SessionHandle,
    close_signal: &Notify,
) {
    let mut keep_alive = tokio::time::interval(KEEP_ALIVE_INTERVAL);
    let mut pong_deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = close_signal.notified() => {
                return;
            }
            _ = keep_alive.tick() => {
                let _ = handle.send(Frame::Ping { timestamp: json!(now_unix_millis()) });
                pong_deadline = Some(Instant::now() + PONG_DEADLINE);
            }
            _ = sleep_until_deadline(pong_deadline) => {
                warn!(worker_id = %worker_id.as_str(), session_id = %session_id, "pong deadline elapsed, closing session");
                return;
            }
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        pong_deadline = None;
                        handle_frame(&text, state, worker_id, session_id, handle).await;
                    }
                    Some(Ok(Message::Close(_))) | None => return,
                    Some(Ok(_)) => { pong_deadline = None; }
                    Some(Err(_)) => return,
                }
            }
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(when) => tokio::time::sleep_until(when).await,
        None => std::future::pending().await,
    }
}

async fn handle_frame(text: &str, state: &AppState, worker_id: &WorkerId, session_id: &str, handle: &SessionHandle) {
    let frame: Frame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(err) => {
            let _ = handle.send(Frame::Error {
                code: "INVALID_PAYLOAD".to_string(),
                message: format!("malformed frame: {err}"),
                request_id: None,
            });
            return;
        }
    };

    match frame {
        Frame::Register { tools, worker_token, .. } => {
            // A worker may re-announce its tool list without a fresh socket; treat as an
            // in-place update rather than a protocol error.
            state.workers.upsert(worker_id.clone(), worker_token, tools, session_id.to_string());
        }
        Frame::Unregister { .. } => {
            // Keep the worker's existing token — only its tool list is cleared. Re-deriving
            // the token from the id would be lossy (`WorkerId` is a one-way hash) and would
            // silently drop the worker out of every tenant's admitted set until it re-registers.
            if let Some(existing) = state.workers.snapshot().iter().find(|w| &w.id == worker_id) {
                let token = existing.token.clone();
                state.workers.upsert(worker_id.clone(), token, Vec::new(), session_id.to_string());
            }
        }
        Frame::ToolResponse { request_id, result, error } => {
            let outcome = match (result, error) {
                (_, Some(message)) => ToolOutcome::ToolError(message),
                (Some(value), None) => ToolOutcome::Success(value),
                (None, None) => ToolOutcome::Success(serde_json::Value::Null),
            };
            state.router.complete(&request_id, outcome);
        }
        Frame::Ping { timestamp } => {
            let _ = handle.send(Frame::Pong { timestamp });
        }
        Frame::Pong { .. } => {}
        Frame::Error { .. } => {}
        Frame::ToolRequest { .. } => {
            let _ = handle.send(Frame::Error {
                code: "INVALID_PAYLOAD".to_string(),
                message: "tool_request is a server-to-worker frame".to_string(),
                request_id: None,
            });
        }
    }
}

fn now_unix_millis() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}
