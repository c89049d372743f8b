//! Invocation Router (C4): correlates an incoming tool call with a worker session and
//! resolves it once the worker answers, times out, or disconnects.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::DispatchError;
use crate::session::{Frame, SessionLayer};
use crate::tenant::Tenant;
use crate::worker::{WorkerId, WorkerRecord};

/// The outcome a pending invocation is resolved with: either a worker's
/// [`Frame::ToolResponse`], or the session layer reporting the worker lost before replying.
#[derive(Debug, Clone)]
pub enum ToolOutcome {
    Success(Value),
    ToolError(String),
    Disconnected,
    Replaced,
    ServerShutdown,
}

struct PendingInvocation {
    worker_id: WorkerId,
    /// The session the request was actually handed to. `spec.md` §4.3's close semantics
    /// fail pending invocations routed *through that session*, not every invocation
    /// outstanding against the worker id — a claim-wins replacement can leave the
    /// displaced session's teardown task running well after a new invocation has already
    /// been dispatched over the session that replaced it.
    session_id: String,
    completion: oneshot::Sender<ToolOutcome>,
}

/// Removes a pending invocation's table entry when dropped, regardless of why `dispatch`
/// stopped awaiting it — a completed reply, a timeout, or the caller's future being dropped
/// outright (HTTP client disconnects mid-request; `spec.md` §5's `ClientCancelled` path).
/// `remove` is idempotent, so this is a no-op on the paths that already removed the entry.
struct PendingGuard<'a> {
    router: &'a InvocationRouter,
    request_id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.router.pending.write().remove(self.request_id);
    }
}

/// Picks which connected, tool-offering candidate should receive an invocation.
///
/// Tenant-self-affinity: if one candidate's worker id is derived from the tenant's own
/// bearer token, it wins outright (a tenant's own embedded worker answers its own calls
/// before any other tenant-admitted worker is considered). Otherwise the earliest
/// registered still-connected candidate wins — first-come-wins, stable across reconnects
/// because `registered_seq` is preserved by the worker registry.
fn pick_candidate<'a>(tenant: &Tenant, candidates: &[&'a WorkerRecord]) -> Option<&'a WorkerRecord> {
    let self_affine_id = WorkerId::from_token(&tenant.bearer_token);
    if let Some(record) = candidates.iter().find(|w| w.id == self_affine_id) {
        return Some(record);
    }
    candidates.iter().min_by_key(|w| w.registered_seq).copied()
}

/// Holds oneshot completion slots for in-flight tool invocations.
pub struct InvocationRouter {
    pending: RwLock<HashMap<String, PendingInvocation>>,
}

impl Default for InvocationRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl InvocationRouter {
    pub fn new() -> Self {
        Self {
            pending: RwLock::new(HashMap::new()),
        }
    }

    /// Selects a worker, sends it a [`Frame::ToolRequest`], and awaits the matching
    /// [`Frame::ToolResponse`] up to `timeout`.
    pub async fn dispatch(
        &self,
        tenant: &Tenant,
        tool_name: &str,
        arguments: Value,
        workers: &[WorkerRecord],
        sessions: &SessionLayer,
        timeout: Duration,
    ) -> Result<Value, DispatchError> {
        let candidates: Vec<&WorkerRecord> = workers
            .iter()
            .filter(|w| w.is_connected() && w.offers(tool_name) && tenant.admits(&w.token))
            .collect();

        let worker = pick_candidate(tenant, &candidates).ok_or_else(|| DispatchError::ToolNotFound(tool_name.to_string()))?;

        let request_id = Uuid::new_v4().to_string();
        let session_id = sessions.send_to_worker(
            &worker.id,
            Frame::ToolRequest {
                request_id: request_id.clone(),
                tool_name: tool_name.to_string(),
                args: arguments,
            },
        )?;

        let (tx, rx) = oneshot::channel();
        self.pending.write().insert(
            request_id.clone(),
            PendingInvocation {
                worker_id: worker.id.clone(),
                session_id,
                completion: tx,
            },
        );

        let _guard = PendingGuard { router: self, request_id: &request_id };

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(ToolOutcome::Success(value))) => Ok(value),
            Ok(Ok(ToolOutcome::ToolError(message))) => Err(DispatchError::ToolExecutionError(message)),
            Ok(Ok(ToolOutcome::Disconnected)) => Err(DispatchError::WorkerDisconnected),
            Ok(Ok(ToolOutcome::Replaced)) => Err(DispatchError::WorkerReplaced),
            Ok(Ok(ToolOutcome::ServerShutdown)) => Err(DispatchError::ServerShutdown),
            Ok(Err(_)) => Err(DispatchError::WorkerDisconnected),
            Err(_) => Err(DispatchError::Timeout),
        }
    }

    /// Resolves a pending invocation once its worker's [`Frame::ToolResponse`] arrives.
    /// A `request_id` with no pending entry (already timed out, or unknown) is ignored.
    pub fn complete(&self, request_id: &str, outcome: ToolOutcome) {
        if let Some(pending) = self.pending.write().remove(request_id) {
            let _ = pending.completion.send(outcome);
        }
    }

    /// Number of invocations currently awaiting a reply. Exposed for tests only.
    #[cfg(test)]
    pub fn pending_count(&self) -> usize {
        self.pending.read().len()
    }

    /// Fails every invocation routed through `session_id` for `worker_id`, e.g. when that
    /// session disconnects or is displaced by a claim-wins reconnect. Scoped to the
    /// session, not just the worker id: by the time a displaced session's teardown task
    /// actually runs, a new invocation may already be in flight on the session that
    /// replaced it, and that one must be left alone (`spec.md` §4.3 — a session close
    /// fails invocations routed through *that session*).
    pub fn fail_all_for_worker(&self, worker_id: &WorkerId, session_id: &str, replaced: bool) {
        let mut pending = self.pending.write();
        let stale: Vec<String> = pending
            .iter()
            .filter(|(_, p)| &p.worker_id == worker_id && p.session_id == session_id)
            .map(|(id, _)| id.clone())
            .collect();

        for request_id in stale {
            if let Some(entry) = pending.remove(&request_id) {
                let outcome = if replaced {
                    ToolOutcome::Replaced
                } else {
                    ToolOutcome::Disconnected
                };
                let _ = entry.completion.send(outcome);
            }
        }
    }

    /// Fails every still-pending invocation with [`DispatchError::ServerShutdown`], used
    /// when the process is stopping (`spec.md` §5 shutdown semantics).
    pub fn fail_all(&self) {
        let mut pending = self.pending.write();
        for (_, entry) in pending.drain() {
            let _ = entry.completion.send(ToolOutcome::ServerShutdown);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ParameterSchema;
    use crate::session::SessionHandle;
    use crate::tenant::TenantSpec;
    use crate::tenant::TenantRegistry;
    use crate::worker::{ConnectionState, ToolSchema};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn tenant() -> Tenant {
        let registry = TenantRegistry::new(
            vec![TenantSpec {
                name: "acme".into(),
                description: None,
                bearer_token: "tenant-token".into(),
                allowed_client_tokens: vec!["w1".into(), "w2".into()],
            }],
            "admin-token",
        )
        .unwrap();
        registry.list_tenants()[0].clone()
    }

    fn worker_record(token: &str, seq: u64) -> WorkerRecord {
        WorkerRecord {
            id: WorkerId::from_token(token),
            token: token.to_string(),
            tools: vec![ToolSchema {
                name: "echo".into(),
                description: String::new(),
                parameters: ParameterSchema::empty_object(),
                returns: None,
            }],
            state: ConnectionState::Connected,
            session_id: Some(format!("sess-{seq}")),
            last_seen_unix: 0,
            registered_seq: seq,
        }
    }

    #[tokio::test]
    async fn dispatch_picks_earliest_registered_candidate_and_resolves_on_response() {
        let tenant = tenant();
        let sessions = SessionLayer::new();
        let router = InvocationRouter::new();

        let (tx1, mut rx1) = mpsc::channel(8);
        sessions.claim(
            WorkerId::from_token("w1"),
            SessionHandle::new("sess-1".into(), tx1),
        );
        let (tx2, _rx2) = mpsc::channel(8);
        sessions.claim(
            WorkerId::from_token("w2"),
            SessionHandle::new("sess-2".into(), tx2),
        );

        let workers = vec![worker_record("w2", 5), worker_record("w1", 1)];

        let router_ref = &router;
        let dispatch = async {
            router_ref
                .dispatch(
                    &tenant,
                    "echo",
                    serde_json::json!({"x": 1}),
                    &workers,
                    &sessions,
                    Duration::from_secs(1),
                )
                .await
        };

        let respond = async {
            let frame = rx1.recv().await.unwrap();
            let request_id = match frame {
                Frame::ToolRequest { request_id, .. } => request_id,
                _ => panic!("expected a tool request"),
            };
            router_ref.complete(&request_id, ToolOutcome::Success(serde_json::json!({"ok": true})));
        };

        let (result, _) = tokio::join!(dispatch, respond);
        assert_eq!(result.unwrap(), serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn dispatch_times_out_when_worker_never_responds() {
        let tenant = tenant();
        let sessions = SessionLayer::new();
        let router = InvocationRouter::new();
        let (tx1, _rx1) = mpsc::channel(8);
        sessions.claim(WorkerId::from_token("w1"), SessionHandle::new("sess-1".into(), tx1));

        let workers = vec![worker_record("w1", 1)];
        let err = router
            .dispatch(&tenant, "echo", Value::Null, &workers, &sessions, Duration::from_millis(20))
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::Timeout));
    }

    #[tokio::test]
    async fn dispatch_fails_with_worker_replaced_not_tool_execution_error() {
        let tenant = tenant();
        let sessions = SessionLayer::new();
        let router = InvocationRouter::new();
        let (tx1, mut rx1) = mpsc::channel(8);
        let worker_id = WorkerId::from_token("w1");
        sessions.claim(worker_id.clone(), SessionHandle::new("sess-1".into(), tx1));

        let workers = vec![worker_record("w1", 1)];
        let router_ref = &router;
        let dispatch = async {
            router_ref
                .dispatch(&tenant, "echo", Value::Null, &workers, &sessions, Duration::from_secs(1))
                .await
        };
        let replace = async {
            let _ = rx1.recv().await.unwrap();
            router_ref.fail_all_for_worker(&worker_id, "sess-1", true);
        };

        let (result, _) = tokio::join!(dispatch, replace);
        assert!(matches!(result.unwrap_err(), DispatchError::WorkerReplaced));
    }

    #[tokio::test]
    async fn fail_all_for_worker_ignores_invocations_on_a_different_session() {
        // A displaced session's teardown can run after a new invocation has already been
        // dispatched over the session that replaced it; that new invocation must survive.
        let tenant = tenant();
        let sessions = SessionLayer::new();
        let router = InvocationRouter::new();
        let worker_id = WorkerId::from_token("w1");

        let (tx1, mut rx1) = mpsc::channel(8);
        sessions.claim(worker_id.clone(), SessionHandle::new("sess-1".into(), tx1));
        // Claim-wins: session B replaces session A as the live session for the same worker.
        let (tx2, mut rx2) = mpsc::channel(8);
        sessions.claim(worker_id.clone(), SessionHandle::new("sess-2".into(), tx2));

        let workers = vec![worker_record("w1", 1)];
        let router_ref = &router;
        let dispatch = async {
            router_ref
                .dispatch(&tenant, "echo", Value::Null, &workers, &sessions, Duration::from_secs(1))
                .await
        };
        let respond = async {
            // The request_id is only observable once the worker id's candidate session (B,
            // the now-current one) actually receives it.
            let frame = rx2.recv().await.unwrap();
            let request_id = match frame {
                Frame::ToolRequest { request_id, .. } => request_id,
                _ => panic!("expected a tool request"),
            };
            // Session A's delayed teardown fires late and must not touch this invocation —
            // it never rode session A.
            router_ref.fail_all_for_worker(&worker_id, "sess-1", false);
            assert_eq!(router_ref.pending_count(), 1);
            router_ref.complete(&request_id, ToolOutcome::Success(serde_json::json!({"ok": true})));
        };

        let (result, _) = tokio::join!(dispatch, respond);
        assert_eq!(result.unwrap(), serde_json::json!({"ok": true}));
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropping_the_dispatch_future_removes_its_pending_entry() {
        let tenant = Arc::new(tenant());
        let sessions = Arc::new(SessionLayer::new());
        let router = Arc::new(InvocationRouter::new());
        let (tx1, _rx1) = mpsc::channel(8);
        sessions.claim(WorkerId::from_token("w1"), SessionHandle::new("sess-1".into(), tx1));
        let workers = Arc::new(vec![worker_record("w1", 1)]);

        // Simulates an HTTP client disconnecting mid-request: the handler future (here, a
        // spawned task standing in for it) is torn down before the worker ever replies.
        let (router2, tenant2, sessions2, workers2) =
            (router.clone(), tenant.clone(), sessions.clone(), workers.clone());
        let task = tokio::spawn(async move {
            router2
                .dispatch(&tenant2, "echo", Value::Null, &workers2, &sessions2, Duration::from_secs(30))
                .await
        });
        tokio::task::yield_now().await;
        task.abort();
        let _ = task.await;

        assert_eq!(router.pending_count(), 0);
    }

    #[tokio::test]
    async fn dispatch_rejects_unoffered_tool() {
        let tenant = tenant();
        let sessions = SessionLayer::new();
        let router = InvocationRouter::new();
        let workers = vec![worker_record("w1", 1)];

        let err = router
            .dispatch(&tenant, "missing", Value::Null, &workers, &sessions, Duration::from_secs(1))
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::ToolNotFound(name) if name == "missing"));
    }
}
