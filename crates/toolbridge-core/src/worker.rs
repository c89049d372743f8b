//! Worker Registry (C2): live worker records — identity, offered tools, session state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::schema::ParameterSchema;

/// Stable worker identity, deterministically derived as the SHA-256 hex digest of the
/// worker's token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub String);

impl WorkerId {
    /// Derives the worker id from a worker token. Pure function — registration with a
    /// mismatched `worker_id` is rejected by the session layer, not recomputed here.
    pub fn from_token(token: &str) -> Self {
        let digest = Sha256::digest(token.as_bytes());
        Self(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A single tool a worker offers: name, free-text description, a JSON-Schema-subset
/// parameter schema, and an optional return schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub parameters: ParameterSchema,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub returns: Option<ParameterSchema>,
}

/// Connection state of a worker record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// A worker's record in the registry: identity, current tool list, connection state, and
/// bookkeeping used for dispatch tie-breaking and description deduplication.
///
/// Records are created on first successful registration and never destroyed — reconnects
/// update the same record in place, preserving `registered_seq` so "first registered, still
/// connected" semantics survive reconnects.
#[derive(Debug, Clone)]
pub struct WorkerRecord {
    pub id: WorkerId,
    pub token: String,
    pub tools: Vec<ToolSchema>,
    pub state: ConnectionState,
    pub session_id: Option<String>,
    pub last_seen_unix: u64,
    pub registered_seq: u64,
}

impl WorkerRecord {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn offers(&self, tool_name: &str) -> bool {
        self.tools.iter().any(|t| t.name == tool_name)
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// An immutable point-in-time view of all worker records, published by the registry's
/// single-writer lane and consumed lock-free by the Invocation Router and Description
/// Generator.
pub type WorkerSnapshot = Arc<Vec<WorkerRecord>>;

/// Holds live [`WorkerRecord`]s. All mutations are serialized through a single write lock;
/// readers take an atomically-published [`WorkerSnapshot`] without further locking.
pub struct WorkerRegistry {
    workers: RwLock<HashMap<WorkerId, WorkerRecord>>,
    snapshot: ArcSwap<Vec<WorkerRecord>>,
    seq: AtomicU64,
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self {
            workers: RwLock::new(HashMap::new()),
            snapshot: ArcSwap::from_pointee(Vec::new()),
            seq: AtomicU64::new(0),
        }
    }

    fn republish(&self, workers: &HashMap<WorkerId, WorkerRecord>) {
        let mut records: Vec<WorkerRecord> = workers.values().cloned().collect();
        records.sort_by_key(|r| r.registered_seq);
        self.snapshot.store(Arc::new(records));
    }

    /// Transitions the record for `worker_id` to `connected`, replacing its tool list
    /// atomically and updating `last_seen`/`session_id`. Creates the record on first
    /// registration, assigning it the next registration sequence number.
    pub fn upsert(
        &self,
        worker_id: WorkerId,
        worker_token: String,
        tools: Vec<ToolSchema>,
        session_id: String,
    ) {
        let mut workers = self.workers.write();
        let seq = workers
            .get(&worker_id)
            .map(|r| r.registered_seq)
            .unwrap_or_else(|| self.seq.fetch_add(1, Ordering::Relaxed));

        workers.insert(
            worker_id.clone(),
            WorkerRecord {
                id: worker_id,
                token: worker_token,
                tools,
                state: ConnectionState::Connected,
                session_id: Some(session_id),
                last_seen_unix: now_unix(),
                registered_seq: seq,
            },
        );
        self.republish(&workers);
    }

    /// Marks `worker_id` disconnected, but only if its current `session_id` still equals
    /// `session_id` — guarding against a stale close racing a claim-wins replacement.
    pub fn mark_disconnected(&self, worker_id: &WorkerId, session_id: &str) {
        let mut workers = self.workers.write();
        if let Some(record) = workers.get_mut(worker_id) {
            if record.session_id.as_deref() == Some(session_id) {
                record.state = ConnectionState::Disconnected;
                record.session_id = None;
                record.last_seen_unix = now_unix();
            }
        }
        self.republish(&workers);
    }

    /// The worker's current session id, if any (used by claim-wins to find and close the
    /// previous session before committing a new registration).
    pub fn current_session_of(&self, worker_id: &WorkerId) -> Option<String> {
        self.workers.read().get(worker_id).and_then(|r| r.session_id.clone())
    }

    /// An immutable, lock-free snapshot of all worker records (connected and disconnected).
    pub fn snapshot(&self) -> WorkerSnapshot {
        self.snapshot.load_full()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(name: &str) -> ToolSchema {
        ToolSchema {
            name: name.to_string(),
            description: String::new(),
            parameters: ParameterSchema::empty_object(),
            returns: None,
        }
    }

    #[test]
    fn worker_id_is_a_pure_function_of_the_token() {
        let a = WorkerId::from_token("w-token");
        let b = WorkerId::from_token("w-token");
        assert_eq!(a, b);
        assert_ne!(a, WorkerId::from_token("other-token"));
    }

    #[test]
    fn reconnect_preserves_registered_seq() {
        let registry = WorkerRegistry::new();
        let id = WorkerId::from_token("w1");
        registry.upsert(id.clone(), "w1".into(), vec![tool("echo")], "sess-1".into());
        let first_seq = registry.snapshot()[0].registered_seq;

        registry.mark_disconnected(&id, "sess-1");
        registry.upsert(id.clone(), "w1".into(), vec![tool("echo")], "sess-2".into());
        let second_seq = registry.snapshot()[0].registered_seq;

        assert_eq!(first_seq, second_seq);
    }

    #[test]
    fn stale_disconnect_is_ignored_after_claim_wins_replacement() {
        let registry = WorkerRegistry::new();
        let id = WorkerId::from_token("w1");
        registry.upsert(id.clone(), "w1".into(), vec![], "sess-1".into());
        registry.upsert(id.clone(), "w1".into(), vec![], "sess-2".into());

        // A stale close from the replaced session must not disconnect the active one.
        registry.mark_disconnected(&id, "sess-1");
        let record = &registry.snapshot()[0];
        assert!(record.is_connected());
        assert_eq!(record.session_id.as_deref(), Some("sess-2"));
    }
}
