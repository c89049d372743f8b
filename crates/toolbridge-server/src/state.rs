//! Shared application state, handed to the HTTP layer at start-up rather than reached for
//! through a process-wide singleton (`spec.md` §9 design note).

use std::sync::Arc;
use std::time::Instant;

use toolbridge_core::auth::Authenticator;
use toolbridge_core::config::ServerConfig;
use toolbridge_core::router::InvocationRouter;
use toolbridge_core::session::SessionLayer;
use toolbridge_core::tenant::TenantRegistry;
use toolbridge_core::worker::WorkerRegistry;

use crate::logs::LogBroadcast;
use crate::session::SessionCloseRegistry;

/// Everything a handler needs, cloned cheaply (an `Arc` per field) into each request.
#[derive(Clone)]
pub struct AppState {
    pub tenants: Arc<TenantRegistry>,
    pub workers: Arc<WorkerRegistry>,
    pub sessions: Arc<SessionLayer>,
    pub router: Arc<InvocationRouter>,
    pub authenticator: Arc<Authenticator>,
    pub config: Arc<ServerConfig>,
    pub admin_token: Arc<String>,
    pub logs: LogBroadcast,
    pub started_at: Instant,
    /// Lets the session layer's claim-wins path actually tear down the displaced
    /// connection's tasks, not just its `SessionHandle` bookkeeping (see `session.rs`).
    pub session_closers: SessionCloseRegistry,
}

impl AppState {
    pub fn base_title(&self) -> &'static str {
        "Tool Bridge"
    }

    pub fn public_url(&self) -> Option<&str> {
        self.config.http.public_url.as_deref()
    }
}
