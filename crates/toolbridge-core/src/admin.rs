//! Admin Facet (C8): the admin session cookie's value and the dashboard's aggregated view
//! over tenants and workers. Cookie construction (flags, expiry) and HTML rendering belong
//! to `toolbridge-server`; this module only owns the data the dashboard needs and the
//! cookie value's derivation.

use serde::Serialize;
use subtle::ConstantTimeEq;

use crate::description::dedup_tools_first_come_wins;
use crate::tenant::{token_hash_of, TenantRegistry};
use crate::worker::WorkerRecord;

pub const ADMIN_COOKIE_NAME: &str = "adminSession";

/// Cookie lifetime: 24 hours.
pub const ADMIN_SESSION_MAX_AGE_SECS: i64 = 24 * 60 * 60;

/// The value stored in the admin session cookie: a hash of the admin token rather than the
/// token itself, so a leaked cookie store doesn't also leak the credential that signs in.
pub fn admin_cookie_value(admin_token: &str) -> String {
    token_hash_of(admin_token)
}

/// Verifies a cookie value against the admin token in constant time.
pub fn verify_admin_cookie(cookie_value: &str, admin_token: &str) -> bool {
    let expected = admin_cookie_value(admin_token);
    cookie_value.as_bytes().ct_eq(expected.as_bytes()).into()
}

#[derive(Debug, Clone, Serialize)]
pub struct TenantSummary {
    pub name: String,
    pub token_hash: String,
    pub connected_workers: usize,
    pub tool_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerSummary {
    pub worker_id: String,
    pub connected: bool,
    pub tools: Vec<String>,
    pub registered_seq: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub tenants: Vec<TenantSummary>,
    pub workers: Vec<WorkerSummary>,
}

/// Aggregates a point-in-time view of the system for the admin dashboard and stats route.
pub fn build_dashboard(tenants: &TenantRegistry, workers: &[WorkerRecord]) -> DashboardSnapshot {
    let tenant_summaries = tenants
        .list_tenants()
        .iter()
        .map(|tenant| {
            let admitted: Vec<&WorkerRecord> = workers.iter().filter(|w| tenant.admits(&w.token)).collect();
            let connected_workers = admitted.iter().filter(|w| w.is_connected()).count();
            let tool_count = dedup_tools_first_come_wins(&admitted).len();
            TenantSummary {
                name: tenant.name.clone(),
                token_hash: tenant.token_hash(),
                connected_workers,
                tool_count,
            }
        })
        .collect();

    let worker_summaries = workers
        .iter()
        .map(|w| WorkerSummary {
            worker_id: w.id.as_str().to_string(),
            connected: w.is_connected(),
            tools: w.tools.iter().map(|t| t.name.clone()).collect(),
            registered_seq: w.registered_seq,
        })
        .collect();

    DashboardSnapshot {
        tenants: tenant_summaries,
        workers: worker_summaries,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ParameterSchema;
    use crate::tenant::TenantSpec;
    use crate::worker::{ConnectionState, ToolSchema, WorkerId};

    #[test]
    fn cookie_value_verifies_only_against_the_matching_token() {
        let value = admin_cookie_value("secret-admin-token");
        assert!(verify_admin_cookie(&value, "secret-admin-token"));
        assert!(!verify_admin_cookie(&value, "wrong-token"));
    }

    #[test]
    fn dashboard_counts_connected_workers_and_deduplicated_tools() {
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

        let tool = |name: &str| ToolSchema {
            name: name.to_string(),
            description: String::new(),
            parameters: ParameterSchema::empty_object(),
            returns: None,
        };

        let workers = vec![
            WorkerRecord {
                id: WorkerId::from_token("w1"),
                token: "w1".into(),
                tools: vec![tool("echo")],
                state: ConnectionState::Connected,
                session_id: Some("s1".into()),
                last_seen_unix: 0,
                registered_seq: 1,
            },
            WorkerRecord {
                id: WorkerId::from_token("w2"),
                token: "w2".into(),
                tools: vec![tool("echo")],
                state: ConnectionState::Disconnected,
                session_id: None,
                last_seen_unix: 0,
                registered_seq: 2,
            },
        ];

        let dashboard = build_dashboard(&registry, &workers);
        assert_eq!(dashboard.tenants[0].connected_workers, 1);
        assert_eq!(dashboard.tenants[0].tool_count, 1);
        assert_eq!(dashboard.workers.len(), 2);
    }
}
