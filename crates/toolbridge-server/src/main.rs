mod admin;
mod auth;
mod config;
mod error;
mod logs;
mod openapi;
mod session;
mod state;
mod tools;

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::http::{header, Method};
use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use toolbridge_core::auth::Authenticator;
use toolbridge_core::config::LogFormat;
use toolbridge_core::router::InvocationRouter;
use toolbridge_core::session::SessionLayer;
use toolbridge_core::worker::WorkerRegistry;

use crate::config::Args;
use crate::logs::{DashboardLogLayer, LogBroadcast};
use crate::session::SessionCloseRegistry;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.load_config()?;

    let log_broadcast = LogBroadcast::new();
    init_tracing(&config.server.logging, log_broadcast.clone());

    let admin_token = config.server.admin.admin_token.clone().unwrap_or_else(|| {
        let generated = Uuid::new_v4().simple().to_string();
        warn!(admin_token = %generated, "no admin token configured, generated a random one for this run");
        generated
    });

    let tenants = Arc::new(
        config
            .server
            .build_tenant_registry(&admin_token)
            .context("building tenant registry from configuration")?,
    );

    let state = AppState {
        tenants,
        workers: Arc::new(WorkerRegistry::new()),
        sessions: Arc::new(SessionLayer::new()),
        router: Arc::new(InvocationRouter::new()),
        authenticator: Arc::new(Authenticator::new(admin_token.clone())),
        config: Arc::new(config.server.clone()),
        admin_token: Arc::new(admin_token),
        logs: log_broadcast,
        started_at: Instant::now(),
        session_closers: SessionCloseRegistry::new(),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    let app = Router::new()
        .route("/api/tools/:name", post(tools::invoke_tool))
        .route("/openapi/:hash/json", get(openapi::description_json))
        .route("/openapi/:hash/yaml", get(openapi::description_yaml))
        .route("/worker/session", get(session::upgrade))
        .route("/login", get(admin::login_form).post(admin::login_submit))
        .route("/logout", get(admin::logout))
        .route("/admin", get(admin::dashboard))
        .route("/api/admin/stats", get(admin::stats))
        .route("/logs/events", get(admin::log_events))
        .layer(cors)
        .with_state(state.clone());

    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    info!(addr = %addr, tenants = state.tenants.list_tenants().len(), "tool bridge server listening");

    // `shutdown_rx` carries one latch: false until Ctrl-C, true from then on. A `watch`
    // channel (rather than a oneshot) means every clone can check "has shutdown started?"
    // at any time, including after the fact — no missed-wakeup race against when each
    // clone starts awaiting it.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let cleanup_state = state.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received, closing sessions and failing pending invocations");
        cleanup_state.session_closers.close_all();
        cleanup_state.router.fail_all();
        let _ = shutdown_tx.send(true);
    });

    let mut accept_rx = shutdown_rx.clone();
    let mut server = tokio::spawn(
        axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = accept_rx.wait_for(|started| *started).await;
        }),
    );

    let mut grace_rx = shutdown_rx.clone();
    tokio::select! {
        result = &mut server => {
            result.context("server task panicked")?.context("server loop failed")?;
        }
        _ = grace_rx.wait_for(|started| *started) => {
            match tokio::time::timeout(SHUTDOWN_GRACE, server).await {
                Ok(Ok(result)) => result.context("server loop failed")?,
                Ok(Err(join_err)) => return Err(join_err).context("server task panicked"),
                Err(_) => warn!("shutdown grace period elapsed, forcing the listener closed"),
            }
        }
    }

    Ok(())
}

/// In-flight HTTP handlers get this long to finish their error responses after the listener
/// stops accepting new connections before the process exits regardless (`spec.md` §5).
const SHUTDOWN_GRACE: std::time::Duration = std::time::Duration::from_secs(2);

fn init_tracing(logging: &toolbridge_core::config::LoggingConfig, dashboard: LogBroadcast) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(logging.level.as_filter_str()));

    let registry = tracing_subscriber::registry().with(filter).with(DashboardLogLayer::new(dashboard));

    match logging.format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Text => registry.with(fmt::layer()).init(),
    }
}
