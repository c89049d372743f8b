//! Admin Facet HTTP routes (C8): login/logout cookie flow, the dashboard page, the JSON
//! stats endpoint, and the log-streaming SSE feed. No templating crate is in the dependency
//! stack, so the dashboard and login pages are rendered as small inline HTML strings, in
//! line with `spec.md` §9 Open Question 2 (only the admin-gated view is implemented, the
//! legacy unauthenticated `/info` view is not carried forward).

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use cookie::{Cookie, SameSite};
use futures_util::stream::{self, Stream};
use serde::Deserialize;
use serde_json::json;

use toolbridge_core::admin::{admin_cookie_value, build_dashboard, ADMIN_COOKIE_NAME, ADMIN_SESSION_MAX_AGE_SECS};

use crate::auth::AdminSession;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(rename = "adminToken")]
    admin_token: String,
}

pub async fn login_form() -> Html<String> {
    Html(LOGIN_PAGE.to_string())
}

pub async fn login_submit(State(state): State<AppState>, axum::Form(form): axum::Form<LoginForm>) -> Response {
    use subtle::ConstantTimeEq;

    if !form
        .admin_token
        .as_bytes()
        .ct_eq(state.admin_token.as_bytes())
        .into()
    {
        return (StatusCode::UNAUTHORIZED, Html(LOGIN_PAGE.replace("<!--ERROR-->", "<p class=\"error\">Invalid admin token</p>"))).into_response();
    }

    let cookie = Cookie::build((ADMIN_COOKIE_NAME, admin_cookie_value(&state.admin_token)))
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Strict)
        .max_age(cookie::time::Duration::seconds(ADMIN_SESSION_MAX_AGE_SECS))
        .path("/")
        .build();

    (
        StatusCode::FOUND,
        [(header::SET_COOKIE, cookie.to_string()), (header::LOCATION, "/admin".to_string())],
    )
        .into_response()
}

pub async fn logout() -> Response {
    let cleared = Cookie::build((ADMIN_COOKIE_NAME, ""))
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Strict)
        .max_age(cookie::time::Duration::seconds(0))
        .path("/")
        .build();

    (
        StatusCode::FOUND,
        [(header::SET_COOKIE, cleared.to_string()), (header::LOCATION, "/login".to_string())],
    )
        .into_response()
}

pub async fn dashboard(State(state): State<AppState>, _session: AdminSession) -> Html<String> {
    let workers = state.workers.snapshot();
    let snapshot = build_dashboard(&state.tenants, &workers);

    let uptime_secs = state.started_at.elapsed().as_secs();
    let connected_total = snapshot.workers.iter().filter(|w| w.connected).count();

    let tenant_rows: String = snapshot
        .tenants
        .iter()
        .map(|t| {
            format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td><code>{}</code></td></tr>",
                html_escape(&t.name),
                t.connected_workers,
                t.tool_count,
                html_escape(&t.token_hash),
            )
        })
        .collect();

    let worker_rows: String = snapshot
        .workers
        .iter()
        .map(|w| {
            format!(
                "<tr><td><code>{}</code></td><td>{}</td><td>{}</td></tr>",
                html_escape(&w.worker_id[..w.worker_id.len().min(12)]),
                if w.connected { "connected" } else { "disconnected" },
                w.tools.len(),
            )
        })
        .collect();

    Html(format!(
        r#"<!doctype html>
<html>
<head><title>Tool Bridge — Admin</title></head>
<body>
<h1>Tool Bridge</h1>
<p><a href="/logout">Log out</a></p>
<p>{tenant_count} tenant(s), {connected_workers} connected worker(s), up {uptime_secs}s.</p>
<h2>Tenants</h2>
<table border="1">
<thead><tr><th>Name</th><th>Connected workers</th><th>Tools</th><th>Token hash</th></tr></thead>
<tbody>{tenant_rows}</tbody>
</table>
<h2>Workers</h2>
<table border="1">
<thead><tr><th>Worker id</th><th>State</th><th>Tools</th></tr></thead>
<tbody>{worker_rows}</tbody>
</table>
<h2>Logs</h2>
<pre id="logs"></pre>
<script>
const events = new EventSource("/logs/events");
const logs = document.getElementById("logs");
events.onmessage = (e) => {{ logs.textContent += e.data + "\n"; }};
</script>
</body>
</html>"#,
        tenant_count = snapshot.tenants.len(),
        connected_workers = connected_total,
        uptime_secs = uptime_secs,
        tenant_rows = tenant_rows,
        worker_rows = worker_rows,
    ))
}

pub async fn stats(State(state): State<AppState>, _session: AdminSession) -> Json<serde_json::Value> {
    let workers = state.workers.snapshot();
    let snapshot = build_dashboard(&state.tenants, &workers);
    let connected_workers = snapshot.workers.iter().filter(|w| w.connected).count();
    let distinct_tools: std::collections::HashSet<&str> = workers
        .iter()
        .filter(|w| w.is_connected())
        .flat_map(|w| w.tools.iter().map(|t| t.name.as_str()))
        .collect();

    Json(json!({
        "tenant_count": snapshot.tenants.len(),
        "connected_worker_count": connected_workers,
        "distinct_tool_count": distinct_tools.len(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
}

pub async fn log_events(
    State(state): State<AppState>,
    _session: AdminSession,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let backlog = stream::iter(state.logs.recent().into_iter().map(|line| Ok(Event::default().data(line))));

    let live = stream::unfold(state.logs.subscribe(), |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(line) => return Some((Ok(Event::default().data(line)), receiver)),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(backlog.chain(live)).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("keep-alive"))
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

const LOGIN_PAGE: &str = r#"<!doctype html>
<html>
<head><title>Tool Bridge — Admin Login</title></head>
<body>
<h1>Admin Login</h1>
<!--ERROR-->
<form method="post" action="/login">
  <label for="adminToken">Admin token</label>
  <input type="password" id="adminToken" name="adminToken" required>
  <button type="submit">Sign in</button>
</form>
</body>
</html>"#;
