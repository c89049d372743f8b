//! Converts the core's error taxonomy into the HTTP status/body matrix from `spec.md` §7.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

use toolbridge_core::error::{AuthError, DispatchError};

/// The stable `{ "error": ..., "code": ... }` body shape every non-2xx `/api/*` response
/// carries.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

/// A single error type the HTTP layer converts to a response. Wraps the core taxonomy so
/// each handler can just `?` its way to one of these.
#[derive(Debug)]
pub enum ApiError {
    Auth(AuthError),
    Dispatch(DispatchError),
    /// A tenant-hash or resource lookup found nothing; maps to a bare 404 with no leaking
    /// detail about which tokens exist.
    NotFound(&'static str),
    /// A request body failed to parse as JSON, or a session frame arrived out of turn.
    InvalidPayload(String),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Auth(err)
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        ApiError::Dispatch(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, code) = match self {
            ApiError::Auth(AuthError::MissingHeader) => {
                (StatusCode::UNAUTHORIZED, "missing Authorization header".to_string(), "MISSING_AUTH_HEADER")
            }
            ApiError::Auth(AuthError::Malformed) => {
                (StatusCode::UNAUTHORIZED, "malformed Authorization header".to_string(), "MALFORMED_AUTH_HEADER")
            }
            ApiError::Auth(AuthError::Unknown) => {
                (StatusCode::FORBIDDEN, "unknown bearer token".to_string(), "UNKNOWN_TOKEN")
            }
            ApiError::Dispatch(DispatchError::TenantUnknown) => {
                (StatusCode::FORBIDDEN, "tenant unknown".to_string(), "TENANT_UNKNOWN")
            }
            ApiError::Dispatch(DispatchError::ToolNotFound(name)) => (
                StatusCode::NOT_FOUND,
                format!("Tool {name} not found or not reachable in this tenant"),
                "TOOL_NOT_FOUND",
            ),
            ApiError::Dispatch(DispatchError::ToolExecutionError(message)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, message, "TOOL_EXECUTION_ERROR")
            }
            ApiError::Dispatch(DispatchError::Timeout) => {
                (StatusCode::GATEWAY_TIMEOUT, "invocation timed out".to_string(), "TIMEOUT")
            }
            ApiError::Dispatch(DispatchError::WorkerDisconnected) => (
                StatusCode::BAD_GATEWAY,
                "worker disconnected before replying".to_string(),
                "WORKER_DISCONNECTED",
            ),
            ApiError::Dispatch(DispatchError::WorkerReplaced) => (
                StatusCode::BAD_GATEWAY,
                "worker session was replaced before replying".to_string(),
                "WORKER_REPLACED",
            ),
            ApiError::Dispatch(DispatchError::ServerShutdown) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "server is shutting down".to_string(),
                "SERVER_SHUTDOWN",
            ),
            ApiError::Dispatch(DispatchError::ClientCancelled) => {
                // 499 has no canonical axum StatusCode; the connection is normally already
                // gone by the time this would be rendered (see `tools::invoke_tool`).
                (StatusCode::from_u16(499).unwrap(), "client cancelled the request".to_string(), "CLIENT_CANCELLED")
            }
            ApiError::Dispatch(DispatchError::InvalidPayload(message)) => {
                (StatusCode::BAD_REQUEST, message, "INVALID_PAYLOAD")
            }
            ApiError::Dispatch(DispatchError::Internal(message)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, message, "INTERNAL")
            }
            ApiError::NotFound(what) => (StatusCode::NOT_FOUND, what.to_string(), "NOT_FOUND"),
            ApiError::InvalidPayload(message) => (StatusCode::BAD_REQUEST, message, "INVALID_PAYLOAD"),
        };

        (status, Json(ErrorBody { error, code })).into_response()
    }
}

/// Builds the error body for a tenant-scoped description route, where an unknown hash maps
/// to 404 rather than 403 (`spec.md` §7: *TenantUnknown* — 404 on description routes).
pub fn tenant_hash_not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "no tenant matches this token hash", "code": "TENANT_UNKNOWN" })),
    )
        .into_response()
}
