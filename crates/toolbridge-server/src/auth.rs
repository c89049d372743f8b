//! Axum extractors wrapping `toolbridge_core::auth` (C5): tenant bearer auth for `/api/*`
//! and the admin session cookie for `/admin`, `/api/admin/*`, `/logs/events`.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use toolbridge_core::admin::{verify_admin_cookie, ADMIN_COOKIE_NAME};
use toolbridge_core::auth::Principal;
use toolbridge_core::tenant::Tenant;

use crate::error::ApiError;
use crate::state::AppState;

/// The tenant resolved from an `Authorization: Bearer <tenant-token>` header. Rejects with
/// 401/403 exactly per `spec.md` §4.5 before the handler body ever runs.
pub struct TenantAuth(pub Tenant);

impl FromRequestParts<AppState> for TenantAuth {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());

        match state.authenticator.classify(header, &state.tenants)? {
            Principal::Tenant(tenant) => Ok(TenantAuth(tenant.clone())),
            Principal::Admin => Err(ApiError::Dispatch(toolbridge_core::error::DispatchError::TenantUnknown)),
        }
    }
}

/// Proof that the request carried a valid admin session cookie. Carries no data — handlers
/// that need it only need the fact of admission, everything else comes from `AppState`.
pub struct AdminSession;

impl FromRequestParts<AppState> for AdminSession {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let cookie_header = parts
            .headers
            .get(axum::http::header::COOKIE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        let cookie_value = cookie::Cookie::split_parse(cookie_header)
            .filter_map(Result::ok)
            .find(|c| c.name() == ADMIN_COOKIE_NAME)
            .map(|c| c.value().to_string());

        match cookie_value {
            Some(value) if verify_admin_cookie(&value, &state.admin_token) => Ok(AdminSession),
            _ => Err(ApiError::Auth(toolbridge_core::error::AuthError::MissingHeader)),
        }
    }
}
