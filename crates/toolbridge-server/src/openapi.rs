//! `GET /openapi/{hash}/json` and `GET /openapi/{hash}/yaml` (part of C6): unauthenticated
//! per-tenant description document routes wrapping C7.

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;

use toolbridge_core::description::{generate, to_yaml};

use crate::error::tenant_hash_not_found;
use crate::state::AppState;

pub async fn description_json(State(state): State<AppState>, Path(hash): Path<String>) -> Response {
    let Some(tenant) = state.tenants.tenant_from_hash(&hash) else {
        return tenant_hash_not_found();
    };

    let workers = state.workers.snapshot();
    let document = generate(tenant, &workers, state.base_title(), state.public_url());
    Json(document).into_response()
}

pub async fn description_yaml(State(state): State<AppState>, Path(hash): Path<String>) -> Response {
    let Some(tenant) = state.tenants.tenant_from_hash(&hash) else {
        return tenant_hash_not_found();
    };

    let workers = state.workers.snapshot();
    let document = generate(tenant, &workers, state.base_title(), state.public_url());
    match to_yaml(&document) {
        Ok(yaml) => ([(header::CONTENT_TYPE, "application/yaml")], yaml).into_response(),
        Err(_) => tenant_hash_not_found(),
    }
}
