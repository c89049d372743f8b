//! `POST /api/tools/{name}` (part of C6): the one authenticated invocation route.

use std::collections::HashMap;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Map, Value};

use crate::auth::TenantAuth;
use crate::error::ApiError;
use crate::state::AppState;

/// Invocations without a worker-specified deadline use this default (`spec.md` §4.4).
const DEFAULT_INVOCATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Merges query parameters into the JSON body object, body keys winning on conflict
/// (`spec.md` §9 Open Question 3, resolved in `SPEC_FULL.md`).
fn merge_query_into_body(body: Value, query: HashMap<String, String>) -> Result<Value, ApiError> {
    let mut merged = match body {
        Value::Null => Map::new(),
        Value::Object(map) => map,
        _ => return Err(ApiError::InvalidPayload("request body must be a JSON object".to_string())),
    };

    for (key, value) in query {
        merged.entry(key).or_insert(Value::String(value));
    }

    Ok(Value::Object(merged))
}

/// Parses the raw request body as JSON, treating an empty body as `null` rather than a
/// parse error. Axum's blanket `Option<Json<T>>` extractor collapses every extraction
/// failure — missing body *and* malformed JSON alike — into `None`, which would silently
/// turn a caller's typo'd payload into an empty argument object instead of the 400
/// `spec.md` §7 requires for "malformed JSON". Taking the raw bytes and parsing by hand
/// keeps those two cases distinct.
fn parse_body(bytes: &[u8]) -> Result<Value, ApiError> {
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(bytes).map_err(|err| ApiError::InvalidPayload(format!("malformed JSON body: {err}")))
}

pub async fn invoke_tool(
    State(state): State<AppState>,
    Path(tool_name): Path<String>,
    TenantAuth(tenant): TenantAuth,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let body = match parse_body(&body) {
        Ok(value) => value,
        Err(err) => return err.into_response(),
    };
    let arguments = match merge_query_into_body(body, query) {
        Ok(value) => value,
        Err(err) => return err.into_response(),
    };

    let workers = state.workers.snapshot();
    let result = state
        .router
        .dispatch(&tenant, &tool_name, arguments, &workers, &state.sessions, DEFAULT_INVOCATION_TIMEOUT)
        .await;

    match result {
        Ok(value) => Json(json!({ "result": value })).into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_params_fill_in_missing_body_keys() {
        let body = json!({ "msg": "hi" });
        let mut query = HashMap::new();
        query.insert("extra".to_string(), "q".to_string());

        let merged = merge_query_into_body(body, query).unwrap();
        assert_eq!(merged["msg"], json!("hi"));
        assert_eq!(merged["extra"], json!("q"));
    }

    #[test]
    fn body_keys_win_over_query_params_on_conflict() {
        let body = json!({ "msg": "body-wins" });
        let mut query = HashMap::new();
        query.insert("msg".to_string(), "query-loses".to_string());

        let merged = merge_query_into_body(body, query).unwrap();
        assert_eq!(merged["msg"], json!("body-wins"));
    }

    #[test]
    fn empty_body_with_query_params_still_works() {
        let merged = merge_query_into_body(Value::Null, {
            let mut q = HashMap::new();
            q.insert("msg".to_string(), "hi".to_string());
            q
        })
        .unwrap();
        assert_eq!(merged["msg"], json!("hi"));
    }

    #[test]
    fn non_object_body_is_rejected() {
        let err = merge_query_into_body(json!([1, 2, 3]), HashMap::new());
        assert!(matches!(err, Err(ApiError::InvalidPayload(_))));
    }

    #[test]
    fn empty_body_bytes_parse_as_null() {
        assert_eq!(parse_body(b"").unwrap(), Value::Null);
    }

    #[test]
    fn malformed_body_bytes_are_rejected_not_treated_as_empty() {
        let err = parse_body(b"{bad").unwrap_err();
        assert!(matches!(err, ApiError::InvalidPayload(_)));
    }

    #[test]
    fn well_formed_body_bytes_parse_to_the_matching_value() {
        assert_eq!(parse_body(br#"{"msg":"hi"}"#).unwrap(), json!({"msg": "hi"}));
    }
}
