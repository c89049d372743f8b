//! Description Generator (C7): the per-tenant, OpenAPI-shaped API description document.
//!
//! Produces a single document per tenant, derived on demand from the live Worker Registry
//! snapshot — there is no persisted or cached copy; regenerating is cheap enough (a linear
//! walk over connected, admitted workers) that the Worker Registry simply republishes a
//! snapshot on every mutation and callers regenerate from it.

use std::collections::HashSet;

use serde_json::{json, Map, Value};

use crate::schema::{sanitize, ParameterSchema};
use crate::tenant::Tenant;
use crate::worker::{ToolSchema, WorkerRecord};

/// Tool summaries and tenant descriptions are truncated to this many characters before
/// being embedded in a description document (`spec.md` §4.7, §8 property 10).
pub const DESCRIPTION_TRUNCATE_LEN: usize = 300;

/// Blurb appended after a tenant's own description in `info.description`.
const INFO_BLURB: &str = "Tools exposed through the tool bridge for this tenant.";

/// Extension key marking an operation as non-state-changing, per `SPEC_FULL.md` §C.8
/// (OpenAPI's own vendor-extension convention, since `spec.md` doesn't name an exact key).
const READ_ONLY_EXTENSION_KEY: &str = "x-read-only";

/// Truncates `s` to at most [`DESCRIPTION_TRUNCATE_LEN`] characters, respecting UTF-8
/// character boundaries, appending an ellipsis when truncation actually occurs.
pub fn truncate_300(s: &str) -> String {
    if s.chars().count() <= DESCRIPTION_TRUNCATE_LEN {
        return s.to_string();
    }
    let mut truncated: String = s.chars().take(DESCRIPTION_TRUNCATE_LEN - 1).collect();
    truncated.push('…');
    truncated
}

/// Collapses every tool offered by `workers` into a single, name-deduplicated list. When
/// more than one worker offers the same tool name, the earliest-registered still-connected
/// worker's copy wins — ties are broken the same way dispatch breaks them, so the
/// description a tenant sees always matches who would actually answer the call.
pub fn dedup_tools_first_come_wins(workers: &[&WorkerRecord]) -> Vec<ToolSchema> {
    let mut ordered: Vec<&&WorkerRecord> = workers.iter().filter(|w| w.is_connected()).collect();
    ordered.sort_by_key(|w| w.registered_seq);

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for worker in ordered {
        for tool in &worker.tools {
            if seen.insert(tool.name.clone()) {
                out.push(tool.clone());
            }
        }
    }
    out
}

fn error_response_ref() -> Value {
    json!({
        "description": "Error",
        "content": {
            "application/json": { "schema": { "$ref": "#/components/schemas/Error" } }
        }
    })
}

fn tool_to_operation(tool: &ToolSchema) -> Value {
    let parameters = sanitize(&tool.parameters);
    let returns = tool
        .returns
        .as_ref()
        .map(sanitize)
        .unwrap_or_else(ParameterSchema::empty_object);

    json!({
        "operationId": tool.name,
        "description": truncate_300(&tool.description),
        READ_ONLY_EXTENSION_KEY: true,
        "requestBody": {
            "required": true,
            "content": { "application/json": { "schema": parameters } }
        },
        "responses": {
            "200": {
                "description": "Tool result",
                "content": {
                    "application/json": {
                        "schema": { "type": "object", "properties": { "result": returns }, "required": [] }
                    }
                }
            },
            "400": error_response_ref(),
            "404": error_response_ref(),
            "500": error_response_ref(),
        }
    })
}

fn components_block() -> Value {
    json!({
        "securitySchemes": {
            "bearerAuth": { "type": "http", "scheme": "bearer" }
        },
        "schemas": {
            "Error": {
                "type": "object",
                "properties": {
                    "error": { "type": "string" },
                    "code": { "type": "string" }
                },
                "required": ["error", "code"]
            }
        }
    })
}

/// Builds the OpenAPI-shaped description document for `tenant`, covering every tool a
/// worker admitted into that tenant's namespace offers.
///
/// `base_title` is the product name prefixed to `info.title` (`"<base> - <tenant name>"`);
/// `public_url`, when configured (`server.http.publicUrl`), becomes the sole entry of the
/// `servers` block.
pub fn generate(tenant: &Tenant, workers: &[WorkerRecord], base_title: &str, public_url: Option<&str>) -> Value {
    let admitted: Vec<&WorkerRecord> = workers.iter().filter(|w| tenant.admits(&w.token)).collect();
    let tools = dedup_tools_first_come_wins(&admitted);

    let mut paths = Map::new();
    for tool in &tools {
        let mut operations = Map::new();
        operations.insert("post".to_string(), tool_to_operation(tool));
        paths.insert(format!("/api/tools/{}", tool.name), Value::Object(operations));
    }

    let tenant_description = tenant.description.clone().unwrap_or_default();
    let description = if tenant_description.is_empty() {
        INFO_BLURB.to_string()
    } else {
        format!("{} {}", truncate_300(&tenant_description), INFO_BLURB)
    };

    let servers = match public_url {
        Some(url) => json!([{ "url": url }]),
        None => json!([]),
    };

    json!({
        "openapi": "3.0.3",
        "info": {
            "title": format!("{base_title} - {}", tenant.name),
            "version": "1.0.0",
            "description": description
        },
        "servers": servers,
        "paths": Value::Object(paths),
        "components": components_block(),
        "security": [{ "bearerAuth": [] }]
    })
}

/// Renders a description document as YAML, for the `/openapi/{hash}/yaml` route.
pub fn to_yaml(document: &Value) -> Result<String, serde_yaml::Error> {
    serde_yaml::to_string(document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ParameterSchema;
    use crate::tenant::{TenantRegistry, TenantSpec};
    use crate::worker::{ConnectionState, WorkerId};

    fn tenant() -> Tenant {
        let registry = TenantRegistry::new(
            vec![TenantSpec {
                name: "acme".into(),
                description: Some("Acme's tools".into()),
                bearer_token: "tenant-token".into(),
                allowed_client_tokens: vec!["w1".into(), "w2".into()],
            }],
            "admin-token",
        )
        .unwrap();
        registry.list_tenants()[0].clone()
    }

    fn worker(token: &str, seq: u64, tool_names: &[&str]) -> WorkerRecord {
        WorkerRecord {
            id: WorkerId::from_token(token),
            token: token.to_string(),
            tools: tool_names
                .iter()
                .map(|name| ToolSchema {
                    name: name.to_string(),
                    description: format!("{name} from {token}"),
                    parameters: ParameterSchema::empty_object(),
                    returns: None,
                })
                .collect(),
            state: ConnectionState::Connected,
            session_id: Some("sess".into()),
            last_seen_unix: 0,
            registered_seq: seq,
        }
    }

    #[test]
    fn truncate_appends_ellipsis_only_past_the_limit() {
        let long = "x".repeat(500);
        let truncated = truncate_300(&long);
        assert_eq!(truncated.chars().count(), DESCRIPTION_TRUNCATE_LEN);
        assert!(truncated.ends_with('…'));
        assert_eq!(truncate_300("short"), "short");
    }

    #[test]
    fn earliest_registered_worker_wins_a_tool_name_collision() {
        let workers = vec![worker("w2", 5, &["echo"]), worker("w1", 1, &["echo"])];
        let tools = dedup_tools_first_come_wins(&workers.iter().collect::<Vec<_>>());
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].description, "echo from w1");
    }

    #[test]
    fn generate_only_includes_tools_the_tenant_admits() {
        let t = tenant();
        let workers = vec![worker("w1", 1, &["echo"]), worker("stranger", 2, &["secret"])];
        let doc = generate(&t, &workers, "Tool Bridge", None);
        let paths = doc.get("paths").unwrap().as_object().unwrap();
        assert!(paths.contains_key("/api/tools/echo"));
        assert!(!paths.contains_key("/api/tools/secret"));
    }

    #[test]
    fn generate_titles_and_describes_per_tenant() {
        let t = tenant();
        let doc = generate(&t, &[], "Tool Bridge", Some("https://bridge.example.com"));
        assert_eq!(doc["info"]["title"], json!("Tool Bridge - acme"));
        assert!(doc["info"]["description"].as_str().unwrap().starts_with("Acme's tools"));
        assert_eq!(doc["servers"], json!([{ "url": "https://bridge.example.com" }]));
        assert_eq!(doc["components"]["schemas"]["Error"]["required"], json!(["error", "code"]));
        assert_eq!(doc["security"], json!([{ "bearerAuth": [] }]));
    }

    #[test]
    fn yaml_rendering_round_trips_through_a_parser() {
        let t = tenant();
        let workers = vec![worker("w1", 1, &["echo"])];
        let doc = generate(&t, &workers, "Tool Bridge", None);
        let yaml = to_yaml(&doc).unwrap();
        let reparsed: Value = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(reparsed, doc);
    }
}
