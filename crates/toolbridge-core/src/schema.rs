//! The JSON-Schema subset used to describe tool parameters and return values.
//!
//! Supported keywords mirror a practical slice of JSON Schema: `type`, `properties`,
//! `required`, `items`, `enum`, `format`, numeric/string bounds, and `additionalProperties`.
//! `$ref`, `oneOf`, `allOf` and `anyOf` are not understood by [`sanitize`]; they are carried
//! through verbatim via [`ParameterSchema::extra`] rather than rejected.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A node in the tool-parameter schema tree.
///
/// Deserializes from (and serializes back to) plain JSON Schema documents. Unknown
/// keywords — including the unsupported combinators named above — round-trip through
/// [`extra`](Self::extra) unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ParameterSchema {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub schema_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<IndexMap<String, ParameterSchema>>,

    /// Always serialized, even when empty — never omitted, never an object or string.
    #[serde(default)]
    pub required: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<ParameterSchema>>,

    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,

    #[serde(rename = "minLength", skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u64>,

    #[serde(rename = "maxLength", skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u64>,

    #[serde(rename = "additionalProperties", skip_serializing_if = "Option::is_none")]
    pub additional_properties: Option<Box<Value>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Keywords this subset doesn't model (`$ref`, `oneOf`, `allOf`, `anyOf`, and anything
    /// else a worker's schema happens to include). Preserved as-is, never sanitized.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl ParameterSchema {
    /// A bare `{"type": "object"}` schema, used when a worker declares no parameters.
    pub fn empty_object() -> Self {
        Self {
            schema_type: Some("object".to_string()),
            properties: Some(IndexMap::new()),
            ..Default::default()
        }
    }
}

/// Coerce `default` to the type declared by `schema_type`: strings stay strings,
/// numbers/integers become JSON numbers, booleans become JSON booleans, arrays are wrapped
/// if not already an array, and objects become `{}` if the declared default isn't an object.
fn coerce_default(schema_type: &str, default: &Value) -> Value {
    match schema_type {
        "string" => match default {
            Value::String(_) => default.clone(),
            other => Value::String(other.to_string()),
        },
        "number" | "integer" => match default {
            Value::Number(_) => default.clone(),
            Value::String(s) => s
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or_else(|| default.clone()),
            _ => default.clone(),
        },
        "boolean" => match default {
            Value::Bool(_) => default.clone(),
            Value::String(s) => Value::Bool(s == "true"),
            _ => default.clone(),
        },
        "array" => match default {
            Value::Array(_) => default.clone(),
            other => Value::Array(vec![other.clone()]),
        },
        "object" => match default {
            Value::Object(_) => default.clone(),
            _ => Value::Object(serde_json::Map::new()),
        },
        _ => default.clone(),
    }
}

/// Recursively sanitize a schema for inclusion in a description document.
///
/// Idempotent: `sanitize(sanitize(s)) == sanitize(s)`. Preserves `additionalProperties`,
/// `enum`, and numeric/string bounds verbatim; normalizes `required` to always be an array
/// (possibly empty); recurses into `properties` and `items`; coerces `default` to the
/// declared `type`. Unsupported combinators in [`ParameterSchema::extra`] pass through
/// unmodified — this function never looks inside them.
pub fn sanitize(schema: &ParameterSchema) -> ParameterSchema {
    let mut out = schema.clone();

    out.properties = schema.properties.as_ref().map(|props| {
        props
            .iter()
            .map(|(name, prop)| (name.clone(), sanitize(prop)))
            .collect()
    });

    out.items = schema.items.as_ref().map(|items| Box::new(sanitize(items)));

    if let (Some(ty), Some(default)) = (schema.schema_type.as_deref(), schema.default.as_ref()) {
        out.default = Some(coerce_default(ty, default));
    }

    out
}
