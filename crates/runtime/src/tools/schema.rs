//! Translation of MCP tool descriptors into model tool declarations.
//!
//! The mapping is pure: the same descriptors always yield the same
//! declarations. Any malformed descriptor fails the whole set, and the
//! caller falls back to running without tools.

use std::collections::HashSet;

use crate::model::ToolSpec;
use mcp::Tool;
use serde_json::{Map, Value, json};
use thiserror::Error;

/// Schema keywords the model's function-declaration dialect accepts.
/// Everything else (`$schema`, `title`, `default`, `additionalProperties`...)
/// is dropped.
const ALLOWED_KEYWORDS: &[&str] = &[
    "type",
    "format",
    "description",
    "nullable",
    "enum",
    "properties",
    "required",
    "items",
    "anyOf",
    "minItems",
    "maxItems",
    "minLength",
    "maxLength",
    "minimum",
    "maximum",
    "pattern",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("tool #{index} has an empty name")]
    EmptyName { index: usize },

    #[error("duplicate tool name: {0}")]
    DuplicateName(String),

    #[error("tool {tool}: {reason}")]
    Malformed { tool: String, reason: String },
}

/// Map every descriptor to a declaration, preserving order.
pub fn build_endpoint_schema(descriptors: &[Tool]) -> Result<Vec<ToolSpec>, SchemaError> {
    let mut seen = HashSet::new();
    descriptors
        .iter()
        .enumerate()
        .map(|(index, tool)| {
            if tool.name.trim().is_empty() {
                return Err(SchemaError::EmptyName { index });
            }
            if !seen.insert(tool.name.as_str()) {
                return Err(SchemaError::DuplicateName(tool.name.clone()));
            }
            to_spec(tool)
        })
        .collect()
}

fn to_spec(tool: &Tool) -> Result<ToolSpec, SchemaError> {
    let malformed = |reason: &str| SchemaError::Malformed {
        tool: tool.name.clone(),
        reason: reason.to_string(),
    };

    let schema = tool
        .input_schema
        .as_object()
        .ok_or_else(|| malformed("input schema is not an object"))?;

    if schema.get("type").is_some_and(|ty| ty != "object") {
        return Err(malformed("input schema type is not \"object\""));
    }

    let properties = match schema.get("properties") {
        None => Map::new(),
        Some(Value::Object(props)) => props
            .iter()
            .map(|(name, prop)| (name.clone(), sanitize(prop)))
            .collect(),
        Some(_) => return Err(malformed("properties is not an object")),
    };

    let required = match schema.get("required") {
        None => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| malformed("required contains a non-string entry"))
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => return Err(malformed("required is not an array")),
    };

    if let Some(missing) = required.iter().find(|name| !properties.contains_key(*name)) {
        return Err(malformed(&format!(
            "required parameter {missing} is not declared in properties"
        )));
    }

    Ok(ToolSpec {
        name: tool.name.clone(),
        description: tool.description.clone().unwrap_or_default(),
        parameters: json!({
            "type": "object",
            "properties": properties,
            "required": required,
        }),
    })
}

/// Keep only allowed keywords, recursing into nested schemas.
fn sanitize(schema: &Value) -> Value {
    let Some(object) = schema.as_object() else {
        return schema.clone();
    };

    let cleaned = object
        .iter()
        .filter(|(key, _)| ALLOWED_KEYWORDS.contains(&key.as_str()))
        .map(|(key, value)| {
            let value = match (key.as_str(), value) {
                ("properties", Value::Object(props)) => Value::Object(
                    props
                        .iter()
                        .map(|(name, prop)| (name.clone(), sanitize(prop)))
                        .collect(),
                ),
                ("items", items) => sanitize(items),
                ("anyOf", Value::Array(variants)) => {
                    Value::Array(variants.iter().map(sanitize).collect())
                }
                _ => value.clone(),
            };
            (key.clone(), value)
        })
        .collect();

    Value::Object(cleaned)
}
