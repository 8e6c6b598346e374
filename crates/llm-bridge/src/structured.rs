//! Structured output: schema derivation and response parsing.
//!
//! A structured generator freezes a strict JSON Schema for its target
//! type at request time: derived from `T` via [`schemars`], then
//! post-processed so every `$ref` is inlined and every object level
//! forbids additional properties. Depending on the backend, the schema
//! rides along as a response-format constraint or as a prompt-appended
//! instruction.
//!
//! After the orchestration loop finishes, the final text is stripped of
//! markdown fences and parsed. Parsing gets exactly one repair round
//! (driven by the generator, see [`generator`](crate::generator));
//! recursion is deliberately impossible.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::LlmError;

/// Derives the strict schema for `T`.
///
/// `additionalProperties: false` is applied to every object level and
/// all `$ref` indirection is resolved, matching what schema-constrained
/// decoders require. Recursive types cannot be flattened this way and
/// are rejected.
#[cfg(feature = "schema")]
pub fn schema_for<T: schemars::JsonSchema>() -> Result<Value, LlmError> {
    let root = schemars::schema_for!(T);
    let mut schema = serde_json::to_value(root).map_err(|e| {
        LlmError::StructuredOutputParseFailed {
            message: format!("deriving schema: {e}"),
            raw: String::new(),
        }
    })?;
    strictify(&mut schema)?;
    Ok(schema)
}

#[cfg(feature = "schema")]
/// Rewrites `schema` in place: inlines `$ref`s, strips the definition
/// tables, and pins `additionalProperties: false` onto every object.
fn strictify(schema: &mut Value) -> Result<(), LlmError> {
    let definitions = collect_definitions(schema);
    inline_refs(schema, &definitions, 0)?;
    if let Some(obj) = schema.as_object_mut() {
        obj.remove("definitions");
        obj.remove("$defs");
    }
    forbid_additional_properties(schema);
    Ok(())
}

#[cfg(feature = "schema")]
fn collect_definitions(schema: &Value) -> serde_json::Map<String, Value> {
    let mut definitions = serde_json::Map::new();
    for table in ["definitions", "$defs"] {
        if let Some(defs) = schema.get(table).and_then(Value::as_object) {
            for (name, def) in defs {
                definitions.insert(name.clone(), def.clone());
            }
        }
    }
    definitions
}

#[cfg(feature = "schema")]
const MAX_REF_DEPTH: usize = 32;

#[cfg(feature = "schema")]
fn inline_refs(
    value: &mut Value,
    definitions: &serde_json::Map<String, Value>,
    depth: usize,
) -> Result<(), LlmError> {
    if depth > MAX_REF_DEPTH {
        return Err(LlmError::StructuredOutputParseFailed {
            message: "schema nests too deeply (recursive type?)".into(),
            raw: String::new(),
        });
    }

    if let Some(reference) = value.get("$ref").and_then(Value::as_str) {
        let name = reference
            .rsplit('/')
            .next()
            .unwrap_or(reference)
            .to_string();
        let Some(resolved) = definitions.get(&name) else {
            return Err(LlmError::StructuredOutputParseFailed {
                message: format!("unresolvable schema reference {reference:?}"),
                raw: String::new(),
            });
        };
        *value = resolved.clone();
        return inline_refs(value, definitions, depth + 1);
    }

    match value {
        Value::Object(map) => {
            for child in map.values_mut() {
                inline_refs(child, definitions, depth + 1)?;
            }
        }
        Value::Array(items) => {
            for child in items {
                inline_refs(child, definitions, depth + 1)?;
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(feature = "schema")]
fn forbid_additional_properties(value: &mut Value) {
    match value {
        Value::Object(map) => {
            let is_object_schema = map.get("type").and_then(Value::as_str) == Some("object");
            if is_object_schema && !map.contains_key("additionalProperties") {
                map.insert("additionalProperties".into(), Value::Bool(false));
            }
            for child in map.values_mut() {
                forbid_additional_properties(child);
            }
        }
        Value::Array(items) => {
            for child in items {
                forbid_additional_properties(child);
            }
        }
        _ => {}
    }
}

/// The instruction appended to the prompt when the schema cannot be
/// delivered as a response-format constraint.
pub fn schema_instruction(schema: &Value) -> String {
    let rendered = serde_json::to_string_pretty(schema)
        .unwrap_or_else(|_| schema.to_string());
    format!(
        "Return only JSON matching this schema, with no markdown and no \
         explanation:\n{rendered}"
    )
}

/// Strips a surrounding markdown code fence (```json … ``` or ``` … ```)
/// and whitespace.
pub fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. "json") on the opening fence line.
    let body = match body.split_once('\n') {
        Some((first_line, remainder)) if !first_line.trim().contains(' ') => remainder,
        _ => body,
    };
    body.trim()
}

/// Fence-strips and deserializes `text` into `T`.
pub fn parse_structured<T: DeserializeOwned>(text: &str) -> Result<T, LlmError> {
    let cleaned = strip_fences(text);
    serde_json::from_str(cleaned).map_err(|e| LlmError::StructuredOutputParseFailed {
        message: e.to_string(),
        raw: text.to_string(),
    })
}

/// Validates `value` against `schema`, mapping any violation into
/// [`LlmError::StructuredOutputParseFailed`].
#[cfg(feature = "schema")]
pub fn validate_against_schema(schema: &Value, value: &Value) -> Result<(), LlmError> {
    let validator = jsonschema::validator_for(schema).map_err(|e| {
        LlmError::StructuredOutputParseFailed {
            message: format!("invalid schema: {e}"),
            raw: String::new(),
        }
    })?;
    let errors: Vec<String> = validator.iter_errors(value).map(|e| e.to_string()).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(LlmError::StructuredOutputParseFailed {
            message: errors.join("; "),
            raw: value.to_string(),
        })
    }
}
