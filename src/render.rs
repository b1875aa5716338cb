//! Conversion of the tool's output document into metadata entries.
//!
//! The document is the `output -json` shape: an object mapping each declared
//! output to `{"value": ..., "type": ..., "sensitive": bool}`. Entries keep
//! their declared order and `env_name` is always appended last.

use serde_json::Value;
use thiserror::Error;

use crate::request::MetadataEntry;

/// Metadata entry carrying the resolved environment name.
pub const ENV_NAME_ENTRY: &str = "env_name";

/// Placeholder rendered for outputs marked sensitive.
pub const SENSITIVE_PLACEHOLDER: &str = "<sensitive>";

/// Errors raised for a malformed output document.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RenderError {
    /// The document is not a JSON object.
    #[error("output document must be a JSON object, got {found}")]
    NotAnObject {
        /// JSON type found instead.
        found: &'static str,
    },
    /// A declared output is not an object carrying `value`.
    #[error("output '{name}' could not be rendered: {reason}")]
    InvalidOutput {
        /// Name of the offending output.
        name: String,
        /// What was wrong with it.
        reason: &'static str,
    },
}

/// Renders `outputs` into ordered metadata, ending with `env_name`.
///
/// Strings pass through, other scalars use their JSON text, and mappings or
/// sequences are serialised as compact JSON with object keys sorted. Null
/// outputs are skipped, and so is a declared `env_name` output: the resolved
/// name always wins.
///
/// # Errors
///
/// Returns [`RenderError`] when the document or one of its entries does not
/// have the expected shape.
pub fn render(outputs: &Value, env_name: &str) -> Result<Vec<MetadataEntry>, RenderError> {
    let declared = outputs.as_object().ok_or(RenderError::NotAnObject {
        found: type_name(outputs),
    })?;

    let mut metadata = Vec::with_capacity(declared.len() + 1);
    for (name, output) in declared {
        let fields = output.as_object().ok_or_else(|| RenderError::InvalidOutput {
            name: name.clone(),
            reason: "entry is not an object",
        })?;
        let value = fields.get("value").ok_or_else(|| RenderError::InvalidOutput {
            name: name.clone(),
            reason: "entry has no value",
        })?;
        let sensitive = fields
            .get("sensitive")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        if value.is_null() || name == ENV_NAME_ENTRY {
            continue;
        }
        let rendered = if sensitive {
            String::from(SENSITIVE_PLACEHOLDER)
        } else {
            render_value(value)
        };
        metadata.push(MetadataEntry::new(name.as_str(), rendered));
    }
    metadata.push(MetadataEntry::new(ENV_NAME_ENTRY, env_name));
    Ok(metadata)
}

/// Renders a single output value.
#[must_use]
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Array(_) | Value::Object(_) => canonical(value).to_string(),
        Value::Null | Value::Bool(_) | Value::Number(_) => value.to_string(),
    }
}

/// Copies `value` with every object's keys in sorted order.
fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|left, right| left.0.cmp(right.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, inner)| (key.clone(), canonical(inner)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

const fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
