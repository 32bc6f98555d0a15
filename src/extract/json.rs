use serde_json::Value;

use super::{Extraction, IndexUnit};

/// A scalar leaf addressed by its full dotted path.
#[derive(Debug, Clone, PartialEq)]
pub struct FlattenedField {
    pub path: String,
    pub value: String,
    pub value_type: &'static str,
}

pub fn value_type_of(value: &Value) -> &'static str {
    match value {
        Value::String(_) => "string",
        Value::Number(_) => "number",
        Value::Bool(_) => "boolean",
        Value::Null => "null",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Flatten a JSON value into dotted-path / scalar pairs. Arrays and nested
/// objects expand into unique paths with numeric segments; null leaves are
/// skipped. The walk uses an explicit work stack so arbitrarily deep input
/// cannot exhaust the call stack.
pub fn flatten(value: &Value) -> Vec<FlattenedField> {
    let mut fields = Vec::new();
    let mut stack: Vec<(String, &Value)> = vec![(String::new(), value)];

    while let Some((prefix, current)) = stack.pop() {
        match current {
            Value::Object(map) => {
                // Reverse push keeps document order on the LIFO stack.
                for (key, child) in map.iter().rev() {
                    let path = if prefix.is_empty() {
                        key.clone()
                    } else {
                        format!("{prefix}.{key}")
                    };
                    stack.push((path, child));
                }
            }
            Value::Array(items) => {
                for (index, child) in items.iter().enumerate().rev() {
                    let path = if prefix.is_empty() {
                        index.to_string()
                    } else {
                        format!("{prefix}.{index}")
                    };
                    stack.push((path, child));
                }
            }
            Value::Null => {}
            scalar => fields.push(FlattenedField {
                path: prefix,
                value: stringify(scalar),
                value_type: value_type_of(scalar),
            }),
        }
    }

    fields
}

/// JSON documents index one unit per flattened field. The page count is
/// the flattened pair count, or the item count for a top-level array.
pub fn extract(value: &Value) -> Extraction {
    let fields = flatten(value);

    let page_count = match value {
        Value::Array(items) => items.len() as u32,
        _ => fields.len() as u32,
    };

    let units = fields
        .into_iter()
        .map(|field| IndexUnit::json_field(field.path, field.value, field.value_type))
        .collect();

    Extraction { units, page_count }
}
