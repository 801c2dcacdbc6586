//! Tool response processing
//!
//! Extracts values from tool responses via dotted JSON paths and evaluates
//! health-check expectations. Tools may return structured outputs either as
//! top-level response fields or as a JSON document encoded in the response's
//! `text` field; [`process_tool_outputs`] handles both.

use corral_core::{HealthCheckExpectation, JsonObject};
use serde_json::Value;
use std::collections::HashMap;

/// Extract a value from a response by dotted path.
///
/// An empty path yields `None`. A path without a dot is a plain field
/// lookup. A dotted path walks nested maps; traversal stops and yields
/// `None` as soon as an intermediate value is not a map or a segment is
/// missing.
pub fn extract_from_response(response: &JsonObject, path: &str) -> Option<Value> {
    if path.is_empty() {
        return None;
    }
    if !path.contains('.') {
        return response.get(path).cloned();
    }

    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = response.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current.clone())
}

/// Simple-field-then-dotted-path lookup used for output extraction.
fn extract_value(root: &JsonObject, path: &str) -> Option<Value> {
    root.get(path)
        .cloned()
        .or_else(|| extract_from_response(root, path))
}

/// Extract the outputs named by `spec` from a tool response.
///
/// The data root is the object parsed from the response's `text` field when
/// that field holds a JSON object, and the response itself otherwise. Only
/// non-null values are recorded; an empty result collapses to `None`.
pub fn process_tool_outputs(
    response: &JsonObject,
    spec: &HashMap<String, String>,
) -> Option<JsonObject> {
    if spec.is_empty() {
        return None;
    }

    let parsed_text = response
        .get("text")
        .and_then(Value::as_str)
        .and_then(|text| serde_json::from_str::<Value>(text).ok())
        .and_then(|value| match value {
            Value::Object(map) => Some(map),
            _ => None,
        });
    let root = parsed_text.as_ref().unwrap_or(response);

    let mut extracted = JsonObject::new();
    for (name, path) in spec {
        if let Some(value) = extract_value(root, path) {
            if !value.is_null() {
                extracted.insert(name.clone(), value);
            }
        }
    }

    if extracted.is_empty() {
        None
    } else {
        Some(extracted)
    }
}

/// Evaluate a health-check expectation against a tool response.
///
/// A missing expectation is healthy. `success: false` means the tool was
/// expected to fail, so reaching a response at all is unhealthy. Every
/// `jsonPath` entry must match the extracted value when both are compared
/// as strings.
pub fn evaluate_health_expectation(
    response: &JsonObject,
    expectation: Option<&HealthCheckExpectation>,
) -> bool {
    let Some(expectation) = expectation else {
        return true;
    };

    if expectation.success == Some(false) {
        return false;
    }

    for (path, expected) in &expectation.json_path {
        let Some(actual) = extract_value(response, path) else {
            return false;
        };
        if string_form(&actual) != string_form(expected) {
            return false;
        }
    }
    true
}

fn string_form(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
