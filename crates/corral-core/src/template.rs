//! Template engine seam and default `{{ .path }}` renderer
//!
//! Argument templates reference the instance's template context with
//! `{{ .dotted.path }}` expressions. The engine is a trait so hosts can plug
//! in a richer implementation; [`DotTemplate`] covers the substitution
//! semantics the orchestrator needs.

use crate::{Error, Result};
use regex::Regex;
use serde_json::Value;

/// Substitutes `{{ .path }}` expressions against a context map.
///
/// Implementations operate recursively on maps, arrays, and strings, and
/// return the input value's shape unchanged otherwise.
pub trait TemplateEngine: Send + Sync {
    /// Render `value` against `context`.
    fn replace(&self, value: &Value, context: &Value) -> Result<Value>;
}

/// Default renderer for `{{ .dotted.path }}` placeholders.
///
/// A string that consists of exactly one placeholder resolves to the
/// referenced value with its type preserved, so `"{{ .replicas }}"` can
/// render to a number. Strings with embedded placeholders concatenate the
/// display forms. Unresolvable paths are template errors.
pub struct DotTemplate {
    pattern: Regex,
}

impl DotTemplate {
    /// Create the renderer.
    pub fn new() -> Self {
        Self {
            pattern: Regex::new(r"\{\{\s*\.([A-Za-z0-9_][A-Za-z0-9_.]*)\s*\}\}")
                .expect("hard-coded pattern compiles"),
        }
    }

    fn lookup<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
        let mut current = context;
        for segment in path.split('.') {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    fn render_string(&self, s: &str, context: &Value) -> Result<Value> {
        // A whole-string placeholder keeps the referenced value's type.
        if let Some(caps) = self.pattern.captures(s) {
            if let Some(whole) = caps.get(0) {
                if whole.start() == 0 && whole.end() == s.len() {
                    let path = &caps[1];
                    return Self::lookup(context, path)
                        .cloned()
                        .ok_or_else(|| Error::template(format!("path not found: {path}")));
                }
            }
        }

        let mut rendered = String::new();
        let mut last = 0;
        for caps in self.pattern.captures_iter(s) {
            let Some(m) = caps.get(0) else { continue };
            let path = &caps[1];
            let value = Self::lookup(context, path)
                .ok_or_else(|| Error::template(format!("path not found: {path}")))?;
            rendered.push_str(&s[last..m.start()]);
            rendered.push_str(&display_value(value));
            last = m.end();
        }
        rendered.push_str(&s[last..]);
        Ok(Value::String(rendered))
    }
}

impl Default for DotTemplate {
    fn default() -> Self {
        Self::new()
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl TemplateEngine for DotTemplate {
    fn replace(&self, value: &Value, context: &Value) -> Result<Value> {
        match value {
            Value::String(s) => self.render_string(s, context),
            Value::Object(map) => {
                let mut rendered = serde_json::Map::with_capacity(map.len());
                for (key, item) in map {
                    rendered.insert(key.clone(), self.replace(item, context)?);
                }
                Ok(Value::Object(rendered))
            }
            Value::Array(items) => {
                let rendered = items
                    .iter()
                    .map(|item| self.replace(item, context))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Value::Array(rendered))
            }
            other => Ok(other.clone()),
        }
    }
}
