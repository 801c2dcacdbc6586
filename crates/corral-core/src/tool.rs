//! Tool invocation seam
//!
//! The orchestrator never starts processes itself; every lifecycle action is
//! delegated to a named tool through the [`ToolCaller`] indirection.

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// String-keyed JSON map used for tool arguments, responses, and service
/// data throughout corral.
pub type JsonObject = serde_json::Map<String, serde_json::Value>;

/// Pluggable tool-invocation backend.
///
/// The result map may carry `success: bool` (where `false` signals logical
/// failure even though the call itself succeeded) and `text: string` (a
/// human-readable error, or a JSON document encoding structured outputs).
/// Implementations must be safe under concurrent calls.
#[async_trait]
pub trait ToolCaller: Send + Sync {
    /// Invoke the named tool with the given arguments.
    async fn call_tool(&self, name: &str, args: JsonObject) -> Result<JsonObject>;
}

/// Caller-facing tool result, e.g. the payload built for an auth-required
/// failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    /// Whether this result represents an error
    pub is_error: bool,
    /// Human-readable message
    pub text: String,
}

impl ToolResult {
    /// Build an error result.
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            is_error: true,
            text: text.into(),
        }
    }
}
