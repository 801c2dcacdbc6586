//! Auth-required detection for tool callers
//!
//! When starting a server fails because it wants OAuth credentials, the
//! caller-facing response points at the server's authentication tool. The
//! detection walks the error cause chain for the structured
//! [`AuthRequiredError`](corral_core::AuthRequiredError) type; message text
//! is never consulted.

use corral_core::{find_auth_required, ToolResult};

/// Name of the per-server authentication tool.
pub fn auth_tool_name(server_name: &str) -> String {
    format!("x_{server_name}_authenticate")
}

/// Build the caller-facing tool result for an auth-required failure.
///
/// Returns `None` when no structured auth-required error sits in the chain,
/// meaning the error is not an auth problem and should pass through.
pub fn auth_required_tool_result(
    error: &(dyn std::error::Error + 'static),
    server_name: &str,
) -> Option<ToolResult> {
    let auth = find_auth_required(error)?;

    let mut text = format!(
        "Authentication required for MCP server '{server_name}'. Run the {} tool to sign in",
        auth_tool_name(server_name)
    );
    if !auth.auth_info.issuer.is_empty() {
        text.push_str(&format!(
            " (issuer: {}, scope: {})",
            auth.auth_info.issuer, auth.auth_info.scope
        ));
    }
    text.push('.');

    Some(ToolResult::error(text))
}
