//! MCP server definitions

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::service::DEFAULT_REMOTE_TIMEOUT;

/// Type tag MCP-server services carry in the registry.
pub const MCP_SERVER_SERVICE_TYPE: &str = "MCPServer";

/// Immutable definition of an MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpServerDefinition {
    /// Unique server name
    pub name: String,

    /// Transport the client connects over
    #[serde(flatten)]
    pub transport: TransportConfig,

    /// OAuth configuration, if the server requires authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,

    /// Prefix applied to the server's tools when exposed to callers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_prefix: Option<String>,

    /// Whether the orchestrator should start this server automatically
    #[serde(default)]
    pub auto_start: bool,
}

impl McpServerDefinition {
    /// Whether the transport is network-based. Remote servers use the
    /// `Connected`/`Disconnected` state vocabulary and are eligible for
    /// unreachable-state tracking.
    pub fn is_remote(&self) -> bool {
        self.transport.is_remote()
    }

    /// Per-request timeout: the configured value, or the default.
    pub fn request_timeout(&self) -> Duration {
        match &self.transport {
            TransportConfig::StreamableHttp { timeout, .. } | TransportConfig::Sse { timeout, .. } => {
                timeout.map_or(DEFAULT_REMOTE_TIMEOUT, Duration::from_secs)
            }
            TransportConfig::Stdio { .. } => DEFAULT_REMOTE_TIMEOUT,
        }
    }
}

/// How the client reaches the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TransportConfig {
    /// Child process speaking MCP over stdio
    Stdio {
        /// Command to launch
        command: String,
        /// Command arguments
        #[serde(default)]
        args: Vec<String>,
        /// Extra environment for the child
        #[serde(default)]
        env: HashMap<String, String>,
    },
    /// Streamable HTTP endpoint
    #[serde(rename_all = "camelCase")]
    StreamableHttp {
        /// Endpoint URL
        url: String,
        /// Extra request headers
        #[serde(default)]
        headers: HashMap<String, String>,
        /// Request timeout in seconds
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout: Option<u64>,
    },
    /// Server-sent-events endpoint
    #[serde(rename_all = "camelCase")]
    Sse {
        /// Endpoint URL
        url: String,
        /// Extra request headers
        #[serde(default)]
        headers: HashMap<String, String>,
        /// Request timeout in seconds
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout: Option<u64>,
    },
}

impl TransportConfig {
    /// Whether the transport crosses the network.
    pub fn is_remote(&self) -> bool {
        !matches!(self, TransportConfig::Stdio { .. })
    }

    /// Stable tag for logs and service data.
    pub fn kind(&self) -> &'static str {
        match self {
            TransportConfig::Stdio { .. } => "stdio",
            TransportConfig::StreamableHttp { .. } => "streamable-http",
            TransportConfig::Sse { .. } => "sse",
        }
    }
}

/// OAuth block attached to a server definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    /// Whether authentication is known to be required up front
    #[serde(default)]
    pub required: bool,
    /// Expected token issuer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    /// Requested scope
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}
