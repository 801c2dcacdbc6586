//! Protocol client seam
//!
//! The wire protocol is out of scope here; hosts plug in a factory that
//! dials whatever transports they support. The service only needs to
//! create, initialize, ping, and close clients.

use crate::definition::McpServerDefinition;
use async_trait::async_trait;
use corral_core::Result;
use std::sync::Arc;

/// Handle to a connected MCP client.
#[async_trait]
pub trait McpClient: Send + Sync {
    /// Perform the protocol initialization handshake.
    async fn initialize(&self) -> Result<()>;

    /// Liveness probe against the server.
    async fn ping(&self) -> Result<()>;

    /// Close the connection and release transport resources.
    async fn close(&self) -> Result<()>;
}

/// Creates clients for server definitions.
#[async_trait]
pub trait McpClientFactory: Send + Sync {
    /// Dial the server described by `definition`.
    async fn connect(&self, definition: &McpServerDefinition) -> Result<Arc<dyn McpClient>>;
}
