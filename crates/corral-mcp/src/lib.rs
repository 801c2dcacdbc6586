//! # MCP-server service
//!
//! A concrete corral service wrapping a Model Context Protocol client.
//!
//! The service tracks consecutive connection failures, computes an
//! exponential reconnection backoff, classifies errors as transient versus
//! configuration problems, and parks itself in the `Unreachable` state once
//! the consecutive-failure threshold is crossed — from there only the
//! orchestrator's retry loop attempts recovery. Authentication-required
//! failures are recognized structurally (never by message text) and leave
//! the service `Waiting` for out-of-band credentials.
//!
//! The protocol transport itself is out of scope: hosts supply an
//! [`McpClientFactory`] that knows how to dial the transports described by
//! [`McpServerDefinition`].

#![warn(missing_docs)]
#![warn(unsafe_code)]

mod auth;
mod classify;
mod client;
mod definition;
mod service;

pub use auth::{auth_required_tool_result, auth_tool_name};
pub use classify::{is_configuration_error, is_transient_error};
pub use client::{McpClient, McpClientFactory};
pub use definition::{AuthConfig, MCP_SERVER_SERVICE_TYPE, McpServerDefinition, TransportConfig};
pub use service::{
    BACKOFF_MULTIPLIER, DEFAULT_HEALTH_CHECK_INTERVAL, DEFAULT_REMOTE_TIMEOUT, INITIAL_BACKOFF,
    MAX_BACKOFF, McpServerService, RESTART_GRACE_PERIOD, UNREACHABLE_THRESHOLD, backoff_delay,
};
