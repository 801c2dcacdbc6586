//! Event model
//!
//! Two event surfaces exist side by side: a durable [`EventSink`] the core
//! only writes to (reason + message per object), and in-process subscriber
//! events ([`ServiceStateChangedEvent`], [`ServiceInstanceEvent`]) fanned
//! out over bounded channels by the orchestrator.

use crate::state::{HealthStatus, ServiceState};
use crate::tool::JsonObject;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Reference to the object an event is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Object kind (e.g. `ServiceInstance`, `MCPServer`)
    pub kind: String,
    /// Object name
    pub name: String,
    /// Namespace the object lives in
    pub namespace: String,
}

impl ObjectRef {
    /// Reference to a ServiceClass instance.
    pub fn service_instance(name: impl Into<String>) -> Self {
        Self {
            kind: "ServiceInstance".to_string(),
            name: name.into(),
            namespace: "default".to_string(),
        }
    }

    /// Reference to an MCP server.
    pub fn mcp_server(name: impl Into<String>) -> Self {
        Self {
            kind: "MCPServer".to_string(),
            name: name.into(),
            namespace: "default".to_string(),
        }
    }
}

/// Event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSeverity {
    /// Routine lifecycle progress
    Normal,
    /// Failure or degradation
    Warning,
}

/// Reasons emitted by the orchestration core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventReason {
    /// A ServiceClass instance was created
    ServiceInstanceCreated,
    /// Instance start began
    ServiceInstanceStarting,
    /// Instance start succeeded
    ServiceInstanceStarted,
    /// Instance stop began
    ServiceInstanceStopping,
    /// Instance stop succeeded
    ServiceInstanceStopped,
    /// Instance restart began
    ServiceInstanceRestarting,
    /// Instance restart succeeded
    ServiceInstanceRestarted,
    /// Instance was deleted
    ServiceInstanceDeleted,
    /// Instance entered the Failed state
    ServiceInstanceFailed,
    /// Instance state changed
    ServiceInstanceStateChanged,
    /// A lifecycle tool call began
    ServiceInstanceToolExecutionStarted,
    /// A lifecycle tool call succeeded
    ServiceInstanceToolExecutionCompleted,
    /// A lifecycle tool call failed
    ServiceInstanceToolExecutionFailed,
    /// Instance became healthy
    ServiceInstanceHealthy,
    /// Instance became unhealthy
    ServiceInstanceUnhealthy,
    /// A single health check failed
    ServiceInstanceHealthCheckFailed,
    /// Instance recovered from unhealthy
    ServiceInstanceHealthCheckRecovered,
    /// MCP server start began
    MCPServerStarting,
    /// MCP server start succeeded
    MCPServerStarted,
    /// MCP server stopped
    MCPServerStopped,
    /// MCP server failed
    MCPServerFailed,
    /// MCP server needs out-of-band authentication
    MCPServerAuthRequired,
    /// MCP server health check failed
    MCPServerHealthCheckFailed,
    /// A retry-loop recovery attempt began
    MCPServerRecoveryStarted,
    /// A retry-loop recovery attempt succeeded
    MCPServerRecoverySucceeded,
    /// A retry-loop recovery attempt failed
    MCPServerRecoveryFailed,
}

impl EventReason {
    /// Stable string form of the reason.
    pub fn as_str(self) -> &'static str {
        match self {
            EventReason::ServiceInstanceCreated => "ServiceInstanceCreated",
            EventReason::ServiceInstanceStarting => "ServiceInstanceStarting",
            EventReason::ServiceInstanceStarted => "ServiceInstanceStarted",
            EventReason::ServiceInstanceStopping => "ServiceInstanceStopping",
            EventReason::ServiceInstanceStopped => "ServiceInstanceStopped",
            EventReason::ServiceInstanceRestarting => "ServiceInstanceRestarting",
            EventReason::ServiceInstanceRestarted => "ServiceInstanceRestarted",
            EventReason::ServiceInstanceDeleted => "ServiceInstanceDeleted",
            EventReason::ServiceInstanceFailed => "ServiceInstanceFailed",
            EventReason::ServiceInstanceStateChanged => "ServiceInstanceStateChanged",
            EventReason::ServiceInstanceToolExecutionStarted => {
                "ServiceInstanceToolExecutionStarted"
            }
            EventReason::ServiceInstanceToolExecutionCompleted => {
                "ServiceInstanceToolExecutionCompleted"
            }
            EventReason::ServiceInstanceToolExecutionFailed => "ServiceInstanceToolExecutionFailed",
            EventReason::ServiceInstanceHealthy => "ServiceInstanceHealthy",
            EventReason::ServiceInstanceUnhealthy => "ServiceInstanceUnhealthy",
            EventReason::ServiceInstanceHealthCheckFailed => "ServiceInstanceHealthCheckFailed",
            EventReason::ServiceInstanceHealthCheckRecovered => {
                "ServiceInstanceHealthCheckRecovered"
            }
            EventReason::MCPServerStarting => "MCPServerStarting",
            EventReason::MCPServerStarted => "MCPServerStarted",
            EventReason::MCPServerStopped => "MCPServerStopped",
            EventReason::MCPServerFailed => "MCPServerFailed",
            EventReason::MCPServerAuthRequired => "MCPServerAuthRequired",
            EventReason::MCPServerHealthCheckFailed => "MCPServerHealthCheckFailed",
            EventReason::MCPServerRecoveryStarted => "MCPServerRecoveryStarted",
            EventReason::MCPServerRecoverySucceeded => "MCPServerRecoverySucceeded",
            EventReason::MCPServerRecoveryFailed => "MCPServerRecoveryFailed",
        }
    }
}

impl std::fmt::Display for EventReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable event sink consumed by the core.
///
/// Sink failures never affect state transitions; callers log and swallow
/// them (see [`emit_event`]).
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Record one event.
    async fn create_event(
        &self,
        object: &ObjectRef,
        reason: EventReason,
        message: &str,
        severity: EventSeverity,
    ) -> Result<()>;
}

/// Sink that discards everything; useful for hosts without an event manager.
pub struct NullEventSink;

#[async_trait]
impl EventSink for NullEventSink {
    async fn create_event(
        &self,
        _object: &ObjectRef,
        _reason: EventReason,
        _message: &str,
        _severity: EventSeverity,
    ) -> Result<()> {
        Ok(())
    }
}

/// Record an event, logging and swallowing sink failures at debug level.
pub async fn emit_event(
    sink: &dyn EventSink,
    object: &ObjectRef,
    reason: EventReason,
    message: &str,
    severity: EventSeverity,
) {
    if let Err(e) = sink.create_event(object, reason, message, severity).await {
        debug!(
            "Failed to record {} event for {}: {}",
            reason, object.name, e
        );
    }
}

/// State-change notification delivered to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStateChangedEvent {
    /// Service name
    pub name: String,
    /// Service type tag
    pub service_type: String,
    /// State before the transition
    pub old_state: ServiceState,
    /// State after the transition
    pub new_state: ServiceState,
    /// Health after the transition
    pub health: HealthStatus,
    /// Error message, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Unix timestamp (seconds) of the transition
    pub timestamp_unix: i64,
}

/// Instance lifecycle notification delivered to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInstanceEvent {
    /// Instance name
    pub name: String,
    /// Service type tag
    pub service_type: String,
    /// State before the transition
    pub old_state: ServiceState,
    /// State after the transition
    pub new_state: ServiceState,
    /// Health before the transition
    pub old_health: HealthStatus,
    /// Health after the transition
    pub new_health: HealthStatus,
    /// Error message, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the transition happened
    pub timestamp: DateTime<Utc>,
    /// Free-form event metadata
    #[serde(default)]
    pub metadata: JsonObject,
}
