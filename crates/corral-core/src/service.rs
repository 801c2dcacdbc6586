//! The polymorphic service abstraction
//!
//! Every object the orchestrator manages implements [`Service`]: lifecycle
//! operations, identity, and observability, plus a mutable state-change
//! callback slot. Optional capabilities are modeled as separate traits
//! discoverable through the `*_checker`/`*_provider` probe methods rather
//! than as a class hierarchy.

use crate::state::{HealthStatus, ServiceState};
use crate::tool::JsonObject;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Payload delivered to a state-change callback.
#[derive(Debug, Clone)]
pub struct StateChange {
    /// Service name
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
    /// Error message after the transition, if any
    pub error: Option<String>,
}

/// State-change callback installed by the orchestrator.
///
/// Invoked off-lock in a fresh task after the transition is visible to
/// observers; implementations may call back into the orchestrator without
/// deadlocking, and must not block.
pub type StateCallback = Arc<dyn Fn(StateChange) + Send + Sync>;

/// A long-lived managed service.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Unique, non-empty service name
    fn name(&self) -> &str;

    /// Free-form service type tag (e.g. `MCPServer` or a ServiceClass type)
    fn service_type(&self) -> &str;

    /// Ordered list of service names this service depends on
    fn dependencies(&self) -> Vec<String>;

    /// Start the service
    async fn start(&self) -> Result<()>;

    /// Stop the service
    async fn stop(&self) -> Result<()>;

    /// Restart the service
    async fn restart(&self) -> Result<()>;

    /// Current lifecycle state
    fn state(&self) -> ServiceState;

    /// Current health
    fn health(&self) -> HealthStatus;

    /// Most recent error, if the service is in a failed state
    fn last_error(&self) -> Option<String>;

    /// Install (or replace) the state-change callback
    fn set_state_callback(&self, callback: StateCallback);

    /// Health-check capability, if this service supports active checks
    fn health_checker(&self) -> Option<&dyn HealthChecker> {
        None
    }

    /// Service-data capability, if this service publishes a data payload
    fn data_provider(&self) -> Option<&dyn ServiceDataProvider> {
        None
    }

    /// Forced-state-write capability, if external updates are allowed
    fn state_updater(&self) -> Option<&dyn StateUpdater> {
        None
    }
}

/// Capability: the service supports active health checking.
#[async_trait]
pub trait HealthChecker: Send + Sync {
    /// Run one health check and return the derived health
    async fn check_health(&self) -> Result<HealthStatus>;

    /// Interval at which the orchestrator should schedule checks
    fn health_check_interval(&self) -> Duration;
}

/// Capability: the service exposes an arbitrary key→value payload.
pub trait ServiceDataProvider: Send + Sync {
    /// Snapshot of the service's data payload
    fn service_data(&self) -> JsonObject;
}

/// Capability: external callers may force state writes.
pub trait StateUpdater: Send + Sync {
    /// Overwrite state, health, and error
    fn update_state(&self, state: ServiceState, health: HealthStatus, error: Option<String>);
}
