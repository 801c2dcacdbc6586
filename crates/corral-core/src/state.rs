//! Service state and health vocabulary

use serde::{Deserialize, Serialize};

/// Lifecycle state of a service.
///
/// `Running` and `Connected` are both "live" states. Remote transports use
/// the `Connected`/`Disconnected` pair where the nuance matters; local
/// processes use `Running`/`Stopped`. `Unreachable` marks a remote service
/// whose recovery is owned exclusively by the orchestrator's retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    /// State has not been determined yet
    Unknown,
    /// Waiting on an external precondition (e.g. out-of-band credentials)
    Waiting,
    /// Service is starting up
    Starting,
    /// Service is running (local process vocabulary)
    Running,
    /// Service is connected (remote transport vocabulary)
    Connected,
    /// Service is shutting down
    Stopping,
    /// Service is stopped (local process vocabulary)
    Stopped,
    /// Service is disconnected (remote transport vocabulary)
    Disconnected,
    /// Service failed to start or crashed
    Failed,
    /// Remote service crossed the consecutive-failure threshold
    Unreachable,
    /// A recovery attempt is in flight
    Retrying,
}

impl ServiceState {
    /// Whether the service is live (running locally or connected remotely).
    pub fn is_live(self) -> bool {
        matches!(self, ServiceState::Running | ServiceState::Connected)
    }

    /// Whether the retry loop may consider this service for reconnection.
    pub fn is_retryable(self) -> bool {
        matches!(self, ServiceState::Failed | ServiceState::Unreachable)
    }
}

/// Health of a service as derived from health checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Health has not been determined
    Unknown,
    /// Service passed enough consecutive checks
    Healthy,
    /// Service failed enough consecutive checks
    Unhealthy,
    /// Health is being evaluated (between thresholds)
    Checking,
}
