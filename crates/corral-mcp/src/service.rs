//! MCP-server service implementation

use crate::classify;
use crate::client::{McpClient, McpClientFactory};
use crate::definition::{MCP_SERVER_SERVICE_TYPE, McpServerDefinition};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use corral_core::time::with_timeout;
use corral_core::{
    emit_event, Error, EventReason, EventSeverity, EventSink, HealthChecker, HealthStatus,
    JsonObject, ObjectRef, Result, Service, ServiceDataProvider, ServiceState, StateCallback,
    StateChange, StateUpdater, find_auth_required,
};
use serde_json::json;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// First reconnection delay after a transient failure.
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(30);

/// Ceiling on the reconnection delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30 * 60);

/// Backoff growth factor per consecutive failure.
pub const BACKOFF_MULTIPLIER: u32 = 2;

/// Consecutive transient failures before a remote server is `Unreachable`.
pub const UNREACHABLE_THRESHOLD: u32 = 3;

/// Grace between stop and start during a restart, allowing subprocess
/// teardown and connection draining.
pub const RESTART_GRACE_PERIOD: Duration = Duration::from_millis(200);

/// Default timeout for remote transport operations.
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default interval between scheduled health checks.
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Reconnection delay for the given consecutive-failure count:
/// `INITIAL_BACKOFF · 2^(failures−1)`, capped at [`MAX_BACKOFF`].
pub fn backoff_delay(failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    INITIAL_BACKOFF
        .saturating_mul(BACKOFF_MULTIPLIER.saturating_pow(exponent))
        .min(MAX_BACKOFF)
}

struct McpShared {
    state: ServiceState,
    health: HealthStatus,
    last_error: Option<String>,
    client: Option<Arc<dyn McpClient>>,
    consecutive_failures: u32,
    last_attempt: Option<DateTime<Utc>>,
    next_retry_after: Option<DateTime<Utc>>,
}

/// A managed MCP server.
///
/// Remote servers (streamable-http, sse) use the `Connected`/`Disconnected`
/// vocabulary and participate in unreachable-state tracking; stdio servers
/// use `Running`/`Stopped` and fail without backoff progression.
pub struct McpServerService {
    definition: McpServerDefinition,
    factory: Arc<dyn McpClientFactory>,
    events: Arc<dyn EventSink>,
    health_interval: Duration,
    shared: RwLock<McpShared>,
    callback: Mutex<Option<StateCallback>>,
}

impl McpServerService {
    /// Wrap a server definition.
    pub fn new(
        definition: McpServerDefinition,
        factory: Arc<dyn McpClientFactory>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            definition,
            factory,
            events,
            health_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            shared: RwLock::new(McpShared {
                state: ServiceState::Unknown,
                health: HealthStatus::Unknown,
                last_error: None,
                client: None,
                consecutive_failures: 0,
                last_attempt: None,
                next_retry_after: None,
            }),
            callback: Mutex::new(None),
        }
    }

    /// The wrapped definition.
    pub fn definition(&self) -> &McpServerDefinition {
        &self.definition
    }

    /// Consecutive transient connection failures.
    pub fn consecutive_failures(&self) -> u32 {
        self.shared.read().unwrap().consecutive_failures
    }

    /// When the next reconnection attempt becomes due, if scheduled.
    pub fn next_retry_after(&self) -> Option<DateTime<Utc>> {
        self.shared.read().unwrap().next_retry_after
    }

    /// When a connection was last attempted.
    pub fn last_attempt(&self) -> Option<DateTime<Utc>> {
        self.shared.read().unwrap().last_attempt
    }

    async fn emit(&self, reason: EventReason, message: &str, severity: EventSeverity) {
        emit_event(
            self.events.as_ref(),
            &ObjectRef::mcp_server(&self.definition.name),
            reason,
            message,
            severity,
        )
        .await;
    }

    /// Apply a transition and schedule the off-lock emissions; identifying
    /// state is captured before the lock is released and no emission path
    /// re-enters it.
    fn update_state_internal(
        &self,
        state: ServiceState,
        health: HealthStatus,
        error: Option<String>,
    ) {
        let change = {
            let mut shared = self.shared.write().unwrap();
            if shared.state == state && shared.health == health && shared.last_error == error {
                return;
            }
            let old_state = shared.state;
            let old_health = shared.health;
            shared.state = state;
            shared.health = health;
            shared.last_error = error.clone();
            StateChange {
                name: self.definition.name.clone(),
                service_type: MCP_SERVER_SERVICE_TYPE.to_string(),
                old_state,
                new_state: state,
                old_health,
                new_health: health,
                error,
            }
        };

        if change.old_state != change.new_state {
            if let Some(callback) = self.callback.lock().unwrap().clone() {
                let callback_change = change.clone();
                smol::spawn(async move { callback(callback_change) }).detach();
            }
        }

        if matches!(
            change.new_state,
            ServiceState::Failed | ServiceState::Unreachable
        ) && change.old_state != change.new_state
        {
            let events = Arc::clone(&self.events);
            let object = ObjectRef::mcp_server(&self.definition.name);
            let message = change
                .error
                .unwrap_or_else(|| "MCP server failed".to_string());
            smol::spawn(async move {
                emit_event(
                    events.as_ref(),
                    &object,
                    EventReason::MCPServerFailed,
                    &message,
                    EventSeverity::Warning,
                )
                .await;
            })
            .detach();
        }
    }

    async fn connect_client(&self) -> Result<Arc<dyn McpClient>> {
        let connect = async {
            let client = self.factory.connect(&self.definition).await?;
            client.initialize().await?;
            Ok(client)
        };
        if self.definition.is_remote() {
            with_timeout(self.definition.request_timeout(), connect).await
        } else {
            connect.await
        }
    }

    async fn start_internal(&self) -> Result<()> {
        {
            let shared = self.shared.read().unwrap();
            if shared.state.is_live() || shared.state == ServiceState::Starting {
                return Err(Error::invalid_argument(format!(
                    "MCP server {} is already running",
                    self.definition.name
                )));
            }
        }

        self.shared.write().unwrap().last_attempt = Some(Utc::now());
        self.update_state_internal(ServiceState::Starting, HealthStatus::Unknown, None);
        self.emit(
            EventReason::MCPServerStarting,
            "connecting to MCP server",
            EventSeverity::Normal,
        )
        .await;

        match self.connect_client().await {
            Ok(client) => {
                {
                    let mut shared = self.shared.write().unwrap();
                    shared.client = Some(client);
                    shared.consecutive_failures = 0;
                    // last_attempt stays set for diagnostics.
                    shared.next_retry_after = None;
                }
                let state = if self.definition.is_remote() {
                    ServiceState::Connected
                } else {
                    ServiceState::Running
                };
                self.update_state_internal(state, HealthStatus::Healthy, None);
                info!("MCP server started: {}", self.definition.name);
                self.emit(
                    EventReason::MCPServerStarted,
                    "MCP server started",
                    EventSeverity::Normal,
                )
                .await;
                Ok(())
            }
            Err(error) => self.handle_start_failure(error).await,
        }
    }

    async fn handle_start_failure(&self, error: Error) -> Result<()> {
        // Needing credentials is not a connectivity failure: the failure
        // counter and retry schedule stay untouched, and the structured
        // error flows back so the caller can register a pending-auth
        // handler.
        if find_auth_required(&error).is_some() {
            self.update_state_internal(
                ServiceState::Waiting,
                HealthStatus::Unknown,
                Some(error.to_string()),
            );
            self.emit(
                EventReason::MCPServerAuthRequired,
                &format!(
                    "authentication required for MCP server {}",
                    self.definition.name
                ),
                EventSeverity::Warning,
            )
            .await;
            return Err(error);
        }

        if classify::is_configuration_error(&error) {
            warn!(
                "Configuration error starting MCP server {}: {}",
                self.definition.name, error
            );
            self.update_state_internal(
                ServiceState::Failed,
                HealthStatus::Unhealthy,
                Some(error.to_string()),
            );
            return Err(Error::configuration(error.to_string()));
        }

        if self.definition.is_remote() && classify::is_transient_error(&error) {
            let (failures, next_retry) = {
                let mut shared = self.shared.write().unwrap();
                shared.consecutive_failures += 1;
                let delay = backoff_delay(shared.consecutive_failures);
                let next = Utc::now()
                    + chrono::Duration::from_std(delay)
                        .unwrap_or_else(|_| chrono::Duration::minutes(30));
                shared.next_retry_after = Some(next);
                (shared.consecutive_failures, next)
            };
            debug!(
                "Transient failure {} for MCP server {}, next attempt at {}",
                failures, self.definition.name, next_retry
            );

            if failures >= UNREACHABLE_THRESHOLD {
                let message = format!(
                    "MCP server {} unreachable after {} consecutive failures: {}",
                    self.definition.name, failures, error
                );
                self.update_state_internal(
                    ServiceState::Unreachable,
                    HealthStatus::Unhealthy,
                    Some(message.clone()),
                );
                return Err(Error::unreachable(message));
            }

            self.update_state_internal(
                ServiceState::Failed,
                HealthStatus::Unhealthy,
                Some(error.to_string()),
            );
            return Err(error);
        }

        self.update_state_internal(
            ServiceState::Failed,
            HealthStatus::Unhealthy,
            Some(error.to_string()),
        );
        Err(error)
    }

    async fn stop_internal(&self) -> Result<()> {
        {
            let shared = self.shared.read().unwrap();
            if matches!(
                shared.state,
                ServiceState::Stopped | ServiceState::Disconnected | ServiceState::Stopping
            ) {
                return Ok(());
            }
        }

        self.update_state_internal(ServiceState::Stopping, HealthStatus::Unknown, None);

        let client = self.shared.write().unwrap().client.take();
        if let Some(client) = client {
            if let Err(e) = client.close().await {
                warn!(
                    "Error closing client for MCP server {}: {}",
                    self.definition.name, e
                );
            }
        }

        let state = if self.definition.is_remote() {
            ServiceState::Disconnected
        } else {
            ServiceState::Stopped
        };
        self.update_state_internal(state, HealthStatus::Unknown, None);
        // Stopped is reported even when the previous state was unexpected.
        self.emit(
            EventReason::MCPServerStopped,
            "MCP server stopped",
            EventSeverity::Normal,
        )
        .await;
        Ok(())
    }

    async fn restart_internal(&self) -> Result<()> {
        if self.state().is_live() {
            self.stop_internal().await?;
            smol::Timer::after(RESTART_GRACE_PERIOD).await;
        }
        self.start_internal().await
    }

    async fn check_health_internal(&self) -> Result<HealthStatus> {
        let client = self.shared.read().unwrap().client.clone();
        let result = match client {
            Some(client) => {
                with_timeout(self.definition.request_timeout(), client.ping()).await
            }
            None => Err(Error::unavailable(format!(
                "MCP server {} has no active client",
                self.definition.name
            ))),
        };

        match result {
            Ok(()) => {
                let state = self.state();
                self.update_state_internal(state, HealthStatus::Healthy, None);
                Ok(HealthStatus::Healthy)
            }
            Err(e) => {
                self.emit(
                    EventReason::MCPServerHealthCheckFailed,
                    &format!("health check failed: {e}"),
                    EventSeverity::Warning,
                )
                .await;
                let state = self.state();
                self.update_state_internal(state, HealthStatus::Unhealthy, Some(e.to_string()));
                Ok(HealthStatus::Unhealthy)
            }
        }
    }
}

#[async_trait]
impl Service for McpServerService {
    fn name(&self) -> &str {
        &self.definition.name
    }

    fn service_type(&self) -> &str {
        MCP_SERVER_SERVICE_TYPE
    }

    fn dependencies(&self) -> Vec<String> {
        vec![]
    }

    async fn start(&self) -> Result<()> {
        self.start_internal().await
    }

    async fn stop(&self) -> Result<()> {
        self.stop_internal().await
    }

    async fn restart(&self) -> Result<()> {
        self.restart_internal().await
    }

    fn state(&self) -> ServiceState {
        self.shared.read().unwrap().state
    }

    fn health(&self) -> HealthStatus {
        self.shared.read().unwrap().health
    }

    fn last_error(&self) -> Option<String> {
        self.shared.read().unwrap().last_error.clone()
    }

    fn set_state_callback(&self, callback: StateCallback) {
        *self.callback.lock().unwrap() = Some(callback);
    }

    fn health_checker(&self) -> Option<&dyn HealthChecker> {
        Some(self)
    }

    fn data_provider(&self) -> Option<&dyn ServiceDataProvider> {
        Some(self)
    }

    fn state_updater(&self) -> Option<&dyn StateUpdater> {
        Some(self)
    }
}

#[async_trait]
impl HealthChecker for McpServerService {
    async fn check_health(&self) -> Result<HealthStatus> {
        self.check_health_internal().await
    }

    fn health_check_interval(&self) -> Duration {
        self.health_interval
    }
}

impl ServiceDataProvider for McpServerService {
    fn service_data(&self) -> JsonObject {
        let shared = self.shared.read().unwrap();
        let mut data = JsonObject::new();
        data.insert(
            "transport".to_string(),
            json!(self.definition.transport.kind()),
        );
        data.insert(
            "consecutiveFailures".to_string(),
            json!(shared.consecutive_failures),
        );
        if let Some(at) = shared.last_attempt {
            data.insert("lastAttempt".to_string(), json!(at));
        }
        if let Some(at) = shared.next_retry_after {
            data.insert("nextRetryAfter".to_string(), json!(at));
        }
        data
    }
}

impl StateUpdater for McpServerService {
    fn update_state(&self, state: ServiceState, health: HealthStatus, error: Option<String>) {
        self.update_state_internal(state, health, error);
    }
}
