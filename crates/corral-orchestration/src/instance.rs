//! ServiceClass-driven service instances
//!
//! A [`GenericServiceInstance`] materializes a ServiceClass definition:
//! every lifecycle operation resolves the class's tool spec, renders the
//! argument template against the instance's context, invokes the tool
//! caller, and folds extracted outputs back into the instance's service
//! data. Health is derived from consecutive check outcomes against the
//! class's thresholds.

use crate::response;
use chrono::{DateTime, Utc};
use corral_core::time::with_timeout;
use corral_core::{
    emit_event, Error, EventReason, EventSeverity, EventSink, HealthChecker, HealthStatus,
    JsonObject, LifecycleTool, ObjectRef, Result, Service, ServiceClassManager,
    ServiceDataProvider, ServiceState, StateCallback, StateChange, TemplateEngine, ToolCaller,
};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Upper bound on a single lifecycle tool call.
pub const TOOL_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Settle delay between stop and start when restarting a class that has no
/// dedicated restart tool, allowing external resources to wind down.
pub const RESTART_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Snapshot DTO returned by the orchestrator's instance queries.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInstanceInfo {
    /// Instance name
    pub name: String,
    /// ServiceClass the instance was created from
    pub service_class_name: String,
    /// Type tag stamped from the class
    pub service_type: String,
    /// Current lifecycle state
    pub state: ServiceState,
    /// Current health
    pub health: HealthStatus,
    /// Most recent error, if any
    pub last_error: Option<String>,
    /// Dependencies frozen from the class at construction
    pub dependencies: Vec<String>,
    /// Accumulated tool outputs
    pub service_data: JsonObject,
    /// Resolved class-level outputs
    pub outputs: JsonObject,
    /// Consecutive failed health checks
    pub health_check_failures: u32,
    /// Consecutive successful health checks
    pub health_check_successes: u32,
    /// When the instance was constructed
    pub created_at: DateTime<Utc>,
    /// When the instance last changed
    pub updated_at: DateTime<Utc>,
    /// When health was last checked
    pub last_checked: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifecyclePhase {
    Start,
    Stop,
    Restart,
}

impl LifecyclePhase {
    fn as_str(self) -> &'static str {
        match self {
            LifecyclePhase::Start => "start",
            LifecyclePhase::Stop => "stop",
            LifecyclePhase::Restart => "restart",
        }
    }

    fn success_target(self) -> (ServiceState, HealthStatus) {
        match self {
            LifecyclePhase::Start | LifecyclePhase::Restart => {
                (ServiceState::Running, HealthStatus::Healthy)
            }
            LifecyclePhase::Stop => (ServiceState::Stopped, HealthStatus::Unknown),
        }
    }
}

struct InstanceShared {
    state: ServiceState,
    health: HealthStatus,
    last_error: Option<String>,
    service_data: JsonObject,
    outputs: JsonObject,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_checked: Option<DateTime<Utc>>,
    health_check_failures: u32,
    health_check_successes: u32,
    // Set while the instance is climbing back from Unhealthy, so recovery
    // is reported even though the climb passes through Checking.
    was_unhealthy: bool,
}

/// A running materialization of a ServiceClass.
///
/// Owned exclusively by the orchestrator. Mutable fields live behind the
/// instance lock; the lock is never held across an await, and event
/// emission captures everything it needs before the lock is released.
pub struct GenericServiceInstance {
    name: String,
    id: Uuid,
    service_class_name: String,
    service_type: String,
    creation_args: JsonObject,
    dependencies: Vec<String>,
    health_interval: Duration,
    tool_caller: Arc<dyn ToolCaller>,
    class_manager: Arc<dyn ServiceClassManager>,
    template: Arc<dyn TemplateEngine>,
    events: Arc<dyn EventSink>,
    shared: RwLock<InstanceShared>,
    callback: Mutex<Option<StateCallback>>,
}

impl GenericServiceInstance {
    /// Construct an instance of the named ServiceClass.
    ///
    /// Fails with `NotFound` if the class does not exist. Dependencies and
    /// the type tag are frozen from the class; `creation_args` are immutable
    /// after construction.
    pub async fn new(
        name: impl Into<String>,
        service_class_name: impl Into<String>,
        creation_args: JsonObject,
        tool_caller: Arc<dyn ToolCaller>,
        class_manager: Arc<dyn ServiceClassManager>,
        template: Arc<dyn TemplateEngine>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let name = name.into();
        let service_class_name = service_class_name.into();
        if name.trim().is_empty() {
            return Err(Error::invalid_argument("instance name cannot be empty"));
        }

        let class = class_manager.get_service_class(&service_class_name).await?;
        let now = Utc::now();

        Ok(Self {
            name,
            id: Uuid::new_v4(),
            service_class_name,
            service_type: class.service_type,
            creation_args,
            dependencies: class.dependencies,
            health_interval: Duration::from_secs(class.health_check.interval),
            tool_caller,
            class_manager,
            template,
            events,
            shared: RwLock::new(InstanceShared {
                state: ServiceState::Unknown,
                health: HealthStatus::Unknown,
                last_error: None,
                service_data: JsonObject::new(),
                outputs: JsonObject::new(),
                created_at: now,
                updated_at: now,
                last_checked: None,
                health_check_failures: 0,
                health_check_successes: 0,
                was_unhealthy: false,
            }),
            callback: Mutex::new(None),
        })
    }

    /// ServiceClass this instance was created from.
    pub fn service_class_name(&self) -> &str {
        &self.service_class_name
    }

    /// Creation arguments bound at construction.
    pub fn creation_args(&self) -> &JsonObject {
        &self.creation_args
    }

    /// Store the resolved class-level outputs.
    pub fn set_outputs(&self, outputs: JsonObject) {
        self.shared.write().unwrap().outputs = outputs;
    }

    /// Snapshot the instance for queries.
    pub fn info(&self) -> ServiceInstanceInfo {
        let shared = self.shared.read().unwrap();
        ServiceInstanceInfo {
            name: self.name.clone(),
            service_class_name: self.service_class_name.clone(),
            service_type: self.service_type.clone(),
            state: shared.state,
            health: shared.health,
            last_error: shared.last_error.clone(),
            dependencies: self.dependencies.clone(),
            service_data: shared.service_data.clone(),
            outputs: shared.outputs.clone(),
            health_check_failures: shared.health_check_failures,
            health_check_successes: shared.health_check_successes,
            created_at: shared.created_at,
            updated_at: shared.updated_at,
            last_checked: shared.last_checked,
        }
    }

    async fn emit(&self, reason: EventReason, message: &str, severity: EventSeverity) {
        emit_event(
            self.events.as_ref(),
            &ObjectRef::service_instance(&self.name),
            reason,
            message,
            severity,
        )
        .await;
    }

    /// Apply a state transition and schedule the off-lock emissions.
    ///
    /// The callback and the sink events run in fresh tasks with everything
    /// they need captured while the lock was held; no emission path may
    /// re-enter the instance lock.
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
            let mut now = Utc::now();
            if now <= shared.updated_at {
                now = shared.updated_at + chrono::Duration::microseconds(1);
            }
            shared.updated_at = now;
            StateChange {
                name: self.name.clone(),
                service_type: self.service_type.clone(),
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

        let events = Arc::clone(&self.events);
        let object = ObjectRef::service_instance(&self.name);
        smol::spawn(async move {
            let message = format!(
                "state changed from {:?} to {:?}",
                change.old_state, change.new_state
            );
            emit_event(
                events.as_ref(),
                &object,
                EventReason::ServiceInstanceStateChanged,
                &message,
                EventSeverity::Normal,
            )
            .await;

            if change.new_state == ServiceState::Failed && change.old_state != ServiceState::Failed
            {
                let message = change
                    .error
                    .unwrap_or_else(|| "service instance failed".to_string());
                emit_event(
                    events.as_ref(),
                    &object,
                    EventReason::ServiceInstanceFailed,
                    &message,
                    EventSeverity::Warning,
                )
                .await;
            }
        })
        .detach();
    }

    /// Template context for lifecycle and health-check tools.
    ///
    /// Creation args are placed both at the root (for short templates like
    /// `{{ .name }}`) and under `args` (for disambiguation), so class
    /// templates remain valid either way.
    fn template_context(&self, service_data: &JsonObject) -> Value {
        let mut context = JsonObject::new();
        for (key, value) in &self.creation_args {
            context.insert(key.clone(), value.clone());
        }
        context.insert("name".to_string(), json!(self.name));
        context.insert(
            "serviceClassName".to_string(),
            json!(self.service_class_name),
        );
        context.insert("args".to_string(), Value::Object(self.creation_args.clone()));
        context.insert(
            "service".to_string(),
            json!({
                "id": self.id.to_string(),
                "name": self.name,
                "metadata": Value::Object(service_data.clone()),
            }),
        );
        context.insert("start".to_string(), Value::Object(service_data.clone()));
        context.insert("stop".to_string(), json!({}));
        context.insert("restart".to_string(), json!({}));
        Value::Object(context)
    }

    async fn fail_tool_execution(&self, message: String) -> Error {
        self.emit(
            EventReason::ServiceInstanceToolExecutionFailed,
            &message,
            EventSeverity::Warning,
        )
        .await;
        self.update_state_internal(
            ServiceState::Failed,
            HealthStatus::Unhealthy,
            Some(message.clone()),
        );
        Error::tool_execution(message)
    }

    async fn execute_lifecycle_tool(
        &self,
        phase: LifecyclePhase,
        tool: &LifecycleTool,
    ) -> Result<()> {
        let context = {
            let shared = self.shared.read().unwrap();
            self.template_context(&shared.service_data)
        };

        let rendered = match self
            .template
            .replace(&Value::Object(tool.args_template.clone()), &context)
        {
            Ok(rendered) => rendered,
            Err(e) => {
                let message = format!("failed to render arguments for tool {}: {e}", tool.tool);
                let _ = self.fail_tool_execution(message.clone()).await;
                return Err(Error::template(message));
            }
        };
        let Value::Object(args) = rendered else {
            let message = format!("arguments template for tool {} did not render to a map", tool.tool);
            let _ = self.fail_tool_execution(message.clone()).await;
            return Err(Error::template(message));
        };

        debug!(
            "Calling {} tool {} for instance {}",
            phase.as_str(),
            tool.tool,
            self.name
        );
        self.emit(
            EventReason::ServiceInstanceToolExecutionStarted,
            &format!("calling tool {}", tool.tool),
            EventSeverity::Normal,
        )
        .await;

        let response = match with_timeout(
            TOOL_CALL_TIMEOUT,
            self.tool_caller.call_tool(&tool.tool, args),
        )
        .await
        {
            Ok(response) => response,
            Err(e) => {
                let message = format!("{} tool failed: {e}", phase.as_str());
                return Err(self.fail_tool_execution(message).await);
            }
        };

        if let Some(extracted) = response::process_tool_outputs(&response, &tool.outputs) {
            let mut shared = self.shared.write().unwrap();
            for (key, value) in extracted {
                shared.service_data.insert(key, value);
            }
        }

        // An explicit success=false marks a logical failure even though the
        // call itself returned.
        if response.get("success").and_then(Value::as_bool) == Some(false) {
            let detail = response
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or("tool reported failure");
            let message = format!("{} tool failed: {detail}", phase.as_str());
            return Err(self.fail_tool_execution(message).await);
        }

        let (state, health) = phase.success_target();
        self.update_state_internal(state, health, None);
        self.emit(
            EventReason::ServiceInstanceToolExecutionCompleted,
            &format!("tool {} completed", tool.tool),
            EventSeverity::Normal,
        )
        .await;
        Ok(())
    }

    async fn start_internal(&self) -> Result<()> {
        {
            let shared = self.shared.read().unwrap();
            if matches!(
                shared.state,
                ServiceState::Running | ServiceState::Starting
            ) {
                return Ok(());
            }
        }

        self.update_state_internal(ServiceState::Starting, HealthStatus::Checking, None);
        self.emit(
            EventReason::ServiceInstanceStarting,
            "starting service instance",
            EventSeverity::Normal,
        )
        .await;

        let tool = match self
            .class_manager
            .get_start_tool(&self.service_class_name)
            .await
        {
            Ok(tool) => tool,
            Err(e) => {
                let message = format!("failed to resolve start tool: {e}");
                self.update_state_internal(
                    ServiceState::Failed,
                    HealthStatus::Unhealthy,
                    Some(message.clone()),
                );
                return Err(Error::unavailable(message));
            }
        };

        self.execute_lifecycle_tool(LifecyclePhase::Start, &tool)
            .await?;
        self.emit(
            EventReason::ServiceInstanceStarted,
            "service instance started",
            EventSeverity::Normal,
        )
        .await;
        Ok(())
    }

    async fn stop_internal(&self) -> Result<()> {
        {
            let shared = self.shared.read().unwrap();
            if matches!(shared.state, ServiceState::Stopped | ServiceState::Stopping) {
                return Ok(());
            }
        }

        self.update_state_internal(ServiceState::Stopping, HealthStatus::Unknown, None);
        self.emit(
            EventReason::ServiceInstanceStopping,
            "stopping service instance",
            EventSeverity::Normal,
        )
        .await;

        let tool = match self
            .class_manager
            .get_stop_tool(&self.service_class_name)
            .await
        {
            Ok(tool) => tool,
            Err(e) => {
                let message = format!("failed to resolve stop tool: {e}");
                self.update_state_internal(
                    ServiceState::Failed,
                    HealthStatus::Unhealthy,
                    Some(message.clone()),
                );
                return Err(Error::unavailable(message));
            }
        };

        self.execute_lifecycle_tool(LifecyclePhase::Stop, &tool)
            .await?;
        self.emit(
            EventReason::ServiceInstanceStopped,
            "service instance stopped",
            EventSeverity::Normal,
        )
        .await;
        Ok(())
    }

    async fn restart_internal(&self) -> Result<()> {
        {
            let shared = self.shared.read().unwrap();
            if matches!(shared.state, ServiceState::Starting | ServiceState::Stopping) {
                return Err(Error::invalid_argument(format!(
                    "cannot restart instance {} while {:?}",
                    self.name, shared.state
                )));
            }
        }

        let started = std::time::Instant::now();
        self.emit(
            EventReason::ServiceInstanceRestarting,
            "restarting service instance",
            EventSeverity::Normal,
        )
        .await;

        match self
            .class_manager
            .get_restart_tool(&self.service_class_name)
            .await?
        {
            Some(tool) => {
                self.update_state_internal(ServiceState::Starting, HealthStatus::Checking, None);
                self.execute_lifecycle_tool(LifecyclePhase::Restart, &tool)
                    .await?;
            }
            None => {
                self.stop_internal().await?;
                smol::Timer::after(RESTART_SETTLE_DELAY).await;
                self.start_internal().await?;
            }
        }

        self.emit(
            EventReason::ServiceInstanceRestarted,
            &format!(
                "service instance restarted in {}ms",
                started.elapsed().as_millis()
            ),
            EventSeverity::Normal,
        )
        .await;
        Ok(())
    }

    async fn check_health_internal(&self) -> Result<HealthStatus> {
        let config = self
            .class_manager
            .get_health_check_config(&self.service_class_name)
            .await?;
        if !config.enabled {
            return Ok(self.health());
        }
        let Some(tool) = self
            .class_manager
            .get_health_check_tool(&self.service_class_name)
            .await?
        else {
            return Ok(self.health());
        };

        let context = {
            let shared = self.shared.read().unwrap();
            self.template_context(&shared.service_data)
        };
        let rendered = self
            .template
            .replace(&Value::Object(tool.args_template.clone()), &context)?;
        let Value::Object(args) = rendered else {
            return Err(Error::template(format!(
                "arguments template for tool {} did not render to a map",
                tool.tool
            )));
        };

        let mut check_error = None;
        let healthy = match with_timeout(
            TOOL_CALL_TIMEOUT,
            self.tool_caller.call_tool(&tool.tool, args),
        )
        .await
        {
            Ok(resp) => response::evaluate_health_expectation(&resp, tool.expectation.as_ref()),
            Err(e) => {
                check_error = Some(e.to_string());
                false
            }
        };

        // A success and a failure reset each other's counter; the two are
        // never simultaneously positive.
        let (old_health, new_health, failures, last_error, recovered) = {
            let mut shared = self.shared.write().unwrap();
            if healthy {
                shared.health_check_successes += 1;
                shared.health_check_failures = 0;
            } else {
                shared.health_check_failures += 1;
                shared.health_check_successes = 0;
            }
            let new_health = if shared.health_check_failures >= config.failure_threshold {
                HealthStatus::Unhealthy
            } else if shared.health_check_successes >= config.success_threshold {
                HealthStatus::Healthy
            } else {
                HealthStatus::Checking
            };
            if new_health == HealthStatus::Unhealthy {
                shared.was_unhealthy = true;
            }
            let recovered = new_health == HealthStatus::Healthy && shared.was_unhealthy;
            if recovered {
                shared.was_unhealthy = false;
            }
            shared.last_checked = Some(Utc::now());
            (
                shared.health,
                new_health,
                shared.health_check_failures,
                shared.last_error.clone(),
                recovered,
            )
        };

        if !healthy {
            let detail = check_error.unwrap_or_else(|| "expectation not met".to_string());
            self.emit(
                EventReason::ServiceInstanceHealthCheckFailed,
                &format!("health check failed ({failures} consecutive): {detail}"),
                EventSeverity::Warning,
            )
            .await;
        }

        if new_health != old_health {
            let state = self.state();
            self.update_state_internal(state, new_health, last_error);
            match new_health {
                HealthStatus::Healthy => {
                    self.emit(
                        EventReason::ServiceInstanceHealthy,
                        "service instance is healthy",
                        EventSeverity::Normal,
                    )
                    .await;
                    if recovered {
                        self.emit(
                            EventReason::ServiceInstanceHealthCheckRecovered,
                            "service instance recovered",
                            EventSeverity::Normal,
                        )
                        .await;
                    }
                }
                HealthStatus::Unhealthy => {
                    self.emit(
                        EventReason::ServiceInstanceUnhealthy,
                        "service instance is unhealthy",
                        EventSeverity::Warning,
                    )
                    .await;
                }
                HealthStatus::Unknown | HealthStatus::Checking => {}
            }
        }

        Ok(new_health)
    }
}

#[async_trait]
impl Service for GenericServiceInstance {
    fn name(&self) -> &str {
        &self.name
    }

    fn service_type(&self) -> &str {
        &self.service_type
    }

    fn dependencies(&self) -> Vec<String> {
        self.dependencies.clone()
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
}

#[async_trait]
impl HealthChecker for GenericServiceInstance {
    async fn check_health(&self) -> Result<HealthStatus> {
        self.check_health_internal().await
    }

    fn health_check_interval(&self) -> Duration {
        self.health_interval
    }
}

impl ServiceDataProvider for GenericServiceInstance {
    fn service_data(&self) -> JsonObject {
        self.shared.read().unwrap().service_data.clone()
    }
}

impl std::fmt::Debug for GenericServiceInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.shared.read().unwrap();
        f.debug_struct("GenericServiceInstance")
            .field("name", &self.name)
            .field("service_class_name", &self.service_class_name)
            .field("state", &shared.state)
            .field("health", &shared.health)
            .finish_non_exhaustive()
    }
}
