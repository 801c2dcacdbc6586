//! Shared stub collaborators for orchestration integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use corral_core::{
    Error, EventReason, EventSeverity, EventSink, HealthStatus, InstancePersistence, JsonObject,
    ObjectRef, PersistedInstance, Result, Service, ServiceClass, ServiceClassManager,
    ServiceDataProvider, ServiceState, StateCallback,
};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Install a test-writer subscriber so tracing output shows up when a
/// test runs with `--nocapture`.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Convert a JSON literal into the object map used for args and responses.
pub fn args(value: Value) -> JsonObject {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected a JSON object literal"),
    }
}

#[derive(Debug, Clone)]
enum StubResponse {
    Ok(Value),
    Err(String),
}

/// One recorded tool invocation.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub tool: String,
    pub args: JsonObject,
}

/// Programmable tool caller that records every invocation.
///
/// Responses can be sticky per tool (`respond_with`) or queued one-shots
/// (`queue_response`) that take precedence. Tools without a programmed
/// response return `{"success": true}`.
pub struct StubToolCaller {
    sticky: Mutex<HashMap<String, StubResponse>>,
    queued: Mutex<HashMap<String, VecDeque<StubResponse>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl StubToolCaller {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sticky: Mutex::new(HashMap::new()),
            queued: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn respond_with(&self, tool: &str, response: Value) {
        self.sticky
            .lock()
            .unwrap()
            .insert(tool.to_string(), StubResponse::Ok(response));
    }

    pub fn fail_with(&self, tool: &str, message: &str) {
        self.sticky
            .lock()
            .unwrap()
            .insert(tool.to_string(), StubResponse::Err(message.to_string()));
    }

    pub fn queue_response(&self, tool: &str, response: Value) {
        self.queued
            .lock()
            .unwrap()
            .entry(tool.to_string())
            .or_default()
            .push_back(StubResponse::Ok(response));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, tool: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.tool == tool)
            .count()
    }
}

#[async_trait]
impl corral_core::ToolCaller for StubToolCaller {
    async fn call_tool(&self, name: &str, call_args: JsonObject) -> Result<JsonObject> {
        self.calls.lock().unwrap().push(RecordedCall {
            tool: name.to_string(),
            args: call_args,
        });

        let response = self
            .queued
            .lock()
            .unwrap()
            .get_mut(name)
            .and_then(VecDeque::pop_front)
            .or_else(|| self.sticky.lock().unwrap().get(name).cloned());

        match response {
            Some(StubResponse::Ok(value)) => match value {
                Value::Object(map) => Ok(map),
                other => panic!("stub response for {name} must be an object, got {other}"),
            },
            Some(StubResponse::Err(message)) => Err(Error::other(message)),
            None => Ok(args(json!({"success": true}))),
        }
    }
}

/// In-memory ServiceClass store.
pub struct StubClassManager {
    classes: Mutex<HashMap<String, ServiceClass>>,
    unavailable: Mutex<HashSet<String>>,
}

impl StubClassManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            classes: Mutex::new(HashMap::new()),
            unavailable: Mutex::new(HashSet::new()),
        })
    }

    pub fn add_class(&self, class: ServiceClass) {
        self.classes.lock().unwrap().insert(class.name.clone(), class);
    }

    /// Mark a class as present but missing its required tools.
    pub fn mark_unavailable(&self, name: &str) {
        self.unavailable.lock().unwrap().insert(name.to_string());
    }
}

#[async_trait]
impl ServiceClassManager for StubClassManager {
    async fn get_service_class(&self, name: &str) -> Result<ServiceClass> {
        self.classes
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("service class {name} not found")))
    }

    async fn is_service_class_available(&self, name: &str) -> bool {
        self.classes.lock().unwrap().contains_key(name)
            && !self.unavailable.lock().unwrap().contains(name)
    }

    async fn validate_service_args(&self, _name: &str, _args: &JsonObject) -> Result<()> {
        Ok(())
    }
}

/// One recorded sink event.
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub object: ObjectRef,
    pub reason: EventReason,
    pub message: String,
    pub severity: EventSeverity,
}

/// Event sink that records everything for assertions.
pub struct RecordingEventSink {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, reason: EventReason) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| event.reason == reason)
            .count()
    }

    pub fn messages(&self, reason: EventReason) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| event.reason == reason)
            .map(|event| event.message.clone())
            .collect()
    }

    /// Wait until at least `count` events with the reason were recorded.
    /// Some emissions happen on detached tasks, so assertions poll.
    pub async fn wait_for(&self, reason: EventReason, count: usize) {
        for _ in 0..200 {
            if self.count(reason) >= count {
                return;
            }
            smol::Timer::after(Duration::from_millis(10)).await;
        }
        panic!(
            "timed out waiting for {count} {reason} events (saw {})",
            self.count(reason)
        );
    }
}

#[async_trait]
impl EventSink for RecordingEventSink {
    async fn create_event(
        &self,
        object: &ObjectRef,
        reason: EventReason,
        message: &str,
        severity: EventSeverity,
    ) -> Result<()> {
        self.events.lock().unwrap().push(RecordedEvent {
            object: object.clone(),
            reason,
            message: message.to_string(),
            severity,
        });
        Ok(())
    }
}

/// In-memory instance persistence.
pub struct MemoryPersistence {
    definitions: Mutex<HashMap<String, PersistedInstance>>,
}

impl MemoryPersistence {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            definitions: Mutex::new(HashMap::new()),
        })
    }

    pub fn insert(&self, def: PersistedInstance) {
        self.definitions
            .lock()
            .unwrap()
            .insert(def.name.clone(), def);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.definitions.lock().unwrap().contains_key(name)
    }
}

#[async_trait]
impl InstancePersistence for MemoryPersistence {
    async fn load_definitions(&self) -> Result<Vec<PersistedInstance>> {
        Ok(self.definitions.lock().unwrap().values().cloned().collect())
    }

    async fn save_definition(&self, def: &PersistedInstance) -> Result<()> {
        self.insert(def.clone());
        Ok(())
    }

    async fn delete_definition(&self, name: &str) -> Result<()> {
        self.definitions
            .lock()
            .unwrap()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("definition {name} not found")))
    }

    async fn get_definition(&self, name: &str) -> Result<Option<PersistedInstance>> {
        Ok(self.definitions.lock().unwrap().get(name).cloned())
    }
}

/// Hand-rolled service used for retry-loop tests: a fixed state, a fixed
/// service-data payload, and a restart that records its own concurrency.
pub struct FlakyService {
    name: String,
    state: Mutex<ServiceState>,
    data: Mutex<JsonObject>,
    restart_delay: Duration,
    restarts: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl FlakyService {
    pub fn new(name: &str, state: ServiceState, data: JsonObject) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            state: Mutex::new(state),
            data: Mutex::new(data),
            restart_delay: Duration::from_millis(0),
            restarts: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        })
    }

    pub fn failed(name: &str, next_retry_after: DateTime<Utc>) -> Arc<Self> {
        Self::new(
            name,
            ServiceState::Failed,
            args(json!({"nextRetryAfter": next_retry_after})),
        )
    }

    pub fn with_restart_delay(
        name: &str,
        next_retry_after: DateTime<Utc>,
        delay: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            state: Mutex::new(ServiceState::Failed),
            data: Mutex::new(args(json!({"nextRetryAfter": next_retry_after}))),
            restart_delay: delay,
            restarts: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        })
    }

    pub fn restart_count(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_restarts(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Service for FlakyService {
    fn name(&self) -> &str {
        &self.name
    }

    fn service_type(&self) -> &str {
        "flaky"
    }

    fn dependencies(&self) -> Vec<String> {
        vec![]
    }

    async fn start(&self) -> Result<()> {
        *self.state.lock().unwrap() = ServiceState::Running;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        *self.state.lock().unwrap() = ServiceState::Stopped;
        Ok(())
    }

    async fn restart(&self) -> Result<()> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        if self.restart_delay > Duration::ZERO {
            smol::Timer::after(self.restart_delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.restarts.fetch_add(1, Ordering::SeqCst);
        *self.state.lock().unwrap() = ServiceState::Running;
        Ok(())
    }

    fn state(&self) -> ServiceState {
        *self.state.lock().unwrap()
    }

    fn health(&self) -> HealthStatus {
        HealthStatus::Unknown
    }

    fn last_error(&self) -> Option<String> {
        None
    }

    fn set_state_callback(&self, _callback: StateCallback) {}

    fn data_provider(&self) -> Option<&dyn ServiceDataProvider> {
        Some(self)
    }
}

impl ServiceDataProvider for FlakyService {
    fn service_data(&self) -> JsonObject {
        self.data.lock().unwrap().clone()
    }
}

/// ServiceClass used across the suites: a start tool that renders two
/// creation args and extracts two outputs, plus a stop tool.
pub fn simple_class(name: &str) -> ServiceClass {
    serde_json::from_value(json!({
        "name": name,
        "serviceType": "test-service",
        "lifecycleTools": {
            "start": {
                "tool": "create_tool",
                "argsTemplate": {"name": "{{ .param1 }}", "type": "{{ .param2 }}"},
                "outputs": {"name": "name", "status": "status"}
            },
            "stop": {"tool": "delete_tool"}
        }
    }))
    .expect("valid test class")
}

/// Same shape as [`simple_class`] with a health-check tool and thresholds.
pub fn health_checked_class(
    name: &str,
    failure_threshold: u32,
    success_threshold: u32,
) -> ServiceClass {
    serde_json::from_value(json!({
        "name": name,
        "serviceType": "test-service",
        "lifecycleTools": {
            "start": {"tool": "create_tool"},
            "stop": {"tool": "delete_tool"},
            "healthCheck": {
                "tool": "ping_tool",
                "expectation": {"jsonPath": {"status": "ok"}}
            }
        },
        "healthCheck": {
            "enabled": true,
            "interval": 1,
            "failureThreshold": failure_threshold,
            "successThreshold": success_threshold
        }
    }))
    .expect("valid test class")
}
