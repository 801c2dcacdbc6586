//! Central orchestrator
//!
//! Owns the service registry and the dynamic-instance map, materializes
//! ServiceClass instances on request, fans state-change and instance events
//! out to subscribers, and runs the periodic reconnection and health loops.

use crate::instance::{GenericServiceInstance, ServiceInstanceInfo};
use crate::retry::{self, RetryContext};
use chrono::Utc;
use corral_core::{
    emit_event, DotTemplate, Error, EventReason, EventSeverity, EventSink, InstancePersistence,
    JsonObject, NullEventSink, ObjectRef, PersistedInstance, Result, Service, ServiceClass,
    ServiceClassManager, ServiceInstanceEvent, ServiceStateChangedEvent, StateCallback,
    StateChange, TemplateEngine, ToolCaller,
};
use corral_registry::ServiceRegistry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smol::lock::Semaphore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Capacity of every subscriber channel. A subscriber that falls this far
/// behind starts losing events rather than stalling delivery to others.
pub const SUBSCRIBER_CHANNEL_CAPACITY: usize = 100;

/// Request to materialize a ServiceClass instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInstanceRequest {
    /// Instance name, unique across the registry and instance map
    pub name: String,
    /// ServiceClass to instantiate
    pub service_class_name: String,
    /// Creation arguments validated against the class
    #[serde(default)]
    pub args: JsonObject,
}

/// Tunable orchestrator behavior.
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Tick interval of the reconnection loop
    pub retry_interval: Duration,
    /// Upper bound on simultaneously running reconnection attempts
    pub max_concurrent_retries: usize,
    /// Tick interval of the health monitor loop
    pub health_check_interval: Duration,
    /// Auto-start instance requests processed during `start`, derived by
    /// the host from its server definitions
    pub bootstrap: Vec<CreateInstanceRequest>,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(30),
            max_concurrent_retries: 5,
            health_check_interval: Duration::from_secs(10),
            bootstrap: Vec::new(),
        }
    }
}

/// Central service orchestrator.
pub struct Orchestrator {
    registry: Arc<ServiceRegistry>,
    class_manager: Arc<dyn ServiceClassManager>,
    template: Arc<dyn TemplateEngine>,
    events: Arc<dyn EventSink>,
    tool_caller: Option<Arc<dyn ToolCaller>>,
    persistence: Option<Arc<dyn InstancePersistence>>,
    options: OrchestratorOptions,
    instances: RwLock<HashMap<String, Arc<GenericServiceInstance>>>,
    state_subscribers: Arc<RwLock<Vec<async_channel::Sender<ServiceStateChangedEvent>>>>,
    instance_subscribers: Arc<RwLock<Vec<async_channel::Sender<ServiceInstanceEvent>>>>,
    retry_semaphore: Arc<Semaphore>,
    running: Arc<AtomicBool>,
    shutdown_tx: async_channel::Sender<()>,
    shutdown_rx: async_channel::Receiver<()>,
    background: Mutex<Vec<smol::Task<()>>>,
}

impl Orchestrator {
    /// Create an orchestrator builder.
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// Service registry this orchestrator owns.
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Start the orchestrator.
    ///
    /// Snapshots the statically registered services, installs the
    /// state-change callback on each, and starts them concurrently. Then
    /// creates the bootstrap instances and restores persisted definitions;
    /// failures in those two phases are logged but never fail startup.
    /// Finally launches the reconnection and health loops.
    pub async fn start(&self) -> Result<()> {
        info!("Starting orchestrator");
        self.running.store(true, Ordering::SeqCst);

        let services = self.registry.get_all();
        let callback = self.state_callback();
        let mut tasks = Vec::with_capacity(services.len());
        for service in services {
            service.set_state_callback(Arc::clone(&callback));
            tasks.push(smol::spawn(async move {
                if let Err(e) = service.start().await {
                    warn!("Failed to start service {}: {}", service.name(), e);
                }
            }));
        }
        futures::future::join_all(tasks).await;

        for request in self.options.bootstrap.clone() {
            if let Err(e) = self.create_instance_inner(request.clone(), true, false).await {
                warn!("Failed to create bootstrap instance {}: {}", request.name, e);
            }
        }

        if let Some(persistence) = &self.persistence {
            match persistence.load_definitions().await {
                Ok(definitions) => {
                    for def in definitions.into_iter().filter(|d| d.enabled) {
                        let request = CreateInstanceRequest {
                            name: def.name.clone(),
                            service_class_name: def.service_class_name.clone(),
                            args: def.args.clone(),
                        };
                        if let Err(e) = self
                            .create_instance_inner(request, def.auto_start, false)
                            .await
                        {
                            warn!("Failed to restore persisted instance {}: {}", def.name, e);
                        }
                    }
                }
                Err(e) => warn!("Failed to load persisted instances: {}", e),
            }
        }

        let mut background = self.background.lock().unwrap();
        background.push(smol::spawn(retry::retry_loop(
            self.retry_context(),
            self.options.retry_interval,
            self.shutdown_rx.clone(),
        )));
        background.push(smol::spawn(health_loop(
            Arc::clone(&self.registry),
            self.options.health_check_interval,
            self.shutdown_rx.clone(),
        )));
        Ok(())
    }

    /// Stop the orchestrator.
    ///
    /// Cancels the background loops (waiting for in-flight reconnection
    /// attempts), then stops every dynamic instance concurrently.
    pub async fn stop(&self) -> Result<()> {
        info!("Stopping orchestrator");
        self.running.store(false, Ordering::SeqCst);
        self.shutdown_tx.close();

        let background: Vec<_> = self.background.lock().unwrap().drain(..).collect();
        for task in background {
            task.await;
        }

        let instances: Vec<_> = self.instances.read().unwrap().values().cloned().collect();
        let stops: Vec<_> = instances
            .into_iter()
            .map(|instance| {
                smol::spawn(async move {
                    if let Err(e) = instance.stop().await {
                        warn!("Failed to stop instance {}: {}", instance.name(), e);
                    }
                })
            })
            .collect();
        futures::future::join_all(stops).await;

        info!("Orchestrator stopped");
        Ok(())
    }

    /// Create and start a ServiceClass instance.
    pub async fn create_service_class_instance(
        &self,
        request: CreateInstanceRequest,
    ) -> Result<ServiceInstanceInfo> {
        self.create_instance_inner(request, true, true).await
    }

    async fn create_instance_inner(
        &self,
        request: CreateInstanceRequest,
        start: bool,
        persist: bool,
    ) -> Result<ServiceInstanceInfo> {
        if request.name.trim().is_empty() {
            return Err(Error::invalid_argument("instance name cannot be empty"));
        }
        if request.service_class_name.trim().is_empty() {
            return Err(Error::invalid_argument("serviceClassName cannot be empty"));
        }
        let Some(tool_caller) = self.tool_caller.clone() else {
            return Err(Error::unavailable("no tool caller registered"));
        };

        let class = self
            .class_manager
            .get_service_class(&request.service_class_name)
            .await?;
        if !self
            .class_manager
            .is_service_class_available(&request.service_class_name)
            .await
        {
            return Err(Error::unavailable(format!(
                "service class {} is missing required tools",
                request.service_class_name
            )));
        }
        self.class_manager
            .validate_service_args(&request.service_class_name, &request.args)
            .await?;

        {
            let instances = self.instances.read().unwrap();
            if instances.contains_key(&request.name) || self.registry.contains(&request.name) {
                return Err(Error::already_exists(format!(
                    "service instance {} already exists",
                    request.name
                )));
            }
        }

        let instance = Arc::new(
            GenericServiceInstance::new(
                request.name.clone(),
                request.service_class_name.clone(),
                request.args.clone(),
                tool_caller,
                Arc::clone(&self.class_manager),
                Arc::clone(&self.template),
                Arc::clone(&self.events),
            )
            .await?,
        );
        instance.set_state_callback(self.state_callback());

        {
            let mut instances = self.instances.write().unwrap();
            if instances.contains_key(&request.name) {
                return Err(Error::already_exists(format!(
                    "service instance {} already exists",
                    request.name
                )));
            }
            instances.insert(request.name.clone(), Arc::clone(&instance));
        }

        // Start outside the lock. A failed start removes the instance from
        // the map before the registry ever saw it, so no zombie remains.
        if start {
            if let Err(e) = instance.start().await {
                self.instances.write().unwrap().remove(&request.name);
                return Err(e);
            }
        }

        if let Err(e) = self
            .registry
            .register(Arc::clone(&instance) as Arc<dyn Service>)
        {
            self.instances.write().unwrap().remove(&request.name);
            if start {
                if let Err(stop_err) = instance.stop().await {
                    debug!(
                        "Failed to stop instance {} after registry rejection: {}",
                        request.name, stop_err
                    );
                }
            }
            return Err(e);
        }

        if start && !class.outputs.is_empty() {
            match self.resolve_class_outputs(&class, &instance) {
                Ok(outputs) => instance.set_outputs(outputs),
                Err(e) => warn!(
                    "Failed to resolve outputs for instance {}: {}",
                    request.name, e
                ),
            }
        }

        emit_event(
            self.events.as_ref(),
            &ObjectRef::service_instance(&request.name),
            EventReason::ServiceInstanceCreated,
            &format!("created from service class {}", request.service_class_name),
            EventSeverity::Normal,
        )
        .await;

        if persist {
            if let Some(persistence) = &self.persistence {
                let def = PersistedInstance {
                    name: request.name.clone(),
                    service_class_name: request.service_class_name.clone(),
                    args: request.args.clone(),
                    enabled: true,
                    auto_start: true,
                };
                if let Err(e) = persistence.save_definition(&def).await {
                    warn!("Failed to persist instance {}: {}", request.name, e);
                }
            }
        }

        Ok(instance.info())
    }

    /// Class-level outputs render against the creation args at the root
    /// plus a `start` sub-map seeded from the post-start service data.
    fn resolve_class_outputs(
        &self,
        class: &ServiceClass,
        instance: &GenericServiceInstance,
    ) -> Result<JsonObject> {
        let mut context = JsonObject::new();
        for (key, value) in instance.creation_args() {
            context.insert(key.clone(), value.clone());
        }
        let data = instance
            .data_provider()
            .map(|p| p.service_data())
            .unwrap_or_default();
        context.insert("start".to_string(), Value::Object(data));

        let rendered = self
            .template
            .replace(&Value::Object(class.outputs.clone()), &Value::Object(context))?;
        match rendered {
            Value::Object(map) => Ok(map),
            _ => Err(Error::template("outputs template did not render to a map")),
        }
    }

    /// Stop, unregister, and delete a ServiceClass instance.
    ///
    /// Stop and persistence failures are logged and swallowed; deletion
    /// proceeds regardless.
    pub async fn delete_service_class_instance(&self, name: &str) -> Result<()> {
        let instance = {
            self.instances.read().unwrap().get(name).cloned()
        }
        .ok_or_else(|| Error::not_found(format!("service instance {name} not found")))?;

        if let Err(e) = instance.stop().await {
            warn!("Failed to stop instance {} during delete: {}", name, e);
        }
        if let Err(e) = self.registry.unregister(name) {
            debug!("Failed to unregister instance {}: {}", name, e);
        }
        self.instances.write().unwrap().remove(name);

        if let Some(persistence) = &self.persistence {
            if let Err(e) = persistence.delete_definition(name).await {
                if !e.is_not_found() {
                    warn!("Failed to delete persisted definition {}: {}", name, e);
                }
            }
        }

        emit_event(
            self.events.as_ref(),
            &ObjectRef::service_instance(name),
            EventReason::ServiceInstanceDeleted,
            "service instance deleted",
            EventSeverity::Normal,
        )
        .await;
        Ok(())
    }

    /// Snapshot one instance.
    pub fn get_service_class_instance(&self, name: &str) -> Option<ServiceInstanceInfo> {
        self.instances
            .read()
            .unwrap()
            .get(name)
            .map(|instance| instance.info())
    }

    /// Snapshot every instance.
    pub fn list_service_class_instances(&self) -> Vec<ServiceInstanceInfo> {
        self.instances
            .read()
            .unwrap()
            .values()
            .map(|instance| instance.info())
            .collect()
    }

    /// Start a registered service by name.
    pub async fn start_service(&self, name: &str) -> Result<()> {
        let service = self
            .registry
            .get(name)
            .ok_or_else(|| Error::not_found(format!("service {name} not found")))?;
        service.start().await
    }

    /// Stop a registered service by name.
    pub async fn stop_service(&self, name: &str) -> Result<()> {
        let service = self
            .registry
            .get(name)
            .ok_or_else(|| Error::not_found(format!("service {name} not found")))?;
        service.stop().await
    }

    /// Restart a registered service by name.
    pub async fn restart_service(&self, name: &str) -> Result<()> {
        let service = self
            .registry
            .get(name)
            .ok_or_else(|| Error::not_found(format!("service {name} not found")))?;
        service.restart().await
    }

    /// Subscribe to state-change events over a bounded channel.
    pub fn subscribe_to_state_changes(&self) -> async_channel::Receiver<ServiceStateChangedEvent> {
        let (tx, rx) = async_channel::bounded(SUBSCRIBER_CHANNEL_CAPACITY);
        self.state_subscribers.write().unwrap().push(tx);
        rx
    }

    /// Subscribe to instance lifecycle events over a bounded channel.
    pub fn subscribe_to_service_instance_events(
        &self,
    ) -> async_channel::Receiver<ServiceInstanceEvent> {
        let (tx, rx) = async_channel::bounded(SUBSCRIBER_CHANNEL_CAPACITY);
        self.instance_subscribers.write().unwrap().push(tx);
        rx
    }

    /// Scan the registry once and restart every eligible failed service,
    /// waiting for the batch to finish. Returns the number of attempts.
    pub async fn reconnect_failed_services(&self) -> usize {
        let tasks = retry::spawn_retry_tasks(&self.retry_context());
        let count = tasks.len();
        futures::future::join_all(tasks).await;
        count
    }

    fn retry_context(&self) -> RetryContext {
        RetryContext {
            registry: Arc::clone(&self.registry),
            events: Arc::clone(&self.events),
            semaphore: Arc::clone(&self.retry_semaphore),
            running: Arc::clone(&self.running),
        }
    }

    /// Callback installed on every managed service. It captures only the
    /// subscriber lists, so services hold no back-reference to the
    /// orchestrator and publishing never blocks.
    fn state_callback(&self) -> StateCallback {
        let state_subscribers = Arc::clone(&self.state_subscribers);
        let instance_subscribers = Arc::clone(&self.instance_subscribers);
        Arc::new(move |change: StateChange| {
            let now = Utc::now();
            publish(
                &state_subscribers,
                ServiceStateChangedEvent {
                    name: change.name.clone(),
                    service_type: change.service_type.clone(),
                    old_state: change.old_state,
                    new_state: change.new_state,
                    health: change.new_health,
                    error: change.error.clone(),
                    timestamp_unix: now.timestamp(),
                },
            );
            publish(
                &instance_subscribers,
                ServiceInstanceEvent {
                    name: change.name,
                    service_type: change.service_type,
                    old_state: change.old_state,
                    new_state: change.new_state,
                    old_health: change.old_health,
                    new_health: change.new_health,
                    error: change.error,
                    timestamp: now,
                    metadata: JsonObject::new(),
                },
            );
        })
    }
}

/// Copy-then-send fan-out: the subscriber slice is cloned under the read
/// lock, then each send happens non-blockingly outside it. A full or closed
/// channel just loses that event for that subscriber.
fn publish<T: Clone>(subscribers: &RwLock<Vec<async_channel::Sender<T>>>, event: T) {
    let senders = subscribers.read().unwrap().clone();
    for sender in senders {
        match sender.try_send(event.clone()) {
            Ok(()) => {}
            Err(async_channel::TrySendError::Full(_)) => {
                debug!("Dropping event for slow subscriber");
            }
            Err(async_channel::TrySendError::Closed(_)) => {
                debug!("Dropping event for closed subscriber");
            }
        }
    }
}

/// Periodic health monitor: invokes `check_health` on every registered
/// service exposing the capability once its per-service interval elapses.
async fn health_loop(
    registry: Arc<ServiceRegistry>,
    tick: Duration,
    shutdown: async_channel::Receiver<()>,
) {
    let mut next_due: HashMap<String, Instant> = HashMap::new();
    loop {
        let stop = async {
            let _ = shutdown.recv().await;
            false
        };
        let tick_elapsed = async {
            smol::Timer::after(tick).await;
            true
        };
        if !smol::future::or(stop, tick_elapsed).await {
            break;
        }

        let now = Instant::now();
        for service in registry.get_all() {
            let Some(interval) = service
                .health_checker()
                .map(|checker| checker.health_check_interval())
            else {
                continue;
            };
            let name = service.name().to_string();
            if next_due.get(&name).is_some_and(|due| now < *due) {
                continue;
            }
            next_due.insert(name.clone(), now + interval);

            if let Some(checker) = service.health_checker() {
                if let Err(e) = checker.check_health().await {
                    debug!("Health check error for {}: {}", name, e);
                }
            }
        }
        next_due.retain(|name, _| registry.contains(name));
    }
    debug!("Health monitor stopped");
}

/// Builder assembling an [`Orchestrator`] from its collaborators.
pub struct OrchestratorBuilder {
    registry: Option<Arc<ServiceRegistry>>,
    class_manager: Option<Arc<dyn ServiceClassManager>>,
    template: Option<Arc<dyn TemplateEngine>>,
    events: Option<Arc<dyn EventSink>>,
    tool_caller: Option<Arc<dyn ToolCaller>>,
    persistence: Option<Arc<dyn InstancePersistence>>,
    options: OrchestratorOptions,
}

impl OrchestratorBuilder {
    fn new() -> Self {
        Self {
            registry: None,
            class_manager: None,
            template: None,
            events: None,
            tool_caller: None,
            persistence: None,
            options: OrchestratorOptions::default(),
        }
    }

    /// Use an existing registry (one is created otherwise).
    pub fn with_registry(mut self, registry: Arc<ServiceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// ServiceClass manager (required).
    pub fn with_class_manager(mut self, manager: Arc<dyn ServiceClassManager>) -> Self {
        self.class_manager = Some(manager);
        self
    }

    /// Template engine; defaults to [`DotTemplate`].
    pub fn with_template(mut self, template: Arc<dyn TemplateEngine>) -> Self {
        self.template = Some(template);
        self
    }

    /// Event sink; defaults to [`NullEventSink`].
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    /// Tool caller used by dynamic instances.
    pub fn with_tool_caller(mut self, tool_caller: Arc<dyn ToolCaller>) -> Self {
        self.tool_caller = Some(tool_caller);
        self
    }

    /// Instance persistence store.
    pub fn with_persistence(mut self, persistence: Arc<dyn InstancePersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Override the default options.
    pub fn with_options(mut self, options: OrchestratorOptions) -> Self {
        self.options = options;
        self
    }

    /// Build the orchestrator.
    pub fn build(self) -> Result<Orchestrator> {
        let class_manager = self
            .class_manager
            .ok_or_else(|| Error::unavailable("no service class manager registered"))?;
        let (shutdown_tx, shutdown_rx) = async_channel::bounded(1);
        let max_retries = self.options.max_concurrent_retries.max(1);

        Ok(Orchestrator {
            registry: self.registry.unwrap_or_else(|| Arc::new(ServiceRegistry::new())),
            class_manager,
            template: self.template.unwrap_or_else(|| Arc::new(DotTemplate::new())),
            events: self.events.unwrap_or_else(|| Arc::new(NullEventSink)),
            tool_caller: self.tool_caller,
            persistence: self.persistence,
            retry_semaphore: Arc::new(Semaphore::new(max_retries)),
            options: self.options,
            instances: RwLock::new(HashMap::new()),
            state_subscribers: Arc::new(RwLock::new(Vec::new())),
            instance_subscribers: Arc::new(RwLock::new(Vec::new())),
            running: Arc::new(AtomicBool::new(true)),
            shutdown_tx,
            shutdown_rx,
            background: Mutex::new(Vec::new()),
        })
    }
}
