//! Integration tests for the orchestrator
//!
//! Create/delete flows, validation, event fan-out, persistence restore,
//! and the bounded reconnection machinery, all against stub collaborators.

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::*;
use corral_core::{
    Error, EventReason, HealthStatus, PersistedInstance, Service, ServiceState,
};
use corral_orchestration::{
    should_attempt_retry, CreateInstanceRequest, Orchestrator, OrchestratorOptions,
};
use corral_registry::ServiceRegistry;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    tools: Arc<StubToolCaller>,
    manager: Arc<StubClassManager>,
    sink: Arc<RecordingEventSink>,
    persistence: Arc<MemoryPersistence>,
    registry: Arc<ServiceRegistry>,
}

impl Harness {
    fn new() -> Self {
        Self {
            tools: StubToolCaller::new(),
            manager: StubClassManager::new(),
            sink: RecordingEventSink::new(),
            persistence: MemoryPersistence::new(),
            registry: Arc::new(ServiceRegistry::new()),
        }
    }

    fn orchestrator(&self) -> Orchestrator {
        self.orchestrator_with_options(OrchestratorOptions::default())
    }

    fn orchestrator_with_options(&self, options: OrchestratorOptions) -> Orchestrator {
        Orchestrator::builder()
            .with_registry(Arc::clone(&self.registry))
            .with_class_manager(self.manager.clone())
            .with_tool_caller(self.tools.clone())
            .with_events(self.sink.clone())
            .with_persistence(self.persistence.clone())
            .with_options(options)
            .build()
            .expect("orchestrator builds")
    }
}

fn request(name: &str, class: &str) -> CreateInstanceRequest {
    CreateInstanceRequest {
        name: name.to_string(),
        service_class_name: class.to_string(),
        args: args(json!({"param1": "x", "param2": "y"})),
    }
}

#[smol_potat::test]
async fn test_create_and_delete_instance() {
    init_test_logging();
    let harness = Harness::new();
    harness.manager.add_class(simple_class("svc"));
    let orchestrator = harness.orchestrator();

    let info = orchestrator
        .create_service_class_instance(request("db-1", "svc"))
        .await
        .unwrap();
    assert_eq!(info.name, "db-1");
    assert_eq!(info.state, ServiceState::Running);
    assert_eq!(info.health, HealthStatus::Healthy);

    // Registered after a successful start, visible through both surfaces.
    assert!(harness.registry.contains("db-1"));
    assert!(orchestrator.get_service_class_instance("db-1").is_some());
    assert_eq!(orchestrator.list_service_class_instances().len(), 1);
    assert!(harness.persistence.contains("db-1"));
    harness
        .sink
        .wait_for(EventReason::ServiceInstanceCreated, 1)
        .await;

    orchestrator.delete_service_class_instance("db-1").await.unwrap();
    assert!(!harness.registry.contains("db-1"));
    assert!(orchestrator.get_service_class_instance("db-1").is_none());
    assert!(!harness.persistence.contains("db-1"));
    assert_eq!(harness.tools.call_count("delete_tool"), 1);
    harness
        .sink
        .wait_for(EventReason::ServiceInstanceDeleted, 1)
        .await;
}

#[smol_potat::test]
async fn test_create_validation_errors() {
    let harness = Harness::new();
    harness.manager.add_class(simple_class("svc"));
    harness.manager.add_class(simple_class("broken"));
    harness.manager.mark_unavailable("broken");
    let orchestrator = harness.orchestrator();

    let result = orchestrator
        .create_service_class_instance(request("", "svc"))
        .await;
    assert!(matches!(result, Err(Error::InvalidArgument(_))));

    let result = orchestrator
        .create_service_class_instance(request("a", ""))
        .await;
    assert!(matches!(result, Err(Error::InvalidArgument(_))));

    let result = orchestrator
        .create_service_class_instance(request("a", "missing"))
        .await;
    assert!(matches!(result, Err(Error::NotFound(_))));

    let result = orchestrator
        .create_service_class_instance(request("a", "broken"))
        .await;
    assert!(matches!(result, Err(Error::Unavailable(_))));

    orchestrator
        .create_service_class_instance(request("a", "svc"))
        .await
        .unwrap();
    let result = orchestrator
        .create_service_class_instance(request("a", "svc"))
        .await;
    assert!(matches!(result, Err(Error::AlreadyExists(_))));
}

#[smol_potat::test]
async fn test_create_without_tool_caller_is_unavailable() {
    let harness = Harness::new();
    harness.manager.add_class(simple_class("svc"));
    let orchestrator = Orchestrator::builder()
        .with_class_manager(harness.manager.clone())
        .build()
        .unwrap();

    let result = orchestrator
        .create_service_class_instance(request("a", "svc"))
        .await;
    assert!(matches!(result, Err(Error::Unavailable(_))));
}

#[smol_potat::test]
async fn test_failed_start_leaves_no_zombie() {
    let harness = Harness::new();
    harness.manager.add_class(simple_class("svc"));
    harness
        .tools
        .respond_with("create_tool", json!({"success": false, "text": "no capacity"}));
    let orchestrator = harness.orchestrator();

    let result = orchestrator
        .create_service_class_instance(request("db-1", "svc"))
        .await;
    assert!(result.is_err());

    // A failed start never reaches the registry, and the instance map is
    // cleaned up on the way out.
    assert!(!harness.registry.contains("db-1"));
    assert!(orchestrator.list_service_class_instances().is_empty());
}

#[smol_potat::test]
async fn test_class_outputs_are_resolved_after_start() {
    let harness = Harness::new();
    let mut class = simple_class("svc");
    class.outputs = args(json!({"endpoint": "http://{{ .host }}:{{ .start.port }}"}));
    class.lifecycle_tools.start.outputs =
        std::collections::HashMap::from([("port".to_string(), "port".to_string())]);
    harness.manager.add_class(class);
    harness
        .tools
        .respond_with("create_tool", json!({"success": true, "port": 5432}));
    let orchestrator = harness.orchestrator();

    let mut req = request("db-1", "svc");
    req.args = args(json!({"param1": "x", "param2": "y", "host": "db.local"}));
    let info = orchestrator.create_service_class_instance(req).await.unwrap();

    assert_eq!(
        info.outputs.get("endpoint"),
        Some(&json!("http://db.local:5432"))
    );
}

#[smol_potat::test]
async fn test_subscribers_observe_lifecycle_transitions() {
    let harness = Harness::new();
    harness.manager.add_class(simple_class("svc"));
    let orchestrator = harness.orchestrator();

    let state_rx = orchestrator.subscribe_to_state_changes();
    let instance_rx = orchestrator.subscribe_to_service_instance_events();

    orchestrator
        .create_service_class_instance(request("db-1", "svc"))
        .await
        .unwrap();

    // The two transitions are published from independent tasks, so their
    // relative order is not guaranteed; collect both and assert set-wise.
    let mut states = Vec::new();
    for _ in 0..2 {
        let event = corral_core::time::with_timeout(Duration::from_secs(5), async {
            state_rx.recv().await.map_err(|e| Error::other(e.to_string()))
        })
        .await
        .expect("state event before timeout");
        assert_eq!(event.name, "db-1");
        states.push((event.old_state, event.new_state));
    }
    assert!(states.contains(&(ServiceState::Unknown, ServiceState::Starting)));
    assert!(states.contains(&(ServiceState::Starting, ServiceState::Running)));

    let event = corral_core::time::with_timeout(Duration::from_secs(5), async {
        instance_rx.recv().await.map_err(|e| Error::other(e.to_string()))
    })
    .await
    .expect("instance event before timeout");
    assert_eq!(event.name, "db-1");
}

#[smol_potat::test]
async fn test_slow_subscriber_drops_without_blocking_others() {
    let harness = Harness::new();
    harness.manager.add_class(simple_class("svc"));
    let orchestrator = Arc::new(harness.orchestrator());

    // One subscriber drains continuously; the other never reads.
    let active_rx = orchestrator.subscribe_to_state_changes();
    let stalled_rx = orchestrator.subscribe_to_state_changes();

    let drained = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&drained);
    let drain_task = smol::spawn(async move {
        while active_rx.recv().await.is_ok() {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    orchestrator
        .create_service_class_instance(request("db-1", "svc"))
        .await
        .unwrap();

    // 60 stop/start cycles produce 240 transitions, well past the stalled
    // subscriber's capacity of 100.
    for _ in 0..60 {
        orchestrator.stop_service("db-1").await.unwrap();
        orchestrator.start_service("db-1").await.unwrap();
    }

    // Wait for the detached callback tasks to settle.
    let mut last = 0;
    loop {
        smol::Timer::after(Duration::from_millis(200)).await;
        let now = drained.load(Ordering::SeqCst);
        if now == last {
            break;
        }
        last = now;
    }

    assert_eq!(stalled_rx.len(), 100, "stalled channel capped at capacity");
    assert!(
        drained.load(Ordering::SeqCst) > 100,
        "active subscriber kept receiving past the stalled one's cap"
    );
    drop(drain_task);
}

#[smol_potat::test]
async fn test_retry_targets_only_eligible_services() {
    let harness = Harness::new();
    let orchestrator = harness.orchestrator();

    let past = Utc::now() - ChronoDuration::minutes(1);
    let failed = FlakyService::failed("failed-svc", past);
    let running = FlakyService::new(
        "running-svc",
        ServiceState::Running,
        args(json!({"nextRetryAfter": past})),
    );
    let not_due = FlakyService::failed("not-due-svc", Utc::now() + ChronoDuration::minutes(5));
    let no_data = FlakyService::new("no-data-svc", ServiceState::Failed, args(json!({})));

    harness.registry.register(failed.clone()).unwrap();
    harness.registry.register(running.clone()).unwrap();
    harness.registry.register(not_due.clone()).unwrap();
    harness.registry.register(no_data.clone()).unwrap();

    let attempts = orchestrator.reconnect_failed_services().await;

    assert_eq!(attempts, 1);
    assert_eq!(failed.restart_count(), 1);
    assert_eq!(running.restart_count(), 0);
    assert_eq!(not_due.restart_count(), 0);
    assert_eq!(no_data.restart_count(), 0);

    harness
        .sink
        .wait_for(EventReason::MCPServerRecoverySucceeded, 1)
        .await;
}

#[smol_potat::test]
async fn test_should_attempt_retry_contract() {
    let past = Utc::now() - ChronoDuration::seconds(30);
    let failed: Arc<dyn Service> = FlakyService::failed("a", past);
    assert!(should_attempt_retry(&failed, Utc::now()));

    let unparseable: Arc<dyn Service> = FlakyService::new(
        "b",
        ServiceState::Failed,
        args(json!({"nextRetryAfter": "not-a-timestamp"})),
    );
    assert!(!should_attempt_retry(&unparseable, Utc::now()));

    let unreachable: Arc<dyn Service> =
        FlakyService::new("c", ServiceState::Unreachable, args(json!({"nextRetryAfter": past})));
    assert!(should_attempt_retry(&unreachable, Utc::now()));
}

#[smol_potat::test]
async fn test_retry_concurrency_is_bounded() {
    init_test_logging();
    let harness = Harness::new();
    let orchestrator = harness.orchestrator_with_options(OrchestratorOptions {
        max_concurrent_retries: 3,
        ..OrchestratorOptions::default()
    });

    let past = Utc::now() - ChronoDuration::minutes(1);
    let services: Vec<_> = (0..8)
        .map(|i| {
            FlakyService::with_restart_delay(
                &format!("flaky-{i}"),
                past,
                Duration::from_millis(50),
            )
        })
        .collect();
    for service in &services {
        harness.registry.register(service.clone()).unwrap();
    }

    let attempts = orchestrator.reconnect_failed_services().await;

    assert_eq!(attempts, 8);
    for service in &services {
        assert_eq!(service.restart_count(), 1);
        assert!(
            service.max_concurrent_restarts() <= 3,
            "restart of {} observed {} concurrent attempts",
            service.name(),
            service.max_concurrent_restarts()
        );
    }
}

#[smol_potat::test]
async fn test_start_restores_persisted_instances() {
    let harness = Harness::new();
    harness.manager.add_class(simple_class("svc"));

    harness.persistence.insert(PersistedInstance {
        name: "restored".to_string(),
        service_class_name: "svc".to_string(),
        args: args(json!({"param1": "x", "param2": "y"})),
        enabled: true,
        auto_start: true,
    });
    harness.persistence.insert(PersistedInstance {
        name: "parked".to_string(),
        service_class_name: "svc".to_string(),
        args: args(json!({"param1": "x", "param2": "y"})),
        enabled: true,
        auto_start: false,
    });
    harness.persistence.insert(PersistedInstance {
        name: "disabled".to_string(),
        service_class_name: "svc".to_string(),
        args: args(json!({"param1": "x", "param2": "y"})),
        enabled: false,
        auto_start: true,
    });

    let orchestrator = harness.orchestrator();
    orchestrator.start().await.unwrap();

    let restored = orchestrator
        .get_service_class_instance("restored")
        .expect("auto-start instance restored");
    assert_eq!(restored.state, ServiceState::Running);

    let parked = orchestrator
        .get_service_class_instance("parked")
        .expect("non-auto-start instance materialized");
    assert_eq!(parked.state, ServiceState::Unknown);
    assert!(harness.registry.contains("parked"));

    assert!(orchestrator.get_service_class_instance("disabled").is_none());

    orchestrator.stop().await.unwrap();
}

#[smol_potat::test]
async fn test_start_processes_bootstrap_requests() {
    let harness = Harness::new();
    harness.manager.add_class(simple_class("svc"));

    let orchestrator = harness.orchestrator_with_options(OrchestratorOptions {
        bootstrap: vec![request("auto-1", "svc"), request("broken", "missing-class")],
        ..OrchestratorOptions::default()
    });

    // A failing bootstrap entry is logged, never fatal.
    orchestrator.start().await.unwrap();

    assert_eq!(
        orchestrator
            .get_service_class_instance("auto-1")
            .unwrap()
            .state,
        ServiceState::Running
    );
    assert!(orchestrator.get_service_class_instance("broken").is_none());

    orchestrator.stop().await.unwrap();
}

#[smol_potat::test]
async fn test_stop_stops_dynamic_instances() {
    let harness = Harness::new();
    harness.manager.add_class(simple_class("svc"));
    let orchestrator = harness.orchestrator();
    orchestrator.start().await.unwrap();

    orchestrator
        .create_service_class_instance(request("a", "svc"))
        .await
        .unwrap();
    orchestrator
        .create_service_class_instance(request("b", "svc"))
        .await
        .unwrap();

    orchestrator.stop().await.unwrap();

    for name in ["a", "b"] {
        let info = orchestrator.get_service_class_instance(name).unwrap();
        assert_eq!(info.state, ServiceState::Stopped);
    }
}

#[smol_potat::test]
async fn test_service_operations_require_registration() {
    let harness = Harness::new();
    let orchestrator = harness.orchestrator();

    assert!(matches!(
        orchestrator.start_service("ghost").await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        orchestrator.stop_service("ghost").await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        orchestrator.restart_service("ghost").await,
        Err(Error::NotFound(_))
    ));
}

#[smol_potat::test]
async fn test_start_launches_static_services() {
    let harness = Harness::new();
    let service = FlakyService::new("static-svc", ServiceState::Stopped, args(json!({})));
    harness.registry.register(service.clone()).unwrap();

    let orchestrator = harness.orchestrator();
    orchestrator.start().await.unwrap();

    assert_eq!(service.state(), ServiceState::Running);
    orchestrator.stop().await.unwrap();
}
