//! Reconnection of failed services
//!
//! The orchestrator periodically scans the registry for services that have
//! failed or become unreachable and whose next-retry deadline has elapsed,
//! then restarts them under a bounded concurrency cap. The backoff schedule
//! itself is owned by the services (they publish `nextRetryAfter` through
//! their service data); this module only honors it.

use chrono::{DateTime, Utc};
use corral_core::{
    emit_event, EventReason, EventSeverity, EventSink, HealthStatus, ObjectRef, Service,
    ServiceState,
};
use corral_registry::ServiceRegistry;
use smol::lock::Semaphore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Shared handles the retry machinery needs, detached from the orchestrator
/// so the loop task holds no back-reference.
pub(crate) struct RetryContext {
    pub registry: Arc<ServiceRegistry>,
    pub events: Arc<dyn EventSink>,
    pub semaphore: Arc<Semaphore>,
    pub running: Arc<AtomicBool>,
}

/// Whether a service is currently eligible for a reconnection attempt.
///
/// Eligible means: the state is `Failed` or `Unreachable`, the service
/// exposes the `ServiceDataProvider` capability, its data carries a
/// parseable `nextRetryAfter` timestamp, and that deadline has elapsed.
pub fn should_attempt_retry(service: &Arc<dyn Service>, now: DateTime<Utc>) -> bool {
    if !service.state().is_retryable() {
        return false;
    }
    let Some(provider) = service.data_provider() else {
        return false;
    };
    let data = provider.service_data();
    let Some(value) = data.get("nextRetryAfter") else {
        return false;
    };
    let Ok(next_retry) = serde_json::from_value::<DateTime<Utc>>(value.clone()) else {
        return false;
    };
    now >= next_retry
}

/// Scan the registry once and dispatch a restart task for every eligible
/// service. Concurrency is bounded by the context's semaphore; the returned
/// tasks let the caller wait for the whole batch.
pub(crate) fn spawn_retry_tasks(ctx: &RetryContext) -> Vec<smol::Task<()>> {
    let now = Utc::now();
    let mut tasks = Vec::new();

    for service in ctx.registry.get_all() {
        if !should_attempt_retry(&service, now) {
            continue;
        }

        let semaphore = Arc::clone(&ctx.semaphore);
        let running = Arc::clone(&ctx.running);
        let events = Arc::clone(&ctx.events);
        tasks.push(smol::spawn(async move {
            let _permit = semaphore.acquire_arc().await;
            // Shutdown may have been requested while queued for a permit.
            if !running.load(Ordering::SeqCst) {
                return;
            }

            let name = service.name().to_string();
            let object = ObjectRef {
                kind: service.service_type().to_string(),
                name: name.clone(),
                namespace: "default".to_string(),
            };
            info!("Attempting recovery of failed service: {}", name);
            if let Some(updater) = service.state_updater() {
                updater.update_state(ServiceState::Retrying, HealthStatus::Checking, None);
            }
            emit_event(
                events.as_ref(),
                &object,
                EventReason::MCPServerRecoveryStarted,
                "attempting reconnection",
                EventSeverity::Normal,
            )
            .await;

            match service.restart().await {
                Ok(()) => {
                    info!("Recovered failed service: {}", name);
                    emit_event(
                        events.as_ref(),
                        &object,
                        EventReason::MCPServerRecoverySucceeded,
                        "service reconnected",
                        EventSeverity::Normal,
                    )
                    .await;
                }
                Err(e) => {
                    debug!("Recovery attempt for {} failed: {}", name, e);
                    emit_event(
                        events.as_ref(),
                        &object,
                        EventReason::MCPServerRecoveryFailed,
                        &format!("reconnection failed: {e}"),
                        EventSeverity::Warning,
                    )
                    .await;
                }
            }
        }));
    }

    tasks
}

/// Periodic retry loop; runs until the shutdown channel closes. Each tick
/// waits for its batch of retry tasks, so a caller awaiting this loop's
/// task after shutdown has also waited for every in-flight restart.
pub(crate) async fn retry_loop(
    ctx: RetryContext,
    interval: Duration,
    shutdown: async_channel::Receiver<()>,
) {
    loop {
        let stop = async {
            let _ = shutdown.recv().await;
            false
        };
        let tick = async {
            smol::Timer::after(interval).await;
            true
        };
        if !smol::future::or(stop, tick).await {
            break;
        }

        let tasks = spawn_retry_tasks(&ctx);
        if !tasks.is_empty() {
            debug!("Dispatched {} reconnection attempts", tasks.len());
        }
        futures::future::join_all(tasks).await;
    }
    debug!("Retry loop stopped");
}
