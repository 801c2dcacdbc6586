//! # Orchestration
//!
//! ServiceClass-driven service lifecycles for corral.
//!
//! This crate provides the two halves of the orchestration core:
//!
//! - [`GenericServiceInstance`], the state machine materialized from a
//!   ServiceClass definition: lifecycle operations are performed by rendering
//!   argument templates and invoking tools through the host's
//!   [`ToolCaller`](corral_core::ToolCaller), with outputs extracted back
//!   into per-instance service data and health derived from configurable
//!   success/failure thresholds.
//! - [`Orchestrator`], which owns the service registry and the dynamic
//!   instance map, creates and deletes instances, fans state-change and
//!   instance events out to bounded subscriber channels, and runs the
//!   periodic reconnection loop for failed services under a concurrency cap.
//!
//! ## Example
//!
//! ```rust,no_run
//! use corral_orchestration::{CreateInstanceRequest, Orchestrator};
//! use std::sync::Arc;
//!
//! # async fn example(
//! #     class_manager: Arc<dyn corral_core::ServiceClassManager>,
//! #     tool_caller: Arc<dyn corral_core::ToolCaller>,
//! # ) -> corral_core::Result<()> {
//! let orchestrator = Orchestrator::builder()
//!     .with_class_manager(class_manager)
//!     .with_tool_caller(tool_caller)
//!     .build()?;
//!
//! orchestrator.start().await?;
//! orchestrator
//!     .create_service_class_instance(CreateInstanceRequest {
//!         name: "db-primary".to_string(),
//!         service_class_name: "postgres".to_string(),
//!         args: Default::default(),
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unsafe_code)]

mod instance;
mod orchestrator;
mod response;
mod retry;

pub use instance::{
    GenericServiceInstance, RESTART_SETTLE_DELAY, ServiceInstanceInfo, TOOL_CALL_TIMEOUT,
};
pub use orchestrator::{
    CreateInstanceRequest, Orchestrator, OrchestratorBuilder, OrchestratorOptions,
    SUBSCRIBER_CHANNEL_CAPACITY,
};
pub use response::{evaluate_health_expectation, extract_from_response, process_tool_outputs};
pub use retry::should_attempt_retry;
