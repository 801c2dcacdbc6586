//! # Corral core
//!
//! Shared service model for the corral orchestration workspace.
//!
//! This crate defines the polymorphic [`Service`] trait with its optional
//! capability facets, the [`ServiceClass`] definition model, the collaborator
//! seams the orchestrator consumes ([`ToolCaller`], [`ServiceClassManager`],
//! [`EventSink`], [`InstancePersistence`], [`TemplateEngine`]), and the error
//! taxonomy shared by every corral crate.
//!
//! Concrete services live elsewhere: `corral-orchestration` provides the
//! ServiceClass-driven generic instance and the orchestrator itself, while
//! `corral-mcp` provides the MCP-server service.

#![warn(missing_docs)]
#![warn(unsafe_code)]

mod class;
mod error;
mod events;
mod manager;
mod persist;
mod service;
mod state;
mod template;
mod tool;

pub mod time;

pub use class::{
    HealthCheckConfig, HealthCheckExpectation, HealthCheckTool, LifecycleTool, LifecycleTools,
    ServiceClass,
};
pub use error::{AuthRequiredError, Error, OAuthInfo, Result, find_auth_required};
pub use events::{
    EventReason, EventSeverity, EventSink, NullEventSink, ObjectRef, ServiceInstanceEvent,
    ServiceStateChangedEvent, emit_event,
};
pub use manager::ServiceClassManager;
pub use persist::{InstancePersistence, PersistedInstance};
pub use service::{
    HealthChecker, Service, ServiceDataProvider, StateCallback, StateChange, StateUpdater,
};
pub use state::{HealthStatus, ServiceState};
pub use template::{DotTemplate, TemplateEngine};
pub use tool::{JsonObject, ToolCaller, ToolResult};
