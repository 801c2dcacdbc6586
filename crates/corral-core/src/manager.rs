//! ServiceClass manager seam
//!
//! The orchestrator consumes ServiceClass definitions through this trait;
//! storage and config-layer concerns live with the implementor. The tool
//! and policy lookups have default implementations derived from
//! [`get_service_class`](ServiceClassManager::get_service_class), so a
//! minimal implementor only supplies the class store and arg validation.

use crate::class::{HealthCheckConfig, HealthCheckTool, LifecycleTool, ServiceClass};
use crate::tool::JsonObject;
use crate::Result;
use async_trait::async_trait;

/// Source of ServiceClass definitions and their lifecycle-tool metadata.
#[async_trait]
pub trait ServiceClassManager: Send + Sync {
    /// Fetch a ServiceClass by name.
    async fn get_service_class(&self, name: &str) -> Result<ServiceClass>;

    /// Whether the class exists and all of its required tools are available.
    async fn is_service_class_available(&self, name: &str) -> bool;

    /// Validate creation arguments against the class's requirements.
    async fn validate_service_args(&self, name: &str, args: &JsonObject) -> Result<()>;

    /// Start tool for the class.
    async fn get_start_tool(&self, name: &str) -> Result<LifecycleTool> {
        Ok(self.get_service_class(name).await?.lifecycle_tools.start)
    }

    /// Stop tool for the class.
    async fn get_stop_tool(&self, name: &str) -> Result<LifecycleTool> {
        Ok(self.get_service_class(name).await?.lifecycle_tools.stop)
    }

    /// Restart tool for the class, if one is defined.
    async fn get_restart_tool(&self, name: &str) -> Result<Option<LifecycleTool>> {
        Ok(self.get_service_class(name).await?.lifecycle_tools.restart)
    }

    /// Health-check tool for the class, if one is defined.
    async fn get_health_check_tool(&self, name: &str) -> Result<Option<HealthCheckTool>> {
        Ok(self
            .get_service_class(name)
            .await?
            .lifecycle_tools
            .health_check)
    }

    /// Health-check scheduling and threshold policy for the class.
    async fn get_health_check_config(&self, name: &str) -> Result<HealthCheckConfig> {
        Ok(self.get_service_class(name).await?.health_check)
    }

    /// Dependencies declared by the class.
    async fn get_service_dependencies(&self, name: &str) -> Result<Vec<String>> {
        Ok(self.get_service_class(name).await?.dependencies)
    }
}
