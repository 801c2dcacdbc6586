//! ServiceClass definition model
//!
//! A ServiceClass bundles the lifecycle tool invocations, health policy, and
//! validation metadata from which the orchestrator materializes generic
//! service instances. Definitions are externally supplied (config layer,
//! API); this module only models them.

use crate::tool::JsonObject;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Declarative definition of a class of services.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceClass {
    /// Unique class name
    pub name: String,

    /// Type tag stamped onto instances of this class
    pub service_type: String,

    /// Template for a default instance name (e.g. `"{{ .name }}-db"`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_name: Option<String>,

    /// Dependencies copied onto each instance at construction
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Class-level output templates resolved after a successful start
    #[serde(default)]
    pub outputs: JsonObject,

    /// Lifecycle tool invocations
    pub lifecycle_tools: LifecycleTools,

    /// Health-check policy
    #[serde(default)]
    pub health_check: HealthCheckConfig,
}

/// The set of tool invocations driving a class's lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleTools {
    /// Tool invoked to start an instance
    pub start: LifecycleTool,

    /// Tool invoked to stop an instance
    pub stop: LifecycleTool,

    /// Optional dedicated restart tool; without one, restart falls back to
    /// stop followed by start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart: Option<LifecycleTool>,

    /// Optional health-check tool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheckTool>,
}

/// A single lifecycle tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleTool {
    /// Name of the tool to call
    pub tool: String,

    /// Argument template rendered against the instance's template context
    #[serde(default)]
    pub args_template: JsonObject,

    /// Output extraction spec: output name → JSON path into the response
    #[serde(default)]
    pub outputs: HashMap<String, String>,
}

/// Health-check tool invocation with its expectation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckTool {
    /// Name of the tool to call
    pub tool: String,

    /// Argument template rendered against the instance's template context
    #[serde(default)]
    pub args_template: JsonObject,

    /// Expectation evaluated against the tool response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expectation: Option<HealthCheckExpectation>,
}

/// Health-check scheduling and threshold policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckConfig {
    /// Whether health checks run at all
    pub enabled: bool,

    /// Seconds between checks
    pub interval: u64,

    /// Consecutive failures before the instance is Unhealthy
    pub failure_threshold: u32,

    /// Consecutive successes before the instance is Healthy
    pub success_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: 30,
            failure_threshold: 3,
            success_threshold: 1,
        }
    }
}

/// Expected shape of a healthy tool response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckExpectation {
    /// When `Some(false)`, the tool is expected to fail; a successful call
    /// is then unhealthy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,

    /// JSON path → expected value pairs, compared as strings
    #[serde(default)]
    pub json_path: HashMap<String, serde_json::Value>,
}
