//! Instance persistence seam
//!
//! The orchestrator saves and restores dynamic-instance definitions through
//! this trait during startup and teardown. The storage layout is the
//! implementor's concern.

use crate::tool::JsonObject;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Persisted definition of a ServiceClass instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedInstance {
    /// Instance name
    pub name: String,
    /// ServiceClass the instance was created from
    pub service_class_name: String,
    /// Creation arguments
    #[serde(default)]
    pub args: JsonObject,
    /// Whether the definition should be materialized at startup
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Whether the restored instance should be started immediately
    #[serde(default)]
    pub auto_start: bool,
}

fn default_enabled() -> bool {
    true
}

/// Store for dynamic-instance definitions.
#[async_trait]
pub trait InstancePersistence: Send + Sync {
    /// Load every persisted definition.
    async fn load_definitions(&self) -> Result<Vec<PersistedInstance>>;

    /// Save (or overwrite) one definition.
    async fn save_definition(&self, def: &PersistedInstance) -> Result<()>;

    /// Delete a definition by name.
    async fn delete_definition(&self, name: &str) -> Result<()>;

    /// Fetch a definition by name.
    async fn get_definition(&self, name: &str) -> Result<Option<PersistedInstance>>;
}
