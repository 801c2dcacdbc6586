//! Core registry implementation

use corral_core::{Error, Result, Service};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::info;

/// Thread-safe mapping from service name to service.
///
/// All operations are safe under concurrent callers. Listing operations
/// snapshot the current membership, so concurrent mutation never invalidates
/// an iteration already handed out.
pub struct ServiceRegistry {
    services: RwLock<HashMap<String, Arc<dyn Service>>>,
}

impl ServiceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
        }
    }

    /// Register a service under its own name.
    ///
    /// Fails with `InvalidArgument` if the name is empty and with
    /// `AlreadyExists` if the name is taken. Insertion is atomic with the
    /// duplicate check.
    pub fn register(&self, service: Arc<dyn Service>) -> Result<()> {
        let name = service.name().to_string();
        if name.trim().is_empty() {
            return Err(Error::invalid_argument("service name cannot be empty"));
        }

        let mut services = self.services.write().unwrap();
        if services.contains_key(&name) {
            return Err(Error::already_exists(format!(
                "service {name} is already registered"
            )));
        }

        info!("Registering service: {}", name);
        services.insert(name, service);
        Ok(())
    }

    /// Remove a service by name. Fails with `NotFound` if absent.
    pub fn unregister(&self, name: &str) -> Result<()> {
        let mut services = self.services.write().unwrap();
        if services.remove(name).is_none() {
            return Err(Error::not_found(format!("service {name} is not registered")));
        }

        info!("Unregistered service: {}", name);
        Ok(())
    }

    /// Look up a service by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Service>> {
        self.services.read().unwrap().get(name).cloned()
    }

    /// Whether a service with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.services.read().unwrap().contains_key(name)
    }

    /// Snapshot of all registered services.
    pub fn get_all(&self) -> Vec<Arc<dyn Service>> {
        self.services.read().unwrap().values().cloned().collect()
    }

    /// Snapshot of all services carrying the given type tag.
    pub fn get_by_type(&self, service_type: &str) -> Vec<Arc<dyn Service>> {
        self.services
            .read()
            .unwrap()
            .values()
            .filter(|s| s.service_type() == service_type)
            .cloned()
            .collect()
    }

    /// Number of registered services.
    pub fn len(&self) -> usize {
        self.services.read().unwrap().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.services.read().unwrap().is_empty()
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
