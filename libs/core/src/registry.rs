use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::interfaces::{Emitter, Listener, NoteFetcher, ValueHub};

/// Service name → adapter capability objects, built once at startup and
/// shared immutably. Replaces call-time lookup by string with explicit
/// injection; because the registry is frozen before routing starts there is
/// no first-touch race to guard against.
#[derive(Default)]
pub struct AdapterRegistry {
    listeners: HashMap<String, Arc<dyn Listener>>,
    emitters: HashMap<String, Arc<dyn Emitter>>,
    note_fetchers: HashMap<String, Arc<dyn NoteFetcher>>,
    hubs: HashMap<String, Arc<dyn ValueHub>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_listener(&mut self, listener: Arc<dyn Listener>) {
        self.listeners
            .insert(listener.service_name().to_string(), listener);
    }

    pub fn register_emitter(&mut self, emitter: Arc<dyn Emitter>) {
        self.emitters
            .insert(emitter.service_name().to_string(), emitter);
    }

    pub fn register_note_fetcher(&mut self, service: &str, fetcher: Arc<dyn NoteFetcher>) {
        self.note_fetchers.insert(service.to_string(), fetcher);
    }

    pub fn register_hub(&mut self, service: &str, hub: Arc<dyn ValueHub>) {
        self.hubs.insert(service.to_string(), hub);
    }

    pub fn listener(&self, service: &str) -> Result<Arc<dyn Listener>, RegistryError> {
        self.listeners
            .get(service)
            .cloned()
            .ok_or_else(|| RegistryError::missing(service, "listener"))
    }

    pub fn emitter(&self, service: &str) -> Result<Arc<dyn Emitter>, RegistryError> {
        self.emitters
            .get(service)
            .cloned()
            .ok_or_else(|| RegistryError::missing(service, "emitter"))
    }

    pub fn note_fetcher(&self, service: &str) -> Result<Arc<dyn NoteFetcher>, RegistryError> {
        self.note_fetchers
            .get(service)
            .cloned()
            .ok_or_else(|| RegistryError::missing(service, "note fetcher"))
    }

    pub fn hub(&self, service: &str) -> Result<Arc<dyn ValueHub>, RegistryError> {
        self.hubs
            .get(service)
            .cloned()
            .ok_or_else(|| RegistryError::missing(service, "hub"))
    }

    pub fn services(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .listeners
            .keys()
            .chain(self.emitters.keys())
            .cloned()
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

#[derive(Debug, Error)]
#[error("no {capability} registered for service {service}")]
pub struct RegistryError {
    pub service: String,
    pub capability: &'static str,
}

impl RegistryError {
    fn missing(service: &str, capability: &'static str) -> Self {
        Self {
            service: service.to_string(),
            capability,
        }
    }
}
