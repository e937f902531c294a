//! Provider-side service registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use crate::descriptor::{MethodDescriptor, Service};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("service {0} is already registered")]
    DuplicateService(String),
    #[error("service {service} declares duplicate method {method}")]
    DuplicateMethod { service: String, method: String },
}

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("unknown service {0}")]
    UnknownService(String),
    #[error("unknown method {service}.{method}")]
    UnknownMethod { service: String, method: String },
}

pub(crate) struct ServiceEntry {
    pub service: Arc<dyn Service>,
    pub methods: BTreeMap<String, MethodDescriptor>,
}

/// Map from service name to hosted service and its method table.
///
/// Built single-threaded before the server starts, then frozen behind an
/// `Arc` and read by every worker without locking.
#[derive(Default)]
pub struct ServiceRegistry {
    services: BTreeMap<String, ServiceEntry>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, service: Arc<dyn Service>) -> Result<(), RegistryError> {
        let descriptor = service.descriptor();
        let name = descriptor.name().to_string();
        if self.services.contains_key(&name) {
            return Err(RegistryError::DuplicateService(name));
        }

        let mut methods = BTreeMap::new();
        for method in descriptor.methods() {
            if methods
                .insert(method.name().to_string(), method.clone())
                .is_some()
            {
                return Err(RegistryError::DuplicateMethod {
                    service: name,
                    method: method.name().to_string(),
                });
            }
        }

        self.services.insert(name, ServiceEntry { service, methods });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub(crate) fn lookup(
        &self,
        service: &str,
        method: &str,
    ) -> Result<(Arc<dyn Service>, &MethodDescriptor), LookupError> {
        let entry = self
            .services
            .get(service)
            .ok_or_else(|| LookupError::UnknownService(service.to_string()))?;
        let descriptor = entry
            .methods
            .get(method)
            .ok_or_else(|| LookupError::UnknownMethod {
                service: service.to_string(),
                method: method.to_string(),
            })?;
        Ok((Arc::clone(&entry.service), descriptor))
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = (&str, &ServiceEntry)> {
        self.services
            .iter()
            .map(|(name, entry)| (name.as_str(), entry))
    }
}
