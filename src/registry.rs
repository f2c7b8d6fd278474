//! The service registry: resolves requests to services and owns the state
//! shared by all of them.

use std::sync::Arc;

use ahash::AHashSet;

use crate::clock::{Clock, SystemClock};
use crate::error::ConfigError;
use crate::http::Request;
use crate::plugin::{Plugin, PluginSet};
use crate::sampling::{RandomSource, ThreadRandom};
use crate::service::{Service, ServiceConfig};
use crate::store::Store;

/// Collaborators every service operation goes through.
pub(crate) struct Shared {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) random: Arc<dyn RandomSource>,
    pub(crate) plugins: PluginSet,
    pub(crate) prefix: String,
}

impl Shared {
    #[cfg(test)]
    pub(crate) fn for_tests(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        random: Arc<dyn RandomSource>,
        prefix: &str,
    ) -> Self {
        Self {
            store,
            clock,
            random,
            plugins: PluginSet::new(),
            prefix: prefix.to_string(),
        }
    }
}

/// The configured services, in match order.
pub struct ServiceRegistry {
    services: Vec<Service>,
    shared: Arc<Shared>,
}

impl ServiceRegistry {
    /// Starts a registry backed by `store`.
    pub fn builder(store: Arc<dyn Store>) -> RegistryBuilder {
        RegistryBuilder {
            store,
            clock: Arc::new(SystemClock),
            random: Arc::new(ThreadRandom),
            plugins: PluginSet::new(),
            prefix: String::new(),
            services: Vec::new(),
        }
    }

    /// The first service, in registration order, that claims the request.
    pub fn resolve(&self, request: &Request, hint: Option<&str>) -> Option<&Service> {
        self.services
            .iter()
            .find(|service| service.handles_request(request, hint))
    }

    /// Looks a service up by name.
    pub fn service_named(&self, name: &str) -> Option<&Service> {
        self.services.iter().find(|service| service.name() == name)
    }

    /// All services in registration order.
    pub fn services(&self) -> &[Service] {
        &self.services
    }

    /// The prefix prepended to every store key.
    pub fn key_prefix(&self) -> &str {
        &self.shared.prefix
    }

    pub(crate) fn shared(&self) -> &Shared {
        &self.shared
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.services)
            .field("prefix", &self.shared.prefix)
            .field("plugins", &self.shared.plugins)
            .finish()
    }
}

/// Builder for [`ServiceRegistry`].
pub struct RegistryBuilder {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
    plugins: PluginSet,
    prefix: String,
    services: Vec<ServiceConfig>,
}

impl RegistryBuilder {
    /// Namespaces every store key, e.g. `"myapp:"`.
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Sets the clock used for timestamps and buckets.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the random source used for success sampling.
    pub fn random_source(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    /// Appends a plugin. Plugins are notified in the order added.
    pub fn plugin<P: Plugin>(mut self, plugin: P) -> Self {
        self.plugins.push(Arc::new(plugin));
        self
    }

    /// Appends an already shared plugin.
    pub fn plugin_arc(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Appends a service. Earlier services win when several match.
    pub fn service(mut self, config: ServiceConfig) -> Self {
        self.services.push(config);
        self
    }

    /// Builds the registry, rejecting duplicate service names.
    pub fn build(self) -> Result<ServiceRegistry, ConfigError> {
        let mut seen = AHashSet::with_capacity(self.services.len());
        for config in &self.services {
            if !seen.insert(config.name().to_string()) {
                return Err(ConfigError::DuplicateService(config.name().to_string()));
            }
        }

        let shared = Arc::new(Shared {
            store: self.store,
            clock: self.clock,
            random: self.random,
            plugins: self.plugins,
            prefix: self.prefix,
        });
        let services = self
            .services
            .into_iter()
            .map(|config| Service::new(config, Arc::clone(&shared)))
            .collect();

        Ok(ServiceRegistry { services, shared })
    }
}
