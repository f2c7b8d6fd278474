//! Observer plugins notified of breaker events.

use std::sync::Arc;

use crate::http::{Request, Response};
use crate::outage::Outage;
use crate::service::Service;

/// Receives breaker events. Every callback defaults to doing nothing, so a
/// plugin only overrides what it cares about.
///
/// Callbacks run inline on the request path and in registration order. A
/// panicking plugin is not caught.
pub trait Plugin: Send + Sync + 'static {
    /// An outage was just created.
    fn on_outage_begin(&self, _outage: &Outage) {}

    /// An outage was just ended.
    fn on_outage_end(&self, _outage: &Outage) {}

    /// A real request completed with a status below 500.
    fn on_success(&self, _service: &Service, _request: &Request, _response: &Response) {}

    /// A real request failed. `response` is `None` when the transport raised.
    fn on_error(&self, _service: &Service, _request: &Request, _response: Option<&Response>) {}

    /// A request was short-circuited because the service is in an outage.
    fn on_skipped_request(&self, _service: &Service) {}
}

/// An ordered list of plugins.
#[derive(Clone, Default)]
pub struct PluginSet {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a plugin.
    pub fn push(&mut self, plugin: Arc<dyn Plugin>) {
        self.plugins.push(plugin);
    }

    /// Number of registered plugins.
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// True if no plugins are registered.
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub(crate) fn outage_begin(&self, outage: &Outage) {
        for plugin in &self.plugins {
            plugin.on_outage_begin(outage);
        }
    }

    pub(crate) fn outage_end(&self, outage: &Outage) {
        for plugin in &self.plugins {
            plugin.on_outage_end(outage);
        }
    }

    pub(crate) fn success(&self, service: &Service, request: &Request, response: &Response) {
        for plugin in &self.plugins {
            plugin.on_success(service, request, response);
        }
    }

    pub(crate) fn error(&self, service: &Service, request: &Request, response: Option<&Response>) {
        for plugin in &self.plugins {
            plugin.on_error(service, request, response);
        }
    }

    pub(crate) fn skipped_request(&self, service: &Service) {
        for plugin in &self.plugins {
            plugin.on_skipped_request(service);
        }
    }
}

impl std::fmt::Debug for PluginSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginSet")
            .field("len", &self.plugins.len())
            .finish()
    }
}
