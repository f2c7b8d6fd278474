//! Prometheus export of breaker events.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;

use crate::http::{Request, Response};
use crate::outage::Outage;
use crate::plugin::Plugin;
use crate::service::Service;

/// Label set shared by every breaker counter.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ServiceLabels {
    /// Service name.
    pub service: String,
}

/// A [`Plugin`] that counts breaker events per service.
///
/// Counters are cheap to clone and share their values, so a clone can be
/// handed to the registry builder while this one is registered for scraping.
#[derive(Clone, Debug, Default)]
pub struct PrometheusPlugin {
    outages_begun: Family<ServiceLabels, Counter>,
    outages_ended: Family<ServiceLabels, Counter>,
    successes: Family<ServiceLabels, Counter>,
    errors: Family<ServiceLabels, Counter>,
    skipped: Family<ServiceLabels, Counter>,
}

impl PrometheusPlugin {
    /// Creates a plugin with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the counters under the `breakers` prefix.
    pub fn register(&self, registry: &mut Registry) {
        let registry = registry.sub_registry_with_prefix("breakers");
        registry.register(
            "outages_begun",
            "Outages opened",
            self.outages_begun.clone(),
        );
        registry.register(
            "outages_ended",
            "Outages closed",
            self.outages_ended.clone(),
        );
        registry.register(
            "successes",
            "Requests that completed below status 500",
            self.successes.clone(),
        );
        registry.register(
            "errors",
            "Requests counted against the service",
            self.errors.clone(),
        );
        registry.register(
            "skipped_requests",
            "Requests short-circuited during an outage",
            self.skipped.clone(),
        );
    }

    /// Current value of the outage-begin counter for `service`.
    pub fn outages_begun(&self, service: &str) -> u64 {
        self.outages_begun.get_or_create(&labels(service)).get()
    }

    /// Current value of the skipped-request counter for `service`.
    pub fn skipped(&self, service: &str) -> u64 {
        self.skipped.get_or_create(&labels(service)).get()
    }
}

fn labels(service: &str) -> ServiceLabels {
    ServiceLabels {
        service: service.to_string(),
    }
}

impl Plugin for PrometheusPlugin {
    fn on_outage_begin(&self, outage: &Outage) {
        self.outages_begun
            .get_or_create(&labels(outage.service()))
            .inc();
    }

    fn on_outage_end(&self, outage: &Outage) {
        self.outages_ended
            .get_or_create(&labels(outage.service()))
            .inc();
    }

    fn on_success(&self, service: &Service, _request: &Request, _response: &Response) {
        self.successes.get_or_create(&labels(service.name())).inc();
    }

    fn on_error(&self, service: &Service, _request: &Request, _response: Option<&Response>) {
        self.errors.get_or_create(&labels(service.name())).inc();
    }

    fn on_skipped_request(&self, service: &Service) {
        self.skipped.get_or_create(&labels(service.name())).inc();
    }
}
