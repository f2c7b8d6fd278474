//! Configuration for the breaker interceptor.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::breaker::CircuitBreaker;
use crate::registry::ServiceRegistry;

/// What a blocked request gets back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutageResponse {
    /// Return [`BreakerError::Outage`](crate::BreakerError::Outage).
    #[default]
    Exception,
    /// Return a synthetic response with this status code.
    StatusCode {
        /// Status of the synthetic response.
        code: u16,
    },
}

/// What to do when the shared store fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreFailureMode {
    /// Log the failure and carry on as if there were no outage. Real
    /// responses are still delivered.
    #[default]
    FailOpen,
    /// Return [`BreakerError::Store`](crate::BreakerError::Store).
    ///
    /// Before the call this means the transport is never invoked. If the
    /// store fails while recording the outcome of a call that already ran,
    /// the caller gets `BreakerError::Store` in place of the real response or
    /// transport error, which is then dropped. Use
    /// [`FailOpen`](Self::FailOpen) if downstream responses must always be
    /// delivered.
    Propagate,
}

/// Interceptor settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// When false, requests bypass the breaker entirely.
    pub enabled: bool,
    /// Response for blocked requests.
    pub outage_response: OutageResponse,
    /// Allow at most one in-flight probe per service across all processes.
    pub single_flight_probes: bool,
    /// TTL of the retest lock. A retest running longer than this loses the
    /// lock and another may start; its own release then leaves the newer
    /// holder's lock in place.
    pub probe_lock_seconds: u64,
    /// Handling of store failures.
    pub store_failure: StoreFailureMode,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            outage_response: OutageResponse::Exception,
            single_flight_probes: false,
            probe_lock_seconds: 120,
            store_failure: StoreFailureMode::FailOpen,
        }
    }
}

/// Builder for [`CircuitBreaker`].
pub struct BreakerBuilder {
    registry: Arc<ServiceRegistry>,
    config: BreakerConfig,
}

impl BreakerBuilder {
    /// Creates a builder with default settings.
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self {
            registry,
            config: BreakerConfig::default(),
        }
    }

    /// Replaces all settings at once.
    pub fn config(mut self, config: BreakerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets whether the breaker starts enabled.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    /// Sets the response for blocked requests.
    pub fn outage_response(mut self, response: OutageResponse) -> Self {
        self.config.outage_response = response;
        self
    }

    /// Enables the single-flight probe lock.
    pub fn single_flight_probes(mut self, enabled: bool) -> Self {
        self.config.single_flight_probes = enabled;
        self
    }

    /// Sets the probe lock TTL.
    pub fn probe_lock_seconds(mut self, seconds: u64) -> Self {
        self.config.probe_lock_seconds = seconds;
        self
    }

    /// Sets how store failures are handled.
    pub fn store_failure(mut self, mode: StoreFailureMode) -> Self {
        self.config.store_failure = mode;
        self
    }

    /// Builds the breaker.
    pub fn build(self) -> CircuitBreaker {
        CircuitBreaker::new(self.registry, self.config)
    }
}
