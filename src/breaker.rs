//! The request interceptor.

use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use ahash::AHashMap;
use parking_lot::RwLock;

use crate::config::{BreakerBuilder, BreakerConfig, OutageResponse, StoreFailureMode};
use crate::error::{BreakerError, BreakerResult, OutageError, StoreResult, TransportError};
use crate::http::{Request, Response};
use crate::lock::RetestLock;
use crate::outage::Outage;
use crate::registry::{ServiceRegistry, Shared};
use crate::service::Service;
use crate::state::State;

/// A cached answer to "what is this service's current outage".
struct Verdict {
    checked_at: u64,
    outage: Option<Outage>,
}

/// Inner state of the breaker, shared between clones.
struct BreakerInner {
    registry: Arc<ServiceRegistry>,
    config: BreakerConfig,
    enabled: AtomicBool,
    verdicts: RwLock<AHashMap<String, Verdict>>,
}

/// What to do with one request, decided before it runs.
enum Admission<'a> {
    PassThrough,
    Execute {
        service: &'a Service,
        probe: Option<Probe<'a>>,
    },
    Blocked {
        service: &'a Service,
        outage: Outage,
    },
}

struct Probe<'a> {
    outage: Outage,
    lock: Option<RetestLock<'a>>,
}

enum ProbeLock<'a> {
    Held(RetestLock<'a>),
    NotUsed,
    Busy,
}

/// Wraps outbound calls, counting outcomes per service and short-circuiting
/// services that are in an outage.
///
/// Cloning is cheap and clones share the enable switch and outage cache.
#[derive(Clone)]
pub struct CircuitBreaker {
    inner: Arc<BreakerInner>,
}

impl CircuitBreaker {
    /// Creates a breaker over `registry`.
    pub fn new(registry: Arc<ServiceRegistry>, config: BreakerConfig) -> Self {
        let inner = BreakerInner {
            registry,
            enabled: AtomicBool::new(config.enabled),
            config,
            verdicts: RwLock::new(AHashMap::new()),
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    /// Creates a builder for customizing a breaker.
    pub fn builder(registry: Arc<ServiceRegistry>) -> BreakerBuilder {
        BreakerBuilder::new(registry)
    }

    /// The registry this breaker resolves services from.
    pub fn registry(&self) -> &ServiceRegistry {
        &self.inner.registry
    }

    /// The breaker settings.
    pub fn config(&self) -> &BreakerConfig {
        &self.inner.config
    }

    /// Turns the breaker back on.
    pub fn enable(&self) {
        self.inner.enabled.store(true, Ordering::Release);
    }

    /// Bypasses the breaker entirely: no counting, logging or plugin calls.
    pub fn disable(&self) {
        self.inner.enabled.store(false, Ordering::Release);
    }

    /// Whether requests currently go through the breaker.
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    /// Executes `f` for `request` under the breaker.
    pub fn call<F, E>(&self, request: &Request, f: F) -> BreakerResult<Response, E>
    where
        F: FnOnce(&Request) -> Result<Response, TransportError<E>>,
        E: Error + 'static,
    {
        self.call_with_hint(request, None, f)
    }

    /// Like [`call`](Self::call), passing an explicit service name to the
    /// matchers.
    pub fn call_with_hint<F, E>(
        &self,
        request: &Request,
        hint: Option<&str>,
        f: F,
    ) -> BreakerResult<Response, E>
    where
        F: FnOnce(&Request) -> Result<Response, TransportError<E>>,
        E: Error + 'static,
    {
        match self.pre_call(request, hint)? {
            Admission::PassThrough => f(request).map_err(BreakerError::Transport),
            Admission::Blocked { service, outage } => self.outage_response(service, outage),
            Admission::Execute { service, probe } => {
                let started = Instant::now();
                let result = timed(f(request), started);
                self.post_call(service, request, probe, &result)?;
                result.map_err(BreakerError::Transport)
            }
        }
    }

    /// The state `request` would be admitted in, without running it or
    /// taking a probe lock.
    pub fn inspect(&self, request: &Request, hint: Option<&str>) -> StoreResult<State> {
        if !self.is_enabled() {
            return Ok(State::PassThrough);
        }
        let Some(service) = self.inner.registry.resolve(request, hint) else {
            return Ok(State::PassThrough);
        };
        let outage = self.current_outage(service)?;
        Ok(self.decide(service, outage.as_ref()))
    }

    fn shared(&self) -> &Shared {
        self.inner.registry.shared()
    }

    fn decide(&self, service: &Service, outage: Option<&Outage>) -> State {
        match outage {
            Some(outage) if outage.is_open() => {
                let now = self.shared().clock.now();
                let wait = service.settings().seconds_before_retry;
                if !outage.is_forced() && outage.ready_for_retest(now, wait) {
                    State::Probe
                } else {
                    State::Blocked
                }
            }
            _ => State::Normal,
        }
    }

    /// Decides how to treat the request.
    fn pre_call<'a>(&'a self, request: &Request, hint: Option<&str>) -> StoreResult<Admission<'a>> {
        if !self.is_enabled() {
            return Ok(Admission::PassThrough);
        }
        let Some(service) = self.inner.registry.resolve(request, hint) else {
            return Ok(Admission::PassThrough);
        };

        let outage = self.guard(service, self.current_outage(service))?.flatten();
        let mut state = self.decide(service, outage.as_ref());

        let admission = match (state, outage) {
            (State::Blocked, Some(outage)) => Admission::Blocked { service, outage },
            (State::Probe, Some(outage)) => match self.take_probe_lock(service)? {
                ProbeLock::Held(lock) => Admission::Execute {
                    service,
                    probe: Some(Probe {
                        outage,
                        lock: Some(lock),
                    }),
                },
                ProbeLock::NotUsed => Admission::Execute {
                    service,
                    probe: Some(Probe { outage, lock: None }),
                },
                ProbeLock::Busy => {
                    state = State::Blocked;
                    Admission::Blocked { service, outage }
                }
            },
            _ => Admission::Execute {
                service,
                probe: None,
            },
        };

        tracing::debug!(
            service = service.name(),
            state = %state,
            url = %request.url,
            "breakers admitted request"
        );
        Ok(admission)
    }

    fn take_probe_lock<'a>(&'a self, service: &Service) -> StoreResult<ProbeLock<'a>> {
        if !self.inner.config.single_flight_probes {
            return Ok(ProbeLock::NotUsed);
        }

        let lock = RetestLock::new(
            self.shared(),
            service.name(),
            self.inner.config.probe_lock_seconds,
        );
        match self.guard(service, lock.acquire())? {
            Some(true) => Ok(ProbeLock::Held(lock)),
            Some(false) => Ok(ProbeLock::Busy),
            // Store failed and we fail open: probe without the lock.
            None => Ok(ProbeLock::NotUsed),
        }
    }

    /// Records the outcome of an executed request.
    fn post_call<E>(
        &self,
        service: &Service,
        request: &Request,
        probe: Option<Probe<'_>>,
        result: &Result<Response, TransportError<E>>,
    ) -> StoreResult<()>
    where
        E: Error + 'static,
    {
        let (mut probe_outage, lock) = match probe {
            Some(Probe { outage, lock }) => (Some(outage), lock),
            None => (None, None),
        };

        let recorded = match result {
            Ok(response) if !response.is_server_error() => {
                self.handle_success(service, request, response, probe_outage.as_mut())
            }
            Ok(response) => self.handle_error(
                service,
                request,
                Some(response),
                &response.status.to_string(),
                probe_outage.as_mut(),
            ),
            Err(err) if err.is_transport_failure() => {
                self.handle_error(service, request, None, &err.to_string(), probe_outage.as_mut())
            }
            Err(TransportError::Other(err)) if service.exception_represents_service_error(err) => {
                self.handle_error(service, request, None, &err.to_string(), probe_outage.as_mut())
            }
            Err(_) => Ok(()),
        };

        if let Some(lock) = lock {
            self.guard(service, lock.release())?;
        }
        recorded
    }

    fn handle_success(
        &self,
        service: &Service,
        request: &Request,
        response: &Response,
        probe: Option<&mut Outage>,
    ) -> StoreResult<()> {
        self.guard(service, service.record_success())?;
        if let Some(outage) = probe {
            self.guard(service, service.end_outage(outage))?;
            self.forget_verdict(service);
        }

        service.shared().plugins.success(service, request, response);
        Ok(())
    }

    fn handle_error(
        &self,
        service: &Service,
        request: &Request,
        response: Option<&Response>,
        error: &str,
        probe: Option<&mut Outage>,
    ) -> StoreResult<()> {
        match probe {
            Some(outage) => {
                // The outage is already open; only push its retest window out.
                self.guard(service, service.record_probe_error())?;
                self.guard(service, service.update_last_test_time(outage))?;
                self.forget_verdict(service);
            }
            None => {
                if let Some(Some(_)) = self.guard(service, service.record_error())? {
                    self.forget_verdict(service);
                }
            }
        }

        tracing::warn!(
            service = service.name(),
            url = %request.url,
            error,
            duration_ms = ?response.and_then(Response::duration_millis),
            "breakers failed request"
        );
        service.shared().plugins.error(service, request, response);
        Ok(())
    }

    fn outage_response<E>(&self, service: &Service, outage: Outage) -> BreakerResult<Response, E> {
        service.shared().plugins.skipped_request(service);

        let error = OutageError {
            outage,
            service: service.name().to_string(),
        };
        match self.inner.config.outage_response {
            OutageResponse::StatusCode { code } => {
                Ok(Response::new(code).with_body(error.to_string()))
            }
            OutageResponse::Exception => Err(BreakerError::Outage(error)),
        }
    }

    /// Applies the store failure policy. `Ok(None)` means the failure was
    /// logged and swallowed.
    fn guard<T>(&self, service: &Service, result: StoreResult<T>) -> StoreResult<Option<T>> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(err) => match self.inner.config.store_failure {
                StoreFailureMode::FailOpen => {
                    tracing::error!(
                        service = service.name(),
                        error = %err,
                        "breakers store failure, failing open"
                    );
                    Ok(None)
                }
                StoreFailureMode::Propagate => Err(err),
            },
        }
    }

    fn current_outage(&self, service: &Service) -> StoreResult<Option<Outage>> {
        let ttl = service.settings().seconds_between_outage_checks;
        if ttl == 0 {
            return service.current_outage();
        }

        let now = self.shared().clock.now();
        if let Some(verdict) = self.inner.verdicts.read().get(service.name()) {
            if now.saturating_sub(verdict.checked_at) < ttl {
                return Ok(verdict.outage.clone());
            }
        }

        let outage = service.current_outage()?;
        self.inner.verdicts.write().insert(
            service.name().to_string(),
            Verdict {
                checked_at: now,
                outage: outage.clone(),
            },
        );
        Ok(outage)
    }

    fn forget_verdict(&self, service: &Service) {
        if service.settings().seconds_between_outage_checks > 0 {
            self.inner.verdicts.write().remove(service.name());
        }
    }
}

/// Stamps a response with the time since `started`.
fn timed<E>(
    mut result: Result<Response, TransportError<E>>,
    started: Instant,
) -> Result<Response, TransportError<E>> {
    if let Ok(response) = &mut result {
        response.duration = Some(started.elapsed());
    }
    result
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("enabled", &self.is_enabled())
            .field("config", &self.inner.config)
            .field("registry", &self.inner.registry)
            .finish()
    }
}

// Async support when the feature is enabled
#[cfg(feature = "async")]
impl CircuitBreaker {
    /// Executes the future returned by `f` for `request` under the breaker.
    ///
    /// Store round trips are still made synchronously on the calling task.
    pub async fn call_async<F, Fut, E>(
        &self,
        request: &Request,
        hint: Option<&str>,
        f: F,
    ) -> BreakerResult<Response, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Response, TransportError<E>>>,
        E: Error + 'static,
    {
        match self.pre_call(request, hint)? {
            Admission::PassThrough => f().await.map_err(BreakerError::Transport),
            Admission::Blocked { service, outage } => self.outage_response(service, outage),
            Admission::Execute { service, probe } => {
                let started = Instant::now();
                let result = timed(f().await, started);
                self.post_call(service, request, probe, &result)?;
                result.map_err(BreakerError::Transport)
            }
        }
    }
}
