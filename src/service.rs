//! Service definitions and the counter/outage operations scoped to them.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::counters::{Counters, Metric, SamplePoint};
use crate::error::{ConfigError, StoreError, StoreResult};
use crate::http::Request;
use crate::outage::{Outage, OutageLog};
use crate::policy::{ErrorRatePolicy, WindowCounts};
use crate::registry::Shared;
use crate::store::Reply;

/// Decides whether a request belongs to a service. The second argument is
/// the caller's explicit service-name hint, if any.
pub type Matcher = Arc<dyn Fn(&Request, Option<&str>) -> bool + Send + Sync + 'static>;

/// Decides whether an error raised by the transport is the service's fault.
pub type ExceptionHandler = Arc<dyn Fn(&(dyn Error + 'static)) -> bool + Send + Sync + 'static>;

/// Tunable detection settings for one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Cooldown after the last probe before another is allowed.
    pub seconds_before_retry: u64,
    /// Error percentage over the trailing two minutes that opens an outage.
    pub error_threshold: u8,
    /// Errors required in the window before the rate is considered.
    pub min_errors: u64,
    /// TTL of every counter bucket.
    pub data_retention_seconds: u64,
    /// Record one success in this many, weighted by the same factor.
    pub success_sample_per: u32,
    /// How long an outage lookup may be reused before reading the store again.
    pub seconds_between_outage_checks: u64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            seconds_before_retry: 60,
            error_threshold: 50,
            min_errors: 1,
            data_retention_seconds: 60 * 60 * 24 * 30,
            success_sample_per: 1,
            seconds_between_outage_checks: 0,
        }
    }
}

/// Validated, immutable configuration of one service.
#[derive(Clone)]
pub struct ServiceConfig {
    name: String,
    matcher: Matcher,
    exception_handler: Option<ExceptionHandler>,
    settings: ServiceSettings,
}

impl ServiceConfig {
    /// Starts a new service configuration.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder::default()
    }

    /// The service name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The detection settings.
    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("name", &self.name)
            .field("settings", &self.settings)
            .field("exception_handler", &self.exception_handler.is_some())
            .finish()
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Default)]
pub struct ServiceConfigBuilder {
    name: Option<String>,
    matcher: Option<Matcher>,
    exception_handler: Option<ExceptionHandler>,
    settings: ServiceSettings,
}

impl ServiceConfigBuilder {
    /// Sets the service name. It also namespaces the service's store keys.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the request matcher.
    pub fn matcher<F>(mut self, matcher: F) -> Self
    where
        F: Fn(&Request, Option<&str>) -> bool + Send + Sync + 'static,
    {
        self.matcher = Some(Arc::new(matcher));
        self
    }

    /// Sets a prebuilt matcher, such as one from [`crate::matcher`].
    pub fn matcher_arc(mut self, matcher: Matcher) -> Self {
        self.matcher = Some(matcher);
        self
    }

    /// Sets the handler that classifies transport errors.
    pub fn exception_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&(dyn Error + 'static)) -> bool + Send + Sync + 'static,
    {
        self.exception_handler = Some(Arc::new(handler));
        self
    }

    /// Replaces all detection settings at once.
    pub fn settings(mut self, settings: ServiceSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Sets the retry cooldown.
    pub fn seconds_before_retry(mut self, seconds: u64) -> Self {
        self.settings.seconds_before_retry = seconds;
        self
    }

    /// Sets the error percentage that opens an outage.
    pub fn error_threshold(mut self, percent: u8) -> Self {
        self.settings.error_threshold = percent;
        self
    }

    /// Sets the error floor.
    pub fn min_errors(mut self, count: u64) -> Self {
        self.settings.min_errors = count;
        self
    }

    /// Sets the counter TTL.
    pub fn data_retention_seconds(mut self, seconds: u64) -> Self {
        self.settings.data_retention_seconds = seconds;
        self
    }

    /// Sets the success sampling rate.
    pub fn success_sample_per(mut self, per: u32) -> Self {
        self.settings.success_sample_per = per;
        self
    }

    /// Sets how long an outage lookup may be reused.
    pub fn seconds_between_outage_checks(mut self, seconds: u64) -> Self {
        self.settings.seconds_between_outage_checks = seconds;
        self
    }

    /// Validates and builds the configuration.
    pub fn build(self) -> Result<ServiceConfig, ConfigError> {
        let name = self
            .name
            .filter(|n| !n.is_empty())
            .ok_or(ConfigError::MissingField("name"))?;
        let matcher = self.matcher.ok_or(ConfigError::MissingField("matcher"))?;

        let out_of_range = |field, reason| ConfigError::OutOfRange {
            service: name.clone(),
            field,
            reason,
        };
        let settings = self.settings;
        if settings.error_threshold > 100 {
            return Err(out_of_range("error_threshold", "must be at most 100"));
        }
        if settings.min_errors == 0 {
            return Err(out_of_range("min_errors", "must be at least 1"));
        }
        if settings.success_sample_per == 0 {
            return Err(out_of_range("success_sample_per", "must be at least 1"));
        }

        Ok(ServiceConfig {
            name,
            matcher,
            exception_handler: self.exception_handler,
            settings,
        })
    }
}

/// A registered service: its configuration bound to the shared store.
pub struct Service {
    config: ServiceConfig,
    shared: Arc<Shared>,
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Service").field(&self.config).finish()
    }
}

impl Service {
    pub(crate) fn new(config: ServiceConfig, shared: Arc<Shared>) -> Self {
        Self { config, shared }
    }

    pub(crate) fn shared(&self) -> &Shared {
        &self.shared
    }

    /// The service name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// The detection settings.
    pub fn settings(&self) -> &ServiceSettings {
        &self.config.settings
    }

    /// True if this service owns the request.
    pub fn handles_request(&self, request: &Request, hint: Option<&str>) -> bool {
        (self.config.matcher)(request, hint)
    }

    /// True if the handler attributes `error` to the service. Without a
    /// handler, no raised error is.
    pub fn exception_represents_service_error(&self, error: &(dyn Error + 'static)) -> bool {
        self.config
            .exception_handler
            .as_ref()
            .is_some_and(|handler| handler(error))
    }

    fn counters(&self) -> Counters<'_> {
        let settings = &self.config.settings;
        Counters::new(
            &self.shared,
            &self.config.name,
            settings.data_retention_seconds,
            settings.success_sample_per,
        )
    }

    fn outages(&self) -> OutageLog<'_> {
        OutageLog::new(&self.shared, &self.config.name)
    }

    fn policy(&self) -> ErrorRatePolicy {
        ErrorRatePolicy::new(self.config.settings.error_threshold, self.config.settings.min_errors)
    }

    /// Counts an error, then opens an outage if the window calls for one.
    /// Returns the outage this call created.
    pub fn record_error(&self) -> StoreResult<Option<Outage>> {
        self.counters().add_error()?;
        self.maybe_create_outage()
    }

    /// Counts an error without evaluating the window. Used for failed probes,
    /// where an outage is already open.
    pub(crate) fn record_probe_error(&self) -> StoreResult<()> {
        self.counters().add_error()
    }

    /// Counts a success, subject to sampling. Returns whether it was written.
    pub fn record_success(&self) -> StoreResult<bool> {
        self.counters().add_success()
    }

    /// Reads error and success totals over the current and previous minute.
    pub fn window_counts(&self) -> StoreResult<WindowCounts> {
        let reads = self.counters().window_reads(self.shared.clock.now());
        let replies = self.shared.store.execute(&reads)?;
        let [errors_now, errors_before, successes_now, successes_before]: [Reply; 4] = replies
            .try_into()
            .map_err(|_| StoreError::UnexpectedReply("outage window"))?;
        Ok(WindowCounts {
            errors: errors_now.into_count()? + errors_before.into_count()?,
            successes: successes_now.into_count()? + successes_before.into_count()?,
        })
    }

    fn maybe_create_outage(&self) -> StoreResult<Option<Outage>> {
        let log = self.outages();
        let mut reads = self.counters().window_reads(self.shared.clock.now());
        reads.push(log.current_read());

        let replies = self.shared.store.execute(&reads)?;
        let [errors_now, errors_before, successes_now, successes_before, current]: [Reply; 5] =
            replies
                .try_into()
                .map_err(|_| StoreError::UnexpectedReply("outage window"))?;
        let counts = WindowCounts {
            errors: errors_now.into_count()? + errors_before.into_count()?,
            successes: successes_now.into_count()? + successes_before.into_count()?,
        };

        if !self.policy().should_trip(&counts) {
            return Ok(None);
        }
        if let Some(member) = current.into_text()? {
            if log.decode(member)?.is_open() {
                tracing::debug!(service = self.name(), "outage already open");
                return Ok(None);
            }
        }
        log.create(false).map(Some)
    }

    /// The outage with the greatest start time, open or not.
    pub fn current_outage(&self) -> StoreResult<Option<Outage>> {
        self.outages().current()
    }

    /// Closes `outage`.
    pub fn end_outage(&self, outage: &mut Outage) -> StoreResult<()> {
        self.outages().end(outage)
    }

    /// Marks `outage` as just probed.
    pub fn update_last_test_time(&self, outage: &mut Outage) -> StoreResult<()> {
        self.outages().update_last_test_time(outage)
    }

    /// Opens an outage by hand. Forced outages are never probed.
    pub fn begin_forced_outage(&self) -> StoreResult<Outage> {
        self.outages().create(true)
    }

    /// Closes the current outage if, and only if, it is an open forced one.
    /// Returns the closed outage.
    pub fn end_forced_outage(&self) -> StoreResult<Option<Outage>> {
        match self.current_outage()? {
            Some(mut outage) if outage.is_forced() && outage.is_open() => {
                self.end_outage(&mut outage)?;
                Ok(Some(outage))
            }
            _ => Ok(None),
        }
    }

    /// Outages that began within `[start, end]`.
    pub fn outages_in_range(&self, start: u64, end: u64) -> StoreResult<Vec<Outage>> {
        self.outages().in_range(start, end)
    }

    /// Success counts sampled every `sample_minutes` over `[start, end]`.
    pub fn successes_in_range(
        &self,
        start: u64,
        end: u64,
        sample_minutes: u64,
    ) -> StoreResult<Vec<SamplePoint>> {
        self.series_in_range(Metric::Successes, start, end, sample_minutes)
    }

    /// Error counts sampled every `sample_minutes` over `[start, end]`.
    pub fn errors_in_range(
        &self,
        start: u64,
        end: u64,
        sample_minutes: u64,
    ) -> StoreResult<Vec<SamplePoint>> {
        self.series_in_range(Metric::Errors, start, end, sample_minutes)
    }

    /// Counts of `metric` sampled every `sample_minutes` over `[start, end]`.
    pub fn series_in_range(
        &self,
        metric: Metric,
        start: u64,
        end: u64,
        sample_minutes: u64,
    ) -> StoreResult<Vec<SamplePoint>> {
        self.counters()
            .series_in_range(metric, start, end, sample_minutes)
    }
}
