//! # breakers-rs
//!
//! A client-side outage detector and circuit breaker for outbound HTTP
//! calls, coordinated through a shared store.
//!
//! Every request to a registered service is counted in per-minute buckets in
//! the store. When the error percentage over the trailing two minutes crosses
//! a service's threshold, an outage is recorded and all processes sharing the
//! store stop sending requests to that service. After a cooldown, one request
//! at a time is let through as a probe; a successful probe ends the outage.
//!
//! ## States
//!
//! Each request is handled in one of four states:
//!
//! - **PassThrough**: no service matched, or the breaker is disabled. Nothing
//!   is counted.
//! - **Normal**: the service is healthy. The request runs and its outcome is
//!   counted.
//! - **Probe**: the service is in an outage but its retry cooldown has
//!   elapsed. The request runs as a recovery test.
//! - **Blocked**: the service is in an outage. The request is not sent.
//!
//! ## Basic Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use breakers_rs::prelude::*;
//!
//! let registry = ServiceRegistry::builder(Arc::new(MemoryStore::new()))
//!     .key_prefix("myapp:")
//!     .service(
//!         ServiceConfig::builder()
//!             .name("search")
//!             .matcher_arc(matcher::host("search.example.com"))
//!             .error_threshold(50)
//!             .seconds_before_retry(60)
//!             .build()
//!             .unwrap(),
//!     )
//!     .build()
//!     .unwrap();
//!
//! let breaker = CircuitBreaker::builder(Arc::new(registry)).build();
//!
//! let request = Request::get("https://search.example.com/q?term=rust").unwrap();
//! let result = breaker.call(&request, |_req| {
//!     // Send the request with your HTTP client here.
//!     Ok::<_, TransportError<std::io::Error>>(Response::new(200))
//! });
//!
//! match result {
//!     Ok(response) => println!("status {}", response.status),
//!     Err(BreakerError::Outage(outage)) => println!("{}", outage),
//!     Err(err) => println!("request failed: {}", err),
//! }
//! ```
//!
//! ## Async Support
//!
//! With the `async` feature enabled, the transport can be a future:
//!
//! ```rust,ignore
//! let response = breaker
//!     .call_async(&request, None, || async {
//!         client.send(&request).await
//!     })
//!     .await?;
//! ```
//!
//! ## Features
//!
//! - `std` - Standard library support (default)
//! - `async` - `CircuitBreaker::call_async`
//! - `prometheus` - A plugin exporting breaker events to `prometheus-client`

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod breaker;
mod clock;
mod config;
mod counters;
mod error;
mod http;
mod lock;
pub mod matcher;
#[cfg(feature = "prometheus")]
mod metrics;
mod outage;
mod plugin;
mod policy;
pub mod prelude;
mod registry;
mod report;
mod sampling;
mod service;
mod state;
pub mod store;

// Re-exports
pub use breaker::CircuitBreaker;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BreakerBuilder, BreakerConfig, OutageResponse, StoreFailureMode};
pub use counters::{align_on_minute, Metric, SamplePoint, DEFAULT_SAMPLE_MINUTES};
pub use error::{
    BreakerError, BreakerResult, ConfigError, OutageError, StoreError, StoreResult,
    TransportError,
};
pub use http::{Request, Response};
#[cfg(feature = "prometheus")]
#[cfg_attr(docsrs, doc(cfg(feature = "prometheus")))]
pub use metrics::{PrometheusPlugin, ServiceLabels};
pub use outage::Outage;
pub use plugin::{Plugin, PluginSet};
pub use policy::{ErrorRatePolicy, WindowCounts};
pub use registry::{RegistryBuilder, ServiceRegistry};
pub use report::{OutageReport, RequestReport};
pub use sampling::{RandomSource, ScriptedRandom, ThreadRandom};
pub use service::{
    ExceptionHandler, Matcher, Service, ServiceConfig, ServiceConfigBuilder, ServiceSettings,
};
pub use state::State;
pub use store::{MemoryStore, Store};
