//! Re-exports the types most callers need.
//!
//! # Example
//! ```rust,no_run
//! use breakers_rs::prelude::*;
//! ```

pub use crate::matcher;
pub use crate::{
    BreakerConfig, BreakerError, BreakerResult, CircuitBreaker, MemoryStore, Outage,
    OutageResponse, Plugin, Request, Response, Service, ServiceConfig, ServiceRegistry,
    ServiceSettings, State, Store, StoreFailureMode, TransportError,
};
