//! Error types for the breakers library.

use std::error::Error;
use std::fmt::{self, Display, Formatter};

use crate::outage::Outage;

/// Result type for intercepted calls.
pub type BreakerResult<T, E> = Result<T, BreakerError<E>>;

/// Result type for store round trips.
pub type StoreResult<T> = Result<T, StoreError>;

/// Error type returned from an intercepted call.
#[derive(Debug)]
pub enum BreakerError<E> {
    /// The service is in an outage and the real call was not made.
    Outage(OutageError),

    /// The transport failed. This is the original failure, unmodified.
    Transport(TransportError<E>),

    /// The shared store failed and the breaker is configured to propagate.
    Store(StoreError),
}

/// Failure raised by the transport executing the real request.
#[derive(Debug)]
pub enum TransportError<E> {
    /// The request timed out.
    Timeout(String),

    /// The connection could not be established or was dropped.
    ConnectionFailed(String),

    /// Any other error raised by the transport.
    Other(E),
}

impl<E> TransportError<E> {
    /// Timeouts and connection failures always count against the service.
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            TransportError::Timeout(_) | TransportError::ConnectionFailed(_)
        )
    }
}

impl<E> Display for BreakerError<E>
where
    E: Display,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            BreakerError::Outage(e) => write!(f, "{}", e),
            BreakerError::Transport(e) => write!(f, "Transport error: {}", e),
            BreakerError::Store(e) => write!(f, "Breaker store error: {}", e),
        }
    }
}

impl<E> Display for TransportError<E>
where
    E: Display,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Timeout(msg) => write!(f, "timeout: {}", msg),
            TransportError::ConnectionFailed(msg) => write!(f, "connection failed: {}", msg),
            TransportError::Other(e) => write!(f, "{}", e),
        }
    }
}

impl<E: Error + 'static> Error for BreakerError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BreakerError::Outage(e) => Some(e),
            BreakerError::Transport(e) => Some(e),
            BreakerError::Store(e) => Some(e),
        }
    }
}

impl<E: Error + 'static> Error for TransportError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TransportError::Other(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> From<StoreError> for BreakerError<E> {
    fn from(err: StoreError) -> Self {
        BreakerError::Store(err)
    }
}

/// Raised instead of calling a service that is in an outage.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Outage detected on {service} beginning at {}", .outage.start_time())]
pub struct OutageError {
    /// The open outage that blocked the request.
    pub outage: Outage,
    /// Name of the blocked service.
    pub service: String,
}

/// Errors reported by a [`Store`](crate::Store).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A command was applied to a key holding the wrong kind of value.
    #[error("wrong value type at key {0}")]
    WrongType(String),

    /// A counter key held a value that is not an integer.
    #[error("value at key {0} is not an integer")]
    NotAnInteger(String),

    /// The store answered with a reply of the wrong shape.
    #[error("unexpected store reply for {0}")]
    UnexpectedReply(&'static str),

    /// A persisted outage record could not be decoded or encoded.
    #[error("malformed outage record: {0}")]
    Codec(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Codec(err.to_string())
    }
}

/// Errors raised while registering services.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A required field was not provided.
    #[error("service is missing required field `{0}`")]
    MissingField(&'static str),

    /// A field is outside its allowed range.
    #[error("service `{service}`: {field} {reason}")]
    OutOfRange {
        /// Service being configured.
        service: String,
        /// Offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: &'static str,
    },

    /// Two services were registered under the same name.
    #[error("service `{0}` registered more than once")]
    DuplicateService(String),
}
