//! Client error taxonomy

use bulwark_resilience::{FailureKind, Retryable};
use std::fmt;
use std::time::Duration;

use crate::transport::TransportError;

/// Why no connection could be used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionFailure {
    /// The host actively refused the connection
    Refused,
    /// The connection dropped while the request was in flight
    Lost,
    /// No network path at all (DNS failure, interface down)
    Offline,
}

impl fmt::Display for ConnectionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            ConnectionFailure::Refused => "connection refused",
            ConnectionFailure::Lost => "connection lost",
            ConnectionFailure::Offline => "offline",
        };
        write!(f, "{}", reason)
    }
}

/// Error type for resilient requests.
///
/// A call to `request()` yields either a decoded value or exactly one of these.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Circuit breaker is open")]
    CircuitBreakerOpen,

    #[error("Rate limited{}", format_retry_after(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    #[error("Unauthorized (401)")]
    Unauthorized,

    #[error("Forbidden (403)")]
    Forbidden,

    #[error("Server error ({0})")]
    ServerError(u16),

    #[error("No connection: {0}")]
    NoConnection(ConnectionFailure),

    #[error("Request timed out")]
    Timeout,

    #[error("Decoding error: {0}")]
    DecodingError(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

fn format_retry_after(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(wait) => format!(", retry after {:?}", wait),
        None => String::new(),
    }
}

/// Result alias for client operations
pub type ClientResult<T> = Result<T, ClientError>;

impl ClientError {
    /// Classify a non-2xx status. Returns `None` for success statuses.
    pub fn from_status(status: u16, retry_after: Option<Duration>) -> Option<Self> {
        match status {
            200..=299 => None,
            401 => Some(ClientError::Unauthorized),
            403 => Some(ClientError::Forbidden),
            408 => Some(ClientError::Timeout),
            429 => Some(ClientError::RateLimited { retry_after }),
            500..=599 => Some(ClientError::ServerError(status)),
            other => Some(ClientError::InvalidResponse(format!(
                "unexpected status {}",
                other
            ))),
        }
    }

    /// Short stable name, used as a telemetry attribute
    pub fn kind_name(&self) -> String {
        match self {
            ClientError::Configuration(_) => "configuration".to_string(),
            other => other.failure_kind().to_string(),
        }
    }
}

impl Retryable for ClientError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            ClientError::InvalidResponse(_) | ClientError::Configuration(_) => {
                FailureKind::InvalidResponse
            }
            ClientError::CircuitBreakerOpen => FailureKind::CircuitOpen,
            ClientError::RateLimited { .. } => FailureKind::RateLimited,
            ClientError::Unauthorized => FailureKind::Unauthorized,
            ClientError::Forbidden => FailureKind::Forbidden,
            ClientError::ServerError(_) => FailureKind::ServerError,
            ClientError::NoConnection(ConnectionFailure::Refused) => FailureKind::ConnectionRefused,
            ClientError::NoConnection(ConnectionFailure::Lost) => FailureKind::ConnectionLost,
            ClientError::NoConnection(ConnectionFailure::Offline) => FailureKind::NoConnectivity,
            ClientError::Timeout => FailureKind::ConnectionTimeout,
            ClientError::DecodingError(_) => FailureKind::Decoding,
        }
    }
}

impl From<TransportError> for ClientError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Timeout => ClientError::Timeout,
            TransportError::ConnectionRefused(_) => {
                ClientError::NoConnection(ConnectionFailure::Refused)
            }
            TransportError::ConnectionLost(_) => ClientError::NoConnection(ConnectionFailure::Lost),
            TransportError::Offline(_) => ClientError::NoConnection(ConnectionFailure::Offline),
            TransportError::InvalidRequest(message) => ClientError::Configuration(message),
        }
    }
}
