//! Resilient HTTP client for Bulwark
//!
//! [`ResilientClient`] composes the circuit breaker, retry policy and
//! request throttler from `bulwark-resilience` with the fallback cache from
//! `bulwark-caching` into a single `request()` operation. The network and
//! observability sides are pluggable through [`Transport`] and [`Telemetry`].

pub mod client;
pub mod config;
pub mod errors;
pub mod registry;
pub mod telemetry;
pub mod transport;
pub mod types;

// Re-export main types for convenience
pub use client::{ResilientClient, ResilientClientBuilder};
pub use config::HttpConfig;
pub use errors::{ClientError, ClientResult, ConnectionFailure};
pub use registry::ClientRegistry;
pub use telemetry::{
    NoopTelemetry, SharedTelemetry, Telemetry, TraceGuard, TraceHandle, TracingTelemetry,
};
pub use transport::{
    PinnedRoots, ReqwestTransport, SystemTrust, Transport, TransportError, TransportRequest,
    TransportResponse, TrustPolicy,
};
pub use types::{CachePolicy, HttpMethod, ParseError, RequestContext};
