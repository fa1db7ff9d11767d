//! Observability boundary
//!
//! The client reports traces, metrics and counters through [`Telemetry`]
//! and never depends on how they are emitted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Counter and metric names emitted by the resilient client
pub mod names {
    pub const REQUEST_TRACE: &str = "network.request";
    pub const REQUEST_SUCCESS: &str = "network.request.success";
    pub const REQUEST_FAILURE: &str = "network.request.failure";
    pub const REQUEST_RETRY: &str = "network.request.retry";
    pub const REQUEST_DURATION_MS: &str = "network.request.duration_ms";
    pub const CACHE_HIT: &str = "network.cache.hit";
    pub const CACHE_FALLBACK: &str = "network.cache.fallback";
    pub const CIRCUIT_REJECTED: &str = "network.circuit.rejected";
    pub const THROTTLE_REJECTED: &str = "network.throttle.rejected";
    pub const THROTTLE_DELAYED: &str = "network.throttle.delayed";
}

/// Opaque handle returned by [`Telemetry::start_trace`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TraceHandle {
    pub id: u64,
    pub name: String,
}

/// Fire-and-forget observability sink
pub trait Telemetry: Send + Sync {
    fn start_trace(&self, name: &str, attributes: &[(&str, String)]) -> TraceHandle;
    fn stop_trace(&self, handle: TraceHandle);
    fn record_metric(&self, name: &str, value: f64);
    fn increment_counter(&self, name: &str);
}

/// Shared telemetry sink
pub type SharedTelemetry = Arc<dyn Telemetry>;

/// Stops its trace when dropped, on every exit path including cancellation
pub struct TraceGuard {
    telemetry: SharedTelemetry,
    handle: Option<TraceHandle>,
}

impl TraceGuard {
    pub fn start(telemetry: SharedTelemetry, name: &str, attributes: &[(&str, String)]) -> Self {
        let handle = telemetry.start_trace(name, attributes);
        Self {
            telemetry,
            handle: Some(handle),
        }
    }

    pub fn handle(&self) -> Option<&TraceHandle> {
        self.handle.as_ref()
    }
}

impl Drop for TraceGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.telemetry.stop_trace(handle);
        }
    }
}

/// Emits telemetry as `tracing` events
#[derive(Debug, Default)]
pub struct TracingTelemetry {
    next_id: AtomicU64,
}

impl TracingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Telemetry for TracingTelemetry {
    fn start_trace(&self, name: &str, attributes: &[(&str, String)]) -> TraceHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(trace_id = id, ?attributes, "Trace {} started", name);
        TraceHandle {
            id,
            name: name.to_string(),
        }
    }

    fn stop_trace(&self, handle: TraceHandle) {
        debug!(trace_id = handle.id, "Trace {} stopped", handle.name);
    }

    fn record_metric(&self, name: &str, value: f64) {
        trace!(metric = name, value, "metric");
    }

    fn increment_counter(&self, name: &str) {
        trace!(counter = name, "counter");
    }
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn start_trace(&self, name: &str, _attributes: &[(&str, String)]) -> TraceHandle {
        TraceHandle {
            id: 0,
            name: name.to_string(),
        }
    }

    fn stop_trace(&self, _handle: TraceHandle) {}

    fn record_metric(&self, _name: &str, _value: f64) {}

    fn increment_counter(&self, _name: &str) {}
}
