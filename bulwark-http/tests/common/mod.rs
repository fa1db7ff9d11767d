//! Shared fixtures: a scripted transport and a recording telemetry sink

#![allow(dead_code)]

use async_trait::async_trait;
use bulwark_caching::ManualClock;
use bulwark_config::ServiceConfig;
use bulwark_http::{
    ResilientClient, Telemetry, TraceHandle, Transport, TransportError, TransportRequest,
    TransportResponse,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub type Outcome = Result<TransportResponse, TransportError>;

/// Replays queued outcomes in order; repeats the last one when the queue runs dry
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Outcome>>,
    fallback: Mutex<Option<Outcome>>,
    latency: Mutex<Duration>,
    calls: AtomicUsize,
    requests: Mutex<Vec<TransportRequest>>,
}

impl ScriptedTransport {
    pub fn new(outcomes: Vec<Outcome>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(outcomes.into()),
            ..Self::default()
        })
    }

    pub fn with_latency(self: Arc<Self>, latency: Duration) -> Arc<Self> {
        *self.latency.lock() = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let next = self.script.lock().pop_front();
        match next {
            Some(outcome) => {
                *self.fallback.lock() = Some(outcome.clone());
                outcome
            }
            None => self
                .fallback
                .lock()
                .clone()
                .unwrap_or(Err(TransportError::Offline("script exhausted".to_string()))),
        }
    }
}

/// Records every telemetry call
#[derive(Default)]
pub struct RecordingTelemetry {
    next_id: AtomicU64,
    started: Mutex<Vec<TraceHandle>>,
    stopped: Mutex<Vec<TraceHandle>>,
    counters: Mutex<HashMap<String, u64>>,
    metrics: Mutex<Vec<(String, f64)>>,
}

impl RecordingTelemetry {
    pub fn started(&self) -> usize {
        self.started.lock().len()
    }

    pub fn stopped(&self) -> usize {
        self.stopped.lock().len()
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.lock().get(name).copied().unwrap_or(0)
    }
}

impl Telemetry for RecordingTelemetry {
    fn start_trace(&self, name: &str, _attributes: &[(&str, String)]) -> TraceHandle {
        let handle = TraceHandle {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            name: name.to_string(),
        };
        self.started.lock().push(handle.clone());
        handle
    }

    fn stop_trace(&self, handle: TraceHandle) {
        self.stopped.lock().push(handle);
    }

    fn record_metric(&self, name: &str, value: f64) {
        self.metrics.lock().push((name.to_string(), value));
    }

    fn increment_counter(&self, name: &str) {
        *self.counters.lock().entry(name.to_string()).or_insert(0) += 1;
    }
}

/// Service settings with short delays and a generous request budget
pub fn fast_service() -> ServiceConfig {
    ServiceConfig {
        timeout: Duration::from_secs(5),
        max_retries: 3,
        retry_base_delay: Duration::from_millis(100),
        max_retry_delay: Duration::from_secs(2),
        circuit_failure_threshold: 5,
        circuit_open_timeout: Duration::from_secs(60),
        circuit_half_open_success_threshold: 2,
        cache_ttl: Duration::from_secs(3600),
        max_requests_per_minute: 1000,
        ..ServiceConfig::default()
    }
}

pub struct Harness {
    pub client: ResilientClient,
    pub transport: Arc<ScriptedTransport>,
    pub telemetry: Arc<RecordingTelemetry>,
    pub clock: ManualClock,
    pub dir: TempDir,
}

pub fn harness(config: ServiceConfig, transport: Arc<ScriptedTransport>) -> Harness {
    let dir = TempDir::new().unwrap();
    let telemetry = Arc::new(RecordingTelemetry::default());
    let clock = ManualClock::starting_now();

    let client = ResilientClient::builder("test", config)
        .cache_dir(dir.path())
        .clock(Arc::new(clock.clone()))
        .transport(transport.clone())
        .telemetry(telemetry.clone())
        .build()
        .unwrap();

    Harness {
        client,
        transport,
        telemetry,
        clock,
        dir,
    }
}
