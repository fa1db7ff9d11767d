//! Resilient client: breaker gate, throttled retry loop, fallback cache

use bulwark_caching::{SharedClock, SystemClock, TieredCache, TieredCacheConfig};
use bulwark_config::domains::service::NamedService;
use bulwark_config::{ServiceConfig, ThrottlePolicy, Validatable};
use bulwark_resilience::{
    CircuitBreaker, CircuitBreakerConfig, RequestThrottler, RetryPolicy, RetryPolicyConfig,
    Retryable, ThrottleConfig,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::HttpConfig;
use crate::errors::{ClientError, ClientResult, ConnectionFailure};
use crate::telemetry::{names, SharedTelemetry, TraceGuard, TracingTelemetry};
use crate::transport::{ReqwestTransport, Transport, TransportRequest};
use crate::types::{CachePolicy, RequestContext};

/// Request pipeline for one logical service.
///
/// Owns the service's circuit breaker, request throttler and fallback
/// cache. Concurrent calls share all three.
pub struct ResilientClient {
    name: String,
    config: ServiceConfig,
    base_url: Option<Url>,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    throttler: RequestThrottler,
    cache: TieredCache,
    transport: Arc<dyn Transport>,
    telemetry: SharedTelemetry,
}

impl ResilientClient {
    /// Start building a client for the service `name`
    pub fn builder(name: impl Into<String>, config: ServiceConfig) -> ResilientClientBuilder {
        ResilientClientBuilder::new(name, config)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn throttler(&self) -> &RequestThrottler {
        &self.throttler
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn cache(&self) -> &TieredCache {
        &self.cache
    }

    /// Close the breaker and forget throttle history. The cache is kept.
    pub fn reset(&self) {
        self.breaker.reset();
        self.throttler.reset();
    }

    /// Resolve an endpoint against the service base URL
    pub fn resolve(&self, endpoint: &str) -> ClientResult<Url> {
        match Url::parse(endpoint) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => match &self.base_url {
                Some(base) => base.join(endpoint).map_err(|e| {
                    ClientError::Configuration(format!(
                        "cannot resolve '{}' against {}: {}",
                        endpoint, base, e
                    ))
                }),
                None => Err(ClientError::Configuration(format!(
                    "relative endpoint '{}' but service '{}' has no base_url",
                    endpoint, self.name
                ))),
            },
            Err(e) => Err(ClientError::Configuration(format!(
                "invalid endpoint '{}': {}",
                endpoint, e
            ))),
        }
    }

    /// Perform a request and decode its JSON body into `T`.
    ///
    /// Dropping the returned future cancels the request; an in-flight
    /// attempt is then recorded as neither a success nor a failure.
    pub async fn request<T>(&self, context: RequestContext) -> ClientResult<T>
    where
        T: DeserializeOwned + Send,
    {
        let _trace = TraceGuard::start(
            self.telemetry.clone(),
            names::REQUEST_TRACE,
            &[
                ("service", self.name.clone()),
                ("method", context.method.to_string()),
                ("endpoint", context.endpoint.clone()),
                ("cache_policy", context.cache_policy.to_string()),
            ],
        );

        let url = self.resolve(&context.endpoint)?;
        let key = context.cache_key_for(&url);
        let use_cache = context.cache_policy.uses_cache();

        if !self.breaker.can_attempt() {
            if use_cache {
                if let Some(value) = self.cached(&key).await {
                    info!(service = %self.name, "Circuit open, serving cached response for {}", url);
                    self.telemetry.increment_counter(names::CACHE_FALLBACK);
                    return Ok(value);
                }
            }
            warn!(service = %self.name, "Circuit open, rejecting request to {}", url);
            self.telemetry.increment_counter(names::CIRCUIT_REJECTED);
            return Err(ClientError::CircuitBreakerOpen);
        }

        if context.cache_policy == CachePolicy::CacheFirst {
            if let Some(value) = self.cached(&key).await {
                debug!(service = %self.name, "Cache hit for {}", key);
                self.telemetry.increment_counter(names::CACHE_HIT);
                return Ok(value);
            }
        }

        let request = TransportRequest {
            method: context.method,
            url: url.clone(),
            headers: context.headers.clone(),
            body: context.body.clone(),
            timeout: self.config.timeout,
        };
        let max_attempts = self.retry.max_retries();
        let mut last_error = None;

        for attempt in 0..max_attempts {
            if let Err(refused) = self.admit(&context.endpoint).await {
                // A refused retry still gets the cache fallback below
                if last_error.is_none() {
                    return Err(refused);
                }
                debug!(
                    service = %self.name,
                    "Retry budget for {} cut short by throttling ({})",
                    url, refused
                );
                break;
            }

            let started = Instant::now();
            let outcome = self.attempt::<T>(&request).await;
            self.telemetry.record_metric(
                names::REQUEST_DURATION_MS,
                started.elapsed().as_secs_f64() * 1000.0,
            );

            let error = match outcome {
                Ok((value, payload)) => {
                    self.breaker.record_success();
                    self.telemetry.increment_counter(names::REQUEST_SUCCESS);
                    if use_cache {
                        self.store(&key, &payload);
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            self.breaker.record_failure();
            self.telemetry.increment_counter(names::REQUEST_FAILURE);

            let kind = error.failure_kind();
            if !kind.is_transient() {
                warn!(
                    service = %self.name,
                    "{} {} failed with {}, not retrying",
                    request.method, url, error
                );
                return Err(error);
            }

            if self.retry.should_retry(kind, attempt + 1) {
                let delay = self.retry.delay(attempt);
                debug!(
                    service = %self.name,
                    "Attempt {}/{} for {} failed ({}), retrying in {:?}",
                    attempt + 1,
                    max_attempts,
                    url,
                    error,
                    delay
                );
                self.telemetry.increment_counter(names::REQUEST_RETRY);
                tokio::time::sleep(delay).await;
            } else {
                warn!(
                    service = %self.name,
                    "Giving up on {} after {} attempts: {}",
                    url,
                    attempt + 1,
                    error
                );
            }
            last_error = Some(error);
        }

        if use_cache {
            if let Some(value) = self.cached(&key).await {
                info!(service = %self.name, "Serving cached response for {} after failures", url);
                self.telemetry.increment_counter(names::CACHE_FALLBACK);
                return Ok(value);
            }
        }

        Err(last_error.unwrap_or(ClientError::NoConnection(ConnectionFailure::Offline)))
    }

    /// One transport call, bounded by the per-attempt timeout, then classified
    async fn attempt<T: DeserializeOwned>(
        &self,
        request: &TransportRequest,
    ) -> ClientResult<(T, Value)> {
        let response =
            match tokio::time::timeout(request.timeout, self.transport.send(request)).await {
                Ok(result) => result?,
                Err(_) => return Err(ClientError::Timeout),
            };

        if let Some(error) = ClientError::from_status(response.status, response.retry_after()) {
            return Err(error);
        }

        let payload = decode_body(&response.body)?;
        let value =
            T::deserialize(&payload).map_err(|e| ClientError::DecodingError(e.to_string()))?;
        Ok((value, payload))
    }

    /// Wait for a throttle slot according to the service's throttle policy
    async fn admit(&self, endpoint: &str) -> ClientResult<()> {
        let deadline = match self.config.throttle {
            ThrottlePolicy::Delay { max_wait } => Some(Instant::now() + max_wait),
            ThrottlePolicy::Reject => None,
        };

        loop {
            let wait = match self.throttler.try_acquire(endpoint) {
                Ok(()) => return Ok(()),
                Err(e) => e.retry_after(),
            };

            match deadline {
                Some(deadline) if Instant::now() + wait <= deadline => {
                    debug!(service = %self.name, "Throttling {} for {:?}", endpoint, wait);
                    self.telemetry.increment_counter(names::THROTTLE_DELAYED);
                    tokio::time::sleep(wait).await;
                }
                _ => {
                    warn!(
                        service = %self.name,
                        "Request budget for {} exhausted, next slot in {:?}",
                        endpoint, wait
                    );
                    self.telemetry.increment_counter(names::THROTTLE_REJECTED);
                    return Err(ClientError::RateLimited {
                        retry_after: Some(wait),
                    });
                }
            }
        }
    }

    /// Cache read; failures count as misses
    async fn cached<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.cache.get::<T>(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(service = %self.name, "Cache read for {} failed: {}", key, e);
                None
            }
        }
    }

    fn store(&self, key: &str, payload: &Value) {
        if let Err(e) = self.cache.set(key, payload) {
            warn!(service = %self.name, "Cache write for {} failed: {}", key, e);
        }
    }
}

/// Empty bodies decode as `null`
fn decode_body(body: &[u8]) -> ClientResult<Value> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body).map_err(|e| ClientError::DecodingError(e.to_string()))
}

/// Builder for [`ResilientClient`]
pub struct ResilientClientBuilder {
    name: String,
    config: ServiceConfig,
    cache_dir: Option<PathBuf>,
    cache: Option<TieredCache>,
    clock: Option<SharedClock>,
    transport: Option<Arc<dyn Transport>>,
    telemetry: Option<SharedTelemetry>,
    http: HttpConfig,
}

impl ResilientClientBuilder {
    pub fn new(name: impl Into<String>, config: ServiceConfig) -> Self {
        Self {
            name: name.into(),
            config,
            cache_dir: None,
            cache: None,
            clock: None,
            transport: None,
            telemetry: None,
            http: HttpConfig::default(),
        }
    }

    /// Directory for this service's disk cache tier
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Use an existing cache instead of creating one
    pub fn cache(mut self, cache: TieredCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Clock for cache expiry
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn telemetry(mut self, telemetry: SharedTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Settings for the default reqwest transport
    pub fn http_config(mut self, http: HttpConfig) -> Self {
        self.http = http;
        self
    }

    /// Build the client. Must run inside a tokio runtime.
    pub fn build(self) -> ClientResult<ResilientClient> {
        NamedService {
            name: &self.name,
            config: &self.config,
        }
        .validate()
        .map_err(|e| ClientError::Configuration(e.to_string()))?;

        let base_url = self
            .config
            .base_url
            .as_deref()
            .map(Url::parse)
            .transpose()
            .map_err(|e| ClientError::Configuration(format!("invalid base_url: {}", e)))?;

        let cache = match self.cache {
            Some(cache) => cache,
            None => {
                let dir = self.cache_dir.ok_or_else(|| {
                    ClientError::Configuration(format!(
                        "service '{}' needs a cache directory",
                        self.name
                    ))
                })?;
                let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
                TieredCache::with_clock(TieredCacheConfig::for_service(&self.config, dir), clock)
                    .map_err(|e| ClientError::Configuration(e.to_string()))?
            }
        };

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(&self.http)?),
        };

        debug!(
            service = %self.name,
            "Created resilient client (max_retries {}, breaker threshold {}, {} req/min)",
            self.config.max_retries,
            self.config.circuit_failure_threshold,
            self.config.max_requests_per_minute
        );

        Ok(ResilientClient {
            breaker: CircuitBreaker::named(
                self.name.as_str(),
                CircuitBreakerConfig::from(&self.config),
            ),
            retry: RetryPolicy::new(RetryPolicyConfig::from(&self.config)),
            throttler: RequestThrottler::new(ThrottleConfig::from(&self.config)),
            telemetry: self
                .telemetry
                .unwrap_or_else(|| Arc::new(TracingTelemetry::new())),
            name: self.name,
            config: self.config,
            base_url,
            cache,
            transport,
        })
    }
}
