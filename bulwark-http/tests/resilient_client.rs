//! Request pipeline behaviour against a scripted transport

mod common;

use bulwark_config::{ServiceConfig, ThrottlePolicy};
use bulwark_http::telemetry::names;
use bulwark_http::{
    CachePolicy, ClientError, ConnectionFailure, HttpMethod, RequestContext, TransportError,
    TransportResponse,
};
use bulwark_resilience::CircuitState;
use common::{fast_service, harness, ScriptedTransport};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const NEWS: &str = "https://api.test/news";

#[derive(Debug, PartialEq, Deserialize)]
struct Headline {
    title: String,
}

fn ok(body: Value) -> Result<TransportResponse, TransportError> {
    Ok(TransportResponse::json(200, &body))
}

fn status(code: u16) -> Result<TransportResponse, TransportError> {
    Ok(TransportResponse::status(code))
}

#[tokio::test(start_paused = true)]
async fn transient_server_errors_are_retried_until_success() {
    let transport = ScriptedTransport::new(vec![
        status(503),
        status(503),
        ok(json!({"title": "Markets rally"})),
    ]);
    let h = harness(fast_service(), transport);

    let headline: Headline = h.client.request(RequestContext::get(NEWS)).await.unwrap();
    assert_eq!(headline.title, "Markets rally");
    assert_eq!(h.transport.calls(), 3);

    let metrics = h.client.breaker().metrics();
    assert_eq!(metrics.total_failures, 2);
    assert_eq!(metrics.total_successes, 1);
    assert_eq!(h.client.breaker().state(), CircuitState::Closed);

    assert_eq!(h.telemetry.counter(names::REQUEST_RETRY), 2);
    assert_eq!(h.telemetry.counter(names::REQUEST_SUCCESS), 1);
    assert_eq!(h.telemetry.started(), 1);
    assert_eq!(h.telemetry.stopped(), 1);
}

#[tokio::test(start_paused = true)]
async fn consecutive_timeouts_open_the_breaker() {
    let config = ServiceConfig {
        max_retries: 5,
        ..fast_service()
    };
    let transport = ScriptedTransport::new(vec![Err(TransportError::Timeout)]);
    let h = harness(config, transport);

    let result = h.client.request::<Value>(RequestContext::get(NEWS)).await;
    assert_eq!(result, Err(ClientError::Timeout));
    assert_eq!(h.transport.calls(), 5);
    assert_eq!(h.client.breaker().state(), CircuitState::Open);

    // Within the open window no transport call is made
    let result = h.client.request::<Value>(RequestContext::get(NEWS)).await;
    assert_eq!(result, Err(ClientError::CircuitBreakerOpen));
    assert_eq!(h.transport.calls(), 5);
    assert_eq!(h.telemetry.counter(names::CIRCUIT_REJECTED), 1);
    assert_eq!(h.telemetry.stopped(), 2);
}

#[tokio::test(start_paused = true)]
async fn open_breaker_serves_cached_value() {
    let transport = ScriptedTransport::new(vec![ok(json!({"title": "Cached"}))]);
    let h = harness(fast_service(), transport);
    let context = RequestContext::get(NEWS).with_cache_key("top-headlines");

    let _: Headline = h.client.request(context.clone()).await.unwrap();
    for _ in 0..5 {
        h.client.breaker().record_failure();
    }
    assert_eq!(h.client.breaker().state(), CircuitState::Open);

    let headline: Headline = h.client.request(context).await.unwrap();
    assert_eq!(headline.title, "Cached");
    assert_eq!(h.transport.calls(), 1);
    assert_eq!(h.telemetry.counter(names::CACHE_FALLBACK), 1);
}

#[tokio::test(start_paused = true)]
async fn breaker_probes_and_closes_after_open_timeout() {
    let transport = ScriptedTransport::new(vec![ok(json!({"title": "Back"}))]);
    let h = harness(fast_service(), transport);

    for _ in 0..5 {
        h.client.breaker().record_failure();
    }
    tokio::time::advance(Duration::from_secs(60)).await;

    let _: Headline = h
        .client
        .request(RequestContext::get(NEWS).with_cache_policy(CachePolicy::NetworkOnly))
        .await
        .unwrap();
    assert_eq!(h.client.breaker().state(), CircuitState::HalfOpen);

    let _: Headline = h
        .client
        .request(RequestContext::get(NEWS).with_cache_policy(CachePolicy::NetworkOnly))
        .await
        .unwrap();
    assert_eq!(h.client.breaker().state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn rate_limit_response_fails_fast() {
    let transport = ScriptedTransport::new(vec![Ok(
        TransportResponse::status(429).with_header("Retry-After", "30")
    )]);
    let h = harness(fast_service(), transport);

    let result = h.client.request::<Value>(RequestContext::get(NEWS)).await;
    assert_eq!(
        result,
        Err(ClientError::RateLimited {
            retry_after: Some(Duration::from_secs(30))
        })
    );
    assert_eq!(h.transport.calls(), 1);
    assert_eq!(h.client.breaker().metrics().total_failures, 1);
    assert_eq!(h.telemetry.counter(names::REQUEST_RETRY), 0);
}

#[tokio::test(start_paused = true)]
async fn unauthorized_is_returned_without_retry_or_fallback() {
    let transport = ScriptedTransport::new(vec![ok(json!({"title": "Old"})), status(401)]);
    let h = harness(fast_service(), transport);

    let _: Headline = h.client.request(RequestContext::get(NEWS)).await.unwrap();
    let result = h.client.request::<Headline>(RequestContext::get(NEWS)).await;

    assert_eq!(result, Err(ClientError::Unauthorized));
    assert_eq!(h.transport.calls(), 2);
    assert_eq!(h.client.breaker().metrics().total_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn forbidden_and_decoding_errors_are_not_retried() {
    let transport = ScriptedTransport::new(vec![
        status(403),
        Ok(TransportResponse {
            status: 200,
            headers: Vec::new(),
            body: b"<html>maintenance</html>".to_vec(),
        }),
    ]);
    let h = harness(fast_service(), transport);

    let result = h.client.request::<Value>(RequestContext::get(NEWS)).await;
    assert_eq!(result, Err(ClientError::Forbidden));
    assert_eq!(h.transport.calls(), 1);

    let result = h.client.request::<Value>(RequestContext::get(NEWS)).await;
    assert!(matches!(result, Err(ClientError::DecodingError(_))));
    assert_eq!(h.transport.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_fall_back_to_cache() {
    let transport = ScriptedTransport::new(vec![
        ok(json!({"title": "Yesterday"})),
        status(500),
        status(502),
        status(503),
    ]);
    let h = harness(fast_service(), transport);

    let _: Headline = h.client.request(RequestContext::get(NEWS)).await.unwrap();
    let headline: Headline = h.client.request(RequestContext::get(NEWS)).await.unwrap();

    assert_eq!(headline.title, "Yesterday");
    assert_eq!(h.transport.calls(), 4);
    assert_eq!(h.telemetry.counter(names::CACHE_FALLBACK), 1);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_without_cache_return_last_error() {
    let transport =
        ScriptedTransport::new(vec![Err(TransportError::ConnectionRefused("tcp".to_string()))]);
    let h = harness(fast_service(), transport);

    let result = h.client.request::<Value>(RequestContext::get(NEWS)).await;
    assert_eq!(
        result,
        Err(ClientError::NoConnection(ConnectionFailure::Refused))
    );
    assert_eq!(h.transport.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn cache_first_skips_the_network_on_hit() {
    let transport = ScriptedTransport::new(vec![
        ok(json!({"title": "First"})),
        ok(json!({"title": "Second"})),
    ]);
    let h = harness(fast_service(), transport);

    let first: Headline = h.client.request(RequestContext::get(NEWS)).await.unwrap();
    assert_eq!(first.title, "First");

    let cached: Headline = h
        .client
        .request(RequestContext::get(NEWS).with_cache_policy(CachePolicy::CacheFirst))
        .await
        .unwrap();
    assert_eq!(cached.title, "First");
    assert_eq!(h.transport.calls(), 1);
    assert_eq!(h.telemetry.counter(names::CACHE_HIT), 1);

    let fresh: Headline = h.client.request(RequestContext::get(NEWS)).await.unwrap();
    assert_eq!(fresh.title, "Second");
}

#[tokio::test(start_paused = true)]
async fn network_only_bypasses_the_cache() {
    let transport = ScriptedTransport::new(vec![ok(json!({"title": "Live"})), status(500)]);
    let h = harness(fast_service(), transport);
    let context = RequestContext::get(NEWS)
        .with_cache_key("k")
        .with_cache_policy(CachePolicy::NetworkOnly);

    let _: Headline = h.client.request(context.clone()).await.unwrap();
    assert_eq!(h.client.cache().get::<Value>("k").await.unwrap(), None);

    h.client
        .cache()
        .set("k", &json!({"title": "Stale"}))
        .unwrap();
    let result = h.client.request::<Headline>(context).await;
    assert_eq!(result, Err(ClientError::ServerError(500)));
}

#[tokio::test(start_paused = true)]
async fn cached_value_expires_with_service_ttl() {
    let transport = ScriptedTransport::new(vec![ok(json!({"title": "Hourly"}))]);
    let h = harness(fast_service(), transport);
    let context = RequestContext::get(NEWS).with_cache_key("hourly");

    let _: Headline = h.client.request(context.clone()).await.unwrap();
    h.clock.advance(chrono::Duration::seconds(3601));

    for _ in 0..5 {
        h.client.breaker().record_failure();
    }
    let result = h.client.request::<Headline>(context).await;
    assert_eq!(result, Err(ClientError::CircuitBreakerOpen));
}

#[tokio::test(start_paused = true)]
async fn slow_attempts_time_out_and_are_retried() {
    let config = ServiceConfig {
        timeout: Duration::from_secs(1),
        ..fast_service()
    };
    let transport = ScriptedTransport::new(vec![ok(json!({"title": "Too late"}))])
        .with_latency(Duration::from_secs(10));
    let h = harness(config, transport);

    let result = h.client.request::<Headline>(RequestContext::get(NEWS)).await;
    assert_eq!(result, Err(ClientError::Timeout));
    assert_eq!(h.transport.calls(), 3);
    assert_eq!(h.client.breaker().metrics().total_failures, 3);
}

#[tokio::test(start_paused = true)]
async fn cancelled_request_records_no_outcome() {
    let transport = ScriptedTransport::new(vec![ok(json!({"title": "Never seen"}))])
        .with_latency(Duration::from_secs(10));
    let h = harness(fast_service(), transport);

    let result = tokio::time::timeout(
        Duration::from_secs(1),
        h.client.request::<Headline>(RequestContext::get(NEWS)),
    )
    .await;
    assert!(result.is_err());

    let metrics = h.client.breaker().metrics();
    assert_eq!(metrics.total_requests, 0);
    assert_eq!(h.transport.calls(), 1);
    assert_eq!(h.telemetry.started(), 1);
    assert_eq!(h.telemetry.stopped(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_backoff_keeps_recorded_failures_only() {
    let config = ServiceConfig {
        retry_base_delay: Duration::from_secs(10),
        max_retry_delay: Duration::from_secs(30),
        ..fast_service()
    };
    let transport = ScriptedTransport::new(vec![status(503), ok(json!({"title": "Later"}))]);
    let h = harness(config, transport);

    let result = tokio::time::timeout(
        Duration::from_secs(1),
        h.client.request::<Headline>(RequestContext::get(NEWS)),
    )
    .await;
    assert!(result.is_err());

    let metrics = h.client.breaker().metrics();
    assert_eq!(metrics.total_failures, 1);
    assert_eq!(metrics.total_successes, 0);
    assert_eq!(h.transport.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn throttle_reject_policy_fails_without_breaker_failure() {
    let config = ServiceConfig {
        max_requests_per_minute: 1,
        throttle: ThrottlePolicy::Reject,
        ..fast_service()
    };
    let transport = ScriptedTransport::new(vec![ok(json!({"title": "Quote"}))]);
    let h = harness(config, transport);
    let context = RequestContext::get(NEWS).with_cache_policy(CachePolicy::NetworkOnly);

    let _: Headline = h.client.request(context.clone()).await.unwrap();
    let result = h.client.request::<Headline>(context).await;

    match result {
        Err(ClientError::RateLimited {
            retry_after: Some(wait),
        }) => {
            assert!(wait <= Duration::from_secs(60));
            assert!(wait > Duration::from_secs(59));
        }
        other => panic!("expected a local rate limit, got {:?}", other),
    }
    assert_eq!(h.transport.calls(), 1);
    assert_eq!(h.client.breaker().metrics().total_failures, 0);
    assert_eq!(h.telemetry.counter(names::THROTTLE_REJECTED), 1);
}

#[tokio::test(start_paused = true)]
async fn throttled_retry_still_falls_back_to_cache() {
    let config = ServiceConfig {
        max_requests_per_minute: 2,
        throttle: ThrottlePolicy::Reject,
        ..fast_service()
    };
    let transport = ScriptedTransport::new(vec![ok(json!({"title": "Cached"})), status(503)]);
    let h = harness(config, transport);

    let fresh: Headline = h.client.request(RequestContext::get(NEWS)).await.unwrap();
    assert_eq!(fresh.title, "Cached");

    // The 503 is retryable, but the retry finds the request budget spent
    let stale: Headline = h.client.request(RequestContext::get(NEWS)).await.unwrap();
    assert_eq!(stale.title, "Cached");
    assert_eq!(h.transport.calls(), 2);
    assert_eq!(h.telemetry.counter(names::THROTTLE_REJECTED), 1);
    assert_eq!(h.telemetry.counter(names::CACHE_FALLBACK), 1);
}

#[tokio::test(start_paused = true)]
async fn throttled_retry_without_cache_surfaces_the_upstream_error() {
    let config = ServiceConfig {
        max_requests_per_minute: 1,
        throttle: ThrottlePolicy::Reject,
        ..fast_service()
    };
    let transport = ScriptedTransport::new(vec![status(503)]);
    let h = harness(config, transport);

    let context = RequestContext::get(NEWS).with_cache_policy(CachePolicy::NetworkOnly);
    let result = h.client.request::<Headline>(context).await;
    assert_eq!(result, Err(ClientError::ServerError(503)));
    assert_eq!(h.transport.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn throttle_delay_policy_waits_for_a_slot() {
    let config = ServiceConfig {
        max_requests_per_minute: 1,
        throttle: ThrottlePolicy::Delay {
            max_wait: Duration::from_secs(90),
        },
        ..fast_service()
    };
    let transport = ScriptedTransport::new(vec![ok(json!({"title": "Quote"}))]);
    let h = harness(config, transport);
    let context = RequestContext::get(NEWS).with_cache_policy(CachePolicy::NetworkOnly);

    let started = Instant::now();
    let _: Headline = h.client.request(context.clone()).await.unwrap();
    let _: Headline = h.client.request(context).await.unwrap();

    assert!(started.elapsed() >= Duration::from_secs(60));
    assert_eq!(h.transport.calls(), 2);
    assert_eq!(h.telemetry.counter(names::THROTTLE_DELAYED), 1);
}

#[tokio::test(start_paused = true)]
async fn throttle_delay_policy_rejects_long_waits() {
    let config = ServiceConfig {
        max_requests_per_minute: 1,
        throttle: ThrottlePolicy::Delay {
            max_wait: Duration::from_secs(5),
        },
        ..fast_service()
    };
    let transport = ScriptedTransport::new(vec![ok(json!({"title": "Quote"}))]);
    let h = harness(config, transport);
    let context = RequestContext::get(NEWS).with_cache_policy(CachePolicy::NetworkOnly);

    let _: Headline = h.client.request(context.clone()).await.unwrap();
    let result = h.client.request::<Headline>(context).await;
    assert!(matches!(result, Err(ClientError::RateLimited { .. })));
    assert_eq!(h.transport.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_failures_are_all_counted() {
    let transport = ScriptedTransport::new(vec![status(401)]);
    let h = harness(fast_service(), transport);
    let client = Arc::new(h.client);

    let (a, b, c) = tokio::join!(
        client.request::<Value>(RequestContext::get(NEWS)),
        client.request::<Value>(RequestContext::get(NEWS)),
        client.request::<Value>(RequestContext::get(NEWS)),
    );
    assert!(a.is_err() && b.is_err() && c.is_err());
    assert_eq!(client.breaker().metrics().total_failures, 3);
}

#[tokio::test(start_paused = true)]
async fn request_is_forwarded_to_the_transport() {
    let transport = ScriptedTransport::new(vec![ok(json!({"title": "Posted"}))]);
    let config = ServiceConfig {
        base_url: Some("https://api.test".to_string()),
        ..fast_service()
    };
    let h = harness(config, transport);

    let context = RequestContext::new(HttpMethod::Post, "/v1/posts")
        .with_header("authorization", "Bearer token")
        .with_body(json!({"text": "hello"}));
    let _: Headline = h.client.request(context).await.unwrap();

    let requests = h.transport.requests();
    assert_eq!(requests.len(), 1);
    let sent = &requests[0];
    assert_eq!(sent.method, HttpMethod::Post);
    assert_eq!(sent.url.as_str(), "https://api.test/v1/posts");
    assert_eq!(
        sent.headers,
        vec![("authorization".to_string(), "Bearer token".to_string())]
    );
    assert_eq!(sent.body, Some(json!({"text": "hello"})));
    assert_eq!(sent.timeout, Duration::from_secs(5));
}
