//! Resilience-layer integration tests: retry, circuit breaking, rate-limit
//! tracking, the inactivity watchdog, and the in-flight signal, all driven
//! over real HTTP against mock endpoints.

use futures::StreamExt;
use resilient_agent::{
    AgentOptions, CircuitBreaker, CircuitBreakerConfig, CircuitState, Client, Error,
    MetricsCollector, MessagesRequest, RateLimiter, RequestExecutor, RetryConfig, StreamItem,
    ToolRegistry,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sse_text_response() -> String {
    [
        ("message_start", json!({"type":"message_start","message":{}})),
        ("content_block_start", json!({"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}})),
        ("content_block_delta", json!({"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"recovered"}})),
        ("content_block_stop", json!({"type":"content_block_stop","index":0})),
        ("message_stop", json!({"type":"message_stop"})),
    ]
    .iter()
    .map(|(name, payload)| format!("event: {name}\ndata: {payload}\n\n"))
    .collect()
}

fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig::new()
        .with_max_attempts(max_attempts)
        .with_initial_delay(Duration::from_millis(10))
        .with_jitter_factor(0.0)
}

fn options_for(server_uri: &str, retry: RetryConfig) -> AgentOptions {
    AgentOptions::builder()
        .model("test-model")
        .base_url(format!("{server_uri}/v1"))
        .api_key("test-key")
        .retry(retry)
        .build()
        .unwrap()
}

async fn drain(client: &mut Client) -> Result<Vec<StreamItem>, Error> {
    let mut items = Vec::new();
    while let Some(item) = client.receive().await? {
        items.push(item);
    }
    Ok(items)
}

#[tokio::test]
async fn test_transient_server_error_is_retried() {
    let server = MockServer::start().await;

    // First call answers 503; mounted first so it wins exactly once.
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(sse_text_response(), "text/event-stream"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut client = Client::new(options_for(&server.uri(), fast_retry(3))).unwrap();
    client.send("go").await.unwrap();

    let items = drain(&mut client).await.unwrap();
    assert_eq!(items, vec![StreamItem::Text("recovered".to_string())]);

    let stats = client.metrics().stats();
    assert_eq!(stats.retry_attempts, 1);
    assert_eq!(stats.successful_requests, 1);
    assert_eq!(stats.failed_requests, 0);
}

#[tokio::test]
async fn test_authentication_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .expect(1)
        .mount(&server)
        .await;

    let mut client = Client::new(options_for(&server.uri(), fast_retry(3))).unwrap();
    client.send("go").await.unwrap();

    let err = drain(&mut client).await.unwrap_err();
    assert!(matches!(err, Error::Authentication { .. }));
    assert!(!err.is_retryable());
    assert_eq!(client.metrics().stats().retry_attempts, 0);

    // The error was surfaced once; the stream is closed now.
    assert!(client.receive().await.unwrap().is_none());
    assert!(!client.is_in_flight());
}

#[tokio::test]
async fn test_validation_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(422).set_body_string("bad request"))
        .expect(1)
        .mount(&server)
        .await;

    let mut client = Client::new(options_for(&server.uri(), fast_retry(3))).unwrap();
    client.send("go").await.unwrap();

    let err = drain(&mut client).await.unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));
}

#[tokio::test]
async fn test_429_feeds_rate_limiter_and_fails_fast_afterwards() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("Retry-After", "7")
                .set_body_string("too many requests"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut client = Client::new(options_for(&server.uri(), fast_retry(1))).unwrap();
    client.send("go").await.unwrap();

    let err = drain(&mut client).await.unwrap_err();
    match &err {
        Error::RateLimit { retry_after, .. } => {
            assert_eq!(*retry_after, Some(Duration::from_secs(7)));
        }
        other => panic!("expected RateLimit, got {:?}", other),
    }
    assert!(client.rate_limiter().is_rate_limited().await);
    assert_eq!(client.metrics().stats().rate_limit_hits, 1);

    // Second request never dials out: the limiter gate rejects locally
    // (mock would fail its expect(1) otherwise).
    client.send("again").await.unwrap();
    let err = drain(&mut client).await.unwrap_err();
    match err {
        Error::RateLimit { status_code, .. } => assert_eq!(status_code, None),
        other => panic!("expected local RateLimit, got {:?}", other),
    }
}

#[tokio::test]
async fn test_breaker_trips_and_short_circuits_before_dialing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(2)
        .mount(&server)
        .await;

    let mut options = options_for(&server.uri(), fast_retry(1));
    options.breaker = CircuitBreakerConfig {
        failure_threshold: 2,
        recovery_timeout: Duration::from_secs(60),
        half_open_success_threshold: 1,
    };

    let mut client = Client::new(options).unwrap();

    for _ in 0..2 {
        client.send("go").await.unwrap();
        let err = drain(&mut client).await.unwrap_err();
        assert!(matches!(err, Error::Server { .. }));
    }
    assert_eq!(client.breaker().state().await, CircuitState::Open);
    assert_eq!(client.metrics().stats().circuit_breaker_opens, 1);

    // Third request is rejected by the breaker without an HTTP call.
    client.send("go").await.unwrap();
    let err = drain(&mut client).await.unwrap_err();
    assert!(matches!(err, Error::CircuitOpen { .. }));
    assert!(err.is_retryable());

    // Operator reset re-enables the endpoint.
    client.breaker().reset().await;
    assert_eq!(client.breaker().state().await, CircuitState::Closed);
}

#[tokio::test]
async fn test_breaker_checked_before_rate_limiter() {
    // Both gates are tripped; the breaker must win.
    let metrics = Arc::new(MetricsCollector::new(true));
    let breaker = Arc::new(
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_secs(60),
            half_open_success_threshold: 1,
        })
        .with_metrics(metrics.clone()),
    );
    breaker.record_failure().await;

    let limiter = Arc::new(RateLimiter::new());
    limiter.record_rate_limit(429, Some("60")).await;

    let options = options_for("http://localhost:1", fast_retry(1));
    let executor = RequestExecutor::new(
        options.clone(),
        breaker,
        limiter,
        metrics,
        Arc::new(ToolRegistry::new()),
    )
    .unwrap();

    let mut handle = executor.execute(MessagesRequest::from_prompt(&options, "go"));
    let err = handle.next().await.unwrap().unwrap_err();
    assert!(matches!(err, Error::CircuitOpen { .. }));
}

#[tokio::test]
async fn test_stream_inactivity_watchdog_fires() {
    // A raw server that sends one event and then goes quiet.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 8192];
                let _ = socket.read(&mut buf).await;
                let head = "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\n\r\n";
                let event =
                    "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{}}\n\n";
                let chunk = format!("{:x}\r\n{event}\r\n", event.len());
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(chunk.as_bytes()).await;
                let _ = socket.flush().await;
                // Stall without closing; only the watchdog can end this.
                tokio::time::sleep(Duration::from_secs(30)).await;
            });
        }
    });

    let options = AgentOptions::builder()
        .model("test-model")
        .base_url(format!("http://{addr}/v1"))
        .api_key("test-key")
        .retry(fast_retry(1))
        .stream_inactivity_timeout(Duration::from_millis(150))
        .build()
        .unwrap();

    let mut client = Client::new(options).unwrap();
    client.send("go").await.unwrap();

    let err = drain(&mut client).await.unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }));
    assert!(err.is_retryable());
    assert_eq!(client.metrics().stats().stream_inactivity_timeouts, 1);
    assert!(!client.is_in_flight());

    server.abort();
}

#[tokio::test]
async fn test_dropping_handle_cancels_pending_backoff() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    // Long backoff: the driver will sit in its retry sleep.
    let retry = RetryConfig::new()
        .with_max_attempts(5)
        .with_initial_delay(Duration::from_secs(30))
        .with_jitter_factor(0.0);

    let metrics = Arc::new(MetricsCollector::new(true));
    let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default()));
    let limiter = Arc::new(RateLimiter::new());
    let options = options_for(&server.uri(), retry);
    let executor = RequestExecutor::new(
        options.clone(),
        breaker,
        limiter,
        metrics,
        Arc::new(ToolRegistry::new()),
    )
    .unwrap();

    let handle = executor.execute(MessagesRequest::from_prompt(&options, "go"));
    let mut signal = handle.in_flight_signal();

    // Give the first attempt time to fail and enter backoff, then walk away.
    tokio::time::sleep(Duration::from_millis(200)).await;
    drop(handle);

    // The driver must notice promptly, not after the 30s backoff.
    tokio::time::timeout(Duration::from_secs(2), signal.changed())
        .await
        .expect("in-flight signal should settle quickly")
        .unwrap();
    assert!(!*signal.borrow());
}

#[tokio::test]
async fn test_error_carries_request_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let options = options_for(&server.uri(), fast_retry(1));
    let metrics = Arc::new(MetricsCollector::new(true));
    let executor = RequestExecutor::new(
        options.clone(),
        Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default())),
        Arc::new(RateLimiter::new()),
        metrics,
        Arc::new(ToolRegistry::new()),
    )
    .unwrap();

    let mut handle = executor.execute(MessagesRequest::from_prompt(&options, "go"));
    let expected_id = handle.request_id().to_string();
    let err = handle.next().await.unwrap().unwrap_err();
    assert_eq!(err.request_id(), Some(expected_id.as_str()));
}
