use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use corral_lib::{
    Dispatcher, DispatcherBuilder, ErrorKind, RawResponse, RequestOptions, Result, Transport,
};
use futures::future::join_all;
use http::{HeaderMap, StatusCode};
use pretty_assertions::assert_eq;
use serde_json::json;
use test_utils::{json_mock_server, mock_server};
use url::Url;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn dispatcher() -> Dispatcher {
    DispatcherBuilder::default().dispatcher().unwrap()
}

async fn get(dispatcher: &Dispatcher, url: &str) -> Result<corral_lib::Body> {
    dispatcher.request(url, RequestOptions::default()).await
}

/// Transport which records when calls start and how many overlap,
/// and fails every URL ending in `/fail`
#[derive(Debug, Default)]
struct Recorder {
    delay: Duration,
    running: AtomicUsize,
    peak: AtomicUsize,
    started: Mutex<Vec<String>>,
}

impl Recorder {
    fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for Recorder {
    async fn send(&self, url: &Url, _options: &RequestOptions) -> Result<RawResponse> {
        self.started.lock().unwrap().push(url.path().to_string());
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;
        self.running.fetch_sub(1, Ordering::SeqCst);

        if url.path().ends_with("/fail") {
            return Ok(RawResponse::new(StatusCode::BAD_GATEWAY, ""));
        }
        Ok(RawResponse::new(
            StatusCode::OK,
            json!({ "path": url.path() }).to_string(),
        ))
    }
}

#[tokio::test]
async fn test_six_requests_run_in_two_batches() {
    let server = json_mock_server!(json!({"ok": true}), Duration::from_millis(100));
    let dispatcher = dispatcher();

    let urls: Vec<_> = (0..6).map(|i| format!("{}/item/{i}", server.uri())).collect();
    let start = Instant::now();
    let results = join_all(urls.iter().map(|url| get(&dispatcher, url))).await;
    let elapsed = start.elapsed();

    assert!(results.iter().all(Result::is_ok));
    assert!(elapsed >= Duration::from_millis(200), "took {elapsed:?}");
    assert!(elapsed < Duration::from_millis(400), "took {elapsed:?}");

    let stats = dispatcher.host_stats();
    let (_, host) = &stats.sorted()[0];
    assert_eq!(host.total_requests, 6);
    assert_eq!(host.peak_active, 3);
    assert_eq!(host.buffered_requests, 3);
}

#[tokio::test]
async fn test_identical_concurrent_requests_share_one_call() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"answer": 42}))
                .set_delay(Duration::from_millis(50)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = dispatcher();
    let url = format!("{}/data", server.uri());
    let results = join_all((0..3).map(|_| get(&dispatcher, &url))).await;

    let bodies: Vec<_> = results.into_iter().map(Result::unwrap).collect();
    assert_eq!(*bodies[0], json!({"answer": 42}));
    assert!(bodies.iter().all(|body| Arc::ptr_eq(body, &bodies[0])));

    let stats = dispatcher.stats();
    assert_eq!(stats.requests, 3);
    assert_eq!(stats.coalesced, 2);
    assert_eq!(stats.transport_calls, 1);
    assert_eq!(stats.in_flight, 0);
}

#[tokio::test]
async fn test_waiters_share_the_same_error() {
    let server = mock_server!(
        StatusCode::SERVICE_UNAVAILABLE,
        set_delay(Duration::from_millis(50))
    );
    let dispatcher = dispatcher();
    let url = format!("{}/flaky", server.uri());

    let results = join_all((0..3).map(|_| get(&dispatcher, &url))).await;
    let expected = ErrorKind::HttpStatus {
        url: url.clone(),
        status: StatusCode::SERVICE_UNAVAILABLE,
    };
    for result in results {
        assert_eq!(result.unwrap_err(), expected);
    }
    assert_eq!(dispatcher.stats().transport_calls, 1);
}

#[tokio::test]
async fn test_failed_request_can_be_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let dispatcher = dispatcher();
    let url = format!("{}/broken", server.uri());

    let error = get(&dispatcher, &url).await.unwrap_err();
    assert_eq!(error.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
    assert_eq!(dispatcher.in_flight(), 0);

    // No stale error is replayed, the server is asked again
    let error = get(&dispatcher, &url).await.unwrap_err();
    assert_eq!(error.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
    assert_eq!(dispatcher.stats().transport_calls, 2);
}

#[tokio::test]
async fn test_successful_request_is_not_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([1, 2, 3])))
        .expect(2)
        .mount(&server)
        .await;

    let dispatcher = dispatcher();
    let url = server.uri();
    let first = get(&dispatcher, &url).await.unwrap();
    let second = get(&dispatcher, &url).await.unwrap();

    assert_eq!(first, second);
    assert!(!Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn test_invalid_json_is_a_decode_error() {
    let server = mock_server!(StatusCode::OK, set_body_string("<html>"));
    let dispatcher = dispatcher();

    let error = get(&dispatcher, &server.uri()).await.unwrap_err();
    assert!(matches!(error, ErrorKind::Decode { .. }), "{error}");
    assert_eq!(dispatcher.in_flight(), 0);
}

#[tokio::test]
async fn test_connection_refused_is_a_transport_error() {
    // Grab a free port and close it again
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let dispatcher = dispatcher();

    let error = get(&dispatcher, &format!("http://127.0.0.1:{port}/"))
        .await
        .unwrap_err();
    assert!(matches!(error, ErrorKind::Transport { .. }), "{error}");
    assert_eq!(dispatcher.in_flight(), 0);
}

#[tokio::test]
async fn test_timeout_is_a_transport_error() {
    let server = json_mock_server!(json!({}), Duration::from_millis(500));
    let dispatcher = DispatcherBuilder::builder()
        .timeout(Duration::from_millis(50))
        .build()
        .dispatcher()
        .unwrap();

    let error = get(&dispatcher, &server.uri()).await.unwrap_err();
    assert!(matches!(error, ErrorKind::Transport { .. }), "{error}");
}

#[tokio::test]
async fn test_invalid_url_fails_without_side_effects() {
    let recorder = Recorder::with_delay(Duration::ZERO);
    let dispatcher = Dispatcher::new(Arc::clone(&recorder));

    for url in ["", "example.com/no-scheme", "http://", "data:text/plain,hello"] {
        let error = get(&dispatcher, url).await.unwrap_err();
        assert!(error.is_invalid_url(), "{url}: {error}");
        assert_eq!(error.url(), Some(url));
    }

    assert_eq!(dispatcher.in_flight(), 0);
    assert_eq!(dispatcher.hosts().active_host_count(), 0);
    assert!(recorder.started().is_empty());
}

#[tokio::test]
async fn test_concurrency_never_exceeds_the_limit() {
    let recorder = Recorder::with_delay(Duration::from_millis(20));
    let dispatcher = DispatcherBuilder::builder()
        .concurrency(3_usize)
        .build()
        .dispatcher_with(Arc::clone(&recorder));

    let urls: Vec<_> = (0..12)
        .map(|i| format!("https://api.example.com/{i}"))
        .collect();
    join_all(urls.iter().map(|url| get(&dispatcher, url))).await;

    assert_eq!(recorder.peak.load(Ordering::SeqCst), 3);
    assert_eq!(recorder.started().len(), 12);
}

#[tokio::test]
async fn test_buffered_requests_start_in_submission_order() {
    let recorder = Recorder::with_delay(Duration::from_millis(10));
    let dispatcher = DispatcherBuilder::builder()
        .concurrency(2_usize)
        .build()
        .dispatcher_with(Arc::clone(&recorder));

    let urls: Vec<_> = (0..8)
        .map(|i| format!("https://api.example.com/{i}"))
        .collect();
    join_all(urls.iter().map(|url| get(&dispatcher, url))).await;

    let expected: Vec<_> = (0..8).map(|i| format!("/{i}")).collect();
    assert_eq!(recorder.started(), expected);
}

#[tokio::test]
async fn test_abandoned_buffered_request_is_never_sent() {
    let recorder = Recorder::with_delay(Duration::from_millis(50));
    let dispatcher = DispatcherBuilder::builder()
        .concurrency(1_usize)
        .build()
        .dispatcher_with(Arc::clone(&recorder));

    // The caller of `/gone` gives up while its request still waits for a slot
    let (first, gone, kept) = tokio::join!(
        get(&dispatcher, "https://api.example.com/first"),
        tokio::time::timeout(
            Duration::from_millis(10),
            get(&dispatcher, "https://api.example.com/gone")
        ),
        get(&dispatcher, "https://api.example.com/kept"),
    );

    assert!(first.is_ok());
    assert!(gone.is_err());
    assert!(kept.is_ok());
    assert_eq!(recorder.started(), vec!["/first", "/kept"]);

    let stats = dispatcher.stats();
    assert_eq!(stats.transport_calls, 2);
    assert_eq!(stats.in_flight, 0);
    let host_stats = dispatcher.host_stats();
    let (_, host) = &host_stats.sorted()[0];
    assert_eq!(host.cancelled_requests, 1);

    // Asking again performs a fresh call
    get(&dispatcher, "https://api.example.com/gone").await.unwrap();
    assert_eq!(recorder.started(), vec!["/first", "/kept", "/gone"]);
}

#[tokio::test]
async fn test_failure_does_not_affect_siblings() {
    let recorder = Recorder::with_delay(Duration::from_millis(5));
    let dispatcher = DispatcherBuilder::builder()
        .concurrency(1_usize)
        .build()
        .dispatcher_with(Arc::clone(&recorder));

    let urls = [
        "https://a.example.com/fail",
        "https://a.example.com/one",
        "https://a.example.com/two",
        "https://b.example.com/fail",
        "https://b.example.com/three",
    ];
    let results = join_all(urls.iter().map(|url| get(&dispatcher, url))).await;

    for (url, result) in urls.iter().zip(results) {
        if url.ends_with("/fail") {
            assert_eq!(result.unwrap_err().status(), Some(StatusCode::BAD_GATEWAY));
        } else {
            assert!(result.is_ok(), "{url}");
        }
    }
    assert_eq!(recorder.started().len(), 5);
}

#[tokio::test]
async fn test_busy_host_does_not_delay_other_hosts() {
    let slow = json_mock_server!(json!("slow"), Duration::from_millis(200));
    let fast = json_mock_server!(json!("fast"));
    let dispatcher = DispatcherBuilder::builder()
        .concurrency(1_usize)
        .build()
        .dispatcher()
        .unwrap();

    let burst: Vec<_> = (0..5)
        .map(|i| {
            let dispatcher = dispatcher.clone();
            let url = format!("{}/{i}", slow.uri());
            tokio::spawn(async move { get(&dispatcher, &url).await })
        })
        .collect();
    // Let the burst occupy the slow host
    tokio::time::sleep(Duration::from_millis(20)).await;

    let start = Instant::now();
    let body = get(&dispatcher, &fast.uri()).await.unwrap();
    assert_eq!(*body, json!("fast"));
    assert!(start.elapsed() < Duration::from_millis(150));

    for handle in burst {
        assert!(handle.await.unwrap().is_ok());
    }
}

#[tokio::test]
async fn test_idle_hosts_can_be_evicted() {
    let server = json_mock_server!(json!({}));
    let dispatcher = dispatcher();

    get(&dispatcher, &server.uri()).await.unwrap();
    assert_eq!(dispatcher.hosts().active_host_count(), 1);
    assert_eq!(dispatcher.evict_idle_hosts(Duration::from_secs(60)), 0);
    assert_eq!(dispatcher.evict_idle_hosts(Duration::ZERO), 1);
    assert_eq!(dispatcher.hosts().active_host_count(), 0);

    // A fresh queue is created on demand
    get(&dispatcher, &server.uri()).await.unwrap();
    assert_eq!(dispatcher.hosts().active_host_count(), 1);
}

#[tokio::test]
async fn test_default_transport_sends_configured_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("user-agent", "corral-test"))
        .and(header("x-global", "1"))
        .and(header("x-call", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(null)))
        .expect(1)
        .mount(&server)
        .await;

    let mut custom_headers = HeaderMap::new();
    custom_headers.insert("x-global", "1".parse().unwrap());
    let dispatcher = DispatcherBuilder::builder()
        .user_agent("corral-test")
        .custom_headers(custom_headers)
        .build()
        .dispatcher()
        .unwrap();

    let mut headers = HeaderMap::new();
    headers.insert("x-call", "2".parse().unwrap());
    let body = dispatcher
        .request(&server.uri(), RequestOptions::with_headers(headers))
        .await
        .unwrap();
    assert_eq!(*body, json!(null));
}
