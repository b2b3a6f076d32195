//! End-to-end scenarios driving the full chain against a mocked server.

use std::time::Duration;

use waypoint_http::middleware::{CacheConfig, CircuitBreakerConfig, CompressionConfig, RetryPolicy};
use waypoint_http::{ClientConfig, HttpClient};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer, config: ClientConfig) -> HttpClient {
    let _ = server;
    HttpClient::new(config)
}

#[tokio::test]
async fn retry_on_500_then_success() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let config = ClientConfig::builder()
        .retry(RetryPolicy::fixed(4, Duration::from_millis(1)))
        .build();
    let client = client_for(&server, config);

    let response = client.get(format!("{}/flaky", server.uri())).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().unwrap(), "ok");
}

#[tokio::test]
async fn retry_stops_on_non_retryable_4xx() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/bad-request"))
        .respond_with(ResponseTemplate::new(400))
        .expect(1)
        .mount(&server)
        .await;

    let config = ClientConfig::builder()
        .retry(RetryPolicy::fixed(4, Duration::from_millis(1)))
        .build();
    let client = client_for(&server, config);

    let response = client.get(format!("{}/bad-request", server.uri())).send().await.unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn circuit_breaker_trips_and_rejects_without_calling_the_server() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let breaker = CircuitBreakerConfig::new("integration")
        .with_max_requests(1)
        .with_ready_to_trip(|counts| counts.requests >= 2 && counts.failures >= 2);
    let config = ClientConfig::builder().circuit_breaker(breaker).build();
    let client = client_for(&server, config);

    for _ in 0..2 {
        let response = client.get(format!("{}/down", server.uri())).send().await.unwrap();
        assert_eq!(response.status(), 500);
    }

    let err = client.get(format!("{}/down", server.uri())).send().await.unwrap_err();
    assert!(err.is_middleware());
}

#[tokio::test]
async fn gzip_response_is_transparently_decoded() {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    let server = MockServer::start().await;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(b"compressed payload").unwrap();
    let gzipped = encoder.finish().unwrap();

    Mock::given(method("GET"))
        .and(path("/gz"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-encoding", "gzip")
                .set_body_bytes(gzipped),
        )
        .mount(&server)
        .await;

    let config = ClientConfig::builder().compression(CompressionConfig::default()).build();
    let client = client_for(&server, config);

    let response = client.get(format!("{}/gz", server.uri())).send().await.unwrap();
    assert_eq!(response.text().unwrap(), "compressed payload");
    assert!(response.header("content-encoding").is_none());
}

#[tokio::test]
async fn cache_revalidates_with_etag_and_reconstructs_the_304() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/etagged"))
        .respond_with(move |request: &wiremock::Request| {
            if request.headers.get("if-none-match").is_some() {
                ResponseTemplate::new(304).insert_header("etag", "\"v1\"")
            } else {
                ResponseTemplate::new(200)
                    .insert_header("etag", "\"v1\"")
                    .insert_header("cache-control", "max-age=0")
                    .set_body_string("fresh body")
            }
        })
        .mount(&server)
        .await;

    let config = ClientConfig::builder().cache(CacheConfig::default()).build();
    let client = client_for(&server, config);

    let first = client.get(format!("{}/etagged", server.uri())).send().await.unwrap();
    assert_eq!(first.text().unwrap(), "fresh body");

    let second = client.get(format!("{}/etagged", server.uri())).send().await.unwrap();
    assert_eq!(second.status(), 200);
    assert_eq!(second.text().unwrap(), "fresh body");
}

#[tokio::test]
async fn rate_limiter_admits_burst_then_waits_for_refill() {
    use waypoint_http::middleware::RateLimitConfig;

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/limited"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let rate_limit = RateLimitConfig {
        capacity: 1.0,
        rate: 20.0,
        per_host: false,
        wait_on_limit: true,
        max_wait_duration: Some(Duration::from_secs(1)),
        max_429_retries: 0,
    };
    let config = ClientConfig::builder().rate_limit(rate_limit).build();
    let client = client_for(&server, config);

    let start = std::time::Instant::now();
    client.get(format!("{}/limited", server.uri())).send().await.unwrap();
    client.get(format!("{}/limited", server.uri())).send().await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(30));
}

#[tokio::test]
async fn cookie_jar_carries_a_set_cookie_from_login_into_a_later_request() {
    use waypoint_http::CookieJar;

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).insert_header("set-cookie", "session=abc123; Path=/"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/whoami"))
        .respond_with(move |request: &wiremock::Request| {
            let cookie = request
                .headers
                .get("cookie")
                .map(|v| v.to_str().unwrap())
                .unwrap_or("");
            if cookie.contains("session=abc123") {
                ResponseTemplate::new(200).set_body_string("authenticated")
            } else {
                ResponseTemplate::new(401)
            }
        })
        .mount(&server)
        .await;

    let jar = CookieJar::new();
    let config = ClientConfig::builder().cookie_jar(jar).build();
    let client = client_for(&server, config);

    client.get(format!("{}/login", server.uri())).send().await.unwrap();
    let response = client.get(format!("{}/whoami", server.uri())).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().unwrap(), "authenticated");
}
