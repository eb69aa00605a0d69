use axum::http::{Method, StatusCode};
use finboard_backend::{config::Config, middleware::REQUEST_ID_HEADER};
use uuid::Uuid;

mod support;

use support::{empty_request, send, test_app, test_config, test_state, TEST_SECRET};

#[tokio::test]
async fn every_response_carries_a_request_id() {
    let app = test_app(test_state(test_config()));

    let response = send(&app, empty_request(Method::GET, "/health", None)).await;
    let id = response.headers()[REQUEST_ID_HEADER]
        .to_str()
        .expect("ascii header");
    assert!(Uuid::parse_str(id).is_ok());

    let response = send(&app, empty_request(Method::GET, "/sessions", None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key(REQUEST_ID_HEADER));
}

#[tokio::test]
async fn client_request_id_is_echoed() {
    let app = test_app(test_state(test_config()));

    let mut request = empty_request(Method::GET, "/health", None);
    request
        .headers_mut()
        .insert("x-correlation-id", "corr-req-456".parse().expect("header"));
    let response = send(&app, request).await;

    assert_eq!(response.headers()[REQUEST_ID_HEADER], "corr-req-456");
}

#[tokio::test]
async fn throttled_responses_keep_the_request_id() {
    let mut config = Config::with_secret(TEST_SECRET);
    config.rate_limit_global_burst = 1;
    config.rate_limit_global_rps = 0.01;
    let app = test_app(test_state(config));

    send(&app, empty_request(Method::GET, "/health", None)).await;
    let mut request = empty_request(Method::GET, "/health", None);
    request
        .headers_mut()
        .insert(REQUEST_ID_HEADER, "req-throttled".parse().expect("header"));
    let response = send(&app, request).await;

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()[REQUEST_ID_HEADER], "req-throttled");
}
