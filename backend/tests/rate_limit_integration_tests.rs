use axum::http::{Method, StatusCode};
use finboard_backend::{build_router, config::Config, models::user::RegisterRequest};
use serde_json::json;
use std::{net::SocketAddr, time::Duration};
use tokio::net::TcpListener;

mod support;

use support::{
    body_json, empty_request, json_request, login, register_body, send, test_app, test_state,
    TEST_SECRET,
};

fn login_attempt() -> axum::http::Request<axum::body::Body> {
    // Rejected by the handler after the limiter has counted it.
    json_request(Method::POST, "/auth/login", None, json!({}))
}

async fn spawn_app(config: Config) -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = build_router(test_state(config));

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );
    let handle = tokio::spawn(async move {
        server.await.expect("server should run");
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    (addr, handle)
}

#[tokio::test(start_paused = true)]
async fn sixth_login_attempt_is_throttled_until_a_token_refills() {
    let state = test_state(Config::with_secret(TEST_SECRET));
    // Registered out of band so the auth tier is untouched.
    let request: RegisterRequest =
        serde_json::from_value(register_body("throttled@example.com")).expect("register payload");
    state.gateway.register(request).await.expect("register");
    let app = test_app(state);

    for _ in 0..5 {
        let response = send(&app, login_attempt()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    let response = send(&app, login_attempt()).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["retry-after"], "12");
    assert_eq!(response.headers()["x-ratelimit-limit"], "5");
    assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
    let body = body_json(response).await;
    assert_eq!(body["code"], "AUTH_RATE_LIMIT_EXCEEDED");

    tokio::time::advance(Duration::from_secs(12)).await;

    let session = login(&app, "throttled@example.com").await;
    assert!(!session.access_token.is_empty());
    assert_eq!(session.user["email"], "throttled@example.com");
}

#[tokio::test(start_paused = true)]
async fn auth_tier_does_not_throttle_other_routes() {
    let app = test_app(test_state(Config::with_secret(TEST_SECRET)));

    for _ in 0..6 {
        send(&app, login_attempt()).await;
    }

    let response = send(&app, empty_request(Method::GET, "/health", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test(start_paused = true)]
async fn forwarded_addresses_get_their_own_buckets() {
    let mut config = Config::with_secret(TEST_SECRET);
    config.trust_proxy_headers = true;
    config.rate_limit_ip_requests_per_minute = 3;
    let app = test_app(test_state(config));

    let health_from = |ip: &str| {
        let mut request = empty_request(Method::GET, "/health", None);
        request
            .headers_mut()
            .insert("x-forwarded-for", ip.parse().expect("header value"));
        request
    };

    for _ in 0..3 {
        let response = send(&app, health_from("203.0.113.9")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = send(&app, health_from("203.0.113.9")).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["retry-after"], "20");
    let body = body_json(response).await;
    assert_eq!(body["code"], "IP_RATE_LIMIT_EXCEEDED");

    let response = send(&app, health_from("198.51.100.4")).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test(start_paused = true)]
async fn global_tier_caps_total_throughput() {
    let mut config = Config::with_secret(TEST_SECRET);
    config.rate_limit_global_burst = 2;
    config.rate_limit_global_rps = 1.0;
    let app = test_app(test_state(config));

    for _ in 0..2 {
        let response = send(&app, empty_request(Method::GET, "/health", None)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = send(&app, empty_request(Method::GET, "/health", None)).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["retry-after"], "1");
    assert_eq!(body_json(response).await["code"], "RATE_LIMIT_EXCEEDED");
}

#[tokio::test]
async fn peer_address_is_limited_over_a_real_socket() {
    let mut config = Config::with_secret(TEST_SECRET);
    config.rate_limit_ip_requests_per_minute = 2;
    let (addr, handle) = spawn_app(config).await;

    let client = reqwest::Client::new();
    let url = format!("http://{}/health", addr);

    for _ in 0..2 {
        let resp = client.get(&url).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let resp = client.get(&url).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(resp.headers().contains_key("retry-after"));

    handle.abort();
}
