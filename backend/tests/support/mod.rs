#![allow(dead_code)]
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    response::Response,
    Router,
};
use finboard_backend::{build_router, config::Config, state::AppState};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

pub const TEST_SECRET: &str = "test-jwt-secret-32-chars-minimum!";
pub const TEST_PASSWORD: &str = "correct horse battery";

/// Defaults, with an auth tier wide enough for multi-step flows.
pub fn test_config() -> Config {
    let mut config = Config::with_secret(TEST_SECRET);
    config.rate_limit_auth_capacity = 1_000;
    config
}

pub fn test_state(config: Config) -> AppState {
    AppState::in_memory(config)
}

pub fn test_app(state: AppState) -> Router {
    build_router(state)
}

pub async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.expect("router responds")
}

pub async fn body_json(response: Response) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).expect("json body")
}

pub fn json_request(method: Method, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("build request")
}

pub fn empty_request(method: Method, uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).expect("build request")
}

pub fn register_body(email: &str) -> Value {
    json!({
        "email": email,
        "first_name": "Ada",
        "last_name": "Lovelace",
        "password": TEST_PASSWORD,
    })
}

pub async fn register(app: &Router, email: &str) -> Value {
    let response = send(
        app,
        json_request(Method::POST, "/auth/register", None, register_body(email)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await
}

pub struct LoggedIn {
    pub access_token: String,
    pub refresh_token: String,
    pub user: Value,
}

pub async fn login(app: &Router, email: &str) -> LoggedIn {
    let response = send(
        app,
        json_request(
            Method::POST,
            "/auth/login",
            None,
            json!({ "email": email, "password": TEST_PASSWORD }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    LoggedIn {
        access_token: body["accessToken"].as_str().expect("accessToken").to_string(),
        refresh_token: body["refreshToken"].as_str().expect("refreshToken").to_string(),
        user: body["user"].clone(),
    }
}
