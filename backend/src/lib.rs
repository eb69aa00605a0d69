pub mod config;
pub mod db;
pub mod docs;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod repositories;
pub mod services;
pub mod state;
pub mod types;
pub mod utils;
pub mod validation;

use axum::{
    http::{HeaderValue, Method},
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::middleware::rate_limit;
use crate::state::AppState;

/// Assembles the HTTP surface of the auth subsystem.
///
/// Every request passes the per-address and global rate limits. Login and
/// register also draw from the auth-endpoint bucket.
pub fn build_router(state: AppState) -> Router {
    let credential_routes = Router::new()
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/login", post(handlers::auth::login))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            rate_limit::auth_rate_limit,
        ));

    let public_routes = Router::new()
        .route("/auth/refresh", post(handlers::auth::refresh))
        .route("/health", get(handlers::health::health));

    let protected_routes = Router::new()
        .route("/auth/logout", post(handlers::auth::logout))
        .route(
            "/auth/me",
            get(handlers::auth::me).put(handlers::auth::update_me),
        )
        .route(
            "/sessions",
            get(handlers::sessions::list_sessions).delete(handlers::sessions::revoke_sessions),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth,
        ));

    let mut app = Router::new()
        .merge(credential_routes)
        .merge(public_routes)
        .merge(protected_routes);
    if !state.config.production_mode {
        app = app.merge(
            SwaggerUi::new("/api/docs").url("/api-doc/openapi.json", docs::ApiDoc::openapi()),
        );
    }

    let cors = cors_layer(&state.config.cors_allow_origins);
    app.layer(axum_middleware::from_fn_with_state(
        state.clone(),
        rate_limit::rate_limit,
    ))
    .layer(
        ServiceBuilder::new()
            .layer(axum_middleware::from_fn(middleware::request_id))
            .layer(TraceLayer::new_for_http())
            .layer(axum_middleware::from_fn(middleware::log_error_responses))
            .layer(cors),
    )
    .with_state(state)
}

fn cors_layer(allowed: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any)
        .max_age(std::time::Duration::from_secs(24 * 60 * 60));

    if allowed.is_empty() {
        return base.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin.trim()) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    base.allow_origin(AllowOrigin::list(origins))
}
