#![allow(dead_code)] // OpenAPI doc stubs are only referenced by utoipa macros.

use crate::{
    handlers::sessions::RevokeQuery,
    models::{
        session::{RevokeResponse, SessionResponse},
        user::{
            LoginRequest, LoginResponse, RefreshRequest, RefreshResponse, RegisterRequest,
            UpdateProfileRequest, UserResponse,
        },
    },
};
use utoipa::{
    openapi::security::{Http, HttpAuthScheme, SecurityScheme},
    Modify, OpenApi, ToSchema,
};

/// Error body shared by every non-2xx response.
#[derive(ToSchema)]
struct ErrorBody {
    error: String,
    code: String,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        register_doc,
        login_doc,
        refresh_doc,
        logout_doc,
        me_doc,
        update_me_doc,
        list_sessions_doc,
        revoke_sessions_doc,
        health_doc
    ),
    components(
        schemas(
            RegisterRequest,
            LoginRequest,
            LoginResponse,
            RefreshRequest,
            RefreshResponse,
            UpdateProfileRequest,
            UserResponse,
            SessionResponse,
            RevokeResponse,
            ErrorBody
        )
    ),
    modifiers(&SecuritySchemes),
    tags(
        (name = "Auth", description = "Registration, login and token refresh"),
        (name = "Sessions", description = "Listing and revoking the caller's sessions"),
        (name = "System", description = "Liveness")
    ),
    security(("BearerAuth" = []))
)]
pub struct ApiDoc;

struct SecuritySchemes;

impl Modify for SecuritySchemes {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_default();

        let mut bearer = Http::new(HttpAuthScheme::Bearer);
        bearer.bearer_format = Some("JWT".to_string());

        components.add_security_scheme("BearerAuth", SecurityScheme::Http(bearer));
    }
}

#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = UserResponse),
        (status = 400, description = "Invalid payload", body = ErrorBody),
        (status = 409, description = "Email already registered", body = ErrorBody),
        (status = 429, description = "Rate limited", body = ErrorBody)
    ),
    tag = "Auth",
    security(())
)]
fn register_doc() {}

#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = LoginResponse),
        (status = 400, description = "Invalid payload", body = ErrorBody),
        (status = 401, description = "Invalid credentials", body = ErrorBody),
        (status = 429, description = "Rate limited; see Retry-After", body = ErrorBody)
    ),
    tag = "Auth",
    security(())
)]
fn login_doc() {}

#[utoipa::path(
    post,
    path = "/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New access token", body = RefreshResponse),
        (status = 401, description = "Refresh token invalid or session revoked", body = ErrorBody)
    ),
    tag = "Auth",
    security(())
)]
fn refresh_doc() {}

#[utoipa::path(
    post,
    path = "/auth/logout",
    responses((status = 200, description = "Current session revoked")),
    tag = "Auth"
)]
fn logout_doc() {}

#[utoipa::path(
    get,
    path = "/auth/me",
    responses((status = 200, description = "Current user", body = UserResponse)),
    tag = "Auth"
)]
fn me_doc() {}

#[utoipa::path(
    put,
    path = "/auth/me",
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Profile updated", body = UserResponse),
        (status = 400, description = "Invalid payload", body = ErrorBody)
    ),
    tag = "Auth"
)]
fn update_me_doc() {}

#[utoipa::path(
    get,
    path = "/sessions",
    responses((status = 200, description = "Caller's live sessions", body = [SessionResponse])),
    tag = "Sessions"
)]
fn list_sessions_doc() {}

#[utoipa::path(
    delete,
    path = "/sessions",
    params(RevokeQuery),
    responses(
        (status = 200, description = "Number of sessions revoked", body = RevokeResponse),
        (status = 400, description = "Unknown action or bad session id", body = ErrorBody)
    ),
    tag = "Sessions"
)]
fn revoke_sessions_doc() {}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up")),
    tag = "System",
    security(())
)]
fn health_doc() {}
