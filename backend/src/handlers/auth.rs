use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, Extension, FromRequestParts, State},
    http::{request::Parts, StatusCode},
    Json,
};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;

use crate::{
    error::AppError,
    models::user::{
        LoginRequest, LoginResponse, RefreshRequest, RefreshResponse, RegisterRequest,
        UpdateProfileRequest, UserResponse,
    },
    services::auth_gateway::{AuthenticatedContext, ClientInfo},
    state::AppState,
    utils::client::{client_ip, user_agent},
    validation::Validate,
};

impl FromRequestParts<AppState> for ClientInfo {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0);
        Ok(ClientInfo {
            address: client_ip(&parts.headers, peer, state.config.trust_proxy_headers)
                .map(|ip| ip.to_string()),
            agent: user_agent(&parts.headers),
        })
    }
}

/// Unwraps a JSON body, reporting malformed payloads as 400.
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AppError::BadRequest(rejection.body_text()))
}

pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<UserResponse>), AppError> {
    let payload = json_body(payload)?;
    payload.validate()?;

    let user = state.gateway.register(payload).await?;
    Ok((StatusCode::CREATED, Json(UserResponse::from(user))))
}

pub async fn login(
    State(state): State<AppState>,
    client: ClientInfo,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, AppError> {
    let payload = json_body(payload)?;
    payload.validate()?;

    let outcome = state.gateway.login(payload, client).await?;
    Ok(Json(LoginResponse {
        access_token: outcome.access_token.token,
        refresh_token: outcome.refresh_token.token,
        user: UserResponse::from(outcome.user),
    }))
}

pub async fn refresh(
    State(state): State<AppState>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Json<RefreshResponse>, AppError> {
    let payload = json_body(payload)?;
    if payload.refresh_token.trim().is_empty() {
        return Err(AppError::BadRequest("Refresh token is required".into()));
    }

    let refreshed = state.gateway.refresh(&payload.refresh_token).await?;
    Ok(Json(RefreshResponse {
        access_token: refreshed.access_token.token,
        refresh_token: refreshed.refresh_token.map(|issued| issued.token),
    }))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(context): Extension<AuthenticatedContext>,
) -> Result<Json<Value>, AppError> {
    state.gateway.logout(&context).await?;
    Ok(Json(json!({ "message": "Logged out" })))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(context): Extension<AuthenticatedContext>,
) -> Result<Json<UserResponse>, AppError> {
    let user = state.gateway.me(&context).await?;
    Ok(Json(UserResponse::from(user)))
}

pub async fn update_me(
    State(state): State<AppState>,
    Extension(context): Extension<AuthenticatedContext>,
    payload: Result<Json<UpdateProfileRequest>, JsonRejection>,
) -> Result<Json<UserResponse>, AppError> {
    let payload = json_body(payload)?;
    payload.validate()?;

    let user = state.gateway.update_profile(&context, payload).await?;
    Ok(Json(UserResponse::from(user)))
}
