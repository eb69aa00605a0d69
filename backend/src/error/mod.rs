use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;

use crate::services::auth_gateway::AuthError;

/// Body of every error response: `{"error": ..., "code": ...}`.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Errors surfaced by HTTP handlers.
///
/// Messages are client-facing. Internal errors are logged in full and answered
/// with a fixed message.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Validation(Vec<String>),
    Unauthorized(String),
    Conflict(String),
    InternalServerError(anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::Conflict(_) => "CONFLICT",
            AppError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code().to_string();
        let (error, details) = match self {
            AppError::BadRequest(msg) | AppError::Unauthorized(msg) | AppError::Conflict(msg) => {
                (msg, None)
            }
            AppError::Validation(errors) => (
                "Validation failed".to_string(),
                Some(serde_json::json!({ "errors": errors })),
            ),
            AppError::InternalServerError(err) => {
                tracing::error!(error = ?err, "Internal server error");
                ("Internal server error".to_string(), None)
            }
        };

        (
            status,
            Json(ErrorResponse {
                error,
                code,
                details,
            }),
        )
            .into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalServerError(err)
    }
}

/// Collapses auth failures so callers cannot tell which check failed.
impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials => {
                AppError::Unauthorized("Invalid email or password".to_string())
            }
            AuthError::Unauthenticated | AuthError::InvalidToken(_) => {
                AppError::Unauthorized("Unauthorized".to_string())
            }
            AuthError::Refresh(reason) => {
                tracing::debug!(%reason, "Refresh rejected");
                AppError::Unauthorized("Invalid or expired refresh token".to_string())
            }
            AuthError::EmailTaken => AppError::Conflict("Email already registered".to_string()),
            AuthError::Internal(err) => AppError::InternalServerError(err),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut messages: Vec<String> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter()
                    .map(move |e| format!("{}: {}", field, e.code.as_ref()))
            })
            .collect();
        messages.sort();
        AppError::Validation(messages)
    }
}
