use axum::{
    extract::{rejection::QueryRejection, Extension, Query, State},
    Json,
};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::{
    error::AppError,
    models::session::{RevokeResponse, SessionResponse},
    services::auth_gateway::AuthenticatedContext,
    state::AppState,
    types::SessionId,
};

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct RevokeQuery {
    /// `revoke-all` or `revoke-session`.
    pub action: Option<String>,
    /// Required with `revoke-session`.
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RevokeAction {
    All,
    One(SessionId),
}

impl RevokeQuery {
    fn action(&self) -> Result<RevokeAction, AppError> {
        match self.action.as_deref() {
            Some("revoke-all") => Ok(RevokeAction::All),
            Some("revoke-session") => {
                let raw = self
                    .session_id
                    .as_deref()
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .ok_or_else(|| AppError::BadRequest("sessionId is required".into()))?;
                let id = raw
                    .parse::<SessionId>()
                    .map_err(|_| AppError::BadRequest("Invalid sessionId".into()))?;
                Ok(RevokeAction::One(id))
            }
            Some(_) => Err(AppError::BadRequest("Unknown action".into())),
            None => Err(AppError::BadRequest("action is required".into())),
        }
    }
}

pub async fn list_sessions(
    State(state): State<AppState>,
    Extension(context): Extension<AuthenticatedContext>,
) -> Result<Json<Vec<SessionResponse>>, AppError> {
    let sessions = state.gateway.list_sessions(&context).await?;
    Ok(Json(sessions))
}

pub async fn revoke_sessions(
    State(state): State<AppState>,
    Extension(context): Extension<AuthenticatedContext>,
    query: Result<Query<RevokeQuery>, QueryRejection>,
) -> Result<Json<RevokeResponse>, AppError> {
    let Query(query) = query.map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;

    let revoked = match query.action()? {
        RevokeAction::All => state.gateway.revoke_all(&context).await?,
        RevokeAction::One(session_id) => {
            state.gateway.revoke_session(&context, session_id).await?
        }
    };
    Ok(Json(RevokeResponse { revoked }))
}
