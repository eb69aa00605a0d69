//! Request-facing composition of the auth subsystem.
//!
//! Handlers and middleware talk only to [`AuthGateway`]; it sequences the
//! credential store, password verifier, token issuer and session registry.

use chrono::Utc;
use std::sync::Arc;

use crate::config::Config;
use crate::models::session::{NewSession, Session, SessionResponse};
use crate::models::user::{
    normalize_email, LoginRequest, RegisterRequest, UpdateProfileRequest, User,
};
use crate::repositories::credential_store::{CredentialStore, CredentialStoreError};
use crate::services::session_registry::{SessionError, SessionRegistry};
use crate::services::session_store::SessionStore;
use crate::services::token_issuer::{
    IssuedToken, RefreshError, RefreshFailure, Refreshed, TokenIssuer,
};
use crate::types::{SessionId, UserId};
use crate::utils::jwt::{new_token_id, InvalidTokenError};
use crate::utils::password::{dummy_hash, hash_password, verify_password, HashingError};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("unauthenticated")]
    Unauthenticated,
    #[error("invalid token: {}", .0.reason())]
    InvalidToken(InvalidTokenError),
    #[error("refresh rejected: {0}")]
    Refresh(RefreshError),
    #[error("email already registered")]
    EmailTaken,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<CredentialStoreError> for AuthError {
    fn from(err: CredentialStoreError) -> Self {
        match err {
            CredentialStoreError::EmailTaken => AuthError::EmailTaken,
            CredentialStoreError::Storage(err) => AuthError::Internal(err),
        }
    }
}

impl From<SessionError> for AuthError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound => AuthError::Unauthenticated,
            SessionError::Store(err) => AuthError::Internal(err),
        }
    }
}

impl From<RefreshFailure> for AuthError {
    fn from(err: RefreshFailure) -> Self {
        match err {
            RefreshFailure::Rejected(reason) => AuthError::Refresh(reason),
            RefreshFailure::Internal(err) => AuthError::Internal(err),
        }
    }
}

impl From<HashingError> for AuthError {
    fn from(err: HashingError) -> Self {
        AuthError::Internal(anyhow::Error::new(err))
    }
}

/// Identity established for one request from its access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedContext {
    pub user_id: UserId,
    pub role: String,
    pub session_id: SessionId,
}

/// Where a login came from, as recorded on the session.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub address: Option<String>,
    pub agent: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub user: User,
    pub session: Session,
    pub access_token: IssuedToken,
    pub refresh_token: IssuedToken,
}

#[derive(Clone)]
pub struct AuthGateway {
    credentials: Arc<dyn CredentialStore>,
    sessions: SessionRegistry,
    tokens: TokenIssuer,
}

impl AuthGateway {
    pub fn new(
        config: &Config,
        credentials: Arc<dyn CredentialStore>,
        session_store: Arc<dyn SessionStore>,
    ) -> Self {
        let sessions = SessionRegistry::new(session_store, config.refresh_token_ttl());
        let tokens = TokenIssuer::new(config, sessions.clone());
        Self {
            credentials,
            sessions,
            tokens,
        }
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    /// Creates an account. The payload is expected to be validated already.
    pub async fn register(&self, request: RegisterRequest) -> Result<User, AuthError> {
        let email = normalize_email(&request.email);
        if self.credentials.email_exists(&email).await? {
            return Err(AuthError::EmailTaken);
        }

        let password = request.password;
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(anyhow::Error::from)??;

        let user = User::new(
            &email,
            password_hash,
            request.first_name.trim().to_string(),
            request.last_name.trim().to_string(),
            request.role,
        );
        let user = self.credentials.create(&user).await?;
        tracing::info!(user_id = %user.id, "User registered");
        Ok(user)
    }

    /// Verifies credentials, opens a session and mints its token pair.
    ///
    /// Unknown emails and wrong passwords are indistinguishable to the caller,
    /// both in the error returned and in the hashing work performed.
    pub async fn login(
        &self,
        request: LoginRequest,
        client: ClientInfo,
    ) -> Result<LoginOutcome, AuthError> {
        let email = normalize_email(&request.email);
        let user = self.credentials.find_by_email(&email).await?;

        let stored_hash = user
            .as_ref()
            .map(|u| u.password_hash.clone())
            .unwrap_or_else(|| dummy_hash().to_string());
        let password = request.password;
        let matches =
            tokio::task::spawn_blocking(move || verify_password(&password, &stored_hash))
                .await
                .map_err(anyhow::Error::from)?;

        let Some(mut user) = user.filter(|_| matches) else {
            tracing::info!("Login rejected: invalid credentials");
            return Err(AuthError::InvalidCredentials);
        };

        let now = Utc::now();
        self.credentials.record_login(user.id, now).await?;
        user.last_login_at = Some(now);

        let refresh_jti = new_token_id();
        let session = self
            .sessions
            .create(NewSession {
                user_id: user.id,
                role: user.role.clone(),
                client_address: client.address,
                client_agent: client.agent,
                refresh_jti: Some(refresh_jti.clone()),
            })
            .await?;

        let access_token = self
            .tokens
            .issue_access_token(user.id, &user.role, session.id)?;
        let refresh_token = self.tokens.issue_refresh_token(session.id, &refresh_jti)?;

        tracing::info!(user_id = %user.id, session_id = %session.id, "User logged in");
        Ok(LoginOutcome {
            user,
            session,
            access_token,
            refresh_token,
        })
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<Refreshed, AuthError> {
        Ok(self.tokens.refresh(refresh_token).await?)
    }

    /// Stateless check of a bearer access token; never touches the registry.
    pub fn authorize(&self, bearer: Option<&str>) -> Result<AuthenticatedContext, AuthError> {
        let token = bearer.ok_or(AuthError::Unauthenticated)?;
        let claims = self
            .tokens
            .validate(token)
            .map_err(AuthError::InvalidToken)?;
        Ok(AuthenticatedContext {
            user_id: claims.sub,
            role: claims.role,
            session_id: claims.sid,
        })
    }

    /// Updates the session's last activity; failures are logged and dropped.
    pub async fn record_activity(&self, session_id: SessionId) {
        match self.sessions.touch(session_id).await {
            Ok(_) | Err(SessionError::NotFound) => {}
            Err(SessionError::Store(err)) => {
                tracing::warn!(%session_id, error = ?err, "Failed to record session activity");
            }
        }
    }

    pub async fn logout(&self, ctx: &AuthenticatedContext) -> Result<(), AuthError> {
        self.sessions.invalidate(ctx.session_id).await?;
        tracing::info!(user_id = %ctx.user_id, session_id = %ctx.session_id, "User logged out");
        Ok(())
    }

    /// The caller's sessions, most recently active first.
    pub async fn list_sessions(
        &self,
        ctx: &AuthenticatedContext,
    ) -> Result<Vec<SessionResponse>, AuthError> {
        let mut sessions = self.sessions.list_by_user(ctx.user_id).await?;
        sessions.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        Ok(sessions
            .into_iter()
            .map(|session| SessionResponse::from_session(session, ctx.session_id))
            .collect())
    }

    /// Revokes every other session of the caller.
    pub async fn revoke_all(&self, ctx: &AuthenticatedContext) -> Result<u64, AuthError> {
        let revoked = self
            .sessions
            .invalidate_all_for_user(ctx.user_id, Some(ctx.session_id))
            .await?;
        tracing::info!(user_id = %ctx.user_id, revoked, "Revoked other sessions");
        Ok(revoked)
    }

    /// Revokes one of the caller's sessions. Unknown ids and sessions owned by
    /// someone else revoke nothing and still succeed.
    pub async fn revoke_session(
        &self,
        ctx: &AuthenticatedContext,
        session_id: SessionId,
    ) -> Result<u64, AuthError> {
        let session = match self.sessions.get(session_id).await {
            Ok(session) => session,
            Err(SessionError::NotFound) => return Ok(0),
            Err(err) => return Err(err.into()),
        };
        if session.user_id != ctx.user_id {
            tracing::warn!(
                user_id = %ctx.user_id,
                %session_id,
                "Attempt to revoke a session owned by another user"
            );
            return Ok(0);
        }

        let revoked = u64::from(self.sessions.invalidate(session_id).await?);
        tracing::info!(user_id = %ctx.user_id, %session_id, revoked, "Revoked session");
        Ok(revoked)
    }

    pub async fn me(&self, ctx: &AuthenticatedContext) -> Result<User, AuthError> {
        self.credentials
            .find_by_id(ctx.user_id)
            .await?
            .ok_or(AuthError::Unauthenticated)
    }

    pub async fn update_profile(
        &self,
        ctx: &AuthenticatedContext,
        request: UpdateProfileRequest,
    ) -> Result<User, AuthError> {
        self.credentials
            .update_profile(
                ctx.user_id,
                request.first_name.map(|name| name.trim().to_string()),
                request.last_name.map(|name| name.trim().to_string()),
            )
            .await?
            .ok_or(AuthError::Unauthenticated)
    }
}
