use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::config::Config;
use crate::models::session::Session;
use crate::services::session_registry::{SessionError, SessionRegistry};
use crate::services::session_store::RotateOutcome;
use crate::types::{SessionId, UserId};
use crate::utils::jwt::{
    decode_token, encode_token, new_token_id, Claims, InvalidTokenError, RefreshClaims, TokenKind,
};

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    #[error("token-invalid")]
    TokenInvalid,
    #[error("session-revoked")]
    SessionRevoked,
}

#[derive(Debug, thiserror::Error)]
pub enum RefreshFailure {
    #[error("refresh rejected: {0}")]
    Rejected(RefreshError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<SessionError> for RefreshFailure {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound => RefreshFailure::Rejected(RefreshError::SessionRevoked),
            SessionError::Store(err) => RefreshFailure::Internal(err),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Refreshed {
    pub access_token: IssuedToken,
    /// Replacement refresh token; only minted when rotation is enabled.
    pub refresh_token: Option<IssuedToken>,
    pub session: Session,
}

/// Mints and checks the signed tokens of the auth subsystem.
///
/// Access tokens are verified statelessly. Refresh tokens are additionally
/// checked against the session registry, so revoking a session cuts off
/// further refreshes while already-issued access tokens run to expiry.
#[derive(Clone)]
pub struct TokenIssuer {
    access_secret: String,
    refresh_secret: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
    rotate_refresh_tokens: bool,
    registry: SessionRegistry,
}

impl TokenIssuer {
    pub fn new(config: &Config, registry: SessionRegistry) -> Self {
        Self {
            access_secret: config.jwt_secret.clone(),
            refresh_secret: config.refresh_secret().to_string(),
            access_ttl: config.access_token_ttl(),
            refresh_ttl: config.refresh_token_ttl(),
            rotate_refresh_tokens: config.refresh_token_rotation,
            registry,
        }
    }

    pub fn issue_access_token(
        &self,
        user_id: UserId,
        role: &str,
        session_id: SessionId,
    ) -> anyhow::Result<IssuedToken> {
        let claims = Claims::new(user_id, role.to_string(), session_id, self.access_ttl);
        Ok(IssuedToken {
            token: encode_token(&claims, &self.access_secret)?,
            expires_at: claims.expires_at(),
        })
    }

    pub fn issue_refresh_token(
        &self,
        session_id: SessionId,
        jti: &str,
    ) -> anyhow::Result<IssuedToken> {
        let claims = RefreshClaims::new(session_id, jti.to_string(), self.refresh_ttl);
        Ok(IssuedToken {
            token: encode_token(&claims, &self.refresh_secret)?,
            expires_at: claims.expires_at(),
        })
    }

    pub fn validate(&self, token: &str) -> Result<Claims, InvalidTokenError> {
        let claims: Claims = decode_token(token, &self.access_secret)?;
        if claims.typ != TokenKind::Access {
            return Err(InvalidTokenError::Malformed);
        }
        Ok(claims)
    }

    pub fn validate_refresh(&self, token: &str) -> Result<RefreshClaims, InvalidTokenError> {
        let claims: RefreshClaims = decode_token(token, &self.refresh_secret)?;
        if claims.typ != TokenKind::Refresh {
            return Err(InvalidTokenError::Malformed);
        }
        Ok(claims)
    }

    /// Exchanges a refresh token for a new access token once the bound
    /// session is confirmed to still exist.
    pub async fn refresh(&self, refresh_token: &str) -> Result<Refreshed, RefreshFailure> {
        let claims = self.validate_refresh(refresh_token).map_err(|err| {
            tracing::debug!(reason = err.reason(), "Refresh token rejected");
            RefreshFailure::Rejected(RefreshError::TokenInvalid)
        })?;

        if self.rotate_refresh_tokens {
            return self.refresh_rotating(&claims).await;
        }

        let current = self.registry.get(claims.sid).await?;
        if current.refresh_jti.as_deref().is_some_and(|jti| jti != claims.jti) {
            return Err(RefreshFailure::Rejected(RefreshError::SessionRevoked));
        }
        let session = self.registry.touch(claims.sid).await?;

        let access_token = self.issue_access_token(session.user_id, &session.role, session.id)?;
        Ok(Refreshed {
            access_token,
            refresh_token: None,
            session,
        })
    }

    async fn refresh_rotating(&self, claims: &RefreshClaims) -> Result<Refreshed, RefreshFailure> {
        let replacement = new_token_id();
        let session = match self
            .registry
            .rotate_refresh(claims.sid, &claims.jti, &replacement)
            .await?
        {
            RotateOutcome::Rotated(session) => session,
            RotateOutcome::Stale => {
                tracing::warn!(
                    session_id = %claims.sid,
                    "Superseded refresh token presented, revoking session"
                );
                self.registry.invalidate(claims.sid).await?;
                return Err(RefreshFailure::Rejected(RefreshError::SessionRevoked));
            }
            RotateOutcome::Missing => {
                return Err(RefreshFailure::Rejected(RefreshError::SessionRevoked));
            }
        };

        let access_token = self.issue_access_token(session.user_id, &session.role, session.id)?;
        let refresh_token = self.issue_refresh_token(session.id, &replacement)?;
        Ok(Refreshed {
            access_token,
            refresh_token: Some(refresh_token),
            session,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::session::NewSession;
    use crate::services::session_store::InMemorySessionStore;
    use std::sync::Arc;

    const SECRET: &str = "token-issuer-test-secret-0123456789";

    fn issuer_with(config: Config) -> TokenIssuer {
        let registry = SessionRegistry::new(
            Arc::new(InMemorySessionStore::new()),
            config.refresh_token_ttl(),
        );
        TokenIssuer::new(&config, registry)
    }

    fn issuer() -> TokenIssuer {
        issuer_with(Config::with_secret(SECRET))
    }

    async fn login(issuer: &TokenIssuer, user_id: UserId) -> (Session, IssuedToken) {
        let jti = new_token_id();
        let mut new = NewSession::new(user_id, "user");
        new.refresh_jti = Some(jti.clone());
        let session = issuer.registry.create(new).await.unwrap();
        let refresh = issuer.issue_refresh_token(session.id, &jti).unwrap();
        (session, refresh)
    }

    fn rejection(result: Result<Refreshed, RefreshFailure>) -> RefreshError {
        match result {
            Err(RefreshFailure::Rejected(reason)) => reason,
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn access_token_validates_to_its_subject_and_role() {
        let issuer = issuer();
        let user_id = UserId::new();
        let session_id = SessionId::new();
        let issued = issuer.issue_access_token(user_id, "admin", session_id).unwrap();

        let claims = issuer.validate(&issued.token).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.role, "admin");
        assert_eq!(claims.sid, session_id);
        assert_eq!(claims.expires_at(), issued.expires_at);
    }

    #[test]
    fn refresh_token_is_not_an_access_token() {
        let config = Config::with_secret(SECRET);
        let issuer = issuer_with(config);
        let refresh = issuer.issue_refresh_token(SessionId::new(), "jti").unwrap();
        assert_eq!(
            issuer.validate(&refresh.token).unwrap_err(),
            InvalidTokenError::Malformed
        );

        let access = issuer
            .issue_access_token(UserId::new(), "user", SessionId::new())
            .unwrap();
        assert_eq!(
            issuer.validate_refresh(&access.token).unwrap_err(),
            InvalidTokenError::Malformed
        );
    }

    #[test]
    fn distinct_refresh_secret_is_used_for_refresh_tokens() {
        let mut config = Config::with_secret(SECRET);
        config.jwt_refresh_secret = Some("another-refresh-secret-0123456789".into());
        let issuer = issuer_with(config);

        let refresh = issuer.issue_refresh_token(SessionId::new(), "jti").unwrap();
        assert!(issuer.validate_refresh(&refresh.token).is_ok());
        assert!(decode_token::<RefreshClaims>(&refresh.token, SECRET).is_err());
    }

    #[tokio::test]
    async fn refresh_issues_access_token_for_live_session() {
        let issuer = issuer();
        let user_id = UserId::new();
        let (session, refresh) = login(&issuer, user_id).await;

        let refreshed = issuer.refresh(&refresh.token).await.unwrap();
        assert!(refreshed.refresh_token.is_none());
        let claims = issuer.validate(&refreshed.access_token.token).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.sid, session.id);
        assert!(refreshed.session.last_activity >= session.last_activity);

        // Without rotation the same refresh token keeps working.
        assert!(issuer.refresh(&refresh.token).await.is_ok());
    }

    #[tokio::test]
    async fn refresh_after_revocation_is_session_revoked() {
        let issuer = issuer();
        let user_id = UserId::new();
        let (session, refresh) = login(&issuer, user_id).await;
        let access = issuer.issue_access_token(user_id, "user", session.id).unwrap();

        issuer.registry.invalidate(session.id).await.unwrap();

        assert_eq!(
            rejection(issuer.refresh(&refresh.token).await),
            RefreshError::SessionRevoked
        );
        assert!(issuer.validate(&access.token).is_ok());
    }

    #[tokio::test]
    async fn garbage_refresh_token_is_token_invalid() {
        assert_eq!(
            rejection(issuer().refresh("not-a-token").await),
            RefreshError::TokenInvalid
        );
    }

    #[tokio::test]
    async fn rotation_replaces_refresh_token_and_detects_replay() {
        let mut config = Config::with_secret(SECRET);
        config.refresh_token_rotation = true;
        let issuer = issuer_with(config);
        let (session, original) = login(&issuer, UserId::new()).await;

        let refreshed = issuer.refresh(&original.token).await.unwrap();
        let rotated = refreshed.refresh_token.expect("rotated refresh token");
        assert_ne!(rotated.token, original.token);

        // Replaying the superseded token revokes the whole session.
        assert_eq!(
            rejection(issuer.refresh(&original.token).await),
            RefreshError::SessionRevoked
        );
        assert!(matches!(
            issuer.registry.get(session.id).await,
            Err(SessionError::NotFound)
        ));
        assert_eq!(
            rejection(issuer.refresh(&rotated.token).await),
            RefreshError::SessionRevoked
        );
    }

    #[tokio::test]
    async fn mismatched_refresh_jti_is_rejected_without_touching_the_session() {
        let issuer = issuer();
        let (session, _) = login(&issuer, UserId::new()).await;
        let foreign = issuer
            .issue_refresh_token(session.id, &new_token_id())
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(
            rejection(issuer.refresh(&foreign.token).await),
            RefreshError::SessionRevoked
        );
        let stored = issuer.registry.get(session.id).await.unwrap();
        assert_eq!(stored.last_activity, session.last_activity);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn refresh_racing_invalidate_sees_live_or_revoked_session() {
        let issuer = issuer();
        let (session, refresh) = login(&issuer, UserId::new()).await;

        let mut handles = Vec::new();
        for _ in 0..32 {
            let issuer = issuer.clone();
            let token = refresh.token.clone();
            handles.push(tokio::spawn(async move { issuer.refresh(&token).await }));
        }
        let revoker = {
            let issuer = issuer.clone();
            tokio::spawn(async move { issuer.registry.invalidate(session.id).await })
        };

        for handle in handles {
            match handle.await.unwrap() {
                Ok(refreshed) => assert_eq!(refreshed.session.id, session.id),
                Err(RefreshFailure::Rejected(reason)) => {
                    assert_eq!(reason, RefreshError::SessionRevoked)
                }
                Err(other) => panic!("unexpected refresh failure: {other:?}"),
            }
        }
        assert!(revoker.await.unwrap().unwrap());
        assert!(matches!(
            issuer.registry.get(session.id).await,
            Err(SessionError::NotFound)
        ));
        assert_eq!(
            rejection(issuer.refresh(&refresh.token).await),
            RefreshError::SessionRevoked
        );
    }

    #[test]
    fn refresh_error_reasons_render_as_kebab_case() {
        assert_eq!(RefreshError::TokenInvalid.to_string(), "token-invalid");
        assert_eq!(RefreshError::SessionRevoked.to_string(), "session-revoked");
    }
}
