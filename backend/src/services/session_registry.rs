use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use crate::models::session::{NewSession, Session};
use crate::services::session_store::{RotateOutcome, SessionStore};
use crate::types::{SessionId, UserId};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session not found")]
    NotFound,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Tracks the live sessions of every user.
///
/// Sessions live exactly as long as the refresh token minted for them.
#[derive(Clone)]
pub struct SessionRegistry {
    store: Arc<dyn SessionStore>,
    ttl: Duration,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn SessionStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Registers a new session; every call yields a fresh id.
    pub async fn create(&self, new: NewSession) -> Result<Session, SessionError> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.ttl).map_err(anyhow::Error::from)?;
        let session = Session {
            id: SessionId::new(),
            user_id: new.user_id,
            role: new.role,
            created_at: now,
            last_activity: now,
            client_address: new.client_address,
            client_agent: new.client_agent,
            expires_at: now + ttl,
            refresh_jti: new.refresh_jti,
        };

        self.store.insert(&session, self.ttl).await?;
        tracing::debug!(user_id = %session.user_id, session_id = %session.id, "Session created");
        Ok(session)
    }

    pub async fn get(&self, id: SessionId) -> Result<Session, SessionError> {
        self.store.get(id).await?.ok_or(SessionError::NotFound)
    }

    /// Snapshot of the user's unexpired sessions, in no particular order.
    pub async fn list_by_user(&self, user_id: UserId) -> Result<Vec<Session>, SessionError> {
        Ok(self.store.list_by_user(user_id).await?)
    }

    /// Records activity on a session that still exists.
    pub async fn touch(&self, id: SessionId) -> Result<Session, SessionError> {
        self.store
            .touch(id, Utc::now())
            .await?
            .ok_or(SessionError::NotFound)
    }

    pub(crate) async fn rotate_refresh(
        &self,
        id: SessionId,
        expected: &str,
        replacement: &str,
    ) -> Result<RotateOutcome, SessionError> {
        Ok(self
            .store
            .rotate(id, expected, replacement, Utc::now())
            .await?)
    }

    /// Removes a session. Removing an absent session is not an error; the
    /// result tells whether this call was the one that removed it.
    pub async fn invalidate(&self, id: SessionId) -> Result<bool, SessionError> {
        let removed = self.store.remove(id).await?;
        if removed {
            tracing::debug!(session_id = %id, "Session invalidated");
        }
        Ok(removed)
    }

    /// Removes every session of `user_id` except `except`, returning how many
    /// this call removed.
    pub async fn invalidate_all_for_user(
        &self,
        user_id: UserId,
        except: Option<SessionId>,
    ) -> Result<u64, SessionError> {
        let removed = self.store.remove_for_user(user_id, except).await?;
        tracing::debug!(%user_id, removed, "Sessions invalidated for user");
        Ok(removed)
    }
}
