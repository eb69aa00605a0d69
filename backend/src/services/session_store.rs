//! Storage seam of the session registry, plus the in-process backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::models::session::Session;
use crate::types::{SessionId, UserId};

/// Result of a compare-and-swap on a session's refresh token id.
#[derive(Debug, Clone, PartialEq)]
pub enum RotateOutcome {
    Rotated(Session),
    /// The session exists, but the presented refresh token is not the current one.
    Stale,
    Missing,
}

/// Keyed, TTL-bearing storage of sessions.
///
/// Every method is atomic per session id. Removal methods report only the
/// removals they themselves performed, so concurrent callers never both count
/// the same session.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: &Session, ttl: Duration) -> anyhow::Result<()>;

    async fn get(&self, id: SessionId) -> anyhow::Result<Option<Session>>;

    /// Sets `last_activity` if the session still exists. Never recreates an
    /// entry that was removed concurrently.
    async fn touch(&self, id: SessionId, at: DateTime<Utc>) -> anyhow::Result<Option<Session>>;

    /// Replaces `refresh_jti` only if it currently equals `expected`.
    async fn rotate(
        &self,
        id: SessionId,
        expected: &str,
        replacement: &str,
        at: DateTime<Utc>,
    ) -> anyhow::Result<RotateOutcome>;

    async fn list_by_user(&self, user_id: UserId) -> anyhow::Result<Vec<Session>>;

    /// Returns whether this call removed the entry.
    async fn remove(&self, id: SessionId) -> anyhow::Result<bool>;

    async fn remove_for_user(
        &self,
        user_id: UserId,
        except: Option<SessionId>,
    ) -> anyhow::Result<u64>;
}

/// Session store held in process memory.
///
/// Expired entries are invisible to every read and are dropped lazily or by
/// [`InMemorySessionStore::purge_expired`].
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<SessionId, Session>,
    by_user: DashMap<UserId, HashSet<SessionId>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every expired entry; returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let expired: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|entry| entry.is_expired_at(now))
            .map(|entry| *entry.key())
            .collect();

        expired
            .into_iter()
            .filter(|id| self.take_if_expired(*id, now))
            .count()
    }

    fn take_if_expired(&self, id: SessionId, now: DateTime<Utc>) -> bool {
        match self.sessions.remove_if(&id, |_, session| session.is_expired_at(now)) {
            Some((_, session)) => {
                self.unindex(session.user_id, id);
                true
            }
            None => false,
        }
    }

    fn take(&self, id: SessionId) -> bool {
        match self.sessions.remove(&id) {
            Some((_, session)) => {
                self.unindex(session.user_id, id);
                true
            }
            None => false,
        }
    }

    fn unindex(&self, user_id: UserId, id: SessionId) {
        if let Some(mut ids) = self.by_user.get_mut(&user_id) {
            ids.remove(&id);
        }
        self.by_user.remove_if(&user_id, |_, ids| ids.is_empty());
    }

    fn live(&self, id: SessionId, now: DateTime<Utc>) -> Option<Session> {
        let session = self.sessions.get(&id).map(|entry| entry.clone())?;
        if session.is_expired_at(now) {
            self.take_if_expired(id, now);
            return None;
        }
        Some(session)
    }

    fn user_session_ids(&self, user_id: UserId) -> Vec<SessionId> {
        self.by_user
            .get(&user_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }
}

/// Periodically drops expired sessions from an in-process store.
pub fn spawn_expiry_sweeper(store: Arc<InMemorySessionStore>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let purged = store.purge_expired();
            if purged > 0 {
                tracing::debug!(purged, "Purged expired sessions");
            }
        }
    })
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn insert(&self, session: &Session, ttl: Duration) -> anyhow::Result<()> {
        let mut session = session.clone();
        let ttl = chrono::Duration::from_std(ttl)?;
        session.expires_at = session.expires_at.min(session.created_at + ttl);

        self.by_user
            .entry(session.user_id)
            .or_default()
            .insert(session.id);
        self.sessions.insert(session.id, session);
        Ok(())
    }

    async fn get(&self, id: SessionId) -> anyhow::Result<Option<Session>> {
        Ok(self.live(id, Utc::now()))
    }

    async fn touch(&self, id: SessionId, at: DateTime<Utc>) -> anyhow::Result<Option<Session>> {
        let Some(mut session) = self.sessions.get_mut(&id) else {
            return Ok(None);
        };
        if session.is_expired_at(at) {
            return Ok(None);
        }
        session.last_activity = at;
        Ok(Some(session.clone()))
    }

    async fn rotate(
        &self,
        id: SessionId,
        expected: &str,
        replacement: &str,
        at: DateTime<Utc>,
    ) -> anyhow::Result<RotateOutcome> {
        let Some(mut session) = self.sessions.get_mut(&id) else {
            return Ok(RotateOutcome::Missing);
        };
        if session.is_expired_at(at) {
            return Ok(RotateOutcome::Missing);
        }
        if session.refresh_jti.as_deref() != Some(expected) {
            return Ok(RotateOutcome::Stale);
        }
        session.refresh_jti = Some(replacement.to_string());
        session.last_activity = at;
        Ok(RotateOutcome::Rotated(session.clone()))
    }

    async fn list_by_user(&self, user_id: UserId) -> anyhow::Result<Vec<Session>> {
        let now = Utc::now();
        Ok(self
            .user_session_ids(user_id)
            .into_iter()
            .filter_map(|id| self.live(id, now))
            .collect())
    }

    async fn remove(&self, id: SessionId) -> anyhow::Result<bool> {
        Ok(self.take(id))
    }

    async fn remove_for_user(
        &self,
        user_id: UserId,
        except: Option<SessionId>,
    ) -> anyhow::Result<u64> {
        let removed = self
            .user_session_ids(user_id)
            .into_iter()
            .filter(|id| Some(*id) != except)
            .filter(|id| self.take(*id))
            .count();
        Ok(removed as u64)
    }
}
