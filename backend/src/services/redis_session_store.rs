use async_trait::async_trait;
use bb8_redis::redis::{self, AsyncCommands};
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::db::redis::RedisPool;
use crate::models::session::Session;
use crate::services::session_store::{RotateOutcome, SessionStore};
use crate::types::{SessionId, UserId};

/// Rewrites `last_activity` in place, keeping the key's TTL. A missing key
/// stays missing.
const TOUCH_SCRIPT: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then
  return false
end
local session = cjson.decode(raw)
session['last_activity'] = ARGV[1]
local encoded = cjson.encode(session)
redis.call('SET', KEYS[1], encoded, 'KEEPTTL')
return encoded
"#;

/// Swaps `refresh_jti` from ARGV[1] to ARGV[2] if and only if it still holds ARGV[1].
const ROTATE_SCRIPT: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then
  return {'missing'}
end
local session = cjson.decode(raw)
if session['refresh_jti'] ~= ARGV[1] then
  return {'stale'}
end
session['refresh_jti'] = ARGV[2]
session['last_activity'] = ARGV[3]
local encoded = cjson.encode(session)
redis.call('SET', KEYS[1], encoded, 'KEEPTTL')
return {'rotated', encoded}
"#;

/// Session store backed by Redis.
///
/// Each session lives under its own key with `SET EX`, so expiry is enforced by
/// Redis itself. A per-user set indexes session ids; ids whose key has expired
/// or been deleted are pruned from it lazily.
pub struct RedisSessionStore {
    pool: RedisPool,
}

impl RedisSessionStore {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }

    fn session_key(id: SessionId) -> String {
        format!("session:{}", id)
    }

    fn user_sessions_key(user_id: UserId) -> String {
        format!("user_sessions:{}", user_id)
    }

    fn decode(raw: &str) -> anyhow::Result<Session> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    #[tracing::instrument(level = "debug", name = "redis_session_insert", skip_all, fields(session_id = %session.id))]
    async fn insert(&self, session: &Session, ttl: Duration) -> anyhow::Result<()> {
        let mut conn = self.pool.get().await?;
        let key = Self::session_key(session.id);
        let user_key = Self::user_sessions_key(session.user_id);
        let ttl_seconds = ttl.as_secs().max(1);
        let payload = serde_json::to_string(session)?;

        // The index never outlives the newest session it points at.
        redis::pipe()
            .atomic()
            .set_ex(&key, payload, ttl_seconds)
            .sadd(&user_key, session.id.to_string())
            .expire(&user_key, ttl_seconds as i64)
            .query_async::<_, ()>(&mut *conn)
            .await?;

        Ok(())
    }

    #[tracing::instrument(level = "debug", name = "redis_session_get", skip(self))]
    async fn get(&self, id: SessionId) -> anyhow::Result<Option<Session>> {
        let mut conn = self.pool.get().await?;
        let raw: Option<String> = conn.get(Self::session_key(id)).await?;
        raw.as_deref().map(Self::decode).transpose()
    }

    #[tracing::instrument(level = "debug", name = "redis_session_touch", skip(self))]
    async fn touch(&self, id: SessionId, at: DateTime<Utc>) -> anyhow::Result<Option<Session>> {
        let mut conn = self.pool.get().await?;
        let raw: Option<String> = redis::Script::new(TOUCH_SCRIPT)
            .key(Self::session_key(id))
            .arg(at.to_rfc3339())
            .invoke_async(&mut *conn)
            .await?;
        raw.as_deref().map(Self::decode).transpose()
    }

    #[tracing::instrument(level = "debug", name = "redis_session_rotate", skip(self, expected, replacement))]
    async fn rotate(
        &self,
        id: SessionId,
        expected: &str,
        replacement: &str,
        at: DateTime<Utc>,
    ) -> anyhow::Result<RotateOutcome> {
        let mut conn = self.pool.get().await?;
        let reply: Vec<String> = redis::Script::new(ROTATE_SCRIPT)
            .key(Self::session_key(id))
            .arg(expected)
            .arg(replacement)
            .arg(at.to_rfc3339())
            .invoke_async(&mut *conn)
            .await?;

        match reply.as_slice() {
            [status, payload] if status == "rotated" => {
                Ok(RotateOutcome::Rotated(Self::decode(payload)?))
            }
            [status] if status == "stale" => Ok(RotateOutcome::Stale),
            [status] if status == "missing" => Ok(RotateOutcome::Missing),
            other => Err(anyhow::anyhow!("unexpected rotate reply: {:?}", other)),
        }
    }

    #[tracing::instrument(level = "debug", name = "redis_session_list", skip(self))]
    async fn list_by_user(&self, user_id: UserId) -> anyhow::Result<Vec<Session>> {
        let mut conn = self.pool.get().await?;
        let user_key = Self::user_sessions_key(user_id);

        let ids: Vec<String> = conn.smembers(&user_key).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids.iter().map(|id| format!("session:{}", id)).collect();
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut *conn)
            .await?;

        let mut sessions = Vec::with_capacity(values.len());
        let mut stale = Vec::new();
        for (id, value) in ids.into_iter().zip(values) {
            match value {
                Some(raw) => sessions.push(Self::decode(&raw)?),
                None => stale.push(id),
            }
        }

        if !stale.is_empty() {
            conn.srem::<_, _, ()>(&user_key, stale).await?;
        }

        Ok(sessions)
    }

    #[tracing::instrument(level = "debug", name = "redis_session_remove", skip(self))]
    async fn remove(&self, id: SessionId) -> anyhow::Result<bool> {
        let mut conn = self.pool.get().await?;
        let removed: u64 = conn.del(Self::session_key(id)).await?;
        Ok(removed > 0)
    }

    #[tracing::instrument(level = "debug", name = "redis_session_remove_for_user", skip(self))]
    async fn remove_for_user(
        &self,
        user_id: UserId,
        except: Option<SessionId>,
    ) -> anyhow::Result<u64> {
        let mut conn = self.pool.get().await?;
        let user_key = Self::user_sessions_key(user_id);
        let keep = except.map(|id| id.to_string());

        let ids: Vec<String> = conn.smembers(&user_key).await?;
        let targets: Vec<String> = ids
            .into_iter()
            .filter(|id| Some(id) != keep.as_ref())
            .collect();
        if targets.is_empty() {
            return Ok(0);
        }

        // One DEL per key: each reports 1 only to the caller that actually
        // deleted it, which keeps counts exact under concurrent revocation.
        let mut pipe = redis::pipe();
        for id in &targets {
            pipe.del(format!("session:{}", id));
        }
        let deleted: Vec<u64> = pipe.query_async(&mut *conn).await?;

        conn.srem::<_, _, ()>(&user_key, targets).await?;

        Ok(deleted.into_iter().sum())
    }
}
