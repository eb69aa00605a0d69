use crate::config::Config;
use anyhow::Context;
use bb8::Pool;
use bb8_redis::{redis, RedisConnectionManager};
use std::time::Duration;

pub type RedisPool = Pool<RedisConnectionManager>;

/// Builds the pool backing the shared session registry.
///
/// Returns `Ok(None)` when no Redis URL is configured; the caller then keeps
/// sessions in process. Connections are opened lazily, so an unreachable
/// server surfaces on first use or through [`ping`].
pub async fn create_redis_pool(config: &Config) -> anyhow::Result<Option<RedisPool>> {
    let Some(url) = &config.redis_url else {
        tracing::info!("Redis URL not set, sessions will be kept in process");
        return Ok(None);
    };

    let manager = RedisConnectionManager::new(url.clone()).context("invalid Redis URL")?;
    let pool = Pool::builder()
        .max_size(config.redis_pool_size)
        .connection_timeout(Duration::from_secs(config.redis_connect_timeout))
        .build(manager)
        .await?;

    tracing::info!(
        pool_size = config.redis_pool_size,
        connect_timeout_seconds = config.redis_connect_timeout,
        "Redis session pool created"
    );
    Ok(Some(pool))
}

pub async fn ping(pool: &RedisPool) -> anyhow::Result<()> {
    let mut conn = pool
        .get()
        .await
        .map_err(|err| anyhow::anyhow!("Redis connection failed: {err}"))?;
    let reply: String = redis::cmd("PING").query_async(&mut *conn).await?;
    anyhow::ensure!(reply == "PONG", "unexpected PING reply: {reply}");
    Ok(())
}
