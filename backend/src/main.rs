use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use finboard_backend::{
    build_router,
    config::Config,
    db::{connection::create_pool, redis::{create_redis_pool, ping}},
    middleware::rate_limit::spawn_idle_sweeper,
    repositories::{credential_store::CredentialStore, user::PgCredentialStore},
    services::{
        redis_session_store::RedisSessionStore,
        session_store::{spawn_expiry_sweeper, InMemorySessionStore, SessionStore},
    },
    state::AppState,
};

fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return "<empty>".into();
    }
    let prefix = s.chars().take(4).collect::<String>();
    format!("{}*** (len={})", prefix, s.len())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "finboard_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;
    tracing::info!(
        bind_addr = %config.bind_addr,
        jwt_secret = %mask_secret(&config.jwt_secret),
        jwt_refresh_secret = %config
            .jwt_refresh_secret
            .as_deref()
            .map(mask_secret)
            .unwrap_or_else(|| "<shared>".into()),
        access_token_ttl_seconds = config.access_token_ttl_seconds,
        refresh_token_ttl_seconds = config.refresh_token_ttl_seconds,
        refresh_token_rotation = config.refresh_token_rotation,
        redis = config.redis_url.is_some(),
        production_mode = config.production_mode,
        "Loaded configuration from environment/.env"
    );

    let pool = create_pool(&config.database_url).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    let credentials: Arc<dyn CredentialStore> = Arc::new(PgCredentialStore::new(pool));

    let sweep_every = Duration::from_secs(config.rate_limit_sweep_interval_seconds);
    let session_store: Arc<dyn SessionStore> = match create_redis_pool(&config).await? {
        Some(redis) => {
            ping(&redis).await?;
            Arc::new(RedisSessionStore::new(redis))
        }
        None => {
            let store = Arc::new(InMemorySessionStore::new());
            spawn_expiry_sweeper(store.clone(), sweep_every);
            store
        }
    };

    let state = AppState::new(config.clone(), credentials, session_store);
    spawn_idle_sweeper(state.rate_limiter.clone(), sweep_every);
    let app = build_router(state);

    let addr: SocketAddr = config.bind_addr.parse()?;
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = ?err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
