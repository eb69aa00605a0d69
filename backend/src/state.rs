use std::sync::Arc;

use crate::{
    config::Config,
    middleware::rate_limit::RateLimiter,
    repositories::{credential_store::CredentialStore, memory::InMemoryCredentialStore},
    services::{
        auth_gateway::AuthGateway,
        session_store::{InMemorySessionStore, SessionStore},
    },
};

#[derive(Clone)]
pub struct AppState {
    pub gateway: AuthGateway,
    pub rate_limiter: Arc<RateLimiter>,
    pub config: Config,
}

impl AppState {
    pub fn new(
        config: Config,
        credentials: Arc<dyn CredentialStore>,
        session_store: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            gateway: AuthGateway::new(&config, credentials, session_store),
            rate_limiter: Arc::new(RateLimiter::from_config(&config)),
            config,
        }
    }

    /// State backed entirely by process memory: no database, no Redis.
    pub fn in_memory(config: Config) -> Self {
        Self::new(
            config,
            Arc::new(InMemoryCredentialStore::new()),
            Arc::new(InMemorySessionStore::new()),
        )
    }
}
