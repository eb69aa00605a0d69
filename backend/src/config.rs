use anyhow::{anyhow, bail};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Runtime configuration, loaded once at startup.
///
/// Every field can be overridden by the environment variable of the same name in
/// upper case (`JWT_SECRET`, `RATE_LIMIT_AUTH_CAPACITY`, ...). A `.env` file is
/// read first when present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// Redis backing the session registry. `None` keeps sessions in process.
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default = "default_redis_pool_size")]
    pub redis_pool_size: u32,
    /// Seconds to wait for a pooled Redis connection.
    #[serde(default = "default_redis_connect_timeout")]
    pub redis_connect_timeout: u64,

    pub jwt_secret: String,
    /// Separate signing secret for refresh tokens; falls back to `jwt_secret`.
    #[serde(default)]
    pub jwt_refresh_secret: Option<String>,
    #[serde(default = "default_access_token_ttl_seconds")]
    pub access_token_ttl_seconds: u64,
    /// Also the TTL of the session entry a refresh token is bound to.
    #[serde(default = "default_refresh_token_ttl_seconds")]
    pub refresh_token_ttl_seconds: u64,
    /// Issue a new refresh token on every refresh and retire the previous one.
    #[serde(default)]
    pub refresh_token_rotation: bool,

    #[serde(default = "default_rate_limit_global_rps")]
    pub rate_limit_global_rps: f64,
    #[serde(default = "default_rate_limit_global_burst")]
    pub rate_limit_global_burst: u32,
    #[serde(default = "default_rate_limit_auth_capacity")]
    pub rate_limit_auth_capacity: u32,
    /// Seconds needed to earn back one login/register attempt.
    #[serde(default = "default_rate_limit_auth_refill_seconds")]
    pub rate_limit_auth_refill_seconds: u64,
    #[serde(default = "default_rate_limit_ip_requests_per_minute")]
    pub rate_limit_ip_requests_per_minute: u32,
    /// Address buckets idle for this many full refill windows are swept.
    #[serde(default = "default_rate_limit_ip_idle_multiple")]
    pub rate_limit_ip_idle_multiple: u32,
    #[serde(default = "default_rate_limit_sweep_interval_seconds")]
    pub rate_limit_sweep_interval_seconds: u64,
    /// Honor `X-Forwarded-For` / `X-Real-IP` when resolving the client address.
    #[serde(default)]
    pub trust_proxy_headers: bool,

    #[serde(default)]
    pub cors_allow_origins: Vec<String>,
    #[serde(default)]
    pub production_mode: bool,
}

const MIN_SECRET_LEN: usize = 32;

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_database_url() -> String {
    "postgres://localhost/finboard".to_string()
}

fn default_redis_pool_size() -> u32 {
    10
}

fn default_redis_connect_timeout() -> u64 {
    5
}

fn default_access_token_ttl_seconds() -> u64 {
    15 * 60
}

fn default_refresh_token_ttl_seconds() -> u64 {
    7 * 24 * 60 * 60
}

fn default_rate_limit_global_rps() -> f64 {
    50.0
}

fn default_rate_limit_global_burst() -> u32 {
    100
}

fn default_rate_limit_auth_capacity() -> u32 {
    5
}

fn default_rate_limit_auth_refill_seconds() -> u64 {
    12
}

fn default_rate_limit_ip_requests_per_minute() -> u32 {
    120
}

fn default_rate_limit_ip_idle_multiple() -> u32 {
    10
}

fn default_rate_limit_sweep_interval_seconds() -> u64 {
    60
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config: Config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("cors_allow_origins"),
            )
            .build()?
            .try_deserialize()
            .map_err(|e| anyhow!("Invalid configuration: {}", e))?;

        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the auth subsystem cannot run safely with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.jwt_secret.is_empty() {
            bail!("JWT_SECRET must be set");
        }
        if self.production_mode {
            if self.jwt_secret.len() < MIN_SECRET_LEN {
                bail!("JWT_SECRET must be at least {MIN_SECRET_LEN} bytes in production");
            }
            if let Some(secret) = &self.jwt_refresh_secret {
                if secret.len() < MIN_SECRET_LEN {
                    bail!(
                        "JWT_REFRESH_SECRET must be at least {MIN_SECRET_LEN} bytes in production"
                    );
                }
            }
        }
        if self.access_token_ttl_seconds == 0 || self.refresh_token_ttl_seconds == 0 {
            bail!("Token lifetimes must be positive");
        }
        if self.access_token_ttl_seconds >= self.refresh_token_ttl_seconds {
            bail!("ACCESS_TOKEN_TTL_SECONDS must be shorter than REFRESH_TOKEN_TTL_SECONDS");
        }
        if !(self.rate_limit_global_rps.is_finite() && self.rate_limit_global_rps > 0.0) {
            bail!("RATE_LIMIT_GLOBAL_RPS must be a positive number");
        }
        if self.rate_limit_global_burst == 0
            || self.rate_limit_auth_capacity == 0
            || self.rate_limit_ip_requests_per_minute == 0
        {
            bail!("Rate limit capacities must be positive");
        }
        if self.rate_limit_auth_refill_seconds == 0 {
            bail!("RATE_LIMIT_AUTH_REFILL_SECONDS must be positive");
        }
        if self.rate_limit_ip_idle_multiple == 0 || self.rate_limit_sweep_interval_seconds == 0 {
            bail!("Rate limit sweep settings must be positive");
        }
        if self.redis_pool_size == 0 {
            bail!("REDIS_POOL_SIZE must be positive");
        }
        Ok(())
    }

    pub fn access_token_ttl(&self) -> Duration {
        Duration::from_secs(self.access_token_ttl_seconds)
    }

    pub fn refresh_token_ttl(&self) -> Duration {
        Duration::from_secs(self.refresh_token_ttl_seconds)
    }

    pub fn refresh_secret(&self) -> &str {
        self.jwt_refresh_secret.as_deref().unwrap_or(&self.jwt_secret)
    }

    /// Builds a configuration with every default applied and the given secret.
    pub fn with_secret(jwt_secret: impl Into<String>) -> Self {
        Self {
            bind_addr: default_bind_addr(),
            database_url: default_database_url(),
            redis_url: None,
            redis_pool_size: default_redis_pool_size(),
            redis_connect_timeout: default_redis_connect_timeout(),
            jwt_secret: jwt_secret.into(),
            jwt_refresh_secret: None,
            access_token_ttl_seconds: default_access_token_ttl_seconds(),
            refresh_token_ttl_seconds: default_refresh_token_ttl_seconds(),
            refresh_token_rotation: false,
            rate_limit_global_rps: default_rate_limit_global_rps(),
            rate_limit_global_burst: default_rate_limit_global_burst(),
            rate_limit_auth_capacity: default_rate_limit_auth_capacity(),
            rate_limit_auth_refill_seconds: default_rate_limit_auth_refill_seconds(),
            rate_limit_ip_requests_per_minute: default_rate_limit_ip_requests_per_minute(),
            rate_limit_ip_idle_multiple: default_rate_limit_ip_idle_multiple(),
            rate_limit_sweep_interval_seconds: default_rate_limit_sweep_interval_seconds(),
            trust_proxy_headers: false,
            cors_allow_origins: Vec::new(),
            production_mode: false,
        }
    }
}
