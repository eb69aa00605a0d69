//! Token-bucket admission control.
//!
//! Three tiers guard the API:
//!
//! 1. **Per-address**: one bucket per client address, created on first sight
//! 2. **Global**: one bucket shared by every request
//! 3. **Auth-endpoint**: a stricter shared bucket on login and register only
//!
//! A denial never consumes a token. A request denied by a later tier hands
//! back the tokens it took from the earlier ones.

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header::CONTENT_TYPE, HeaderValue, Response, StatusCode};
use axum::middleware::Next;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::Config;
use crate::state::AppState;
use crate::utils::client::client_ip;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitTier {
    Global,
    Auth,
    Address,
}

impl RateLimitTier {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Global => "RATE_LIMIT_EXCEEDED",
            Self::Auth => "AUTH_RATE_LIMIT_EXCEEDED",
            Self::Address => "IP_RATE_LIMIT_EXCEEDED",
        }
    }

    fn message(&self) -> &'static str {
        match self {
            Self::Global => "Too many requests. Please try again later.",
            Self::Auth => "Too many authentication attempts. Please try again later.",
            Self::Address => "Too many requests from this address. Please try again later.",
        }
    }
}

/// Why a request was turned away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitRejection {
    pub tier: RateLimitTier,
    /// Capacity of the bucket that denied the request.
    pub limit: u32,
    pub retry_after: Duration,
}

impl RateLimitRejection {
    /// `Retry-After` value: whole seconds, at least one.
    pub fn retry_after_secs(&self) -> u64 {
        (self.retry_after.as_secs_f64().ceil() as u64).max(1)
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// A bucket of `capacity` tokens regaining one token every `per_token`.
///
/// The token count and its timestamp are only read and written together under
/// the bucket's lock.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    per_token: Duration,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Starts full.
    pub fn new(capacity: u32, per_token: Duration) -> Self {
        Self {
            capacity: f64::from(capacity),
            per_token,
            state: Mutex::new(BucketState {
                tokens: f64::from(capacity),
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill);
        let gained = elapsed.as_secs_f64() / self.per_token.as_secs_f64();
        state.tokens = (state.tokens + gained).min(self.capacity);
        state.last_refill = now;
    }

    /// Takes one token, or returns how long until one is available.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let now = Instant::now();
        let mut state = self.state.lock();
        self.refill(&mut state, now);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - state.tokens;
            Err(self.per_token.mul_f64(deficit))
        }
    }

    /// Returns a token taken by a request that was denied further on.
    pub fn refund(&self) {
        let mut state = self.state.lock();
        state.tokens = (state.tokens + 1.0).min(self.capacity);
    }

    pub fn available(&self) -> f64 {
        let now = Instant::now();
        let mut state = self.state.lock();
        self.refill(&mut state, now);
        state.tokens
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.state.lock().last_refill)
    }
}

/// Tokens a request holds after passing the outer tiers.
#[derive(Debug, Clone)]
pub struct Admission {
    address: Option<Arc<TokenBucket>>,
}

#[derive(Debug)]
pub struct RateLimiter {
    global: TokenBucket,
    global_limit: u32,
    auth: TokenBucket,
    auth_limit: u32,
    addresses: DashMap<IpAddr, Arc<TokenBucket>>,
    address_limit: u32,
    address_per_token: Duration,
    address_max_idle: Duration,
}

impl RateLimiter {
    pub fn from_config(config: &Config) -> Self {
        let address_limit = config.rate_limit_ip_requests_per_minute;
        let address_per_token = Duration::from_secs(60) / address_limit.max(1);
        Self {
            global: TokenBucket::new(
                config.rate_limit_global_burst,
                Duration::from_secs_f64(1.0 / config.rate_limit_global_rps),
            ),
            global_limit: config.rate_limit_global_burst,
            auth: TokenBucket::new(
                config.rate_limit_auth_capacity,
                Duration::from_secs(config.rate_limit_auth_refill_seconds),
            ),
            auth_limit: config.rate_limit_auth_capacity,
            addresses: DashMap::new(),
            address_limit,
            address_per_token,
            // Idle this long, a bucket has long since refilled to capacity.
            address_max_idle: Duration::from_secs(60) * config.rate_limit_ip_idle_multiple,
        }
    }

    fn address_bucket(&self, ip: IpAddr) -> Arc<TokenBucket> {
        self.addresses
            .entry(ip)
            .or_insert_with(|| {
                Arc::new(TokenBucket::new(self.address_limit, self.address_per_token))
            })
            .clone()
    }

    /// Applies the per-address and global tiers.
    pub fn check_request(&self, ip: Option<IpAddr>) -> Result<Admission, RateLimitRejection> {
        let address = match ip {
            Some(ip) => {
                let bucket = self.address_bucket(ip);
                bucket
                    .try_acquire()
                    .map_err(|retry_after| RateLimitRejection {
                        tier: RateLimitTier::Address,
                        limit: self.address_limit,
                        retry_after,
                    })?;
                Some(bucket)
            }
            None => None,
        };

        if let Err(retry_after) = self.global.try_acquire() {
            if let Some(bucket) = &address {
                bucket.refund();
            }
            return Err(RateLimitRejection {
                tier: RateLimitTier::Global,
                limit: self.global_limit,
                retry_after,
            });
        }

        Ok(Admission { address })
    }

    /// Applies the auth-endpoint tier. On denial the outer tiers' tokens held
    /// by `admission` are returned.
    pub fn check_auth(&self, admission: Option<&Admission>) -> Result<(), RateLimitRejection> {
        self.auth.try_acquire().map_err(|retry_after| {
            if let Some(admission) = admission {
                self.refund(admission);
            }
            RateLimitRejection {
                tier: RateLimitTier::Auth,
                limit: self.auth_limit,
                retry_after,
            }
        })
    }

    fn refund(&self, admission: &Admission) {
        self.global.refund();
        if let Some(bucket) = &admission.address {
            bucket.refund();
        }
    }

    /// Drops per-address buckets idle longer than `max_idle`; returns how many.
    pub fn sweep_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let before = self.addresses.len();
        self.addresses
            .retain(|_, bucket| bucket.idle_for(now) < max_idle);
        before.saturating_sub(self.addresses.len())
    }

    pub fn address_max_idle(&self) -> Duration {
        self.address_max_idle
    }

    pub fn tracked_addresses(&self) -> usize {
        self.addresses.len()
    }
}

/// Periodically evicts idle per-address buckets.
pub fn spawn_idle_sweeper(limiter: Arc<RateLimiter>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = limiter.sweep_idle(limiter.address_max_idle());
            if removed > 0 {
                tracing::debug!(
                    removed,
                    remaining = limiter.tracked_addresses(),
                    "Swept idle rate-limit buckets"
                );
            }
        }
    })
}

/// Outer tiers, applied to every request before routing.
pub async fn rate_limit(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response<Body> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let ip = client_ip(request.headers(), peer, state.config.trust_proxy_headers);

    match state.rate_limiter.check_request(ip) {
        Ok(admission) => {
            request.extensions_mut().insert(admission);
            next.run(request).await
        }
        Err(rejection) => rejection_response(&rejection),
    }
}

/// Auth-endpoint tier, layered on login and register only.
pub async fn auth_rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response<Body> {
    let admission = request.extensions().get::<Admission>();
    match state.rate_limiter.check_auth(admission) {
        Ok(()) => next.run(request).await,
        Err(rejection) => rejection_response(&rejection),
    }
}

fn rejection_response(rejection: &RateLimitRejection) -> Response<Body> {
    let retry_after = rejection.retry_after_secs();
    tracing::warn!(
        code = rejection.tier.code(),
        retry_after,
        "Rate limit exceeded"
    );
    json_error_response(
        StatusCode::TOO_MANY_REQUESTS,
        rejection.tier.message(),
        rejection.tier.code(),
        rejection.limit,
        retry_after,
    )
}

fn json_error_response(
    status: StatusCode,
    error: &str,
    code: &str,
    limit: u32,
    retry_after: u64,
) -> Response<Body> {
    let body = serde_json::json!({
        "error": error,
        "code": code,
    });

    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert("x-ratelimit-limit", HeaderValue::from(limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
    headers.insert("retry-after", HeaderValue::from(retry_after));
    response
}
