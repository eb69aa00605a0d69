use chrono::{DateTime, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::types::{SessionId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Claims of a short-lived access token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: UserId,
    pub role: String,
    /// Session the token was minted for.
    pub sid: SessionId,
    pub typ: TokenKind,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
}

/// Claims of a refresh token. Carries no identity beyond the bound session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sid: SessionId,
    pub typ: TokenKind,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InvalidTokenError {
    #[error("token expired")]
    Expired,
    #[error("token malformed")]
    Malformed,
    #[error("token signature mismatch")]
    BadSignature,
}

impl InvalidTokenError {
    pub fn reason(&self) -> &'static str {
        match self {
            InvalidTokenError::Expired => "expired",
            InvalidTokenError::Malformed => "malformed",
            InvalidTokenError::BadSignature => "bad-signature",
        }
    }
}

impl Claims {
    pub fn new(user_id: UserId, role: String, session_id: SessionId, ttl: Duration) -> Self {
        let (iat, exp) = lifetime(ttl);
        Self {
            sub: user_id,
            role,
            sid: session_id,
            typ: TokenKind::Access,
            exp,
            iat,
            jti: new_token_id(),
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        timestamp_to_datetime(self.exp)
    }
}

impl RefreshClaims {
    /// `jti` is chosen by the caller so it can be stored on the session first.
    pub fn new(session_id: SessionId, jti: String, ttl: Duration) -> Self {
        let (iat, exp) = lifetime(ttl);
        Self {
            sid: session_id,
            typ: TokenKind::Refresh,
            exp,
            iat,
            jti,
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        timestamp_to_datetime(self.exp)
    }
}

pub fn new_token_id() -> String {
    Uuid::new_v4().to_string()
}

fn lifetime(ttl: Duration) -> (i64, i64) {
    let now = Utc::now().timestamp();
    let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
    (now, now.saturating_add(ttl))
}

fn timestamp_to_datetime(ts: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(ts, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

pub fn encode_token<T: Serialize>(claims: &T, secret: &str) -> anyhow::Result<String> {
    let token = encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )?;
    Ok(token)
}

pub fn decode_token<T: DeserializeOwned>(token: &str, secret: &str) -> Result<T, InvalidTokenError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    validation.set_required_spec_claims(&["exp"]);

    decode::<T>(token, &DecodingKey::from_secret(secret.as_ref()), &validation)
        .map(|data| data.claims)
        .map_err(|err| match err.kind() {
            ErrorKind::ExpiredSignature => InvalidTokenError::Expired,
            ErrorKind::InvalidSignature => InvalidTokenError::BadSignature,
            _ => InvalidTokenError::Malformed,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "unit-test-secret";

    #[test]
    fn access_claims_round_trip() {
        let claims = Claims::new(
            UserId::new(),
            "user".into(),
            SessionId::new(),
            Duration::from_secs(60),
        );
        let token = encode_token(&claims, SECRET).expect("encode");
        let decoded: Claims = decode_token(&token, SECRET).expect("decode");
        assert_eq!(decoded, claims);
    }

    #[test]
    fn wrong_secret_is_bad_signature() {
        let claims = RefreshClaims::new(SessionId::new(), new_token_id(), Duration::from_secs(60));
        let token = encode_token(&claims, SECRET).expect("encode");
        let err = decode_token::<RefreshClaims>(&token, "other-secret").unwrap_err();
        assert_eq!(err, InvalidTokenError::BadSignature);
        assert_eq!(err.reason(), "bad-signature");
    }

    #[test]
    fn past_expiry_is_expired() {
        let mut claims = RefreshClaims::new(SessionId::new(), new_token_id(), Duration::from_secs(60));
        claims.exp = Utc::now().timestamp() - 5;
        let token = encode_token(&claims, SECRET).expect("encode");
        let err = decode_token::<RefreshClaims>(&token, SECRET).unwrap_err();
        assert_eq!(err, InvalidTokenError::Expired);
    }

    #[test]
    fn garbage_is_malformed() {
        let err = decode_token::<Claims>("definitely.not.ajwt", SECRET).unwrap_err();
        assert_eq!(err, InvalidTokenError::Malformed);
    }

    #[test]
    fn refresh_token_does_not_decode_as_access_claims() {
        let claims = RefreshClaims::new(SessionId::new(), new_token_id(), Duration::from_secs(60));
        let token = encode_token(&claims, SECRET).expect("encode");
        let err = decode_token::<Claims>(&token, SECRET).unwrap_err();
        assert_eq!(err, InvalidTokenError::Malformed);
    }
}
