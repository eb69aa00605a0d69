//! Models for tracking authenticated sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::types::{SessionId, UserId};
use crate::utils::client::{mask_address, truncate_user_agent};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Server-side record of one authenticated login.
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    /// Role granted at login; copied into every access token minted for the session.
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub client_address: Option<String>,
    pub client_agent: Option<String>,
    pub expires_at: DateTime<Utc>,
    /// `jti` of the refresh token currently accepted for this session.
    #[serde(default)]
    pub refresh_jti: Option<String>,
}

/// Caller-supplied half of a session; the registry fills in id and timestamps.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: UserId,
    pub role: String,
    pub client_address: Option<String>,
    pub client_agent: Option<String>,
    pub refresh_jti: Option<String>,
}

impl NewSession {
    pub fn new(user_id: UserId, role: impl Into<String>) -> Self {
        Self {
            user_id,
            role: role.into(),
            client_address: None,
            client_agent: None,
            refresh_jti: None,
        }
    }
}

impl Session {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Session as listed back to its owner.
pub struct SessionResponse {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Client address with the final octet masked.
    pub address: Option<String>,
    /// Client agent truncated to 100 characters.
    pub user_agent: Option<String>,
    pub is_current: bool,
}

impl SessionResponse {
    pub fn from_session(session: Session, current: SessionId) -> Self {
        Self {
            is_current: session.id == current,
            id: session.id,
            created_at: session.created_at,
            last_activity: session.last_activity,
            address: session.client_address.as_deref().map(mask_address),
            user_agent: session.client_agent.as_deref().map(truncate_user_agent),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RevokeResponse {
    pub revoked: u64,
}
