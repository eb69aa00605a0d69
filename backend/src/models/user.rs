//! Models that represent users and authentication payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::FromRow;
use std::fmt;
use utoipa::ToSchema;
use validator::Validate;

use crate::types::UserId;
use crate::validation::rules::{validate_not_blank, validate_role};

pub const DEFAULT_ROLE: &str = "user";

#[derive(Debug, Clone, FromRow)]
/// Stored identity record of a user account.
pub struct User {
    pub id: UserId,
    /// Lower-cased and trimmed; unique.
    pub email: String,
    /// Argon2id PHC string.
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl User {
    /// Constructs a new user with a freshly generated identifier.
    pub fn new(
        email: &str,
        password_hash: String,
        first_name: String,
        last_name: String,
        role: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: UserId::new(),
            email: normalize_email(email),
            password_hash,
            first_name,
            last_name,
            role: role.unwrap_or_else(|| DEFAULT_ROLE.to_string()),
            created_at: now,
            updated_at: now,
            last_login_at: None,
        }
    }
}

/// Canonical form used for storage and lookup.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn deserialize_normalized_email<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(normalize_email(&raw))
}

#[derive(Clone, Deserialize, Validate, ToSchema)]
/// Payload for creating a new account.
pub struct RegisterRequest {
    #[serde(deserialize_with = "deserialize_normalized_email")]
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 100), custom(function = "validate_not_blank"))]
    pub first_name: String,
    #[validate(length(min = 1, max = 100), custom(function = "validate_not_blank"))]
    pub last_name: String,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
    #[serde(default)]
    #[validate(custom(function = "validate_role"))]
    pub role: Option<String>,
}

impl fmt::Debug for RegisterRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterRequest")
            .field("email", &self.email)
            .field("first_name", &self.first_name)
            .field("last_name", &self.last_name)
            .field("password", &"<redacted>")
            .field("role", &self.role)
            .finish()
    }
}

#[derive(Clone, Deserialize, Validate, ToSchema)]
/// Credentials submitted by a user attempting to authenticate.
pub struct LoginRequest {
    #[validate(length(min = 1, max = 254))]
    pub email: String,
    #[validate(length(min = 1, max = 128))]
    pub password: String,
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Tokens returned after a successful login.
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub user: UserResponse,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
    /// Present only when refresh-token rotation is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
/// Partial profile update; absent fields are left unchanged.
pub struct UpdateProfileRequest {
    #[validate(length(min = 1, max = 100), custom(function = "validate_not_blank"))]
    pub first_name: Option<String>,
    #[validate(length(min = 1, max = 100), custom(function = "validate_not_blank"))]
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Public-facing representation of a user. Never carries the password hash.
pub struct UserResponse {
    pub id: UserId,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        UserResponse {
            id: user.id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            role: user.role,
            created_at: user.created_at,
            updated_at: user.updated_at,
            last_login_at: user.last_login_at,
        }
    }
}
