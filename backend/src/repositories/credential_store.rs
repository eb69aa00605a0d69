//! Credential store seam.
//!
//! The auth subsystem only needs a handful of operations on user records; the
//! trait keeps it independent of the storage behind them and is mockable
//! with mockall (`MockCredentialStore`) in unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::user::User;
use crate::types::UserId;

#[derive(Debug, thiserror::Error)]
pub enum CredentialStoreError {
    #[error("email already registered")]
    EmailTaken,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Persistent user identities and password hashes.
///
/// Emails are passed in already normalized (see `models::user::normalize_email`).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, CredentialStoreError>;

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, CredentialStoreError>;

    async fn email_exists(&self, email: &str) -> Result<bool, CredentialStoreError>;

    /// Inserts a new user. Fails with `EmailTaken` when the email is in use,
    /// including when a concurrent registration won the race.
    async fn create(&self, user: &User) -> Result<User, CredentialStoreError>;

    async fn record_login(&self, id: UserId, at: DateTime<Utc>)
        -> Result<(), CredentialStoreError>;

    /// Updates the provided name fields. Returns `None` for an unknown user.
    async fn update_profile(
        &self,
        id: UserId,
        first_name: Option<String>,
        last_name: Option<String>,
    ) -> Result<Option<User>, CredentialStoreError>;
}
