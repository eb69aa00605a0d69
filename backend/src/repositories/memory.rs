//! In-process credential store for single-node development and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};

use crate::models::user::{normalize_email, User};
use crate::repositories::credential_store::{CredentialStore, CredentialStoreError};
use crate::types::UserId;

#[derive(Default)]
pub struct InMemoryCredentialStore {
    users: DashMap<UserId, User>,
    /// Normalized email -> owner. Inserting here first is what makes email
    /// uniqueness hold under concurrent registrations.
    emails: DashMap<String, UserId>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, CredentialStoreError> {
        let Some(id) = self.emails.get(&normalize_email(email)).map(|entry| *entry) else {
            return Ok(None);
        };
        Ok(self.users.get(&id).map(|user| user.clone()))
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, CredentialStoreError> {
        Ok(self.users.get(&id).map(|user| user.clone()))
    }

    async fn email_exists(&self, email: &str) -> Result<bool, CredentialStoreError> {
        Ok(self.emails.contains_key(&normalize_email(email)))
    }

    async fn create(&self, user: &User) -> Result<User, CredentialStoreError> {
        match self.emails.entry(normalize_email(&user.email)) {
            Entry::Occupied(_) => return Err(CredentialStoreError::EmailTaken),
            Entry::Vacant(slot) => {
                slot.insert(user.id);
            }
        }
        self.users.insert(user.id, user.clone());
        Ok(user.clone())
    }

    async fn record_login(
        &self,
        id: UserId,
        at: DateTime<Utc>,
    ) -> Result<(), CredentialStoreError> {
        if let Some(mut user) = self.users.get_mut(&id) {
            user.last_login_at = Some(at);
        }
        Ok(())
    }

    async fn update_profile(
        &self,
        id: UserId,
        first_name: Option<String>,
        last_name: Option<String>,
    ) -> Result<Option<User>, CredentialStoreError> {
        let Some(mut user) = self.users.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(first_name) = first_name {
            user.first_name = first_name;
        }
        if let Some(last_name) = last_name {
            user.last_name = last_name;
        }
        user.updated_at = Utc::now();
        Ok(Some(user.clone()))
    }
}
