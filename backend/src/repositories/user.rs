//! PostgreSQL-backed credential store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::models::user::User;
use crate::repositories::credential_store::{CredentialStore, CredentialStoreError};
use crate::types::UserId;

const USER_COLUMNS: &str = "id, email, password_hash, first_name, last_name, LOWER(role) AS role, \
     created_at, updated_at, last_login_at";

pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn storage_error(err: sqlx::Error) -> CredentialStoreError {
    CredentialStoreError::Storage(err.into())
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, CredentialStoreError> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE LOWER(email) = LOWER($1)"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, CredentialStoreError> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)
    }

    async fn email_exists(&self, email: &str) -> Result<bool, CredentialStoreError> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM users WHERE LOWER(email) = LOWER($1))",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await
        .map_err(storage_error)
    }

    async fn create(&self, user: &User) -> Result<User, CredentialStoreError> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users
                (id, email, password_hash, first_name, last_name, role, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.role)
        .bind(user.created_at)
        .bind(user.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| {
            let unique_violation = err
                .as_database_error()
                .map(|db_err| db_err.is_unique_violation())
                .unwrap_or(false);
            if unique_violation {
                CredentialStoreError::EmailTaken
            } else {
                storage_error(err)
            }
        })
    }

    async fn record_login(
        &self,
        id: UserId,
        at: DateTime<Utc>,
    ) -> Result<(), CredentialStoreError> {
        sqlx::query("UPDATE users SET last_login_at = $1 WHERE id = $2")
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(storage_error)
    }

    async fn update_profile(
        &self,
        id: UserId,
        first_name: Option<String>,
        last_name: Option<String>,
    ) -> Result<Option<User>, CredentialStoreError> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET first_name = COALESCE($1, first_name),
                last_name = COALESCE($2, last_name),
                updated_at = $3
            WHERE id = $4
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(first_name)
        .bind(last_name)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)
    }
}
