//! Account repository for database operations

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use super::unavailable;
use crate::directory::AccountDirectory;
use crate::error::{RendezvousError, RendezvousResult};
use crate::hashing::{hash_secret, verify_secret};
use crate::models::{Account, NewAccount, RegisteredAccount};
use crate::recovery::RecoveryCodeBatch;
use crate::validation::{validate_email, validate_password};

/// Account repository
#[derive(Clone)]
pub struct AccountRepository {
    pool: PgPool,
}

impl AccountRepository {
    /// Create a new account repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Register a new account and issue its recovery codes
    ///
    /// The plaintext codes are returned exactly once; only their hashes are
    /// stored.
    pub async fn register(&self, new_account: &NewAccount) -> RendezvousResult<RegisteredAccount> {
        let email = new_account.email.trim().to_lowercase();
        validate_email(&email).map_err(RendezvousError::InvalidRequest)?;
        validate_password(&new_account.password).map_err(RendezvousError::InvalidRequest)?;

        info!("Registering new account: {}", email);

        let (password_hash, batch) = hash_registration(&new_account.password)
            .map_err(|e| RendezvousError::Internal(e.to_string()))?;

        let mut tx = self.pool.begin().await.map_err(unavailable)?;

        let user_id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO users (email, password_hash)
            VALUES ($1, $2)
            ON CONFLICT (email) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&email)
        .bind(&password_hash)
        .fetch_optional(&mut *tx)
        .await
        .map_err(unavailable)?
        .ok_or_else(|| RendezvousError::InvalidRequest("Email already registered".to_string()))?;

        for code_hash in &batch.code_hashes {
            sqlx::query(
                r#"
                INSERT INTO recovery_codes (user_id, code_hash)
                VALUES ($1, $2)
                "#,
            )
            .bind(user_id)
            .bind(code_hash)
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;
        }

        tx.commit().await.map_err(unavailable)?;

        info!("Registered account {} with {} recovery codes", user_id, batch.codes.len());
        Ok(RegisteredAccount {
            user_id,
            recovery_codes: batch.codes,
        })
    }

    /// Find an account by email
    pub async fn find_by_email(&self, email: &str) -> RendezvousResult<Option<Account>> {
        sqlx::query_as::<_, Account>(
            r#"
            SELECT id, email, password_hash, active, created_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email.trim().to_lowercase())
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)
    }

    /// Find an account by ID
    pub async fn find_by_id(&self, id: Uuid) -> RendezvousResult<Option<Account>> {
        sqlx::query_as::<_, Account>(
            r#"
            SELECT id, email, password_hash, active, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)
    }
}

fn hash_registration(password: &str) -> Result<(String, RecoveryCodeBatch)> {
    let password_hash = hash_secret(password)?;
    let batch = RecoveryCodeBatch::generate()?;
    Ok((password_hash, batch))
}

#[async_trait]
impl AccountDirectory for AccountRepository {
    async fn resolve_account(&self, identifier: &str, secret: &str) -> RendezvousResult<Uuid> {
        info!("Resolving account: {}", identifier);

        let account = self
            .find_by_email(identifier)
            .await?
            .ok_or(RendezvousError::AuthFailed)?;

        if !account.active {
            warn!("Login attempt for inactive account {}", account.id);
            return Err(RendezvousError::AuthFailed);
        }
        if !verify_secret(secret, &account.password_hash) {
            return Err(RendezvousError::AuthFailed);
        }

        Ok(account.id)
    }

    async fn is_active(&self, user_id: Uuid) -> RendezvousResult<bool> {
        Ok(self
            .find_by_id(user_id)
            .await?
            .is_some_and(|account| account.active))
    }
}
