//! Account model and related payloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Account entity
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// New account registration payload
#[derive(Debug, Clone, Deserialize)]
pub struct NewAccount {
    pub email: String,
    pub password: String,
}

/// Result of a registration: the recovery codes are only ever shown here
#[derive(Debug, Clone, Serialize)]
pub struct RegisteredAccount {
    pub user_id: Uuid,
    pub recovery_codes: Vec<String>,
}

/// Login credentials submitted by the web client
#[derive(Debug, Clone, Deserialize)]
pub struct LoginCredentials {
    pub identifier: String,
    pub secret: String,
}
