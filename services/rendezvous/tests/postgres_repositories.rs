//! Account and device repositories against a live PostgreSQL
//!
//! Ignored by default: `cargo test -- --ignored` with `DATABASE_URL` set.

use common::database::{DatabaseConfig, init_pool};
use rendezvous::{
    RendezvousError,
    directory::{AccountDirectory, DeviceDirectory},
    models::NewAccount,
    recovery::RECOVERY_CODE_COUNT,
    repositories::{AccountRepository, DeviceRepository},
};
use sqlx::PgPool;
use uuid::Uuid;

const PASSWORD: &str = "Str0ng!Pass";

async fn pool() -> PgPool {
    let config = DatabaseConfig::from_env().unwrap();
    let pool = init_pool(&config).await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

fn new_account() -> NewAccount {
    NewAccount {
        email: format!("{}@example.com", Uuid::new_v4()),
        password: PASSWORD.to_string(),
    }
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL server"]
async fn test_enroll_spends_code_and_revoke_hides_device() {
    let pool = pool().await;
    let accounts = AccountRepository::new(pool.clone());
    let devices = DeviceRepository::new(pool);

    let new = new_account();
    let registered = accounts.register(&new).await.unwrap();
    assert_eq!(registered.recovery_codes.len(), RECOVERY_CODE_COUNT);
    let user_id = accounts.resolve_account(&new.email, PASSWORD).await.unwrap();
    assert_eq!(user_id, registered.user_id);

    let code = &registered.recovery_codes[0];
    let credential = devices.enroll(user_id, code).await.unwrap();
    assert_eq!(credential.user_id, user_id);

    // A spent code cannot enroll a second device
    let err = devices.enroll(user_id, code).await.unwrap_err();
    assert!(matches!(err, RendezvousError::AuthFailed));

    let key = devices.find_device(credential.device_id).await.unwrap();
    assert_eq!(key.map(|k| k.user_id), Some(user_id));

    // Another account cannot revoke the device
    assert!(!devices.revoke(Uuid::new_v4(), credential.device_id).await.unwrap());
    assert!(devices.find_device(credential.device_id).await.unwrap().is_some());

    assert!(devices.revoke(user_id, credential.device_id).await.unwrap());
    assert!(devices.find_device(credential.device_id).await.unwrap().is_none());
    assert!(!devices.revoke(user_id, credential.device_id).await.unwrap());
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL server"]
async fn test_inactive_account_cannot_resolve() {
    let pool = pool().await;
    let accounts = AccountRepository::new(pool.clone());

    let new = new_account();
    let registered = accounts.register(&new).await.unwrap();
    assert!(accounts.is_active(registered.user_id).await.unwrap());

    let err = accounts.resolve_account(&new.email, "Wr0ng!Pass").await.unwrap_err();
    assert!(matches!(err, RendezvousError::AuthFailed));

    sqlx::query("UPDATE users SET active = false WHERE id = $1")
        .bind(registered.user_id)
        .execute(&pool)
        .await
        .unwrap();

    let err = accounts.resolve_account(&new.email, PASSWORD).await.unwrap_err();
    assert!(matches!(err, RendezvousError::AuthFailed));
    assert!(!accounts.is_active(registered.user_id).await.unwrap());
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL server"]
async fn test_duplicate_email_is_refused() {
    let pool = pool().await;
    let accounts = AccountRepository::new(pool);

    let new = new_account();
    accounts.register(&new).await.unwrap();
    let err = accounts.register(&new).await.unwrap_err();
    assert!(matches!(err, RendezvousError::InvalidRequest(_)));
}
