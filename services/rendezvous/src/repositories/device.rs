//! Device repository: enrollment, revocation and key lookup

use async_trait::async_trait;
use rand::{RngCore, rngs::OsRng};
use sqlx::{PgPool, Row};
use tracing::{info, warn};
use uuid::Uuid;

use super::unavailable;
use crate::directory::DeviceDirectory;
use crate::error::{RendezvousError, RendezvousResult};
use crate::models::{Device, DeviceCredential, DeviceKey};
use crate::recovery::verify_recovery_code;

/// Bytes of randomness in a device signing secret
const DEVICE_SECRET_BYTES: usize = 32;

/// Device repository
#[derive(Clone)]
pub struct DeviceRepository {
    pool: PgPool,
}

impl DeviceRepository {
    /// Create a new device repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Enroll a new device for `user_id`, spending one recovery code
    ///
    /// Fails with `AuthFailed` when the code matches no unused code of the
    /// account. The code is marked used in the same transaction that creates
    /// the device, and only if nobody spent it concurrently.
    pub async fn enroll(
        &self,
        user_id: Uuid,
        recovery_code: &str,
    ) -> RendezvousResult<DeviceCredential> {
        info!("Enrolling device for user: {}", user_id);

        let rows = sqlx::query(
            r#"
            SELECT id, code_hash
            FROM recovery_codes
            WHERE user_id = $1 AND used_at IS NULL
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        let code_id: Uuid = rows
            .iter()
            .find(|row| verify_recovery_code(recovery_code, row.get::<&str, _>("code_hash")))
            .map(|row| row.get("id"))
            .ok_or_else(|| {
                warn!("Recovery code rejected for user {}", user_id);
                RendezvousError::AuthFailed
            })?;

        let mut raw = [0u8; DEVICE_SECRET_BYTES];
        OsRng.fill_bytes(&mut raw);
        let secret = hex::encode(raw);

        let mut tx = self.pool.begin().await.map_err(unavailable)?;

        let spent = sqlx::query(
            r#"
            UPDATE recovery_codes
            SET used_at = now()
            WHERE id = $1 AND used_at IS NULL
            "#,
        )
        .bind(code_id)
        .execute(&mut *tx)
        .await
        .map_err(unavailable)?
        .rows_affected();

        if spent != 1 {
            return Err(RendezvousError::AuthFailed);
        }

        let device_id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO devices (user_id, secret)
            VALUES ($1, $2)
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(&secret)
        .fetch_one(&mut *tx)
        .await
        .map_err(unavailable)?;

        tx.commit().await.map_err(unavailable)?;

        info!("Enrolled device {} for user {}", device_id, user_id);
        Ok(DeviceCredential {
            device_id,
            user_id,
            secret,
        })
    }

    /// Revoke one of `user_id`'s devices
    ///
    /// Returns `false` if the device is unknown, already revoked or belongs
    /// to another account.
    pub async fn revoke(&self, user_id: Uuid, device_id: Uuid) -> RendezvousResult<bool> {
        info!("Revoking device {} of user {}", device_id, user_id);

        let affected = sqlx::query(
            r#"
            UPDATE devices
            SET revoked_at = now()
            WHERE id = $1 AND user_id = $2 AND revoked_at IS NULL
            "#,
        )
        .bind(device_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?
        .rows_affected();

        Ok(affected == 1)
    }

    /// Find a device by ID, revoked or not
    pub async fn find_by_id(&self, device_id: Uuid) -> RendezvousResult<Option<Device>> {
        sqlx::query_as::<_, Device>(
            r#"
            SELECT id, user_id, secret, created_at, revoked_at
            FROM devices
            WHERE id = $1
            "#,
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)
    }
}

#[async_trait]
impl DeviceDirectory for DeviceRepository {
    async fn find_device(&self, device_id: Uuid) -> RendezvousResult<Option<DeviceKey>> {
        let Some(device) = self.find_by_id(device_id).await? else {
            return Ok(None);
        };
        if device.is_revoked() {
            return Ok(None);
        }
        let key = device.key();
        if key.is_none() {
            warn!("Device {} has an undecodable secret", device_id);
        }
        Ok(key)
    }
}
