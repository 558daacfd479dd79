//! Enrolled device model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Device row as stored
#[derive(Debug, Clone, FromRow)]
pub struct Device {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Hex-encoded signing secret shared with the device
    pub secret: String,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

/// Key material the registry needs to check a device assertion
#[derive(Clone)]
pub struct DeviceKey {
    pub device_id: Uuid,
    pub user_id: Uuid,
    pub secret: Vec<u8>,
}

impl std::fmt::Debug for DeviceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceKey")
            .field("device_id", &self.device_id)
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

/// Credential handed to a device once, at enrollment
#[derive(Clone, Serialize, Deserialize)]
pub struct DeviceCredential {
    pub device_id: Uuid,
    pub user_id: Uuid,
    /// Hex-encoded signing secret
    pub secret: String,
}

impl DeviceCredential {
    /// The directory-side view of this credential
    pub fn key(&self) -> Option<DeviceKey> {
        let secret = hex::decode(&self.secret).ok()?;
        Some(DeviceKey {
            device_id: self.device_id,
            user_id: self.user_id,
            secret,
        })
    }
}

impl std::fmt::Debug for DeviceCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceCredential")
            .field("device_id", &self.device_id)
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

impl Device {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    pub fn key(&self) -> Option<DeviceKey> {
        let secret = hex::decode(&self.secret).ok()?;
        Some(DeviceKey {
            device_id: self.id,
            user_id: self.user_id,
            secret,
        })
    }
}
