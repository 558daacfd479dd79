//! Directories the rendezvous core consults but does not own
//!
//! Accounts and enrolled devices live in their own storage; the registry
//! only needs to know whether an account is active and which key a device
//! signs with.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::RendezvousResult;
use crate::models::DeviceKey;

/// Account service
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// Resolve login credentials to an account id; fails with `AuthFailed`
    async fn resolve_account(&self, identifier: &str, secret: &str) -> RendezvousResult<Uuid>;

    /// Whether `user_id` names an existing, active account
    async fn is_active(&self, user_id: Uuid) -> RendezvousResult<bool>;
}

/// Enrolled-device lookup
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    /// Key of an enrolled device; `None` when unknown or revoked
    async fn find_device(&self, device_id: Uuid) -> RendezvousResult<Option<DeviceKey>>;
}
