//! PostgreSQL repositories backing the directories

pub mod account;
pub mod device;

pub use account::AccountRepository;
pub use device::DeviceRepository;

use crate::error::RendezvousError;

/// Directory lookups fail transiently when the database is unreachable
pub(crate) fn unavailable(err: sqlx::Error) -> RendezvousError {
    RendezvousError::StoreUnavailable(err.to_string())
}
