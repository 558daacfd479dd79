//! Rendezvous service models

pub mod device;
pub mod session;
pub mod user;

// Re-export for convenience
pub use device::{Device, DeviceCredential, DeviceKey};
pub use session::{Session, SessionId, SessionStatus};
pub use user::{Account, LoginCredentials, NewAccount, RegisteredAccount};
