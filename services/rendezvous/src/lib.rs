//! Session rendezvous for cross-device two-factor login
//!
//! A web client opens a pending session after the first factor and waits on
//! it; an enrolled device confirms or denies it with a signed assertion after
//! a local biometric or PIN check. Sessions that nobody decides expire.

pub mod assertion;
pub mod client;
pub mod confirmer;
pub mod directory;
pub mod error;
pub mod hashing;
pub mod models;
pub mod pin;
pub mod rate_limiter;
pub mod reaper;
pub mod recovery;
pub mod registry;
pub mod repositories;
pub mod routes;
pub mod settings;
pub mod store;
pub mod validation;
pub mod watcher;

use std::sync::Arc;

pub use error::{RendezvousError, RendezvousResult};
pub use registry::SessionRegistry;
pub use watcher::{Subscription, WatchEvent, Watcher};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub registry: SessionRegistry,
    pub watcher: Watcher,
    pub store: Arc<dyn store::SessionStore>,
    pub accounts: repositories::AccountRepository,
    pub devices: repositories::DeviceRepository,
    pub rate_limiter: rate_limiter::RateLimiter,
}
