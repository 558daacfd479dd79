//! Shared fixtures: in-memory directories and a wired-up registry

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::{RngCore, rngs::OsRng};
use uuid::Uuid;

use rendezvous::{
    RendezvousError, RendezvousResult, SessionRegistry, Watcher,
    assertion::{self, AssertionAction, AssertionVerifier, DeviceAssertion},
    directory::{AccountDirectory, DeviceDirectory},
    models::{DeviceCredential, DeviceKey, SessionId},
    store::{MemorySessionStore, SessionStore},
};

pub const ASSERTION_MAX_AGE_SECS: u64 = 60;

/// Accounts held in memory: identifier -> (user id, password)
#[derive(Default)]
pub struct FakeAccounts {
    credentials: Mutex<HashMap<String, (Uuid, String)>>,
    active: Mutex<HashSet<Uuid>>,
}

impl FakeAccounts {
    pub fn add(&self, identifier: &str, secret: &str) -> Uuid {
        let user_id = Uuid::new_v4();
        self.credentials
            .lock()
            .unwrap()
            .insert(identifier.to_string(), (user_id, secret.to_string()));
        self.active.lock().unwrap().insert(user_id);
        user_id
    }

    pub fn deactivate(&self, user_id: Uuid) {
        self.active.lock().unwrap().remove(&user_id);
    }
}

#[async_trait]
impl AccountDirectory for FakeAccounts {
    async fn resolve_account(&self, identifier: &str, secret: &str) -> RendezvousResult<Uuid> {
        let credentials = self.credentials.lock().unwrap();
        match credentials.get(identifier) {
            Some((user_id, stored)) if stored == secret => Ok(*user_id),
            _ => Err(RendezvousError::AuthFailed),
        }
    }

    async fn is_active(&self, user_id: Uuid) -> RendezvousResult<bool> {
        Ok(self.active.lock().unwrap().contains(&user_id))
    }
}

/// Enrolled devices held in memory
#[derive(Default)]
pub struct FakeDevices {
    keys: Mutex<HashMap<Uuid, DeviceKey>>,
    revoked: Mutex<HashSet<Uuid>>,
}

impl FakeDevices {
    pub fn enroll(&self, user_id: Uuid) -> DeviceCredential {
        let mut secret = [0u8; 32];
        OsRng.fill_bytes(&mut secret);
        let credential = DeviceCredential {
            device_id: Uuid::new_v4(),
            user_id,
            secret: hex::encode(secret),
        };
        self.keys
            .lock()
            .unwrap()
            .insert(credential.device_id, credential.key().unwrap());
        credential
    }

    pub fn revoke(&self, device_id: Uuid) {
        self.revoked.lock().unwrap().insert(device_id);
    }
}

#[async_trait]
impl DeviceDirectory for FakeDevices {
    async fn find_device(&self, device_id: Uuid) -> RendezvousResult<Option<DeviceKey>> {
        if self.revoked.lock().unwrap().contains(&device_id) {
            return Ok(None);
        }
        Ok(self.keys.lock().unwrap().get(&device_id).cloned())
    }
}

/// Registry and watcher over one in-memory store
pub struct Harness {
    pub store: MemorySessionStore,
    pub accounts: Arc<FakeAccounts>,
    pub devices: Arc<FakeDevices>,
    pub registry: SessionRegistry,
    pub watcher: Watcher,
}

impl Harness {
    pub fn new(ttl: Duration) -> Self {
        Self::with_margin(ttl, Duration::from_secs(1))
    }

    pub fn with_margin(ttl: Duration, margin: Duration) -> Self {
        let store = MemorySessionStore::new();
        let shared: Arc<dyn SessionStore> = Arc::new(store.clone());
        let accounts = Arc::new(FakeAccounts::default());
        let devices = Arc::new(FakeDevices::default());

        let verifier = AssertionVerifier::new(devices.clone(), ASSERTION_MAX_AGE_SECS);
        let registry = SessionRegistry::new(shared.clone(), accounts.clone(), verifier, ttl);
        let watcher = Watcher::new(shared, ttl, margin);

        Self {
            store,
            accounts,
            devices,
            registry,
            watcher,
        }
    }

    pub fn shared_store(&self) -> Arc<dyn SessionStore> {
        Arc::new(self.store.clone())
    }

    /// Another registry over the same store and directories with its own ttl
    pub fn registry_with_ttl(&self, ttl: Duration) -> SessionRegistry {
        let verifier = AssertionVerifier::new(self.devices.clone(), ASSERTION_MAX_AGE_SECS);
        SessionRegistry::new(self.shared_store(), self.accounts.clone(), verifier, ttl)
    }

    /// An active account with one enrolled device
    pub fn user_with_device(&self) -> (Uuid, DeviceCredential) {
        let user_id = self
            .accounts
            .add(&format!("{}@example.com", Uuid::new_v4()), "Str0ng!Pass");
        let device = self.devices.enroll(user_id);
        (user_id, device)
    }
}

pub fn sign(
    device: &DeviceCredential,
    session_id: &SessionId,
    action: AssertionAction,
) -> DeviceAssertion {
    assertion::sign(&device.key().unwrap(), session_id, action, 30).unwrap()
}

pub fn sign_listing(device: &DeviceCredential) -> DeviceAssertion {
    assertion::sign_listing(&device.key().unwrap(), 30).unwrap()
}
