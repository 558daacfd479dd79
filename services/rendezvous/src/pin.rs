//! PIN-based local authenticator
//!
//! Stands in for a platform biometric prompt on devices that only have a PIN.
//! The PIN itself never leaves the device; only its Argon2 hash is kept.

use std::sync::Mutex;

use async_trait::async_trait;
use tracing::warn;

use crate::confirmer::{LocalAuthMethod, LocalAuthenticator, LocalCredentialProof};
use crate::error::{RendezvousError, RendezvousResult};
use crate::hashing::{hash_secret, verify_secret};
use crate::validation::validate_pin;

/// Checks an entered PIN against the enrolled one
pub struct PinGate {
    pin_hash: String,
}

impl PinGate {
    /// Enroll a six-digit PIN
    pub fn new(pin: &str) -> RendezvousResult<Self> {
        validate_pin(pin).map_err(RendezvousError::InvalidRequest)?;
        let pin_hash = hash_secret(pin)
            .map_err(|e| RendezvousError::Internal(format!("could not hash PIN: {}", e)))?;
        Ok(Self { pin_hash })
    }

    /// Check `entered`, producing a fresh proof on a match
    pub fn prove(&self, entered: &str) -> RendezvousResult<LocalCredentialProof> {
        if validate_pin(entered).is_err() || !verify_secret(entered, &self.pin_hash) {
            warn!("Wrong PIN entered");
            return Err(RendezvousError::LocalAuthFailed);
        }
        Ok(LocalCredentialProof::verified(LocalAuthMethod::Pin))
    }
}

/// A [`PinGate`] paired with the PIN the owner typed at the prompt
pub struct PinPrompt {
    gate: PinGate,
    entered: Mutex<Option<String>>,
}

impl PinPrompt {
    pub fn new(gate: PinGate) -> Self {
        Self {
            gate,
            entered: Mutex::new(None),
        }
    }

    /// Record what the owner typed; it is consumed by the next check
    pub fn enter(&self, pin: impl Into<String>) {
        if let Ok(mut entered) = self.entered.lock() {
            *entered = Some(pin.into());
        }
    }
}

#[async_trait]
impl LocalAuthenticator for PinPrompt {
    async fn prove_local_identity(&self) -> RendezvousResult<LocalCredentialProof> {
        let entered = self
            .entered
            .lock()
            .map_err(|_| RendezvousError::LocalAuthFailed)?
            .take()
            .ok_or(RendezvousError::LocalAuthFailed)?;
        self.gate.prove(&entered)
    }
}
