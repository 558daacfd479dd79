//! Device-side confirmer
//!
//! Runs on the authenticating device. It turns a successful local identity
//! check into an assertion bound to one session and hands it to a
//! [`ConfirmationTarget`]. When the local check fails, the target is never
//! contacted.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::assertion::{self, AssertionAction, DeviceAssertion};
use crate::error::{RendezvousError, RendezvousResult};
use crate::models::{DeviceCredential, DeviceKey, SessionId};
use crate::registry::SessionRegistry;

/// How long a local identity check stays usable
const PROOF_FRESHNESS_SECS: i64 = 60;

/// How the device owner proved their identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalAuthMethod {
    Pin,
    Biometric,
    PinAndBiometric,
}

/// Evidence that a local biometric or PIN check just succeeded
#[derive(Debug, Clone)]
pub struct LocalCredentialProof {
    method: LocalAuthMethod,
    verified_at: DateTime<Utc>,
}

impl LocalCredentialProof {
    /// Record a successful check
    ///
    /// This is the hook for [`LocalAuthenticator`] implementations: a
    /// platform adapter calls it once its biometric or PIN prompt has
    /// passed, as [`crate::pin::PinGate::prove`] does. Holding a proof
    /// authorizes nothing by itself; the device key still signs every
    /// assertion, and [`Confirmer`] refuses proofs older than a minute.
    pub fn verified(method: LocalAuthMethod) -> Self {
        Self {
            method,
            verified_at: Utc::now(),
        }
    }

    pub fn method(&self) -> LocalAuthMethod {
        self.method
    }

    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now - self.verified_at <= Duration::seconds(PROOF_FRESHNESS_SECS)
    }
}

/// Platform biometric/PIN capability
#[async_trait]
pub trait LocalAuthenticator: Send + Sync {
    /// Ask the device owner to prove their identity; fails with `LocalAuthFailed`
    async fn prove_local_identity(&self) -> RendezvousResult<LocalCredentialProof>;
}

/// Where a device delivers its decision
#[async_trait]
pub trait ConfirmationTarget: Send + Sync {
    async fn confirm(&self, id: &SessionId, assertion: &DeviceAssertion) -> RendezvousResult<()>;

    async fn deny(
        &self,
        id: &SessionId,
        assertion: &DeviceAssertion,
        reason: Option<String>,
    ) -> RendezvousResult<()>;
}

#[async_trait]
impl ConfirmationTarget for SessionRegistry {
    async fn confirm(&self, id: &SessionId, assertion: &DeviceAssertion) -> RendezvousResult<()> {
        SessionRegistry::confirm(self, id, assertion).await
    }

    async fn deny(
        &self,
        id: &SessionId,
        assertion: &DeviceAssertion,
        reason: Option<String>,
    ) -> RendezvousResult<()> {
        SessionRegistry::deny(self, id, assertion, reason).await
    }
}

/// Produces and delivers assertions for one enrolled device
pub struct Confirmer {
    key: DeviceKey,
    assertion_lifetime_secs: u64,
}

impl Confirmer {
    pub fn new(
        credential: &DeviceCredential,
        assertion_lifetime_secs: u64,
    ) -> RendezvousResult<Self> {
        let key = credential.key().ok_or_else(|| {
            RendezvousError::InvalidRequest("device secret is not valid hex".to_string())
        })?;
        Ok(Self {
            key,
            assertion_lifetime_secs,
        })
    }

    /// Assertion confirming `session_id`
    pub fn produce_assertion(
        &self,
        session_id: &SessionId,
        proof: &LocalCredentialProof,
    ) -> RendezvousResult<DeviceAssertion> {
        self.produce(session_id, proof, AssertionAction::Confirm)
    }

    /// Assertion denying `session_id`
    pub fn produce_denial(
        &self,
        session_id: &SessionId,
        proof: &LocalCredentialProof,
    ) -> RendezvousResult<DeviceAssertion> {
        self.produce(session_id, proof, AssertionAction::Deny)
    }

    /// Assertion listing the account's pending sessions
    ///
    /// Listing reveals only ids and deadlines and decides nothing, so it
    /// needs no local check.
    pub fn produce_listing(&self) -> RendezvousResult<DeviceAssertion> {
        assertion::sign_listing(&self.key, self.assertion_lifetime_secs)
    }

    /// Check the owner locally, then confirm the session
    pub async fn approve(
        &self,
        target: &dyn ConfirmationTarget,
        session_id: &SessionId,
        authenticator: &dyn LocalAuthenticator,
    ) -> RendezvousResult<()> {
        let proof = self.prove(authenticator).await?;
        let assertion = self.produce_assertion(session_id, &proof)?;
        target.confirm(session_id, &assertion).await?;
        info!("Device {} confirmed session {}", self.key.device_id, session_id);
        Ok(())
    }

    /// Check the owner locally, then deny the session
    pub async fn reject(
        &self,
        target: &dyn ConfirmationTarget,
        session_id: &SessionId,
        authenticator: &dyn LocalAuthenticator,
        reason: Option<String>,
    ) -> RendezvousResult<()> {
        let proof = self.prove(authenticator).await?;
        let assertion = self.produce_denial(session_id, &proof)?;
        target.deny(session_id, &assertion, reason).await?;
        info!("Device {} denied session {}", self.key.device_id, session_id);
        Ok(())
    }

    async fn prove(
        &self,
        authenticator: &dyn LocalAuthenticator,
    ) -> RendezvousResult<LocalCredentialProof> {
        authenticator.prove_local_identity().await.map_err(|e| {
            warn!(
                "Local authentication failed on device {}: {}",
                self.key.device_id, e
            );
            RendezvousError::LocalAuthFailed
        })
    }

    fn produce(
        &self,
        session_id: &SessionId,
        proof: &LocalCredentialProof,
        action: AssertionAction,
    ) -> RendezvousResult<DeviceAssertion> {
        if !proof.is_fresh(Utc::now()) {
            return Err(RendezvousError::LocalAuthFailed);
        }
        assertion::sign(&self.key, session_id, action, self.assertion_lifetime_secs)
    }
}
