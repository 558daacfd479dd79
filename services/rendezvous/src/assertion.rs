//! Device assertions
//!
//! An assertion is a compact HS256 JWT signed with the secret a device
//! received at enrollment. The header `kid` names the device; the claims bind
//! the user, the session and the requested action, so an assertion minted for
//! one session cannot be replayed against another, and a denial cannot be
//! turned into a confirmation.

use std::sync::Arc;

use chrono::Utc;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, decode_header, encode,
};
use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::directory::DeviceDirectory;
use crate::error::{RendezvousError, RendezvousResult};
use crate::models::{DeviceKey, Session, SessionId};

/// Action an assertion authorizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssertionAction {
    Confirm,
    Deny,
    /// List the account's pending sessions; bound to no session
    List,
}

/// Claims carried by a device assertion
#[derive(Debug, Serialize, Deserialize)]
pub struct AssertionClaims {
    /// Account the device belongs to
    pub sub: Uuid,
    /// Session the assertion is bound to; empty for `list`
    pub sid: String,
    /// Signing device
    pub dev: Uuid,
    pub act: AssertionAction,
    pub iat: u64,
    pub exp: u64,
    pub jti: String,
}

/// Signed statement from a device about one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceAssertion(String);

impl DeviceAssertion {
    pub fn from_token(token: impl Into<String>) -> Self {
        DeviceAssertion(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Sign an assertion about one session with a device key
pub fn sign(
    key: &DeviceKey,
    session_id: &SessionId,
    action: AssertionAction,
    lifetime_secs: u64,
) -> RendezvousResult<DeviceAssertion> {
    sign_claims(key, session_id.to_string(), action, lifetime_secs)
}

/// Sign an assertion that lets the device list its account's pending sessions
pub fn sign_listing(key: &DeviceKey, lifetime_secs: u64) -> RendezvousResult<DeviceAssertion> {
    sign_claims(key, String::new(), AssertionAction::List, lifetime_secs)
}

fn sign_claims(
    key: &DeviceKey,
    sid: String,
    action: AssertionAction,
    lifetime_secs: u64,
) -> RendezvousResult<DeviceAssertion> {
    let now = Utc::now().timestamp().max(0) as u64;
    let mut nonce = [0u8; 16];
    OsRng.fill_bytes(&mut nonce);

    let claims = AssertionClaims {
        sub: key.user_id,
        sid,
        dev: key.device_id,
        act: action,
        iat: now,
        exp: now + lifetime_secs,
        jti: hex::encode(nonce),
    };

    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some(key.device_id.to_string());

    let token = encode(&header, &claims, &EncodingKey::from_secret(&key.secret))
        .map_err(|e| RendezvousError::Internal(format!("failed to sign assertion: {}", e)))?;
    Ok(DeviceAssertion(token))
}

/// Checks assertions against the enrolled-device directory
#[derive(Clone)]
pub struct AssertionVerifier {
    devices: Arc<dyn DeviceDirectory>,
    max_age_secs: u64,
}

impl AssertionVerifier {
    pub fn new(devices: Arc<dyn DeviceDirectory>, max_age_secs: u64) -> Self {
        Self {
            devices,
            max_age_secs,
        }
    }

    /// Validate `assertion` for `action` on `session`; returns the device id
    pub async fn verify(
        &self,
        assertion: &DeviceAssertion,
        session: &Session,
        action: AssertionAction,
    ) -> RendezvousResult<Uuid> {
        let (key, claims) = self.authenticate(assertion).await?;

        if key.user_id != session.user_id {
            warn!(
                "Assertion from device {} targets session {} of another account",
                key.device_id, session.id
            );
            return Err(invalid("assertion is bound to another account"));
        }
        if claims.sid != session.id.as_str() {
            warn!(
                "Assertion for session {} replayed against session {}",
                claims.sid, session.id
            );
            return Err(invalid("assertion is bound to another session"));
        }
        if claims.act != action {
            return Err(invalid("assertion authorizes a different action"));
        }

        debug!(
            "Assertion from device {} accepted for {}",
            key.device_id, session.id
        );
        Ok(key.device_id)
    }

    /// Validate a `list` assertion; returns the signing device's key
    pub async fn verify_listing(&self, assertion: &DeviceAssertion) -> RendezvousResult<DeviceKey> {
        let (key, claims) = self.authenticate(assertion).await?;
        if claims.act != AssertionAction::List || !claims.sid.is_empty() {
            return Err(invalid("assertion does not authorize listing"));
        }
        debug!("Listing assertion from device {} accepted", key.device_id);
        Ok(key)
    }

    /// Signature, device, account and lifetime checks shared by every action
    async fn authenticate(
        &self,
        assertion: &DeviceAssertion,
    ) -> RendezvousResult<(DeviceKey, AssertionClaims)> {
        let header = decode_header(assertion.as_str())
            .map_err(|e| invalid(format!("malformed assertion: {}", e)))?;
        if header.alg != Algorithm::HS256 {
            return Err(invalid("unexpected signing algorithm"));
        }
        let device_id = header
            .kid
            .as_deref()
            .and_then(|kid| Uuid::parse_str(kid).ok())
            .ok_or_else(|| invalid("assertion does not name its device"))?;

        let key = self
            .devices
            .find_device(device_id)
            .await?
            .ok_or_else(|| invalid("unknown or revoked device"))?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 5;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let claims = decode::<AssertionClaims>(
            assertion.as_str(),
            &DecodingKey::from_secret(&key.secret),
            &validation,
        )
        .map_err(|e| invalid(format!("signature check failed: {}", e)))?
        .claims;

        if claims.dev != key.device_id {
            return Err(invalid("device claim does not match signing key"));
        }
        if claims.sub != key.user_id {
            return Err(invalid("assertion is bound to another account"));
        }
        if claims.exp.saturating_sub(claims.iat) > self.max_age_secs {
            return Err(invalid("assertion lifetime too long"));
        }

        Ok((key, claims))
    }
}

fn invalid(reason: impl Into<String>) -> RendezvousError {
    RendezvousError::AssertionInvalid(reason.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration;

    struct OneDevice(DeviceKey);

    #[async_trait]
    impl DeviceDirectory for OneDevice {
        async fn find_device(&self, device_id: Uuid) -> RendezvousResult<Option<DeviceKey>> {
            Ok((device_id == self.0.device_id).then(|| self.0.clone()))
        }
    }

    fn key_for(user_id: Uuid) -> DeviceKey {
        DeviceKey {
            device_id: Uuid::new_v4(),
            user_id,
            secret: vec![7u8; 32],
        }
    }

    fn session_for(user_id: Uuid) -> Session {
        Session::pending(user_id, Utc::now(), Duration::seconds(120))
    }

    #[tokio::test]
    async fn test_valid_assertion_is_accepted() {
        let user = Uuid::new_v4();
        let key = key_for(user);
        let session = session_for(user);
        let verifier = AssertionVerifier::new(Arc::new(OneDevice(key.clone())), 60);

        let assertion = sign(&key, &session.id, AssertionAction::Confirm, 60).unwrap();
        let device = verifier
            .verify(&assertion, &session, AssertionAction::Confirm)
            .await
            .unwrap();
        assert_eq!(device, key.device_id);
    }

    #[tokio::test]
    async fn test_cross_session_replay_is_rejected() {
        let user = Uuid::new_v4();
        let key = key_for(user);
        let first = session_for(user);
        let second = session_for(user);
        let verifier = AssertionVerifier::new(Arc::new(OneDevice(key.clone())), 60);

        let assertion = sign(&key, &first.id, AssertionAction::Confirm, 60).unwrap();
        let err = verifier
            .verify(&assertion, &second, AssertionAction::Confirm)
            .await
            .unwrap_err();
        assert!(matches!(err, RendezvousError::AssertionInvalid(_)));
    }

    #[tokio::test]
    async fn test_denial_cannot_confirm() {
        let user = Uuid::new_v4();
        let key = key_for(user);
        let session = session_for(user);
        let verifier = AssertionVerifier::new(Arc::new(OneDevice(key.clone())), 60);

        let assertion = sign(&key, &session.id, AssertionAction::Deny, 60).unwrap();
        assert!(
            verifier
                .verify(&assertion, &session, AssertionAction::Confirm)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_wrong_secret_is_rejected() {
        let user = Uuid::new_v4();
        let key = key_for(user);
        let session = session_for(user);
        let verifier = AssertionVerifier::new(Arc::new(OneDevice(key.clone())), 60);

        let forged_key = DeviceKey {
            secret: vec![9u8; 32],
            ..key.clone()
        };
        let assertion = sign(&forged_key, &session.id, AssertionAction::Confirm, 60).unwrap();
        assert!(
            verifier
                .verify(&assertion, &session, AssertionAction::Confirm)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_device_of_another_account_is_rejected() {
        let key = key_for(Uuid::new_v4());
        let session = session_for(Uuid::new_v4());
        let verifier = AssertionVerifier::new(Arc::new(OneDevice(key.clone())), 60);

        let assertion = sign(&key, &session.id, AssertionAction::Confirm, 60).unwrap();
        assert!(
            verifier
                .verify(&assertion, &session, AssertionAction::Confirm)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_overlong_lifetime_is_rejected() {
        let user = Uuid::new_v4();
        let key = key_for(user);
        let session = session_for(user);
        let verifier = AssertionVerifier::new(Arc::new(OneDevice(key.clone())), 60);

        let assertion = sign(&key, &session.id, AssertionAction::Confirm, 3600).unwrap();
        assert!(
            verifier
                .verify(&assertion, &session, AssertionAction::Confirm)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_listing_assertion_is_separate_from_decisions() {
        let user = Uuid::new_v4();
        let key = key_for(user);
        let session = session_for(user);
        let verifier = AssertionVerifier::new(Arc::new(OneDevice(key.clone())), 60);

        let listing = sign_listing(&key, 60).unwrap();
        let accepted = verifier.verify_listing(&listing).await.unwrap();
        assert_eq!(accepted.user_id, user);
        assert!(
            verifier
                .verify(&listing, &session, AssertionAction::Confirm)
                .await
                .is_err()
        );

        let confirm = sign(&key, &session.id, AssertionAction::Confirm, 60).unwrap();
        assert!(verifier.verify_listing(&confirm).await.is_err());

        // A list action smuggled into a session-bound assertion is refused too
        let bound = sign(&key, &session.id, AssertionAction::List, 60).unwrap();
        assert!(verifier.verify_listing(&bound).await.is_err());
    }

    #[tokio::test]
    async fn test_garbage_token_is_rejected() {
        let user = Uuid::new_v4();
        let verifier = AssertionVerifier::new(Arc::new(OneDevice(key_for(user))), 60);
        let err = verifier
            .verify(
                &DeviceAssertion::from_token("not-a-jwt"),
                &session_for(user),
                AssertionAction::Confirm,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RendezvousError::AssertionInvalid(_)));
    }
}
