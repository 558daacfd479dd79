//! Session registry: sole owner of the session state machine
//!
//! Every status change goes through one compare-and-set on the store keyed
//! by session id, so concurrent confirm/deny/expire attempts have exactly one
//! winner. Losers learn that someone else already decided the session.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::assertion::{AssertionAction, AssertionVerifier, DeviceAssertion};
use crate::directory::AccountDirectory;
use crate::error::{RendezvousError, RendezvousResult};
use crate::models::{Session, SessionId, SessionStatus};
use crate::store::{CasOutcome, SessionStore};

/// Fresh ids to try before giving up on insertion
const MAX_ID_ATTEMPTS: usize = 3;

/// Longest deny reason kept on the record
const MAX_REASON_LEN: usize = 256;

/// Session registry
#[derive(Clone)]
pub struct SessionRegistry {
    store: Arc<dyn SessionStore>,
    accounts: Arc<dyn AccountDirectory>,
    verifier: AssertionVerifier,
    ttl: Duration,
}

impl SessionRegistry {
    /// Create a registry over an injected store and directories
    pub fn new(
        store: Arc<dyn SessionStore>,
        accounts: Arc<dyn AccountDirectory>,
        verifier: AssertionVerifier,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            accounts,
            verifier,
            ttl,
        }
    }

    /// Session lifetime
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Start a login session for `user_id`
    pub async fn create(&self, user_id: Uuid) -> RendezvousResult<Session> {
        if !self.accounts.is_active(user_id).await? {
            warn!("Refusing session for inactive or unknown account {}", user_id);
            return Err(RendezvousError::InvalidAccount);
        }

        let ttl = chrono::Duration::from_std(self.ttl)
            .map_err(|e| RendezvousError::Internal(format!("session ttl: {}", e)))?;

        for _ in 0..MAX_ID_ATTEMPTS {
            let session = Session::pending(user_id, Utc::now(), ttl);
            if self.store.insert(&session).await? {
                info!(
                    "Created session {} for user {} expiring at {}",
                    session.id, user_id, session.expires_at
                );
                return Ok(session);
            }
            warn!("Session id collision on {}, drawing a new id", session.id);
        }

        Err(RendezvousError::StoreUnavailable(
            "could not allocate a unique session id".to_string(),
        ))
    }

    /// Read-only lookup
    pub async fn get(&self, id: &SessionId) -> RendezvousResult<Session> {
        self.store
            .get(id)
            .await?
            .ok_or(RendezvousError::SessionNotFound)
    }

    /// Apply a device confirmation
    pub async fn confirm(
        &self,
        id: &SessionId,
        assertion: &DeviceAssertion,
    ) -> RendezvousResult<()> {
        self.decide(id, assertion, AssertionAction::Confirm, None)
            .await
    }

    /// Apply a device denial
    pub async fn deny(
        &self,
        id: &SessionId,
        assertion: &DeviceAssertion,
        reason: Option<String>,
    ) -> RendezvousResult<()> {
        if reason.as_ref().is_some_and(|r| r.len() > MAX_REASON_LEN) {
            return Err(RendezvousError::InvalidRequest(format!(
                "reason longer than {} bytes",
                MAX_REASON_LEN
            )));
        }
        self.decide(id, assertion, AssertionAction::Deny, reason)
            .await
    }

    /// Pending sessions awaiting a decision from the signing device's account
    ///
    /// Authenticated by a `list` assertion, so a device can discover the
    /// session its owner just started elsewhere.
    pub async fn pending_for_device(
        &self,
        assertion: &DeviceAssertion,
    ) -> RendezvousResult<Vec<Session>> {
        let key = self.verifier.verify_listing(assertion).await?;
        if !self.accounts.is_active(key.user_id).await? {
            warn!(
                "Device {} listed sessions for inactive account {}",
                key.device_id, key.user_id
            );
            return Err(RendezvousError::InvalidAccount);
        }
        let sessions = self.store.pending_for_user(key.user_id).await?;
        debug!(
            "Device {} sees {} pending session(s)",
            key.device_id,
            sessions.len()
        );
        Ok(sessions)
    }

    /// Move a pending session past its deadline to `expired`
    ///
    /// Returns `true` only if this call performed the transition; sessions
    /// that are still live or already terminal are left alone.
    pub async fn expire(&self, id: &SessionId) -> RendezvousResult<bool> {
        let session = self.get(id).await?;
        if session.status != SessionStatus::Pending || !session.is_past_deadline(Utc::now()) {
            return Ok(false);
        }
        self.expire_session(&session).await
    }

    async fn expire_session(&self, session: &Session) -> RendezvousResult<bool> {
        let next = session.expired(Utc::now());
        match self
            .store
            .compare_and_set(SessionStatus::Pending, &next)
            .await?
        {
            CasOutcome::Applied => {
                info!("Session {} expired", session.id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn decide(
        &self,
        id: &SessionId,
        assertion: &DeviceAssertion,
        action: AssertionAction,
        reason: Option<String>,
    ) -> RendezvousResult<()> {
        let session = self.get(id).await?;
        if session.is_terminal() {
            return Err(terminal_error(&session));
        }
        if session.is_past_deadline(Utc::now()) {
            if let Err(e) = self.expire_session(&session).await {
                warn!("Could not expire lapsed session {}: {}", session.id, e);
            }
            return Err(RendezvousError::SessionExpired);
        }

        let device_id = self.verifier.verify(assertion, &session, action).await?;

        let now = Utc::now();
        let next = match action {
            AssertionAction::Confirm => session.confirmed(device_id, now),
            AssertionAction::Deny => session.denied(reason, now),
            AssertionAction::List => {
                return Err(RendezvousError::InvalidRequest(
                    "listing assertions cannot decide a session".to_string(),
                ));
            }
        };

        match self
            .store
            .compare_and_set(SessionStatus::Pending, &next)
            .await?
        {
            CasOutcome::Applied => {
                info!(
                    "Session {} {} by device {}",
                    session.id, next.status, device_id
                );
                Ok(())
            }
            CasOutcome::Conflict(current) => {
                info!(
                    "Session {} already {}, {} attempt lost",
                    session.id, current.status, next.status
                );
                Err(terminal_error(&current))
            }
            CasOutcome::Lapsed(current) => {
                if let Err(e) = self.expire_session(&current).await {
                    warn!("Could not expire lapsed session {}: {}", current.id, e);
                }
                Err(RendezvousError::SessionExpired)
            }
            CasOutcome::Missing => Err(RendezvousError::SessionNotFound),
        }
    }
}

fn terminal_error(session: &Session) -> RendezvousError {
    match session.status {
        SessionStatus::Expired => RendezvousError::SessionExpired,
        _ => RendezvousError::SessionAlreadyTerminal,
    }
}
