//! Login session model and its state machine

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Bytes of OS randomness behind every session id
const SESSION_ID_BYTES: usize = 32;

/// Opaque, unguessable session identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Draw a fresh identifier from the operating system RNG
    pub fn generate() -> Self {
        let mut raw = [0u8; SESSION_ID_BYTES];
        OsRng.fill_bytes(&mut raw);
        SessionId(hex::encode(raw))
    }

    /// Accept an identifier received from a client
    ///
    /// Anything that could not have been produced by [`SessionId::generate`]
    /// is rejected, so junk never reaches the store.
    pub fn parse(raw: &str) -> Option<Self> {
        let well_formed = raw.len() == SESSION_ID_BYTES * 2
            && raw
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        well_formed.then(|| SessionId(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Confirmed,
    Denied,
    Expired,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionStatus::Pending)
    }

    /// Whether `self -> next` is an edge of the state machine
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        self == SessionStatus::Pending && next.is_terminal()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Confirmed => "confirmed",
            SessionStatus::Denied => "denied",
            SessionStatus::Expired => "expired",
        }
    }

    /// Text shown to the person waiting at the web client
    pub fn label(self) -> &'static str {
        match self {
            SessionStatus::Pending => "Waiting for confirmation on your device...",
            SessionStatus::Confirmed => "Authenticated",
            SessionStatus::Denied => "Login was denied on your device",
            SessionStatus::Expired => "Login request expired",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub user_id: Uuid,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Device that confirmed the session; set only on `confirmed`
    pub confirmed_by: Option<Uuid>,
    /// Reason given on the device; set only on `denied`
    pub deny_reason: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Build a pending session living for `ttl` from `now`
    pub fn pending(user_id: Uuid, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            id: SessionId::generate(),
            user_id,
            status: SessionStatus::Pending,
            created_at: now,
            expires_at: now + ttl,
            confirmed_by: None,
            deny_reason: None,
            decided_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// No transition other than expiry is allowed from `expires_at` on
    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// The record as it looks after confirmation by `device_id`
    pub fn confirmed(&self, device_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            status: SessionStatus::Confirmed,
            confirmed_by: Some(device_id),
            decided_at: Some(now),
            ..self.clone()
        }
    }

    pub fn denied(&self, reason: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            status: SessionStatus::Denied,
            deny_reason: reason,
            decided_at: Some(now),
            ..self.clone()
        }
    }

    pub fn expired(&self, now: DateTime<Utc>) -> Self {
        Self {
            status: SessionStatus::Expired,
            decided_at: Some(now),
            ..self.clone()
        }
    }
}
