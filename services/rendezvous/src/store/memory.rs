//! In-process session store
//!
//! A single mutex guards the records and their notification channels, so
//! every compare-and-set is atomic with respect to every other one. Each
//! session gets a broadcast channel on first subscription; the channel is
//! dropped again when its last feed goes away.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::error::{StoreError, StoreResult};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use super::{CasOutcome, SessionFeed, SessionStore, ensure_transition};
use crate::models::{Session, SessionId, SessionStatus};

/// Per-session notification capacity; a session publishes at most once
const CHANNEL_CAPACITY: usize = 8;

#[derive(Default)]
struct Inner {
    sessions: HashMap<SessionId, Session>,
    channels: HashMap<SessionId, broadcast::Sender<Session>>,
}

/// Session store kept in process memory
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }

    /// Number of live feeds on a session
    pub fn subscriber_count(&self, id: &SessionId) -> usize {
        self.inner
            .lock()
            .ok()
            .and_then(|inner| inner.channels.get(id).map(|tx| tx.receiver_count()))
            .unwrap_or(0)
    }

    /// Number of sessions with at least one notification channel open
    pub fn open_channels(&self) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.channels.len())
            .unwrap_or(0)
    }
}

/// Removes the session's channel once the last receiver is gone
struct ChannelGuard {
    inner: Arc<Mutex<Inner>>,
    id: SessionId,
}

impl Drop for ChannelGuard {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.inner.lock() {
            let idle = inner
                .channels
                .get(&self.id)
                .is_some_and(|tx| tx.receiver_count() == 0);
            if idle {
                inner.channels.remove(&self.id);
                debug!("Released notification channel for session {}", self.id);
            }
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert(&self, session: &Session) -> StoreResult<bool> {
        let mut inner = self.lock()?;
        if inner.sessions.contains_key(&session.id) {
            return Ok(false);
        }
        inner.sessions.insert(session.id.clone(), session.clone());
        Ok(true)
    }

    async fn get(&self, id: &SessionId) -> StoreResult<Option<Session>> {
        Ok(self.lock()?.sessions.get(id).cloned())
    }

    async fn compare_and_set(
        &self,
        expected: SessionStatus,
        next: &Session,
    ) -> StoreResult<CasOutcome> {
        ensure_transition(expected, next)?;
        let mut inner = self.lock()?;
        let Some(current) = inner.sessions.get(&next.id) else {
            return Ok(CasOutcome::Missing);
        };

        if current.status != expected {
            return Ok(CasOutcome::Conflict(current.clone()));
        }
        if next.status != SessionStatus::Expired && current.is_past_deadline(Utc::now()) {
            return Ok(CasOutcome::Lapsed(current.clone()));
        }

        inner.sessions.insert(next.id.clone(), next.clone());
        if let Some(tx) = inner.channels.get(&next.id) {
            // No receivers is not an error: nobody is watching
            let _ = tx.send(next.clone());
        }
        Ok(CasOutcome::Applied)
    }

    async fn due_pending(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<SessionId>> {
        let inner = self.lock()?;
        Ok(inner
            .sessions
            .values()
            .filter(|s| s.status == SessionStatus::Pending && s.expires_at < now)
            .take(limit)
            .map(|s| s.id.clone())
            .collect())
    }

    async fn pending_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Session>> {
        let now = Utc::now();
        let inner = self.lock()?;
        let mut sessions: Vec<Session> = inner
            .sessions
            .values()
            .filter(|s| {
                s.user_id == user_id
                    && s.status == SessionStatus::Pending
                    && !s.is_past_deadline(now)
            })
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        Ok(sessions)
    }

    async fn subscribe(&self, id: &SessionId) -> StoreResult<SessionFeed> {
        let rx = {
            let mut inner = self.lock()?;
            inner
                .channels
                .entry(id.clone())
                .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
                .subscribe()
        };
        let guard = ChannelGuard {
            inner: Arc::clone(&self.inner),
            id: id.clone(),
        };

        let stream = futures::stream::unfold((rx, guard), |(mut rx, guard)| async move {
            loop {
                match rx.recv().await {
                    Ok(session) => return Some((session, (rx, guard))),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(SessionFeed::new(stream))
    }

    async fn health_check(&self) -> StoreResult<bool> {
        Ok(self.lock().is_ok())
    }
}
