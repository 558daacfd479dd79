//! Change-notification session store
//!
//! The store is the only shared mutable resource of the protocol. Every
//! mutation after insertion goes through [`SessionStore::compare_and_set`],
//! and every successful mutation is pushed to the subscribers of that
//! session.

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::error::{StoreError, StoreResult};
use futures::Stream;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::models::{Session, SessionId, SessionStatus};

pub mod memory;
pub mod redis;

pub use self::memory::MemorySessionStore;
pub use self::redis::RedisSessionStore;

/// Result of a compare-and-set attempt
#[derive(Debug, Clone, PartialEq)]
pub enum CasOutcome {
    /// The record matched and now holds the new value
    Applied,
    /// The record no longer has the expected status
    Conflict(Session),
    /// The record matched but its deadline passed by the store's clock,
    /// and only expiry may be applied
    Lapsed(Session),
    /// No record under that id
    Missing,
}

/// Backing store for session records
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a new record if its id is free; returns `false` on collision
    async fn insert(&self, session: &Session) -> StoreResult<bool>;

    async fn get(&self, id: &SessionId) -> StoreResult<Option<Session>>;

    /// Atomically replace the record with `next` if its status is `expected`.
    ///
    /// Transitions into anything but `expired` are refused once the stored
    /// deadline has passed.
    async fn compare_and_set(
        &self,
        expected: SessionStatus,
        next: &Session,
    ) -> StoreResult<CasOutcome>;

    /// Ids of pending sessions whose deadline is before `now`
    async fn due_pending(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<SessionId>>;

    /// Pending sessions of one account whose deadline has not passed
    async fn pending_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Session>>;

    /// Open a change feed delivering every later value of the record
    async fn subscribe(&self, id: &SessionId) -> StoreResult<SessionFeed>;

    async fn health_check(&self) -> StoreResult<bool>;
}

/// Refuse compare-and-set writes that are not an edge of the state machine
pub(crate) fn ensure_transition(expected: SessionStatus, next: &Session) -> StoreResult<()> {
    if expected.can_transition_to(next.status) {
        Ok(())
    } else {
        Err(StoreError::Rejected(format!(
            "session {} cannot move from {} to {}",
            next.id, expected, next.status
        )))
    }
}

/// Push-driven feed of record values for one session
///
/// Dropping the feed releases the underlying notification handle.
pub struct SessionFeed {
    inner: BoxStream<'static, Session>,
}

impl SessionFeed {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Session> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
        }
    }
}

impl Stream for SessionFeed {
    type Item = Session;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Session>> {
        self.inner.as_mut().poll_next(cx)
    }
}
