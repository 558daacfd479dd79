//! Watcher: waits on a session for the web client
//!
//! A subscription is a lazy stream over the store's change feed. It yields
//! each status change, closes right after the first terminal status, and
//! closes with [`WatchEvent::TimedOut`] once its deadline passes. There is
//! no polling and no task per subscriber: the caller's own task drives the
//! stream.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{RendezvousError, RendezvousResult};
use crate::models::{SessionId, SessionStatus};
use crate::store::{SessionFeed, SessionStore};

/// Item of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEvent {
    Status(SessionStatus),
    /// The deadline passed before the session reached a terminal state
    TimedOut,
}

/// Hands out subscriptions on session records
#[derive(Clone)]
pub struct Watcher {
    store: Arc<dyn SessionStore>,
    ttl: Duration,
    margin: Duration,
}

impl Watcher {
    /// Subscriptions wait at most `ttl + margin`
    pub fn new(store: Arc<dyn SessionStore>, ttl: Duration, margin: Duration) -> Self {
        Self { store, ttl, margin }
    }

    /// Subscribe to status changes of `id`
    pub async fn subscribe(&self, id: &SessionId) -> RendezvousResult<Subscription> {
        // Open the feed before reading, so no transition can slip in between
        let feed = self.store.subscribe(id).await?;
        let current = self
            .store
            .get(id)
            .await?
            .ok_or(RendezvousError::SessionNotFound)?;

        let deadline = Instant::now() + self.ttl + self.margin;
        debug!(
            "Watching session {} (currently {}) for {:?}",
            id,
            current.status,
            self.ttl + self.margin
        );
        Ok(Subscription::new(id.clone(), feed, current.status, deadline))
    }
}

enum Phase {
    /// Session was already terminal at subscribe time
    Replay(SessionStatus),
    Live,
    Done,
}

struct WatchState {
    feed: Option<SessionFeed>,
    phase: Phase,
    last: SessionStatus,
    deadline: Instant,
}

/// Stream of status changes for one session
///
/// Dropping or cancelling the subscription releases the store's
/// notification handle.
pub struct Subscription {
    session_id: SessionId,
    inner: BoxStream<'static, RendezvousResult<WatchEvent>>,
}

impl Subscription {
    fn new(
        session_id: SessionId,
        feed: SessionFeed,
        current: SessionStatus,
        deadline: Instant,
    ) -> Self {
        let (feed, phase) = if current.is_terminal() {
            (None, Phase::Replay(current))
        } else {
            (Some(feed), Phase::Live)
        };
        let state = WatchState {
            feed,
            phase,
            last: current,
            deadline,
        };

        let inner = futures::stream::unfold(state, |mut st| async move {
            match st.phase {
                Phase::Done => None,
                Phase::Replay(status) => {
                    st.phase = Phase::Done;
                    Some((Ok(WatchEvent::Status(status)), st))
                }
                Phase::Live => {
                    let feed = st.feed.as_mut()?;
                    loop {
                        let next = tokio::time::timeout_at(st.deadline, feed.next()).await;
                        match next {
                            Err(_) => {
                                st.phase = Phase::Done;
                                st.feed = None;
                                return Some((Ok(WatchEvent::TimedOut), st));
                            }
                            Ok(None) => {
                                st.phase = Phase::Done;
                                st.feed = None;
                                return Some((
                                    Err(RendezvousError::StoreUnavailable(
                                        "change feed closed".to_string(),
                                    )),
                                    st,
                                ));
                            }
                            Ok(Some(session)) => {
                                if session.status == st.last {
                                    continue;
                                }
                                st.last = session.status;
                                if session.status.is_terminal() {
                                    st.phase = Phase::Done;
                                    st.feed = None;
                                }
                                return Some((Ok(WatchEvent::Status(session.status)), st));
                            }
                        }
                    }
                }
            }
        });

        Self {
            session_id,
            inner: Box::pin(inner),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Stop watching and release the notification handle
    pub fn cancel(self) {
        info!("Watch on session {} cancelled", self.session_id);
        drop(self);
    }

    /// Drive the subscription to its terminal status
    ///
    /// Fails with `TimedOut` if the deadline passes first.
    pub async fn wait_terminal(mut self) -> RendezvousResult<SessionStatus> {
        while let Some(event) = self.next().await {
            match event? {
                WatchEvent::Status(status) if status.is_terminal() => return Ok(status),
                WatchEvent::Status(_) => continue,
                WatchEvent::TimedOut => return Err(RendezvousError::TimedOut),
            }
        }
        Err(RendezvousError::StoreUnavailable(
            "subscription ended without a terminal status".to_string(),
        ))
    }
}

impl Stream for Subscription {
    type Item = RendezvousResult<WatchEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}
