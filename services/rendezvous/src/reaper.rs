//! Expiry reaper
//!
//! Periodically moves pending sessions past their deadline to `expired`, so
//! watchers are told about lapsed sessions even if nobody touches them.
//! Sweeps run on a `tokio-cron-scheduler` job; a failed sweep is logged and
//! retried on the next tick.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info, warn};

use crate::error::{RendezvousError, RendezvousResult};
use crate::registry::SessionRegistry;
use crate::store::SessionStore;

/// Due sessions fetched per store round-trip
const SWEEP_BATCH: usize = 256;

#[derive(Clone)]
pub struct ExpiryReaper {
    store: Arc<dyn SessionStore>,
    registry: SessionRegistry,
    interval: Duration,
}

impl ExpiryReaper {
    /// `interval` must be a whole number of seconds, at least one, and at
    /// most a quarter of the session ttl
    ///
    /// The scheduler repeats jobs at second granularity and drops any
    /// fractional part, so a sub-second interval would never fire.
    pub fn new(
        store: Arc<dyn SessionStore>,
        registry: SessionRegistry,
        interval: Duration,
    ) -> RendezvousResult<Self> {
        if interval.subsec_nanos() != 0 || interval.as_secs() == 0 {
            return Err(RendezvousError::InvalidRequest(format!(
                "sweep interval {:?} must be a whole number of seconds",
                interval
            )));
        }
        if interval > registry.ttl() / 4 {
            return Err(RendezvousError::InvalidRequest(format!(
                "sweep interval {:?} must be at most a quarter of {:?}",
                interval,
                registry.ttl()
            )));
        }
        Ok(Self {
            store,
            registry,
            interval,
        })
    }

    /// Expire every due session once; returns how many this sweep expired
    pub async fn sweep_once(&self) -> RendezvousResult<usize> {
        let mut expired = 0;
        loop {
            let due = self.store.due_pending(Utc::now(), SWEEP_BATCH).await?;
            let fetched = due.len();
            let mut progressed = 0;

            for id in due {
                match self.registry.expire(&id).await {
                    Ok(true) => progressed += 1,
                    Ok(false) => {}
                    Err(RendezvousError::SessionNotFound) => {
                        debug!("Due session {} vanished before expiry", id)
                    }
                    Err(e) => return Err(e),
                }
            }
            expired += progressed;

            // A full batch with no progress would come back unchanged
            if fetched < SWEEP_BATCH || progressed == 0 {
                break;
            }
        }

        if expired > 0 {
            info!("Expiry sweep expired {} sessions", expired);
        }
        Ok(expired)
    }

    /// Schedule the sweep every `interval`
    pub async fn start(&self) -> Result<ReaperHandle> {
        let reaper = self.clone();
        let scheduler = JobScheduler::new().await?;

        let job = Job::new_repeated_async(self.interval, move |_, _| {
            let reaper = reaper.clone();
            Box::pin(async move {
                if let Err(e) = reaper.sweep_once().await {
                    warn!("Expiry sweep failed, retrying next cycle: {}", e);
                }
            })
        })?;

        scheduler.add(job).await?;
        scheduler.start().await?;

        info!("Started expiry sweep every {:?}", self.interval);
        Ok(ReaperHandle { scheduler })
    }
}

/// Running sweep schedule
pub struct ReaperHandle {
    scheduler: JobScheduler,
}

impl ReaperHandle {
    pub async fn stop(mut self) -> Result<()> {
        self.scheduler.shutdown().await?;
        info!("Stopped expiry sweep");
        Ok(())
    }
}
