//! Outbox relay.
//!
//! Re-dispatches outbox entries that were committed but never marked
//! delivered, which happens when a process dies between its store write and
//! its publish. Entries younger than the grace period are left to the
//! component that wrote them.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use super::task_enqueuer::TaskEnqueuer;
use crate::config::OutboxConfig;
use crate::database::TaskStore;
use crate::error::{Result, TaskRelayError};

pub struct OutboxRelay {
    store: Arc<dyn TaskStore>,
    enqueuer: TaskEnqueuer,
    config: OutboxConfig,
}

impl OutboxRelay {
    pub fn new(store: Arc<dyn TaskStore>, enqueuer: TaskEnqueuer, config: OutboxConfig) -> Self {
        Self {
            store,
            enqueuer,
            config,
        }
    }

    /// One pass relative to `now`. Returns the number of entries dispatched.
    #[instrument(skip(self))]
    pub async fn relay_once_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let grace = chrono::Duration::from_std(self.config.grace_period()).map_err(|e| {
            TaskRelayError::ConfigurationError(format!("outbox grace period out of range: {e}"))
        })?;

        let stale = self
            .store
            .undelivered_outbox(now - grace, self.config.batch_size)
            .await?;
        if stale.is_empty() {
            return Ok(0);
        }

        let dispatched = self.enqueuer.dispatch_all(&stale).await;
        info!(
            found = stale.len(),
            dispatched = dispatched,
            "📮 Outbox relay re-dispatched stale entries"
        );
        Ok(dispatched)
    }

    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.relay_interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!("📮 Outbox relay started");

            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.relay_once_at(Utc::now()).await {
                            warn!(error = %e, "Outbox relay pass failed");
                        }
                    }
                }
            }
            info!("📮 Outbox relay stopped");
        })
    }
}
