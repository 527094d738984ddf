//! Tier migration sweeper.
//!
//! Relabels completed results by age. Relabeling is monotonic, so
//! overlapping or repeated sweeps are harmless.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::StorageConfig;
use crate::database::TaskStore;
use crate::error::{Result, TaskRelayError};
use crate::models::StorageTier;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub warmed: u64,
    pub cooled: u64,
}

pub struct TierMigrationSweeper {
    store: Arc<dyn TaskStore>,
    config: StorageConfig,
}

impl TierMigrationSweeper {
    pub fn new(store: Arc<dyn TaskStore>, config: StorageConfig) -> Self {
        Self { store, config }
    }

    /// Run one sweep relative to `now`.
    ///
    /// HOT -> WARM runs first so a result older than both thresholds reaches
    /// COLD within a single sweep.
    #[instrument(skip(self))]
    pub async fn sweep_once_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let warm_cutoff = now - to_chrono(self.config.warm_age())?;
        let cold_cutoff = now - to_chrono(self.config.cold_age())?;

        let warmed = self
            .store
            .migrate_storage_tier(StorageTier::Hot, StorageTier::Warm, warm_cutoff)
            .await?;
        let cooled = self
            .store
            .migrate_storage_tier(StorageTier::Warm, StorageTier::Cold, cold_cutoff)
            .await?;

        if warmed + cooled > 0 {
            info!(warmed = warmed, cooled = cooled, "🌡️ Tier migration sweep relabeled results");
        } else {
            debug!("Tier migration sweep found nothing eligible");
        }
        Ok(SweepReport { warmed, cooled })
    }

    pub async fn sweep_once(&self) -> Result<SweepReport> {
        self.sweep_once_at(Utc::now()).await
    }

    pub fn interval(&self) -> Duration {
        self.config.sweep_interval()
    }

    /// Sweep on a fixed interval until shutdown
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(
                interval_seconds = self.interval().as_secs(),
                "🌡️ Tier migration sweeper started"
            );

            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep_once().await {
                            warn!(error = %e, "Tier migration sweep failed, retrying next interval");
                        }
                    }
                }
            }
            info!("🌡️ Tier migration sweeper stopped");
        })
    }
}

fn to_chrono(duration: Duration) -> Result<chrono::Duration> {
    chrono::Duration::from_std(duration)
        .map_err(|e| TaskRelayError::ConfigurationError(format!("storage age out of range: {e}")))
}
