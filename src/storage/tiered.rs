use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::ResultCache;
use crate::database::TaskStore;
use crate::error::Result;
use crate::models::{StorageTier, Task};

/// Result of a tiered read
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    /// Found; `tier` is HOT for a cache hit, otherwise the row's storage tier
    Hit { result: Value, tier: StorageTier },
    Miss,
}

impl ReadOutcome {
    pub fn result(&self) -> Option<&Value> {
        match self {
            Self::Hit { result, .. } => Some(result),
            Self::Miss => None,
        }
    }

    pub fn into_result(self) -> Option<Value> {
        match self {
            Self::Hit { result, .. } => Some(result),
            Self::Miss => None,
        }
    }
}

/// Hit/miss counters per tier
#[derive(Debug, Default)]
pub struct TierStats {
    hot: AtomicU64,
    warm: AtomicU64,
    cold: AtomicU64,
    miss: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierStatsSnapshot {
    pub hot_hits: u64,
    pub warm_hits: u64,
    pub cold_hits: u64,
    pub misses: u64,
}

impl TierStatsSnapshot {
    pub fn total(&self) -> u64 {
        self.hot_hits + self.warm_hits + self.cold_hits + self.misses
    }

    /// Share of reads served from the HOT cache
    pub fn hot_hit_rate(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.hot_hits as f64 / total as f64,
        }
    }
}

impl TierStats {
    fn record_hit(&self, tier: StorageTier) {
        let counter = match tier {
            StorageTier::Hot => &self.hot,
            StorageTier::Warm => &self.warm,
            StorageTier::Cold => &self.cold,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.miss.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TierStatsSnapshot {
        TierStatsSnapshot {
            hot_hits: self.hot.load(Ordering::Relaxed),
            warm_hits: self.warm.load(Ordering::Relaxed),
            cold_hits: self.cold.load(Ordering::Relaxed),
            misses: self.miss.load(Ordering::Relaxed),
        }
    }
}

/// Cache-aside read path: HOT cache first, durable store as the source of
/// truth. Cache failures are logged and never surface.
#[derive(Clone)]
pub struct TieredStorage {
    store: Arc<dyn TaskStore>,
    cache: Arc<dyn ResultCache>,
    hot_ttl: Duration,
    stats: Arc<TierStats>,
}

impl std::fmt::Debug for TieredStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredStorage")
            .field("hot_ttl", &self.hot_ttl)
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

impl TieredStorage {
    pub fn new(store: Arc<dyn TaskStore>, cache: Arc<dyn ResultCache>, hot_ttl: Duration) -> Self {
        Self {
            store,
            cache,
            hot_ttl,
            stats: Arc::new(TierStats::default()),
        }
    }

    pub fn stats(&self) -> TierStatsSnapshot {
        self.stats.snapshot()
    }

    /// Read a task's result, falling back to the durable store
    pub async fn read(&self, task_id: Uuid) -> Result<ReadOutcome> {
        if let Some(result) = self.cache_get(task_id).await {
            self.stats.record_hit(StorageTier::Hot);
            return Ok(ReadOutcome::Hit {
                result,
                tier: StorageTier::Hot,
            });
        }

        let task = self.store.get_task(task_id).await?;
        Ok(self.durable_fallback(task_id, task.as_ref()).await)
    }

    /// Same as [`read`](Self::read), with a row the caller already loaded
    /// standing in for the durable lookup
    pub async fn read_task(&self, task: &Task) -> ReadOutcome {
        if let Some(result) = self.cache_get(task.id).await {
            self.stats.record_hit(StorageTier::Hot);
            return ReadOutcome::Hit {
                result,
                tier: StorageTier::Hot,
            };
        }
        self.durable_fallback(task.id, Some(task)).await
    }

    /// Best-effort HOT write after the durable completion write
    pub async fn write(&self, task_id: Uuid, result: &Value) {
        if let Err(e) = self.cache.set(task_id, result, self.hot_ttl).await {
            warn!(task_id = %task_id, error = %e, "⚠️ Result cache write failed");
        }
    }

    async fn cache_get(&self, task_id: Uuid) -> Option<Value> {
        match self.cache.get(task_id).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "⚠️ Result cache read failed, using durable store");
                None
            }
        }
    }

    async fn durable_fallback(&self, task_id: Uuid, task: Option<&Task>) -> ReadOutcome {
        let Some((result, tier)) =
            task.and_then(|t| t.result.clone().map(|result| (result, t.storage_tier)))
        else {
            self.stats.record_miss();
            debug!(task_id = %task_id, "Result miss");
            return ReadOutcome::Miss;
        };

        self.stats.record_hit(tier);
        if tier == StorageTier::Cold {
            info!(task_id = %task_id, "🧊 Cold-tier result retrieval");
        }

        // Promotion on read, whatever tier it came from
        self.write(task_id, &result).await;

        ReadOutcome::Hit { result, tier }
    }
}
