//! # Result Cache
//!
//! The HOT tier of result storage: a key-value cache with per-entry expiry.
//! Entries are keyed by task id and hold the serialized result document.
//!
//! ```rust
//! use std::time::Duration;
//! use serde_json::json;
//! use taskrelay_core::cache::{InMemoryResultCache, ResultCache};
//!
//! # tokio_test::block_on(async {
//! let cache = InMemoryResultCache::new();
//! let id = uuid::Uuid::now_v7();
//! cache.set(id, &json!({"url": "out"}), Duration::from_secs(600)).await.unwrap();
//! assert_eq!(cache.get(id).await.unwrap(), Some(json!({"url": "out"})));
//! # });
//! ```

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;

#[async_trait]
pub trait ResultCache: Send + Sync + 'static {
    async fn get(&self, task_id: Uuid) -> Result<Option<Value>>;

    async fn set(&self, task_id: Uuid, result: &Value, ttl: Duration) -> Result<()>;

    async fn evict(&self, task_id: Uuid) -> Result<()>;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    result: Value,
    expires_at: Instant,
}

/// Process-local cache. Expiry follows `tokio::time`, so paused-clock tests
/// can age entries deterministically.
#[derive(Debug, Clone, Default)]
pub struct InMemoryResultCache {
    entries: Arc<DashMap<Uuid, CacheEntry>>,
}

impl InMemoryResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live entries, expired ones excluded
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| entry.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ResultCache for InMemoryResultCache {
    async fn get(&self, task_id: Uuid) -> Result<Option<Value>> {
        let now = Instant::now();
        let hit = self
            .entries
            .get(&task_id)
            .map(|entry| (entry.expires_at > now, entry.result.clone()));

        match hit {
            Some((true, result)) => Ok(Some(result)),
            Some((false, _)) => {
                // Lazy expiry
                self.entries.remove_if(&task_id, |_, entry| entry.expires_at <= now);
                debug!(task_id = %task_id, "Cache entry expired");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, task_id: Uuid, result: &Value, ttl: Duration) -> Result<()> {
        self.entries.insert(
            task_id,
            CacheEntry {
                result: result.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn evict(&self, task_id: Uuid) -> Result<()> {
        self.entries.remove(&task_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_get_evict() {
        let cache = InMemoryResultCache::new();
        let id = Uuid::now_v7();
        assert_eq!(cache.get(id).await.unwrap(), None);

        cache
            .set(id, &json!({"url": "x"}), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get(id).await.unwrap(), Some(json!({"url": "x"})));

        cache.evict(id).await.unwrap();
        assert_eq!(cache.get(id).await.unwrap(), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let cache = InMemoryResultCache::new();
        let id = Uuid::now_v7();
        cache
            .set(id, &json!("result"), Duration::from_secs(600))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(599)).await;
        assert!(cache.get(id).await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get(id).await.unwrap(), None);
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn test_set_overwrites_and_refreshes() {
        let cache = InMemoryResultCache::new();
        let id = Uuid::now_v7();
        cache.set(id, &json!(1), Duration::from_secs(1)).await.unwrap();
        cache.set(id, &json!(2), Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get(id).await.unwrap(), Some(json!(2)));
        assert_eq!(cache.len(), 1);
    }
}
