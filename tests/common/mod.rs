#![allow(dead_code)]

pub mod executors;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use taskrelay_core::cache::InMemoryResultCache;
use taskrelay_core::config::TaskRelayConfig;
use taskrelay_core::database::InMemoryTaskStore;
use taskrelay_core::events::StatusEvent;
use taskrelay_core::messaging::InMemoryBroker;
use taskrelay_core::orchestration::{PipelineHandle, PipelineSystem};
use taskrelay_core::worker::ExecutorRegistry;

pub use executors::ScriptedExecutor;

/// Poll step for [`wait_until`]
const POLL_STEP: Duration = Duration::from_millis(50);
/// Virtual-time budget for [`wait_until`]; covers the longest wait lane twice
const POLL_BUDGET: Duration = Duration::from_secs(300);

/// A started pipeline over inspectable in-memory backends
pub struct Harness {
    pub store: InMemoryTaskStore,
    pub broker: InMemoryBroker,
    pub cache: InMemoryResultCache,
    pub handle: PipelineHandle,
    pub notifications: mpsc::Receiver<StatusEvent>,
}

impl Harness {
    pub async fn start(executors: ExecutorRegistry) -> Self {
        Self::start_with_config(TaskRelayConfig::default(), executors).await
    }

    pub async fn start_with_config(config: TaskRelayConfig, executors: ExecutorRegistry) -> Self {
        let store = InMemoryTaskStore::default();
        let broker = InMemoryBroker::new();
        let cache = InMemoryResultCache::new();
        let (sink, notifications) = mpsc::channel(1024);

        let handle = PipelineSystem::new(
            config,
            Arc::new(store.clone()),
            Arc::new(cache.clone()),
            Arc::new(broker.clone()),
        )
        .with_executors(executors)
        .with_notification_sink(sink)
        .start()
        .await
        .expect("pipeline starts");

        Self {
            store,
            broker,
            cache,
            handle,
            notifications,
        }
    }

    /// Everything forwarded so far
    pub fn drain_notifications(&mut self) -> Vec<StatusEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.notifications.try_recv() {
            events.push(event);
        }
        events
    }

    pub async fn stop(mut self) {
        self.handle.shutdown().await.expect("clean shutdown");
    }
}

/// Poll `check` until it holds, advancing (paused) time between polls
pub async fn wait_until<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let mut waited = Duration::ZERO;
    while waited < POLL_BUDGET {
        if check().await {
            return;
        }
        tokio::time::sleep(POLL_STEP).await;
        waited += POLL_STEP;
    }
    panic!("timed out waiting for {what}");
}
