//! Worker pool: competing consumers per lane.
//!
//! Each lane gets as many consumer slots as the summed concurrency of the
//! task types bound to it. A slot holds at most one delivery at a time
//! (prefetch 1), so a busy pool leaves messages waiting in the lane.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::processor::{ProcessOutcome, TaskProcessor};
use crate::config::{QueueConfig, WorkerConfig};
use crate::messaging::MessageBroker;
use crate::models::Priority;

/// Pause after a failed receive before trying again
const CONSUME_BACKOFF: Duration = Duration::from_secs(1);
/// Pause after requeueing a delivery whose durable write failed
const REQUEUE_BACKOFF: Duration = Duration::from_secs(1);

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn every consumer slot
    pub fn spawn(
        processor: TaskProcessor,
        broker: Arc<dyn MessageBroker>,
        queues: &QueueConfig,
        worker: &WorkerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let mut handles = Vec::new();
        for (lane, slots) in worker.consumers_per_lane() {
            let queue = queues.lane_queue(lane).to_string();
            for slot in 0..slots {
                handles.push(spawn_consumer(
                    lane,
                    slot,
                    queue.clone(),
                    processor.clone(),
                    broker.clone(),
                    shutdown.clone(),
                ));
            }
            info!(lane = %lane, queue = %queue, consumers = slots, "👷 Lane consumers started");
        }
        Self { handles }
    }

    pub fn consumer_count(&self) -> usize {
        self.handles.len()
    }

    /// Wait for every consumer to finish its in-flight delivery and exit
    pub async fn join(self) {
        for result in join_all(self.handles).await {
            if let Err(e) = result {
                warn!(error = %e, "Worker consumer ended abnormally");
            }
        }
    }
}

fn spawn_consumer(
    lane: Priority,
    slot: usize,
    queue: String,
    processor: TaskProcessor,
    broker: Arc<dyn MessageBroker>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            // Only the receive races shutdown; a delivery in hand is finished
            let delivery = tokio::select! {
                _ = shutdown.changed() => break,
                received = broker.consume(&queue) => received,
            };

            match delivery {
                Ok(delivery) => match processor.process(delivery).await {
                    Ok(ProcessOutcome::Requeued { task_id }) => {
                        // The store is failing; give it room before the
                        // requeued delivery comes straight back
                        debug!(lane = %lane, slot = slot, task_id = %task_id, "Delivery requeued, backing off");
                        tokio::select! {
                            _ = shutdown.changed() => break,
                            _ = tokio::time::sleep(REQUEUE_BACKOFF) => {}
                        }
                    }
                    Ok(outcome) => debug!(lane = %lane, slot = slot, outcome = ?outcome, "Delivery settled"),
                    Err(e) => warn!(lane = %lane, slot = slot, error = %e, "⚠️ Could not settle delivery with the broker"),
                },
                Err(e) => {
                    warn!(lane = %lane, slot = slot, error = %e, "⚠️ Receive failed, backing off");
                    tokio::time::sleep(CONSUME_BACKOFF).await;
                }
            }
        }
        debug!(lane = %lane, slot = slot, "Consumer stopped");
    })
}
