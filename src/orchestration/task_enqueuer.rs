//! # Task Enqueuer
//!
//! Turns committed outbox entries into broker publishes.
//!
//! ## Overview
//!
//! Every status change that owes a publish writes an [`OutboxEntry`] in the
//! same store transaction. The enqueuer is the only component that turns
//! those entries into messages:
//!
//! ```text
//! ┌─────────────────┐    ┌─────────────────┐    ┌─────────────────┐
//! │ TaskStore       │    │ TaskEnqueuer    │    │ Queue Fabric    │
//! │ (outbox entry)  │───▶│ dispatch()      │───▶│ lane / wait /   │
//! │                 │◀───│ mark delivered  │    │ dead-letter     │
//! └─────────────────┘    └─────────────────┘    └─────────────────┘
//! ```
//!
//! A publish that succeeds but is never marked delivered is published again
//! by the [`OutboxRelay`](super::OutboxRelay). Consumers tolerate the
//! duplicate.

use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::database::TaskStore;
use crate::error::Result;
use crate::events::{EventPublisher, StatusEvent};
use crate::logging::log_queue_operation;
use crate::messaging::{PriorityQueueFabric, TaskMessage, WaitLane};
use crate::models::{OutboxEntry, OutboxRoute, Task};

/// Where a dispatched entry went
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Lane { queue: String },
    Retry { wait_lane: WaitLane, requeued: Option<Task> },
    DeadLetter,
}

#[derive(Clone)]
pub struct TaskEnqueuer {
    store: Arc<dyn TaskStore>,
    fabric: PriorityQueueFabric,
    events: EventPublisher,
}

impl std::fmt::Debug for TaskEnqueuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskEnqueuer").field("fabric", &self.fabric).finish()
    }
}

impl TaskEnqueuer {
    pub fn new(store: Arc<dyn TaskStore>, fabric: PriorityQueueFabric, events: EventPublisher) -> Self {
        Self {
            store,
            fabric,
            events,
        }
    }

    pub fn fabric(&self) -> &PriorityQueueFabric {
        &self.fabric
    }

    /// Publish an outbox entry and mark it delivered.
    ///
    /// Marking a retry entry delivered requeues its task; the QUEUED status
    /// event is published here.
    #[instrument(skip(self, entry), fields(task_id = %entry.task_id, route = %entry.route))]
    pub async fn dispatch(&self, entry: &OutboxEntry) -> Result<DispatchOutcome> {
        let message = &entry.message;

        let outcome = match entry.route {
            OutboxRoute::Lane => {
                self.fabric.publish_task(message).await?;
                let queue = self.fabric.lane_queue(message.priority).to_string();
                log_queue_operation("enqueue", &queue, Some(entry.task_id), Some(message.retry_count), "published");
                DispatchOutcome::Lane { queue }
            }
            OutboxRoute::Retry => {
                let wait_lane = self.fabric.publish_retry(message).await?;
                log_queue_operation(
                    "retry",
                    &wait_lane.queue,
                    Some(entry.task_id),
                    Some(message.retry_count),
                    "parked",
                );
                DispatchOutcome::Retry {
                    wait_lane,
                    requeued: None,
                }
            }
            OutboxRoute::DeadLetter => {
                self.fabric.publish_dead_letter(message).await?;
                log_queue_operation(
                    "dead_letter",
                    &self.fabric.config().dead_letter_queue,
                    Some(entry.task_id),
                    Some(message.retry_count),
                    "dead_lettered",
                );
                DispatchOutcome::DeadLetter
            }
        };

        let requeued = self.store.mark_outbox_delivered(entry.id).await?;
        debug!(outbox_id = %entry.id, "Outbox entry delivered");

        match (outcome, requeued) {
            (DispatchOutcome::Retry { wait_lane, .. }, Some(task)) => {
                self.publish_event(&task);
                Ok(DispatchOutcome::Retry {
                    wait_lane,
                    requeued: Some(task),
                })
            }
            (outcome, _) => Ok(outcome),
        }
    }

    /// Publish a QUEUED row to its lane again, outside the outbox. Used when
    /// the broker that held the original publish is gone.
    #[instrument(skip(self, task), fields(task_id = %task.id))]
    pub async fn republish(&self, task: &Task) -> Result<String> {
        let message = TaskMessage::from_task(task);
        self.fabric.publish_task(&message).await?;
        let queue = self.fabric.lane_queue(message.priority).to_string();
        log_queue_operation("republish", &queue, Some(task.id), Some(message.retry_count), "published");
        Ok(queue)
    }

    /// Dispatch entries in order, logging failures; the relay picks up what
    /// is left. Returns how many were dispatched.
    pub async fn dispatch_all(&self, entries: &[OutboxEntry]) -> usize {
        let mut dispatched = 0;
        for entry in entries {
            match self.dispatch(entry).await {
                Ok(_) => dispatched += 1,
                Err(e) => warn!(
                    task_id = %entry.task_id,
                    outbox_id = %entry.id,
                    error = %e,
                    "⚠️ Outbox dispatch failed, leaving entry for the relay"
                ),
            }
        }
        dispatched
    }

    fn publish_event(&self, task: &Task) {
        if let Err(e) = self.events.publish(StatusEvent::from_task(task)) {
            warn!(task_id = %task.id, error = %e, "⚠️ Status event publish failed");
        }
    }
}
