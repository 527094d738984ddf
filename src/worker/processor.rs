//! # Task Processor
//!
//! Handles one delivery from a lane, end to end.
//!
//! ## Per-delivery protocol
//!
//! 1. Decode. A malformed message is rejected without requeue and nothing
//!    else happens.
//! 2. Mark the task PROCESSING and announce it.
//! 3. Execute by the message's task type.
//! 4. Success: mark COMPLETED with the result, announce, cache the result,
//!    ack.
//! 5. Failure: mark FAILED (retry) or DEAD_LETTERED (budget spent). The store
//!    writes the retry or dead-letter publish to the outbox in the same
//!    transaction; the entry is dispatched, then the original delivery is
//!    acked. The retry is a new message, never a requeue of the old one.
//!
//! If a durable write fails the delivery is rejected with requeue so the
//! transition is attempted again. A refused transition means the delivery is
//! a duplicate or stale (the task already moved on); it is acked and skipped.

use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::executor::ExecutorRegistry;
use crate::database::{TaskStore, TransitionOutcome};
use crate::error::{Result, TaskRelayError};
use crate::events::{EventPublisher, StatusEvent};
use crate::logging::log_task_operation;
use crate::messaging::{Delivery, MessageBroker, TaskMessage};
use crate::models::Task;
use crate::orchestration::TaskEnqueuer;
use crate::state_machine::{TaskEvent, TaskStatus};
use crate::storage::TieredStorage;

/// What happened to a delivery
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Completed { task_id: Uuid },
    Retried { task_id: Uuid, retry_count: u32 },
    DeadLettered { task_id: Uuid },
    /// Malformed message, rejected without requeue
    Rejected,
    /// Duplicate or stale delivery, acked without work
    Skipped { task_id: Uuid },
    /// Durable write failed, delivery requeued
    Requeued { task_id: Uuid },
}

#[derive(Clone)]
pub struct TaskProcessor {
    broker: Arc<dyn MessageBroker>,
    store: Arc<dyn TaskStore>,
    enqueuer: TaskEnqueuer,
    storage: TieredStorage,
    events: EventPublisher,
    executors: ExecutorRegistry,
    worker_version: String,
}

impl std::fmt::Debug for TaskProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskProcessor")
            .field("worker_version", &self.worker_version)
            .field("executors", &self.executors)
            .finish()
    }
}

impl TaskProcessor {
    pub fn new(
        store: Arc<dyn TaskStore>,
        enqueuer: TaskEnqueuer,
        storage: TieredStorage,
        events: EventPublisher,
        executors: ExecutorRegistry,
        worker_version: impl Into<String>,
    ) -> Self {
        Self {
            broker: enqueuer.fabric().broker().clone(),
            store,
            enqueuer,
            storage,
            events,
            executors,
            worker_version: worker_version.into(),
        }
    }

    pub fn worker_version(&self) -> &str {
        &self.worker_version
    }

    /// Process one delivery. Errors mean the broker itself could not be told
    /// the outcome.
    #[instrument(skip(self, delivery), fields(queue = %delivery.queue, delivery_tag = delivery.delivery_tag))]
    pub async fn process(&self, delivery: Delivery) -> Result<ProcessOutcome> {
        let message = match TaskMessage::from_broker_message(&delivery.message) {
            Ok(message) => message,
            Err(e) => {
                error!(
                    queue = %delivery.queue,
                    routing_key = %delivery.routing_key,
                    error = %e,
                    "🚨 Malformed task message rejected (data integrity)"
                );
                self.broker.reject(delivery.delivery_tag, false).await?;
                return Ok(ProcessOutcome::Rejected);
            }
        };
        let task_id = message.task_id;

        let started = match self.store.transition(task_id, TaskEvent::Start).await {
            Ok(outcome) => outcome,
            Err(e) => return self.settle_refused(&delivery, task_id, e).await,
        };
        self.announce(&started.task);
        debug!(task_id = %task_id, task_type = %message.task_type, "⚙️ Processing task");

        // Executed by task type, whatever lane it came from
        let task = started.task;
        let event = match self.executors.execute(&task).await {
            Ok(result) => TaskEvent::complete(result, self.worker_version.clone()),
            Err(e) => {
                warn!(task_id = %task_id, retry_count = task.retry_count, error = %e, "Task attempt failed");
                TaskEvent::fail(e.to_string())
            }
        };

        let outcome = match self.store.transition(task_id, event).await {
            Ok(outcome) => outcome,
            Err(e) => return self.settle_refused(&delivery, task_id, e).await,
        };
        self.announce(&outcome.task);

        let result = self.finish(outcome).await;
        self.broker.ack(delivery.delivery_tag).await?;
        Ok(result)
    }

    /// Post-write side effects of a completed or failed attempt
    async fn finish(&self, outcome: TransitionOutcome) -> ProcessOutcome {
        let task = outcome.task;

        if let Some(entry) = &outcome.outbox {
            // Durable already; the relay retries a failed dispatch
            if let Err(e) = self.enqueuer.dispatch(entry).await {
                warn!(task_id = %task.id, error = %e, "⚠️ Outbox dispatch failed, leaving entry for the relay");
            }
        }

        match task.status {
            TaskStatus::Completed => {
                if let Some(result) = &task.result {
                    self.storage.write(task.id, result).await;
                }
                log_task_operation("complete", task.id, Some(&task.tenant_id), task.status.as_str(), None);
                ProcessOutcome::Completed { task_id: task.id }
            }
            TaskStatus::DeadLettered => {
                log_task_operation(
                    "dead_letter",
                    task.id,
                    Some(&task.tenant_id),
                    task.status.as_str(),
                    task.error_message.as_deref(),
                );
                ProcessOutcome::DeadLettered { task_id: task.id }
            }
            _ => {
                info!(task_id = %task.id, retry_count = task.retry_count, "🔁 Task scheduled for retry");
                ProcessOutcome::Retried {
                    task_id: task.id,
                    retry_count: task.retry_count,
                }
            }
        }
    }

    /// Settle a delivery whose transition was refused or could not be written
    async fn settle_refused(
        &self,
        delivery: &Delivery,
        task_id: Uuid,
        error: TaskRelayError,
    ) -> Result<ProcessOutcome> {
        match error {
            TaskRelayError::StateTransitionError(e) => {
                debug!(task_id = %task_id, reason = %e, "Duplicate or stale delivery, acking");
                self.broker.ack(delivery.delivery_tag).await?;
                Ok(ProcessOutcome::Skipped { task_id })
            }
            TaskRelayError::TaskNotFound(_) => {
                error!(task_id = %task_id, "🚨 Message for an unknown task rejected (data integrity)");
                self.broker.reject(delivery.delivery_tag, false).await?;
                Ok(ProcessOutcome::Rejected)
            }
            other if other.is_retryable() => {
                warn!(task_id = %task_id, error = %other, "⚠️ Durable write failed, requeueing delivery");
                self.broker.reject(delivery.delivery_tag, true).await?;
                Ok(ProcessOutcome::Requeued { task_id })
            }
            other => {
                error!(task_id = %task_id, error = %other, "🚨 Unrecoverable store error, rejecting delivery");
                self.broker.reject(delivery.delivery_tag, false).await?;
                Ok(ProcessOutcome::Rejected)
            }
        }
    }

    fn announce(&self, task: &Task) {
        if let Err(e) = self.events.publish(StatusEvent::from_task(task)) {
            warn!(task_id = %task.id, error = %e, "⚠️ Status event publish failed");
        }
    }
}
