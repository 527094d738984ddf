//! # Task Recovery
//!
//! Puts unfinished rows back into the lanes after a restart.
//!
//! Lanes live in the broker, and the broker does not outlive the process. A
//! pipeline restarted over a durable store therefore finds rows whose
//! publish already happened into a broker that no longer exists. Recovery
//! runs once before any consumer starts:
//!
//! 1. Undelivered outbox entries are dispatched at once. Nothing else is
//!    writing yet, so the relay's grace period is not needed.
//! 2. QUEUED rows not covered by step 1 are published to their lane again.
//!    This includes retries that were parked in a wait lane; they skip the
//!    rest of their wait.
//! 3. PROCESSING rows whose lease expired are failed. The failure goes
//!    through the state machine, so it spends retry budget and routes to a
//!    wait lane or the dead-letter lane like any other failure.
//!
//! Step 3 repeats on an interval: a row still inside its lease at startup is
//! picked up once the lease runs out. Consumers treat the occasional
//! duplicate publish as a stale delivery and skip it.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::task_enqueuer::TaskEnqueuer;
use crate::config::RecoveryConfig;
use crate::database::TaskStore;
use crate::error::{Result, TaskRelayError};
use crate::events::{EventPublisher, StatusEvent};
use crate::state_machine::{TaskEvent, TaskStatus};

const LEASE_EXPIRED: &str = "processing lease expired before the task finished";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Outbox entries dispatched without waiting for the relay
    pub redispatched: usize,
    /// QUEUED rows published to their lane again
    pub republished: usize,
    /// PROCESSING rows failed after their lease ran out
    pub expired: usize,
}

pub struct TaskRecovery {
    store: Arc<dyn TaskStore>,
    enqueuer: TaskEnqueuer,
    events: EventPublisher,
    config: RecoveryConfig,
}

impl TaskRecovery {
    pub fn new(
        store: Arc<dyn TaskStore>,
        enqueuer: TaskEnqueuer,
        events: EventPublisher,
        config: RecoveryConfig,
    ) -> Self {
        Self {
            store,
            enqueuer,
            events,
            config,
        }
    }

    /// Full startup pass relative to `now`. Must run before consumers and
    /// submissions start.
    #[instrument(skip(self))]
    pub async fn recover_at(&self, now: DateTime<Utc>) -> Result<RecoveryReport> {
        let pending = self
            .store
            .undelivered_outbox(now, self.config.batch_size)
            .await?;
        let covered: HashSet<Uuid> = pending.iter().map(|entry| entry.task_id).collect();
        let redispatched = self.enqueuer.dispatch_all(&pending).await;

        let republished = self.republish_queued(now, &covered).await?;
        let expired = self.expire_leases_at(now).await?;

        let report = RecoveryReport {
            redispatched,
            republished,
            expired,
        };
        if report == RecoveryReport::default() {
            debug!("Nothing to recover");
        } else {
            info!(
                redispatched = report.redispatched,
                republished = report.republished,
                expired = report.expired,
                "♻️ Recovered unfinished tasks"
            );
        }
        Ok(report)
    }

    async fn republish_queued(&self, now: DateTime<Utc>, covered: &HashSet<Uuid>) -> Result<usize> {
        let mut republished = 0;
        let mut cursor = None;

        loop {
            let page = self
                .store
                .tasks_with_status(TaskStatus::Queued, now, cursor, self.config.batch_size)
                .await?;
            let Some(last) = page.last() else {
                break;
            };
            cursor = Some(last.id);

            for task in page.iter().filter(|task| !covered.contains(&task.id)) {
                match self.enqueuer.republish(task).await {
                    Ok(_) => republished += 1,
                    Err(e) => warn!(
                        task_id = %task.id,
                        error = %e,
                        "⚠️ Could not republish queued task"
                    ),
                }
            }
            if page.len() < self.config.batch_size {
                break;
            }
        }
        Ok(republished)
    }

    /// Fail PROCESSING rows not updated within the lease. Returns how many
    /// were failed.
    #[instrument(skip(self))]
    pub async fn expire_leases_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let lease = chrono::Duration::from_std(self.config.processing_lease()).map_err(|e| {
            TaskRelayError::ConfigurationError(format!("processing lease out of range: {e}"))
        })?;
        let abandoned = self
            .store
            .tasks_with_status(TaskStatus::Processing, now - lease, None, self.config.batch_size)
            .await?;

        let mut expired = 0;
        for task in abandoned {
            let outcome = match self.store.transition(task.id, TaskEvent::fail(LEASE_EXPIRED)).await {
                Ok(outcome) => outcome,
                Err(TaskRelayError::StateTransitionError(_)) => {
                    // Finished between the scan and the write
                    continue;
                }
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "⚠️ Could not expire processing lease");
                    continue;
                }
            };

            if let Err(e) = self.events.publish(StatusEvent::from_task(&outcome.task)) {
                warn!(task_id = %task.id, error = %e, "⚠️ Status event publish failed");
            }
            if let Some(entry) = &outcome.outbox {
                if let Err(e) = self.enqueuer.dispatch(entry).await {
                    warn!(task_id = %task.id, error = %e, "⚠️ Outbox dispatch failed, leaving entry for the relay");
                }
            }
            warn!(
                task_id = %task.id,
                status = %outcome.task.status,
                retry_count = outcome.task.retry_count,
                "⏰ Processing lease expired"
            );
            expired += 1;
        }
        Ok(expired)
    }

    /// Check leases on an interval until shutdown
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = self.config.lease_check_interval();
            // The startup pass already checked once
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(interval_seconds = period.as_secs(), "⏰ Processing lease monitor started");

            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.expire_leases_at(Utc::now()).await {
                            warn!(error = %e, "Lease check failed, retrying next interval");
                        }
                    }
                }
            }
            info!("⏰ Processing lease monitor stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::database::InMemoryTaskStore;
    use crate::messaging::{InMemoryBroker, MessageBroker, PriorityQueueFabric};
    use crate::models::{NewTask, Priority, Task, TaskType};
    use chrono::Duration;
    use serde_json::json;

    struct Fixture {
        store: InMemoryTaskStore,
        broker: InMemoryBroker,
        recovery: TaskRecovery,
    }

    /// A fresh broker over an existing store, as after a restart
    async fn restarted(store: InMemoryTaskStore) -> Fixture {
        let broker = InMemoryBroker::new();
        let fabric = PriorityQueueFabric::new(Arc::new(broker.clone()), QueueConfig::default());
        fabric.declare_topology().await.unwrap();
        let events = EventPublisher::new(16);
        let enqueuer = TaskEnqueuer::new(Arc::new(store.clone()), fabric, events.clone());
        let recovery = TaskRecovery::new(
            Arc::new(store.clone()),
            enqueuer,
            events,
            RecoveryConfig::default(),
        );
        Fixture {
            store,
            broker,
            recovery,
        }
    }

    fn task(task_type: TaskType, priority: Priority, age: Duration) -> Task {
        NewTask::new("acme", task_type, priority, json!({})).into_task(Utc::now() - age)
    }

    #[tokio::test]
    async fn test_queued_rows_are_republished_once() {
        let store = InMemoryTaskStore::default();
        let published = task(TaskType::Text, Priority::High, Duration::minutes(5));
        let unpublished = task(TaskType::Image, Priority::Medium, Duration::minutes(5));

        // The first row reached the old broker, the second never did
        let entries = store.insert_tasks(&[published.clone()]).await.unwrap();
        store.mark_outbox_delivered(entries[0].id).await.unwrap();
        store.insert_tasks(&[unpublished.clone()]).await.unwrap();

        let f = restarted(store).await;
        let report = f.recovery.recover_at(Utc::now() + Duration::seconds(1)).await.unwrap();
        assert_eq!(
            report,
            RecoveryReport {
                redispatched: 1,
                republished: 1,
                expired: 0,
            }
        );
        assert_eq!(f.broker.queue_depth("taskrelay.lane.high").await.unwrap(), 1);
        assert_eq!(f.broker.queue_depth("taskrelay.lane.medium").await.unwrap(), 1);
        assert!(f.store.outbox_entries().iter().all(|entry| entry.is_delivered()));
    }

    #[tokio::test]
    async fn test_failed_row_with_pending_retry_is_requeued_not_duplicated() {
        let store = InMemoryTaskStore::default();
        let row = task(TaskType::Text, Priority::High, Duration::minutes(5));
        let entries = store.insert_tasks(&[row.clone()]).await.unwrap();
        store.mark_outbox_delivered(entries[0].id).await.unwrap();
        store.transition(row.id, TaskEvent::Start).await.unwrap();
        // Crashed after the FAILED write, before the wait-lane publish
        store.transition(row.id, TaskEvent::fail("gpu lost")).await.unwrap();

        let f = restarted(store).await;
        let report = f.recovery.recover_at(Utc::now() + Duration::seconds(1)).await.unwrap();
        assert_eq!((report.redispatched, report.republished), (1, 0));

        assert_eq!(f.broker.routed_to("taskrelay.retry.short.queue").len(), 1);
        assert!(f.broker.routed_to("taskrelay.lane.high").is_empty());
        let stored = f.store.get_task(row.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Queued);
        assert_eq!(stored.retry_count, 1);
    }

    #[tokio::test]
    async fn test_abandoned_processing_rows_fail_after_the_lease() {
        let store = InMemoryTaskStore::default();
        let mut abandoned = task(TaskType::Video, Priority::Low, Duration::hours(1));
        abandoned.status = TaskStatus::Processing;
        let mut exhausted = task(TaskType::Text, Priority::High, Duration::hours(1));
        exhausted.status = TaskStatus::Processing;
        exhausted.retry_count = 3;
        let mut running = task(TaskType::Image, Priority::Medium, Duration::seconds(10));
        running.status = TaskStatus::Processing;
        store
            .insert_tasks(&[abandoned.clone(), exhausted.clone(), running.clone()])
            .await
            .unwrap();

        let f = restarted(store).await;
        let report = f.recovery.recover_at(Utc::now()).await.unwrap();
        assert_eq!(report.expired, 2);

        let retried = f.store.get_task(abandoned.id).await.unwrap().unwrap();
        assert_eq!(retried.status, TaskStatus::Queued);
        assert_eq!(retried.retry_count, 1);
        assert_eq!(f.broker.routed_to("taskrelay.retry.short.queue").len(), 1);

        let dead = f.store.get_task(exhausted.id).await.unwrap().unwrap();
        assert_eq!(dead.status, TaskStatus::DeadLettered);
        assert_eq!(f.broker.routed_to("taskrelay.dead_letter.queue").len(), 1);

        // Still inside its lease
        let live = f.store.get_task(running.id).await.unwrap().unwrap();
        assert_eq!(live.status, TaskStatus::Processing);

        // Once the lease runs out the periodic check takes it
        let later = Utc::now() + Duration::minutes(10);
        assert_eq!(f.recovery.expire_leases_at(later).await.unwrap(), 1);
        assert_eq!(
            f.store.get_task(running.id).await.unwrap().unwrap().status,
            TaskStatus::Queued
        );
    }
}
