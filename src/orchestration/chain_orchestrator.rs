//! # Chain Orchestrator
//!
//! Advances chains as their steps complete.
//!
//! ## Overview
//!
//! The orchestrator is a wildcard consumer of the status event bus. For every
//! COMPLETED event it:
//!
//! 1. charges the task's cost (once per task) and writes it to the row,
//! 2. puts the result in the HOT cache,
//! 3. moves the PENDING successor, if any, to QUEUED and publishes it.
//!
//! Step 3 goes through [`TaskStore::transition`], so the PENDING check and the
//! QUEUED write happen in one transaction. A duplicate event finds no PENDING
//! successor and changes nothing.
//!
//! When the subscription lags and events are lost, the orchestrator
//! reconciles from the store: every PENDING step whose predecessor already
//! completed is triggered.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::cost_ledger::CostLedger;
use super::task_enqueuer::TaskEnqueuer;
use crate::constants::topics::ALL_TASKS;
use crate::database::TaskStore;
use crate::error::{Result, TaskRelayError};
use crate::events::{EventPublisher, Received, StatusEvent, TopicPattern};
use crate::models::Task;
use crate::state_machine::{TaskEvent, TaskStatus};
use crate::storage::TieredStorage;

/// Maximum stalled steps triggered per reconciliation pass
const RECONCILE_BATCH: usize = 100;

/// What handling one event did
#[derive(Debug, Clone, PartialEq)]
pub enum ChainAdvance {
    /// Not a COMPLETED event, or the task is gone
    Ignored,
    /// Completed task outside any chain
    Standalone,
    /// Successors moved PENDING -> QUEUED
    Triggered(Vec<Uuid>),
    /// Last step, or the successor was already triggered
    NothingPending,
}

#[derive(Clone)]
pub struct ChainOrchestrator {
    store: Arc<dyn TaskStore>,
    enqueuer: TaskEnqueuer,
    storage: TieredStorage,
    ledger: Arc<CostLedger>,
    events: EventPublisher,
}

impl ChainOrchestrator {
    pub fn new(
        store: Arc<dyn TaskStore>,
        enqueuer: TaskEnqueuer,
        storage: TieredStorage,
        ledger: Arc<CostLedger>,
        events: EventPublisher,
    ) -> Self {
        Self {
            store,
            enqueuer,
            storage,
            ledger,
            events,
        }
    }

    pub fn ledger(&self) -> &Arc<CostLedger> {
        &self.ledger
    }

    /// Handle one status event. Safe to call any number of times with the
    /// same event.
    #[instrument(skip(self, event), fields(task_id = %event.task_id, status = %event.status))]
    pub async fn handle_event(&self, event: &StatusEvent) -> Result<ChainAdvance> {
        if event.status != TaskStatus::Completed {
            return Ok(ChainAdvance::Ignored);
        }

        let Some(task) = self.store.get_task(event.task_id).await? else {
            warn!("Completed event for a task the store does not know");
            return Ok(ChainAdvance::Ignored);
        };

        self.record_side_effects(&task, event).await;

        if task.dag_id.is_none() {
            return Ok(ChainAdvance::Standalone);
        }

        let mut triggered = Vec::new();
        for child in self.store.children_of(task.id).await? {
            if child.status != TaskStatus::Pending {
                continue;
            }
            if self.trigger(&child).await? {
                triggered.push(child.id);
            }
        }

        if triggered.is_empty() {
            debug!("No pending successor to trigger");
            Ok(ChainAdvance::NothingPending)
        } else {
            Ok(ChainAdvance::Triggered(triggered))
        }
    }

    /// Trigger every PENDING step whose predecessor already completed.
    /// Returns the number triggered.
    pub async fn reconcile(&self) -> Result<usize> {
        let stalled = self.store.stalled_chain_steps(RECONCILE_BATCH).await?;
        let mut triggered = 0;
        for step in &stalled {
            if self.trigger(step).await? {
                triggered += 1;
            }
        }
        if triggered > 0 {
            info!(triggered = triggered, "🔗 Reconciled stalled chain steps");
        }
        Ok(triggered)
    }

    /// Consume the status bus until shutdown
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        // Subscribe before spawning so no event published after this call is missed
        let mut subscription = self.events.subscribe(TopicPattern::parse(ALL_TASKS));

        tokio::spawn(async move {
            info!("🔗 Chain orchestrator started");
            if let Err(e) = self.reconcile().await {
                warn!(error = %e, "Startup chain reconciliation failed");
            }

            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    received = subscription.recv() => match received {
                        Received::Event(event) => {
                            if let Err(e) = self.handle_event(&event).await {
                                warn!(task_id = %event.task_id, error = %e, "⚠️ Chain event handling failed");
                            }
                        }
                        Received::Lagged { skipped } => {
                            warn!(skipped = skipped, "Chain orchestrator lagged, reconciling from the store");
                            if let Err(e) = self.reconcile().await {
                                warn!(error = %e, "Chain reconciliation failed");
                            }
                        }
                        Received::Closed => break,
                    },
                }
            }
            info!("🔗 Chain orchestrator stopped");
        })
    }

    /// Cost and cache writes. Neither may block chain progress.
    async fn record_side_effects(&self, task: &Task, event: &StatusEvent) {
        let cost = self.ledger.record(task);
        if let Err(e) = self.store.record_cost(task.id, cost).await {
            warn!(task_id = %task.id, error = %e, "⚠️ Cost write failed");
        }

        if let Some(result) = event.result.as_ref().or(task.result.as_ref()) {
            self.storage.write(task.id, result).await;
        }
    }

    /// PENDING -> QUEUED plus publish. `false` when another delivery got there
    /// first.
    async fn trigger(&self, step: &Task) -> Result<bool> {
        let outcome = match self.store.transition(step.id, TaskEvent::Enqueue).await {
            Ok(outcome) => outcome,
            Err(TaskRelayError::StateTransitionError(e)) => {
                debug!(task_id = %step.id, reason = %e, "Chain step already triggered");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        if let Err(e) = self.events.publish(StatusEvent::from_task(&outcome.task)) {
            warn!(task_id = %step.id, error = %e, "⚠️ Status event publish failed");
        }
        if let Some(entry) = &outcome.outbox {
            if let Err(e) = self.enqueuer.dispatch(entry).await {
                warn!(task_id = %step.id, error = %e, "⚠️ Chain step publish failed, leaving it for the relay");
            }
        }

        info!(
            task_id = %step.id,
            dag_id = ?step.dag_id,
            task_type = %step.task_type,
            "🔗 Chain step triggered"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{InMemoryResultCache, ResultCache};
    use crate::config::QueueConfig;
    use crate::database::InMemoryTaskStore;
    use crate::messaging::{InMemoryBroker, PriorityQueueFabric};
    use crate::models::{NewTask, Priority, TaskType};
    use chrono::Utc;
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        store: InMemoryTaskStore,
        broker: InMemoryBroker,
        cache: InMemoryResultCache,
        orchestrator: ChainOrchestrator,
    }

    async fn fixture() -> Fixture {
        let store = InMemoryTaskStore::default();
        let broker = InMemoryBroker::new();
        let cache = InMemoryResultCache::new();
        let fabric = PriorityQueueFabric::new(Arc::new(broker.clone()), QueueConfig::default());
        fabric.declare_topology().await.unwrap();
        let events = EventPublisher::new(16);
        let shared: Arc<dyn TaskStore> = Arc::new(store.clone());
        let enqueuer = TaskEnqueuer::new(shared.clone(), fabric, events.clone());
        let storage = TieredStorage::new(shared.clone(), Arc::new(cache.clone()), Duration::from_secs(600));
        Fixture {
            store,
            broker,
            cache,
            orchestrator: ChainOrchestrator::new(
                shared,
                enqueuer,
                storage,
                Arc::new(CostLedger::new()),
                events,
            ),
        }
    }

    /// Two-step chain with step 0 completed
    async fn completed_first_step(store: &InMemoryTaskStore) -> (Task, Task) {
        let dag_id = Uuid::now_v7();
        let now = Utc::now();
        let first = NewTask::new("acme", TaskType::Text, Priority::High, json!({}))
            .in_chain(dag_id, None)
            .into_task(now);
        let second = NewTask::new("acme", TaskType::Image, Priority::High, json!({}))
            .in_chain(dag_id, Some(first.id))
            .into_task(now);
        store.insert_tasks(&[first.clone(), second.clone()]).await.unwrap();
        store.transition(first.id, TaskEvent::Start).await.unwrap();
        let done = store
            .transition(first.id, TaskEvent::complete(json!({"url": "text"}), "v1.0.0"))
            .await
            .unwrap()
            .task;
        (done, second)
    }

    #[tokio::test]
    async fn test_duplicate_completed_event_triggers_successor_once() {
        let f = fixture().await;
        let (first, second) = completed_first_step(&f.store).await;
        let event = StatusEvent::from_task(&first);

        let advance = f.orchestrator.handle_event(&event).await.unwrap();
        assert_eq!(advance, ChainAdvance::Triggered(vec![second.id]));

        let again = f.orchestrator.handle_event(&event).await.unwrap();
        assert_eq!(again, ChainAdvance::NothingPending);

        let row = f.store.get_task(second.id).await.unwrap().unwrap();
        assert_eq!(row.status, TaskStatus::Queued);
        assert_eq!(f.broker.routed_to("taskrelay.lane.high").len(), 1);
    }

    #[tokio::test]
    async fn test_completion_records_cost_and_caches_result() {
        let f = fixture().await;
        let (first, _) = completed_first_step(&f.store).await;
        let event = StatusEvent::from_task(&first);

        f.orchestrator.handle_event(&event).await.unwrap();
        f.orchestrator.handle_event(&event).await.unwrap();

        let row = f.store.get_task(first.id).await.unwrap().unwrap();
        assert_eq!(row.cost, 0.001);
        assert_eq!(f.orchestrator.ledger().charged_tasks(), 1);
        assert_eq!(f.cache.get(first.id).await.unwrap(), Some(json!({"url": "text"})));
    }

    #[tokio::test]
    async fn test_non_completed_events_are_ignored() {
        let f = fixture().await;
        let task = NewTask::new("acme", TaskType::Video, Priority::Low, json!({}))
            .into_task(Utc::now());
        f.store.insert_tasks(&[task.clone()]).await.unwrap();

        let advance = f
            .orchestrator
            .handle_event(&StatusEvent::from_task(&task))
            .await
            .unwrap();
        assert_eq!(advance, ChainAdvance::Ignored);
        assert_eq!(f.orchestrator.ledger().charged_tasks(), 0);
    }

    #[tokio::test]
    async fn test_reconcile_triggers_steps_whose_event_was_lost() {
        let f = fixture().await;
        let (_, second) = completed_first_step(&f.store).await;

        assert_eq!(f.orchestrator.reconcile().await.unwrap(), 1);
        assert_eq!(f.orchestrator.reconcile().await.unwrap(), 0);
        let row = f.store.get_task(second.id).await.unwrap().unwrap();
        assert_eq!(row.status, TaskStatus::Queued);
    }
}
