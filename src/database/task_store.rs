//! The durable task store seam.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{OutboxEntry, StorageTier, Task};
use crate::state_machine::{TaskEvent, TaskStatus, Transition};

/// A committed transition together with the publish it owes
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionOutcome {
    pub task: Task,
    pub transition: Transition,
    pub outbox: Option<OutboxEntry>,
}

/// Durable record of every task. Owns the state machine: every status change
/// goes through [`TaskStore::transition`], which is a read-modify-write
/// transaction on a single row.
#[async_trait]
pub trait TaskStore: Send + Sync + 'static {
    /// Persist new rows in one transaction. Rows created QUEUED get a lane
    /// outbox entry in the same transaction; PENDING chain steps wait for
    /// their trigger.
    async fn insert_tasks(&self, tasks: &[Task]) -> Result<Vec<OutboxEntry>>;

    async fn get_task(&self, id: Uuid) -> Result<Option<Task>>;

    /// Steps of one chain, in creation order
    async fn chain_tasks(&self, dag_id: Uuid) -> Result<Vec<Task>>;

    async fn children_of(&self, parent_id: Uuid) -> Result<Vec<Task>>;

    /// Apply `event` to the task and write the accompanying outbox entry,
    /// atomically. Fails with a state transition error when the event is not
    /// valid for the committed status.
    async fn transition(&self, id: Uuid, event: TaskEvent) -> Result<TransitionOutcome>;

    async fn record_cost(&self, id: Uuid, cost: f64) -> Result<()>;

    /// Relabel `from` -> `to` for tasks completed before `completed_before`.
    /// Returns the number of rows changed.
    async fn migrate_storage_tier(
        &self,
        from: StorageTier,
        to: StorageTier,
        completed_before: DateTime<Utc>,
    ) -> Result<u64>;

    /// Undelivered entries created before `created_before`, oldest first
    async fn undelivered_outbox(
        &self,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxEntry>>;

    /// Mark an entry delivered. A delivered retry entry moves its task
    /// FAILED -> QUEUED; the requeued task is returned. Repeated calls are
    /// no-ops.
    async fn mark_outbox_delivered(&self, entry_id: Uuid) -> Result<Option<Task>>;

    /// PENDING chain steps whose predecessor already COMPLETED
    async fn stalled_chain_steps(&self, limit: usize) -> Result<Vec<Task>>;

    /// Rows in `status` last updated before `updated_before`, in id order,
    /// starting after the `after` cursor
    async fn tasks_with_status(
        &self,
        status: TaskStatus,
        updated_before: DateTime<Utc>,
        after: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Task>>;
}
