//! Process-local [`TaskStore`] used by tests and the single-process binary.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use super::task_store::{TaskStore, TransitionOutcome};
use crate::error::{Result, TaskRelayError};
use crate::models::{OutboxEntry, OutboxRoute, StorageTier, Task};
use crate::state_machine::{TaskEvent, TaskStateMachine, TaskStatus};

#[derive(Default)]
struct StoreState {
    tasks: HashMap<Uuid, Task>,
    /// Insertion order; ids are time-ordered v7 so this also orders by creation
    order: Vec<Uuid>,
    outbox: BTreeMap<Uuid, OutboxEntry>,
}

/// A single mutex serializes every read-modify-write, which gives each
/// transition the isolation a row lock gives in PostgreSQL.
#[derive(Clone)]
pub struct InMemoryTaskStore {
    state: Arc<Mutex<StoreState>>,
    state_machine: TaskStateMachine,
    failing_writes: Arc<AtomicUsize>,
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new(TaskStateMachine::default())
    }
}

impl InMemoryTaskStore {
    pub fn new(state_machine: TaskStateMachine) -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState::default())),
            state_machine,
            failing_writes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make the next `count` writes fail as if the database were unreachable
    #[cfg(any(test, feature = "test-utils"))]
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// All outbox entries, delivered or not
    pub fn outbox_entries(&self) -> Vec<OutboxEntry> {
        self.state.lock().outbox.values().cloned().collect()
    }

    pub fn task_count(&self) -> usize {
        self.state.lock().tasks.len()
    }

    fn check_write(&self) -> Result<()> {
        let remaining = self.failing_writes.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_writes.store(remaining - 1, Ordering::SeqCst);
            return Err(TaskRelayError::database("injected write failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert_tasks(&self, tasks: &[Task]) -> Result<Vec<OutboxEntry>> {
        self.check_write()?;
        let now = Utc::now();
        let mut state = self.state.lock();

        if let Some(duplicate) = tasks.iter().find(|task| state.tasks.contains_key(&task.id)) {
            return Err(TaskRelayError::database(format!(
                "duplicate task id {}",
                duplicate.id
            )));
        }

        let mut entries = Vec::new();
        for task in tasks {
            if task.status == TaskStatus::Queued {
                let entry = OutboxEntry::for_task(task, OutboxRoute::Lane, now);
                state.outbox.insert(entry.id, entry.clone());
                entries.push(entry);
            }
            state.order.push(task.id);
            state.tasks.insert(task.id, task.clone());
        }
        Ok(entries)
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<Task>> {
        Ok(self.state.lock().tasks.get(&id).cloned())
    }

    async fn chain_tasks(&self, dag_id: Uuid) -> Result<Vec<Task>> {
        let state = self.state.lock();
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.tasks.get(id))
            .filter(|task| task.dag_id == Some(dag_id))
            .cloned()
            .collect())
    }

    async fn children_of(&self, parent_id: Uuid) -> Result<Vec<Task>> {
        let state = self.state.lock();
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.tasks.get(id))
            .filter(|task| task.parent_task_id == Some(parent_id))
            .cloned()
            .collect())
    }

    async fn transition(&self, id: Uuid, event: TaskEvent) -> Result<TransitionOutcome> {
        self.check_write()?;
        let now = Utc::now();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let stored = state
            .tasks
            .get_mut(&id)
            .ok_or(TaskRelayError::TaskNotFound(id))?;

        // Work on a copy so a refused event leaves the row untouched
        let mut task = stored.clone();
        let transition = self.state_machine.apply(&mut task, event, now)?;
        *stored = task.clone();

        let outbox = transition.route.map(|route| {
            let entry = OutboxEntry::for_task(&task, route, now);
            state.outbox.insert(entry.id, entry.clone());
            entry
        });

        Ok(TransitionOutcome {
            task,
            transition,
            outbox,
        })
    }

    async fn record_cost(&self, id: Uuid, cost: f64) -> Result<()> {
        self.check_write()?;
        let mut state = self.state.lock();
        let task = state
            .tasks
            .get_mut(&id)
            .ok_or(TaskRelayError::TaskNotFound(id))?;
        task.cost = cost;
        Ok(())
    }

    async fn migrate_storage_tier(
        &self,
        from: StorageTier,
        to: StorageTier,
        completed_before: DateTime<Utc>,
    ) -> Result<u64> {
        self.check_write()?;
        let now = Utc::now();
        let mut state = self.state.lock();
        let mut migrated = 0;
        for task in state.tasks.values_mut() {
            let eligible = task.storage_tier == from
                && task
                    .completed_at
                    .is_some_and(|completed_at| completed_at < completed_before);
            if eligible {
                task.storage_tier = to;
                task.updated_at = now;
                migrated += 1;
            }
        }
        Ok(migrated)
    }

    async fn undelivered_outbox(
        &self,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxEntry>> {
        let state = self.state.lock();
        let mut entries: Vec<OutboxEntry> = state
            .outbox
            .values()
            .filter(|entry| !entry.is_delivered() && entry.created_at < created_before)
            .cloned()
            .collect();
        entries.sort_by_key(|entry| entry.created_at);
        entries.truncate(limit);
        Ok(entries)
    }

    async fn mark_outbox_delivered(&self, entry_id: Uuid) -> Result<Option<Task>> {
        self.check_write()?;
        let now = Utc::now();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let entry = state
            .outbox
            .get_mut(&entry_id)
            .ok_or_else(|| TaskRelayError::database(format!("unknown outbox entry {entry_id}")))?;
        if entry.is_delivered() {
            return Ok(None);
        }
        entry.delivered_at = Some(now);

        if entry.route != OutboxRoute::Retry {
            return Ok(None);
        }
        let Some(task) = state.tasks.get_mut(&entry.task_id) else {
            return Ok(None);
        };
        if task.status != TaskStatus::Failed {
            return Ok(None);
        }
        self.state_machine.apply(task, TaskEvent::Requeue, now)?;
        Ok(Some(task.clone()))
    }

    async fn stalled_chain_steps(&self, limit: usize) -> Result<Vec<Task>> {
        let state = self.state.lock();
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.tasks.get(id))
            .filter(|task| task.status == TaskStatus::Pending)
            .filter(|task| {
                task.parent_task_id
                    .and_then(|parent| state.tasks.get(&parent))
                    .is_some_and(|parent| parent.status == TaskStatus::Completed)
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn tasks_with_status(
        &self,
        status: TaskStatus,
        updated_before: DateTime<Utc>,
        after: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Task>> {
        let state = self.state.lock();
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|task| task.status == status && task.updated_at < updated_before)
            .filter(|task| after.map_or(true, |cursor| task.id > cursor))
            .cloned()
            .collect();
        tasks.sort_by_key(|task| task.id);
        tasks.truncate(limit);
        Ok(tasks)
    }
}
