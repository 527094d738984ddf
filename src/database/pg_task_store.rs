//! PostgreSQL-backed [`TaskStore`].
//!
//! Every status change is a `SELECT ... FOR UPDATE` read-modify-write inside
//! one transaction, with the accompanying outbox row inserted before commit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres, Transaction};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::migrations::DatabaseMigrations;
use super::task_store::{TaskStore, TransitionOutcome};
use crate::config::DatabaseConfig;
use crate::error::{Result, TaskRelayError};
use crate::models::{OutboxEntry, OutboxRoute, StorageTier, Task, TaskRow};
use crate::state_machine::{TaskEvent, TaskStateMachine, TaskStatus};

const TASK_COLUMNS: &str = "id, tenant_id, task_type, priority, payload, result, status, \
    retry_count, error_message, dag_id, parent_task_id, region, cost, storage_tier, \
    worker_version, created_at, updated_at, completed_at";

#[derive(Debug, Clone, FromRow)]
struct OutboxRow {
    id: Uuid,
    task_id: Uuid,
    route: String,
    message: Value,
    created_at: DateTime<Utc>,
    delivered_at: Option<DateTime<Utc>>,
}

impl TryFrom<OutboxRow> for OutboxEntry {
    type Error = TaskRelayError;

    fn try_from(row: OutboxRow) -> Result<Self> {
        Ok(OutboxEntry {
            id: row.id,
            task_id: row.task_id,
            route: row.route.parse()?,
            message: serde_json::from_value(row.message)?,
            created_at: row.created_at,
            delivered_at: row.delivered_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PgTaskStore {
    pool: PgPool,
    state_machine: TaskStateMachine,
}

impl PgTaskStore {
    pub fn new(pool: PgPool, state_machine: TaskStateMachine) -> Self {
        Self {
            pool,
            state_machine,
        }
    }

    /// Connect with the configured pool settings and apply pending migrations
    pub async fn connect(config: &DatabaseConfig, state_machine: TaskStateMachine) -> Result<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| TaskRelayError::ConfigurationError("database.url is not set".into()))?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(url)
            .await?;

        DatabaseMigrations::run_all(&pool).await?;
        info!(max_connections = config.max_connections, "🗄️ PostgreSQL task store ready");

        Ok(Self::new(pool, state_machine))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn lock_task(tx: &mut Transaction<'_, Postgres>, id: Uuid) -> Result<Task> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM taskrelay_tasks WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(TaskRelayError::TaskNotFound(id))?;
        Task::try_from(row)
    }

    async fn write_task_state(tx: &mut Transaction<'_, Postgres>, task: &Task) -> Result<()> {
        sqlx::query(
            "UPDATE taskrelay_tasks SET status = $2, retry_count = $3, error_message = $4, \
             result = $5, worker_version = $6, completed_at = $7, updated_at = $8 \
             WHERE id = $1",
        )
        .bind(task.id)
        .bind(task.status.as_str())
        .bind(i32::try_from(task.retry_count).unwrap_or(i32::MAX))
        .bind(&task.error_message)
        .bind(&task.result)
        .bind(&task.worker_version)
        .bind(task.completed_at)
        .bind(task.updated_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn insert_outbox(tx: &mut Transaction<'_, Postgres>, entry: &OutboxEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO taskrelay_outbox (id, task_id, route, message, created_at, delivered_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(entry.id)
        .bind(entry.task_id)
        .bind(entry.route.as_str())
        .bind(serde_json::to_value(&entry.message)?)
        .bind(entry.created_at)
        .bind(entry.delivered_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn fetch_tasks(&self, sql: &str, id: Uuid) -> Result<Vec<Task>> {
        sqlx::query_as::<_, TaskRow>(sql)
            .bind(id)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Task::try_from)
            .collect()
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    #[instrument(skip(self, tasks), fields(count = tasks.len()))]
    async fn insert_tasks(&self, tasks: &[Task]) -> Result<Vec<OutboxEntry>> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let mut entries = Vec::new();

        for task in tasks {
            sqlx::query(&format!(
                "INSERT INTO taskrelay_tasks ({TASK_COLUMNS}) VALUES \
                 ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)"
            ))
            .bind(task.id)
            .bind(&task.tenant_id)
            .bind(task.task_type.as_str())
            .bind(task.priority.level() as i16)
            .bind(&task.payload)
            .bind(&task.result)
            .bind(task.status.as_str())
            .bind(i32::try_from(task.retry_count).unwrap_or(i32::MAX))
            .bind(&task.error_message)
            .bind(task.dag_id)
            .bind(task.parent_task_id)
            .bind(&task.region)
            .bind(task.cost)
            .bind(task.storage_tier.as_str())
            .bind(&task.worker_version)
            .bind(task.created_at)
            .bind(task.updated_at)
            .bind(task.completed_at)
            .execute(&mut *tx)
            .await?;

            if task.status == TaskStatus::Queued {
                let entry = OutboxEntry::for_task(task, OutboxRoute::Lane, now);
                Self::insert_outbox(&mut tx, &entry).await?;
                entries.push(entry);
            }
        }

        tx.commit().await?;
        Ok(entries)
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<Task>> {
        sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM taskrelay_tasks WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(Task::try_from)
        .transpose()
    }

    async fn chain_tasks(&self, dag_id: Uuid) -> Result<Vec<Task>> {
        self.fetch_tasks(
            &format!(
                "SELECT {TASK_COLUMNS} FROM taskrelay_tasks WHERE dag_id = $1 ORDER BY created_at, id"
            ),
            dag_id,
        )
        .await
    }

    async fn children_of(&self, parent_id: Uuid) -> Result<Vec<Task>> {
        self.fetch_tasks(
            &format!(
                "SELECT {TASK_COLUMNS} FROM taskrelay_tasks WHERE parent_task_id = $1 ORDER BY created_at, id"
            ),
            parent_id,
        )
        .await
    }

    #[instrument(skip(self, event), fields(event = event.event_type()))]
    async fn transition(&self, id: Uuid, event: TaskEvent) -> Result<TransitionOutcome> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let mut task = Self::lock_task(&mut tx, id).await?;
        // An error here drops the transaction, which rolls back the row lock
        let transition = self.state_machine.apply(&mut task, event, now)?;
        Self::write_task_state(&mut tx, &task).await?;

        let outbox = match transition.route {
            Some(route) => {
                let entry = OutboxEntry::for_task(&task, route, now);
                Self::insert_outbox(&mut tx, &entry).await?;
                Some(entry)
            }
            None => None,
        };

        tx.commit().await?;
        debug!(task_id = %id, from = %transition.from, to = %transition.to, "Transition committed");

        Ok(TransitionOutcome {
            task,
            transition,
            outbox,
        })
    }

    async fn record_cost(&self, id: Uuid, cost: f64) -> Result<()> {
        let result = sqlx::query("UPDATE taskrelay_tasks SET cost = $2 WHERE id = $1")
            .bind(id)
            .bind(cost)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(TaskRelayError::TaskNotFound(id));
        }
        Ok(())
    }

    async fn migrate_storage_tier(
        &self,
        from: StorageTier,
        to: StorageTier,
        completed_before: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE taskrelay_tasks SET storage_tier = $2, updated_at = NOW() \
             WHERE storage_tier = $1 AND completed_at IS NOT NULL AND completed_at < $3",
        )
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(completed_before)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn undelivered_outbox(
        &self,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxEntry>> {
        sqlx::query_as::<_, OutboxRow>(
            "SELECT id, task_id, route, message, created_at, delivered_at FROM taskrelay_outbox \
             WHERE delivered_at IS NULL AND created_at < $1 ORDER BY created_at LIMIT $2",
        )
        .bind(created_before)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(OutboxEntry::try_from)
        .collect()
    }

    async fn mark_outbox_delivered(&self, entry_id: Uuid) -> Result<Option<Task>> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, OutboxRow>(
            "SELECT id, task_id, route, message, created_at, delivered_at FROM taskrelay_outbox \
             WHERE id = $1 FOR UPDATE",
        )
        .bind(entry_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| TaskRelayError::database(format!("unknown outbox entry {entry_id}")))?;
        let entry = OutboxEntry::try_from(row)?;
        if entry.is_delivered() {
            return Ok(None);
        }

        sqlx::query("UPDATE taskrelay_outbox SET delivered_at = $2 WHERE id = $1")
            .bind(entry_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        let mut requeued = None;
        if entry.route == OutboxRoute::Retry {
            let mut task = Self::lock_task(&mut tx, entry.task_id).await?;
            if task.status == TaskStatus::Failed {
                self.state_machine.apply(&mut task, TaskEvent::Requeue, now)?;
                Self::write_task_state(&mut tx, &task).await?;
                requeued = Some(task);
            }
        }

        tx.commit().await?;
        Ok(requeued)
    }

    async fn stalled_chain_steps(&self, limit: usize) -> Result<Vec<Task>> {
        let columns = TASK_COLUMNS
            .split(", ")
            .map(|column| format!("child.{}", column.trim()))
            .collect::<Vec<_>>()
            .join(", ");
        sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {columns} FROM taskrelay_tasks child \
             JOIN taskrelay_tasks parent ON parent.id = child.parent_task_id \
             WHERE child.status = 'PENDING' AND parent.status = 'COMPLETED' \
             ORDER BY child.created_at LIMIT $1"
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Task::try_from)
        .collect()
    }

    async fn tasks_with_status(
        &self,
        status: TaskStatus,
        updated_before: DateTime<Utc>,
        after: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Task>> {
        sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM taskrelay_tasks \
             WHERE status = $1 AND updated_at < $2 AND ($3::uuid IS NULL OR id > $3) \
             ORDER BY id LIMIT $4"
        ))
        .bind(status.as_str())
        .bind(updated_before)
        .bind(after)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Task::try_from)
        .collect()
    }
}
