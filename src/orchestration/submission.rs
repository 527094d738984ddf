//! # Submission Service
//!
//! Validates and persists new work, then hands the first publish to the
//! enqueuer.
//!
//! ## Overview
//!
//! - Standalone submissions create one QUEUED row and publish it to the lane
//!   of its priority.
//! - Chain submissions create one row per step under a fresh `dag_id`. Step 0
//!   is QUEUED and published; every later step is PENDING and points at its
//!   predecessor. All rows are persisted in one batch before the publish.
//! - Invalid input is rejected before anything is written.
//!
//! Reads go through [`TieredStorage`] so a completed task's result comes from
//! the HOT cache when it is there.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::chain_status::ChainStatus;
use super::task_enqueuer::TaskEnqueuer;
use crate::database::TaskStore;
use crate::error::{Result, TaskRelayError};
use crate::events::{EventPublisher, StatusEvent};
use crate::logging::log_task_operation;
use crate::models::{NewTask, Priority, Task, TaskType};
use crate::state_machine::TaskStatus;
use crate::storage::TieredStorage;

/// A standalone submission
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubmitRequest {
    pub tenant_id: String,
    pub task_type: String,
    pub priority: i64,
    pub payload: Value,
    pub region: Option<String>,
    /// Chain the task is reported under
    pub dag_id: Option<Uuid>,
    /// Task this one was derived from
    pub parent_task_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChainStepRequest {
    pub task_type: String,
    pub payload: Value,
}

/// A linear chain submission; steps run in order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChainRequest {
    pub tenant_id: String,
    pub priority: i64,
    pub region: Option<String>,
    pub steps: Vec<ChainStepRequest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReceipt {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub task_type: TaskType,
    pub region: String,
    pub created_at: DateTime<Utc>,
}

impl SubmitReceipt {
    fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.id,
            status: task.status,
            task_type: task.task_type,
            region: task.region.clone(),
            created_at: task.created_at,
        }
    }
}

/// One step as shown in chain responses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepSummary {
    pub task_id: Uuid,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub dag_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<Uuid>,
}

impl StepSummary {
    fn from_task(task: &Task, dag_id: Uuid) -> Self {
        Self {
            task_id: task.id,
            task_type: task.task_type,
            status: task.status,
            dag_id,
            parent_task_id: task.parent_task_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainView {
    pub dag_id: Uuid,
    pub status: ChainStatus,
    pub tasks: Vec<StepSummary>,
}

#[derive(Clone)]
pub struct SubmissionService {
    store: Arc<dyn TaskStore>,
    enqueuer: TaskEnqueuer,
    storage: TieredStorage,
    events: EventPublisher,
}

impl std::fmt::Debug for SubmissionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmissionService")
            .field("storage", &self.storage)
            .finish()
    }
}

impl SubmissionService {
    pub fn new(
        store: Arc<dyn TaskStore>,
        enqueuer: TaskEnqueuer,
        storage: TieredStorage,
        events: EventPublisher,
    ) -> Self {
        Self {
            store,
            enqueuer,
            storage,
            events,
        }
    }

    /// Persist and publish one standalone task
    #[instrument(skip(self, request), fields(tenant_id = %request.tenant_id))]
    pub async fn submit(&self, request: SubmitRequest) -> Result<SubmitReceipt> {
        let tenant_id = require_tenant(&request.tenant_id)?;
        let task_type = parse_task_type(&request.task_type)?;
        if let Some(parent_task_id) = request.parent_task_id {
            if self.store.get_task(parent_task_id).await?.is_none() {
                return Err(TaskRelayError::invalid_input(format!(
                    "parentTaskId {parent_task_id} does not reference a known task"
                )));
            }
        }

        let mut new_task = NewTask::new(
            tenant_id,
            task_type,
            Priority::from_level(request.priority),
            request.payload,
        );
        if let Some(region) = request.region {
            new_task = new_task.with_region(region);
        }
        let mut task = new_task.into_task(Utc::now());
        // Lineage is recorded as given; a standalone submission is always
        // queued and published, never held PENDING behind its parent
        task.dag_id = request.dag_id;
        task.parent_task_id = request.parent_task_id;

        let entries = self.store.insert_tasks(std::slice::from_ref(&task)).await?;
        self.announce(&task);
        self.enqueuer.dispatch_all(&entries).await;

        log_task_operation(
            "submit",
            task.id,
            Some(&task.tenant_id),
            task.status.as_str(),
            Some(task.priority.lane_queue()),
        );
        Ok(SubmitReceipt::from_task(&task))
    }

    /// Persist every step of a chain, then publish step 0
    #[instrument(skip(self, request), fields(tenant_id = %request.tenant_id, steps = request.steps.len()))]
    pub async fn submit_chain(&self, request: ChainRequest) -> Result<ChainView> {
        let tenant_id = require_tenant(&request.tenant_id)?;
        if request.steps.is_empty() {
            return Err(TaskRelayError::invalid_input("steps must not be empty"));
        }
        // Validate every step before building any row
        let step_types = request
            .steps
            .iter()
            .map(|step| parse_task_type(&step.task_type))
            .collect::<Result<Vec<_>>>()?;

        let dag_id = Uuid::now_v7();
        let priority = Priority::from_level(request.priority);
        let now = Utc::now();

        let mut tasks: Vec<Task> = Vec::with_capacity(request.steps.len());
        for (step, task_type) in request.steps.into_iter().zip(step_types) {
            let parent = tasks.last().map(|previous| previous.id);
            let mut new_task = NewTask::new(tenant_id, task_type, priority, step.payload)
                .in_chain(dag_id, parent);
            if let Some(region) = &request.region {
                new_task = new_task.with_region(region.clone());
            }
            tasks.push(new_task.into_task(now));
        }

        let entries = self.store.insert_tasks(&tasks).await?;
        if let Some(first) = tasks.first() {
            self.announce(first);
        }
        self.enqueuer.dispatch_all(&entries).await;

        info!(dag_id = %dag_id, steps = tasks.len(), "🔗 Chain submitted");
        Ok(ChainView {
            dag_id,
            status: ChainStatus::Running,
            tasks: tasks
                .iter()
                .map(|task| StepSummary::from_task(task, dag_id))
                .collect(),
        })
    }

    /// The durable row, with a completed result served from the HOT cache
    /// when present
    pub async fn get_task(&self, task_id: Uuid) -> Result<Task> {
        let mut task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or(TaskRelayError::TaskNotFound(task_id))?;

        if task.status == TaskStatus::Completed {
            if let Some(result) = self.storage.read_task(&task).await.into_result() {
                task.result = Some(result);
            }
        }
        Ok(task)
    }

    /// Chain status derived from its steps
    pub async fn get_chain(&self, dag_id: Uuid) -> Result<ChainView> {
        let steps = self.store.chain_tasks(dag_id).await?;
        if steps.is_empty() {
            return Err(TaskRelayError::ChainNotFound(dag_id));
        }
        Ok(ChainView {
            dag_id,
            status: ChainStatus::derive(&steps),
            tasks: steps
                .iter()
                .map(|task| StepSummary::from_task(task, dag_id))
                .collect(),
        })
    }

    pub fn storage(&self) -> &TieredStorage {
        &self.storage
    }

    fn announce(&self, task: &Task) {
        if let Err(e) = self.events.publish(StatusEvent::from_task(task)) {
            warn!(task_id = %task.id, error = %e, "⚠️ Status event publish failed");
        }
    }
}

fn require_tenant(tenant_id: &str) -> Result<&str> {
    let tenant_id = tenant_id.trim();
    if tenant_id.is_empty() {
        return Err(TaskRelayError::invalid_input("tenantId is required"));
    }
    Ok(tenant_id)
}

fn parse_task_type(task_type: &str) -> Result<TaskType> {
    if task_type.trim().is_empty() {
        return Err(TaskRelayError::invalid_input("taskType is required"));
    }
    task_type.trim().parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryResultCache;
    use crate::config::QueueConfig;
    use crate::database::InMemoryTaskStore;
    use crate::messaging::{InMemoryBroker, PriorityQueueFabric};
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        store: InMemoryTaskStore,
        broker: InMemoryBroker,
        service: SubmissionService,
    }

    async fn fixture() -> Fixture {
        let store = InMemoryTaskStore::default();
        let broker = InMemoryBroker::new();
        let fabric = PriorityQueueFabric::new(Arc::new(broker.clone()), QueueConfig::default());
        fabric.declare_topology().await.unwrap();
        let events = EventPublisher::new(16);
        let shared: Arc<dyn TaskStore> = Arc::new(store.clone());
        let enqueuer = TaskEnqueuer::new(shared.clone(), fabric, events.clone());
        let storage = TieredStorage::new(
            shared.clone(),
            Arc::new(InMemoryResultCache::new()),
            Duration::from_secs(600),
        );
        Fixture {
            store,
            broker,
            service: SubmissionService::new(shared, enqueuer, storage, events),
        }
    }

    fn text_request(priority: i64) -> SubmitRequest {
        SubmitRequest {
            tenant_id: "acme".into(),
            task_type: "TEXT".into(),
            priority,
            payload: json!({"prompt": "hello"}),
            region: None,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_standalone_submission_is_queued_and_published_once() {
        let f = fixture().await;
        let receipt = f.service.submit(text_request(2)).await.unwrap();

        assert_eq!(receipt.status, TaskStatus::Queued);
        assert_eq!(receipt.region, "us-east");
        let routed = f.broker.routed_to("taskrelay.lane.low");
        assert_eq!(routed.len(), 1);
        assert_eq!(f.broker.routing_log().len(), 1);
    }

    #[tokio::test]
    async fn test_submission_keeps_lineage_and_is_still_published() {
        let f = fixture().await;
        let dag_id = Uuid::now_v7();
        let parent_task_id = f.service.submit(text_request(0)).await.unwrap().task_id;
        let request: SubmitRequest = serde_json::from_value(json!({
            "tenantId": "acme",
            "taskType": "IMAGE",
            "priority": 0,
            "payload": {"prompt": "variation"},
            "dagId": dag_id,
            "parentTaskId": parent_task_id,
        }))
        .unwrap();

        let receipt = f.service.submit(request).await.unwrap();
        assert_eq!(receipt.status, TaskStatus::Queued);

        let row = f.service.get_task(receipt.task_id).await.unwrap();
        assert_eq!(row.dag_id, Some(dag_id));
        assert_eq!(row.parent_task_id, Some(parent_task_id));
        assert_eq!(row.status, TaskStatus::Queued);
        assert_eq!(f.broker.routed_to("taskrelay.lane.high").len(), 2);
        assert_eq!(f.service.get_chain(dag_id).await.unwrap().tasks.len(), 1);

        let orphan = SubmitRequest {
            parent_task_id: Some(Uuid::now_v7()),
            ..text_request(0)
        };
        assert!(matches!(
            f.service.submit(orphan).await,
            Err(TaskRelayError::InvalidInput(_))
        ));
        assert_eq!(f.store.task_count(), 2);
    }

    #[tokio::test]
    async fn test_invalid_input_writes_nothing() {
        let f = fixture().await;

        let mut missing_tenant = text_request(0);
        missing_tenant.tenant_id = "  ".into();
        assert!(matches!(
            f.service.submit(missing_tenant).await,
            Err(TaskRelayError::InvalidInput(_))
        ));

        let mut unknown_type = text_request(0);
        unknown_type.task_type = "AUDIO".into();
        assert!(f.service.submit(unknown_type).await.is_err());

        let empty_chain = ChainRequest {
            tenant_id: "acme".into(),
            ..Default::default()
        };
        assert!(matches!(
            f.service.submit_chain(empty_chain).await,
            Err(TaskRelayError::InvalidInput(_))
        ));

        let bad_step = ChainRequest {
            tenant_id: "acme".into(),
            steps: vec![
                ChainStepRequest {
                    task_type: "TEXT".into(),
                    payload: json!({}),
                },
                ChainStepRequest {
                    task_type: "".into(),
                    payload: json!({}),
                },
            ],
            ..Default::default()
        };
        assert!(f.service.submit_chain(bad_step).await.is_err());

        assert_eq!(f.store.task_count(), 0);
        assert!(f.broker.routing_log().is_empty());
    }

    #[tokio::test]
    async fn test_chain_links_steps_and_publishes_only_the_first() {
        let f = fixture().await;
        let view = f
            .service
            .submit_chain(ChainRequest {
                tenant_id: "acme".into(),
                priority: 1,
                region: Some("eu-west".into()),
                steps: ["TEXT", "IMAGE", "VIDEO"]
                    .into_iter()
                    .map(|task_type| ChainStepRequest {
                        task_type: task_type.into(),
                        payload: json!({}),
                    })
                    .collect(),
            })
            .await
            .unwrap();

        let statuses: Vec<TaskStatus> = view.tasks.iter().map(|t| t.status).collect();
        assert_eq!(
            statuses,
            vec![TaskStatus::Queued, TaskStatus::Pending, TaskStatus::Pending]
        );
        assert_eq!(view.tasks[0].parent_task_id, None);
        assert_eq!(view.tasks[1].parent_task_id, Some(view.tasks[0].task_id));
        assert_eq!(view.tasks[2].parent_task_id, Some(view.tasks[1].task_id));
        assert!(view.tasks.iter().all(|t| t.dag_id == view.dag_id));

        assert_eq!(f.broker.routing_log().len(), 1);
        assert_eq!(f.broker.routed_to("taskrelay.lane.medium").len(), 1);

        let chain = f.service.get_chain(view.dag_id).await.unwrap();
        assert_eq!(chain.status, ChainStatus::Running);
        let first = f.service.get_task(view.tasks[0].task_id).await.unwrap();
        assert_eq!(first.region, "eu-west");
    }

    #[tokio::test]
    async fn test_unknown_ids_are_not_found() {
        let f = fixture().await;
        let id = Uuid::now_v7();
        assert_eq!(
            f.service.get_task(id).await,
            Err(TaskRelayError::TaskNotFound(id))
        );
        assert_eq!(
            f.service.get_chain(id).await,
            Err(TaskRelayError::ChainNotFound(id))
        );
    }
}
