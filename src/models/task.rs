//! # Task Model
//!
//! The central entity of the pipeline: one row per submitted task or chain step.
//!
//! ## Overview
//!
//! A `Task` carries its classification (`tenant_id`, `task_type`, `priority`),
//! an immutable payload, the result set once on success, its lifecycle status,
//! chain linkage (`dag_id`, `parent_task_id`) and placement/cost fields.
//!
//! ## Database Schema
//!
//! Maps to the `taskrelay_tasks` table (see `migrations/`). Enum columns are
//! stored as TEXT and converted through [`TaskRow`] so the same model serves the
//! in-memory store and PostgreSQL.
//!
//! ## Invariants
//!
//! - `retry_count` never exceeds [`MAX_RETRY_COUNT`](crate::constants::MAX_RETRY_COUNT)
//! - `storage_tier` only moves HOT -> WARM -> COLD
//! - `completed_at` is set once, on the transition to COMPLETED

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::constants::{costs, priority_weights, topology, DEFAULT_REGION};
use crate::error::TaskRelayError;
use crate::state_machine::TaskStatus;

/// Kind of generation work a task asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    Text,
    Image,
    Video,
}

impl TaskType {
    pub const ALL: [TaskType; 3] = [TaskType::Text, TaskType::Image, TaskType::Video];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Image => "IMAGE",
            Self::Video => "VIDEO",
        }
    }

    /// Unit cost charged when a task of this type completes
    pub fn unit_cost(&self) -> f64 {
        match self {
            Self::Text => costs::TEXT,
            Self::Image => costs::IMAGE,
            Self::Video => costs::VIDEO,
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = TaskRelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TEXT" => Ok(Self::Text),
            "IMAGE" => Ok(Self::Image),
            "VIDEO" => Ok(Self::Video),
            other => Err(TaskRelayError::invalid_input(format!(
                "unknown task type: {other}"
            ))),
        }
    }
}

/// Scheduling priority; selects the lane a task is published to.
///
/// Serialized as its numeric level (0 = high, 1 = medium, 2 = low). Any level
/// outside that range is treated as low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn from_level(level: i64) -> Self {
        match level {
            0 => Self::High,
            1 => Self::Medium,
            _ => Self::Low,
        }
    }

    pub fn level(&self) -> i64 {
        match self {
            Self::High => 0,
            Self::Medium => 1,
            Self::Low => 2,
        }
    }

    /// Broker-native weight preferred within a lane
    pub fn broker_weight(&self) -> u8 {
        match self {
            Self::High => priority_weights::HIGH,
            Self::Medium => priority_weights::MEDIUM,
            Self::Low => priority_weights::LOW,
        }
    }

    pub fn routing_key(&self) -> &'static str {
        match self {
            Self::High => topology::HIGH_ROUTING_KEY,
            Self::Medium => topology::MEDIUM_ROUTING_KEY,
            Self::Low => topology::LOW_ROUTING_KEY,
        }
    }

    pub fn lane_queue(&self) -> &'static str {
        match self {
            Self::High => topology::HIGH_LANE_QUEUE,
            Self::Medium => topology::MEDIUM_LANE_QUEUE,
            Self::Low => topology::LOW_LANE_QUEUE,
        }
    }
}

impl From<i64> for Priority {
    fn from(level: i64) -> Self {
        Self::from_level(level)
    }
}

impl From<Priority> for i64 {
    fn from(priority: Priority) -> Self {
        priority.level()
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

/// Storage tier label of a completed result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageTier {
    #[default]
    Hot,
    Warm,
    Cold,
}

impl StorageTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hot => "HOT",
            Self::Warm => "WARM",
            Self::Cold => "COLD",
        }
    }

    /// The tier a result ages into next, if any.
    pub fn next(&self) -> Option<StorageTier> {
        match self {
            Self::Hot => Some(Self::Warm),
            Self::Warm => Some(Self::Cold),
            Self::Cold => None,
        }
    }
}

impl fmt::Display for StorageTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageTier {
    type Err = TaskRelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HOT" => Ok(Self::Hot),
            "WARM" => Ok(Self::Warm),
            "COLD" => Ok(Self::Cold),
            other => Err(TaskRelayError::database(format!(
                "invalid storage tier: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: Uuid,
    pub tenant_id: String,
    pub task_type: TaskType,
    pub priority: Priority,
    pub payload: Value,
    pub result: Option<Value>,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub dag_id: Option<Uuid>,
    pub parent_task_id: Option<Uuid>,
    pub region: String,
    pub cost: f64,
    pub storage_tier: StorageTier,
    pub worker_version: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn lane_queue(&self) -> &'static str {
        self.priority.lane_queue()
    }

    pub fn is_chain_step(&self) -> bool {
        self.dag_id.is_some()
    }
}

/// Input for creating a task row
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub tenant_id: String,
    pub task_type: TaskType,
    pub priority: Priority,
    pub payload: Value,
    pub region: Option<String>,
    pub dag_id: Option<Uuid>,
    pub parent_task_id: Option<Uuid>,
}

impl NewTask {
    pub fn new(tenant_id: impl Into<String>, task_type: TaskType, priority: Priority, payload: Value) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            task_type,
            priority,
            payload,
            region: None,
            dag_id: None,
            parent_task_id: None,
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn in_chain(mut self, dag_id: Uuid, parent_task_id: Option<Uuid>) -> Self {
        self.dag_id = Some(dag_id);
        self.parent_task_id = parent_task_id;
        self
    }

    /// Materialize the row. The first step of a chain and standalone tasks
    /// start QUEUED; every later chain step starts PENDING.
    pub fn into_task(self, now: DateTime<Utc>) -> Task {
        let status = if self.parent_task_id.is_some() {
            TaskStatus::Pending
        } else {
            TaskStatus::Queued
        };

        Task {
            id: Uuid::now_v7(),
            tenant_id: self.tenant_id,
            task_type: self.task_type,
            priority: self.priority,
            payload: self.payload,
            result: None,
            status,
            retry_count: 0,
            error_message: None,
            dag_id: self.dag_id,
            parent_task_id: self.parent_task_id,
            region: self.region.unwrap_or_else(|| DEFAULT_REGION.to_string()),
            cost: 0.0,
            storage_tier: StorageTier::Hot,
            worker_version: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// Raw `taskrelay_tasks` row with enum columns as TEXT.
#[derive(Debug, Clone, FromRow)]
pub struct TaskRow {
    pub id: Uuid,
    pub tenant_id: String,
    pub task_type: String,
    pub priority: i16,
    pub payload: Value,
    pub result: Option<Value>,
    pub status: String,
    pub retry_count: i32,
    pub error_message: Option<String>,
    pub dag_id: Option<Uuid>,
    pub parent_task_id: Option<Uuid>,
    pub region: String,
    pub cost: f64,
    pub storage_tier: String,
    pub worker_version: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<TaskRow> for Task {
    type Error = TaskRelayError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<TaskStatus>()
            .map_err(TaskRelayError::database)?;

        Ok(Task {
            id: row.id,
            tenant_id: row.tenant_id,
            task_type: row.task_type.parse()?,
            priority: Priority::from_level(i64::from(row.priority)),
            payload: row.payload,
            result: row.result,
            status,
            retry_count: u32::try_from(row.retry_count).unwrap_or_default(),
            error_message: row.error_message,
            dag_id: row.dag_id,
            parent_task_id: row.parent_task_id,
            region: row.region,
            cost: row.cost,
            storage_tier: row.storage_tier.parse()?,
            worker_version: row.worker_version,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_priority_routes_to_low_lane() {
        assert_eq!(Priority::from_level(0).lane_queue(), topology::HIGH_LANE_QUEUE);
        assert_eq!(Priority::from_level(1).lane_queue(), topology::MEDIUM_LANE_QUEUE);
        assert_eq!(Priority::from_level(2).lane_queue(), topology::LOW_LANE_QUEUE);
        assert_eq!(Priority::from_level(7), Priority::Low);
        assert_eq!(Priority::from_level(-1), Priority::Low);
    }

    #[test]
    fn broker_weights_follow_priority() {
        assert_eq!(Priority::High.broker_weight(), 10);
        assert_eq!(Priority::Medium.broker_weight(), 5);
        assert_eq!(Priority::Low.broker_weight(), 1);
    }

    #[test]
    fn task_type_parsing_rejects_unknown() {
        assert_eq!("text".parse::<TaskType>().unwrap(), TaskType::Text);
        assert_eq!("VIDEO".parse::<TaskType>().unwrap(), TaskType::Video);
        assert!(matches!(
            "AUDIO".parse::<TaskType>(),
            Err(TaskRelayError::InvalidInput(_))
        ));
    }

    #[test]
    fn new_task_defaults() {
        let task = NewTask::new("tenant-a", TaskType::Image, Priority::Medium, json!({"prompt": "cat"}))
            .into_task(Utc::now());

        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.region, DEFAULT_REGION);
        assert_eq!(task.storage_tier, StorageTier::Hot);
        assert_eq!(task.retry_count, 0);
        assert_eq!(task.cost, 0.0);
        assert!(task.completed_at.is_none());
    }

    #[test]
    fn later_chain_steps_start_pending() {
        let dag_id = Uuid::now_v7();
        let parent = Uuid::now_v7();
        let task = NewTask::new("tenant-a", TaskType::Video, Priority::Low, json!({}))
            .in_chain(dag_id, Some(parent))
            .into_task(Utc::now());

        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.dag_id, Some(dag_id));
        assert_eq!(task.parent_task_id, Some(parent));
    }

    #[test]
    fn task_projection_uses_camel_case() {
        let task = NewTask::new("t", TaskType::Text, Priority::High, json!({}))
            .into_task(Utc::now());
        let value = serde_json::to_value(&task).unwrap();

        assert_eq!(value["taskType"], "TEXT");
        assert_eq!(value["status"], "QUEUED");
        assert_eq!(value["storageTier"], "HOT");
        assert_eq!(value["priority"], 0);
    }
}
