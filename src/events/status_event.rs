//! Status events and topic matching.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::constants::topics::TASK_TOPIC_PREFIX;
use crate::models::{Task, TaskType};
use crate::state_machine::TaskStatus;

/// One status change of one task, published on `task.{taskId}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub task_id: Uuid,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub task_type: TaskType,
    pub tenant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dag_id: Option<Uuid>,
}

impl StatusEvent {
    /// Event describing the task's current state
    pub fn from_task(task: &Task) -> Self {
        let result = match task.status {
            TaskStatus::Completed => task.result.clone(),
            _ => None,
        };
        let error_message = match task.status {
            TaskStatus::Failed | TaskStatus::DeadLettered => task.error_message.clone(),
            _ => None,
        };

        Self {
            task_id: task.id,
            status: task.status,
            result,
            error_message,
            timestamp: task.updated_at,
            task_type: task.task_type,
            tenant_id: task.tenant_id.clone(),
            dag_id: task.dag_id,
        }
    }

    pub fn topic(&self) -> String {
        format!("{TASK_TOPIC_PREFIX}{}", self.task_id)
    }
}

/// Subscription filter over event topics
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicPattern {
    /// Every topic
    All,
    /// Topics starting with the prefix, written `task.*`
    Prefix(String),
    Exact(String),
}

impl TopicPattern {
    pub fn parse(pattern: &str) -> Self {
        if pattern == "*" {
            Self::All
        } else if let Some(prefix) = pattern.strip_suffix('*') {
            Self::Prefix(prefix.to_string())
        } else {
            Self::Exact(pattern.to_string())
        }
    }

    pub fn task(task_id: Uuid) -> Self {
        Self::Exact(format!("{TASK_TOPIC_PREFIX}{task_id}"))
    }

    pub fn matches(&self, topic: &str) -> bool {
        match self {
            Self::All => true,
            Self::Prefix(prefix) => topic.starts_with(prefix.as_str()),
            Self::Exact(exact) => topic == exact,
        }
    }
}
