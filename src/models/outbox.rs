//! Transactional outbox entries.
//!
//! A status change that must be followed by a publish writes an
//! [`OutboxEntry`] in the same store transaction. The entry is dispatched
//! right away by the writer and, if that fails or the process dies first, by
//! the outbox relay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::TaskRelayError;
use crate::messaging::TaskMessage;
use crate::models::Task;

/// Where an outbox entry is published
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxRoute {
    /// Priority lane of the task
    Lane,
    /// Wait lane selected by the message's retry count
    Retry,
    /// Dead-letter lane
    DeadLetter,
}

impl OutboxRoute {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lane => "LANE",
            Self::Retry => "RETRY",
            Self::DeadLetter => "DEAD_LETTER",
        }
    }
}

impl fmt::Display for OutboxRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxRoute {
    type Err = TaskRelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LANE" => Ok(Self::Lane),
            "RETRY" => Ok(Self::Retry),
            "DEAD_LETTER" => Ok(Self::DeadLetter),
            other => Err(TaskRelayError::database(format!(
                "invalid outbox route: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: Uuid,
    pub task_id: Uuid,
    pub route: OutboxRoute,
    pub message: TaskMessage,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl OutboxEntry {
    /// Snapshot the task as it stands after the transition.
    pub fn for_task(task: &Task, route: OutboxRoute, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            task_id: task.id,
            route,
            message: TaskMessage::from_task(task),
            created_at: now,
            delivered_at: None,
        }
    }

    pub fn is_delivered(&self) -> bool {
        self.delivered_at.is_some()
    }
}
