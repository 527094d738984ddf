use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events that can trigger task state transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TaskEvent {
    /// Release a pending chain step to its lane
    Enqueue,
    /// A worker claimed the task
    Start,
    /// Work finished with a result
    Complete { result: Value, worker_version: String },
    /// Work failed; becomes a retry or a dead-letter depending on the budget
    Fail { error: String },
    /// The retry message reached its wait lane
    Requeue,
}

impl TaskEvent {
    pub fn complete(result: Value, worker_version: impl Into<String>) -> Self {
        Self::Complete {
            result,
            worker_version: worker_version.into(),
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self::Fail {
            error: error.into(),
        }
    }

    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Enqueue => "enqueue",
            Self::Start => "start",
            Self::Complete { .. } => "complete",
            Self::Fail { .. } => "fail",
            Self::Requeue => "requeue",
        }
    }

    /// Extract error message if this is a failure event
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Fail { error } => Some(error),
            _ => None,
        }
    }
}
