use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Chain step waiting for its predecessor to complete
    #[default]
    Pending,
    /// Published to a lane (or scheduled to be) and waiting for a worker
    Queued,
    /// Claimed by a worker
    Processing,
    /// Finished successfully with a result
    Completed,
    /// Attempt failed; resolves to a retry or to the dead-letter lane
    Failed,
    /// Retry budget exhausted
    DeadLettered,
}

impl TaskStatus {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::DeadLettered)
    }

    /// Check if this is an active state (waiting in a lane or being processed)
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Queued | Self::Processing)
    }

    /// Check if this state counts as a failure for chain status
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::DeadLettered)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Queued => "QUEUED",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::DeadLettered => "DEAD_LETTERED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "QUEUED" => Ok(Self::Queued),
            "PROCESSING" => Ok(Self::Processing),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "DEAD_LETTERED" => Ok(Self::DeadLettered),
            _ => Err(format!("Invalid task status: {s}")),
        }
    }
}
