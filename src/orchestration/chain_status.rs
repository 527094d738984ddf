//! Chain status, derived from the steps on every read and never stored.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::Task;
use crate::state_machine::TaskStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChainStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ChainStatus {
    /// COMPLETED iff every step completed; FAILED iff any step is FAILED or
    /// DEAD_LETTERED; RUNNING iff any step is QUEUED or PROCESSING;
    /// otherwise PENDING. A transient FAILED step reports the chain FAILED
    /// until its retry requeues it.
    pub fn derive(steps: &[Task]) -> Self {
        Self::from_statuses(steps.iter().map(|step| step.status))
    }

    pub fn from_statuses(statuses: impl IntoIterator<Item = TaskStatus>) -> Self {
        let statuses: Vec<TaskStatus> = statuses.into_iter().collect();

        if !statuses.is_empty() && statuses.iter().all(|s| *s == TaskStatus::Completed) {
            Self::Completed
        } else if statuses.iter().any(|s| s.is_failure()) {
            Self::Failed
        } else if statuses
            .iter()
            .any(|s| matches!(s, TaskStatus::Queued | TaskStatus::Processing))
        {
            Self::Running
        } else {
            Self::Pending
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ChainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TaskStatus::*;

    #[test]
    fn test_derivation_table() {
        assert_eq!(ChainStatus::from_statuses([Completed, Completed]), ChainStatus::Completed);
        assert_eq!(ChainStatus::from_statuses([Completed, Queued, Pending]), ChainStatus::Running);
        assert_eq!(ChainStatus::from_statuses([Processing, Pending]), ChainStatus::Running);
        assert_eq!(ChainStatus::from_statuses([Completed, DeadLettered, Pending]), ChainStatus::Failed);
        assert_eq!(ChainStatus::from_statuses([Failed, Pending]), ChainStatus::Failed);
        assert_eq!(ChainStatus::from_statuses([Completed, Pending]), ChainStatus::Pending);
    }

    #[test]
    fn test_empty_chain_is_pending() {
        assert_eq!(ChainStatus::from_statuses(Vec::<TaskStatus>::new()), ChainStatus::Pending);
    }
}
