use super::errors::{business_rule_violation, GuardError, GuardResult};
use crate::models::Task;

/// Trait for implementing state transition guards
pub trait StateGuard<T> {
    /// Check if a transition is allowed
    fn check(&self, entity: &T) -> GuardResult<()>;

    /// Get a description of this guard for logging
    fn description(&self) -> &'static str;
}

/// A failed attempt may only become a retry while budget remains
pub struct RetryBudgetGuard {
    pub max_retry_count: u32,
}

impl StateGuard<Task> for RetryBudgetGuard {
    fn check(&self, task: &Task) -> GuardResult<()> {
        if task.retry_count >= self.max_retry_count {
            return Err(GuardError::RetryBudgetExhausted {
                retry_count: task.retry_count,
                max: self.max_retry_count,
            });
        }
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Retry count must be below the retry budget"
    }
}

/// Only chain steps with a predecessor are released by the chain orchestrator
pub struct HasParentGuard;

impl StateGuard<Task> for HasParentGuard {
    fn check(&self, task: &Task) -> GuardResult<()> {
        if task.parent_task_id.is_none() {
            return Err(business_rule_violation(format!(
                "task {} has no predecessor to wait for",
                task.id
            )));
        }
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Pending task must be a chain step with a predecessor"
    }
}
