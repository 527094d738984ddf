use chrono::{DateTime, Utc};

use super::{
    errors::{StateMachineError, StateMachineResult},
    events::TaskEvent,
    guards::{HasParentGuard, RetryBudgetGuard, StateGuard},
    states::TaskStatus,
};
use crate::constants::MAX_RETRY_COUNT;
use crate::models::{OutboxRoute, Task};

/// Outcome of one applied transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: TaskStatus,
    pub to: TaskStatus,
    /// Publish that must accompany the new state, written to the outbox in
    /// the same transaction
    pub route: Option<OutboxRoute>,
}

/// Transition table and guards for the task lifecycle
#[derive(Debug, Clone, Copy)]
pub struct TaskStateMachine {
    max_retry_count: u32,
}

impl Default for TaskStateMachine {
    fn default() -> Self {
        Self::new(MAX_RETRY_COUNT)
    }
}

impl TaskStateMachine {
    pub fn new(max_retry_count: u32) -> Self {
        Self { max_retry_count }
    }

    pub fn max_retry_count(&self) -> u32 {
        self.max_retry_count
    }

    /// Apply `event` to `task` in place and report the transition.
    ///
    /// On error the task is left untouched.
    pub fn apply(
        &self,
        task: &mut Task,
        event: TaskEvent,
        now: DateTime<Utc>,
    ) -> StateMachineResult<Transition> {
        let from = task.status;
        let to = self.determine_target_state(task, &event)?;

        match event {
            TaskEvent::Complete {
                result,
                worker_version,
            } => {
                task.result = Some(result);
                task.worker_version = Some(worker_version);
                task.error_message = None;
                if task.completed_at.is_none() {
                    task.completed_at = Some(now);
                }
            }
            TaskEvent::Fail { error } => {
                if to == TaskStatus::Failed {
                    task.retry_count += 1;
                }
                task.error_message = Some(error);
            }
            TaskEvent::Enqueue | TaskEvent::Start | TaskEvent::Requeue => {}
        }

        task.status = to;
        task.updated_at = now;

        Ok(Transition {
            from,
            to,
            route: Self::route_for(from, to),
        })
    }

    /// Determine the target state based on current state and event
    pub fn determine_target_state(
        &self,
        task: &Task,
        event: &TaskEvent,
    ) -> StateMachineResult<TaskStatus> {
        let target = match (task.status, event) {
            (TaskStatus::Pending, TaskEvent::Enqueue) => {
                HasParentGuard.check(task)?;
                TaskStatus::Queued
            }

            // Processing -> Processing is a broker redelivery of an unacked message
            (
                TaskStatus::Queued | TaskStatus::Failed | TaskStatus::Processing,
                TaskEvent::Start,
            ) => TaskStatus::Processing,

            (TaskStatus::Processing, TaskEvent::Complete { .. }) => TaskStatus::Completed,

            (TaskStatus::Processing, TaskEvent::Fail { .. }) => {
                let guard = RetryBudgetGuard {
                    max_retry_count: self.max_retry_count,
                };
                match guard.check(task) {
                    Ok(()) => TaskStatus::Failed,
                    Err(_) => TaskStatus::DeadLettered,
                }
            }

            (TaskStatus::Failed, TaskEvent::Requeue) => TaskStatus::Queued,

            (from_state, _) => {
                return Err(StateMachineError::InvalidTransition {
                    from: from_state.to_string(),
                    to_event: event.event_type().to_string(),
                })
            }
        };

        Ok(target)
    }

    fn route_for(from: TaskStatus, to: TaskStatus) -> Option<OutboxRoute> {
        match (from, to) {
            (TaskStatus::Pending, TaskStatus::Queued) => Some(OutboxRoute::Lane),
            (_, TaskStatus::Failed) => Some(OutboxRoute::Retry),
            (_, TaskStatus::DeadLettered) => Some(OutboxRoute::DeadLetter),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewTask, Priority, TaskType};
    use serde_json::json;
    use uuid::Uuid;

    fn processing_task() -> Task {
        let mut task = NewTask::new("tenant", TaskType::Text, Priority::High, json!({}))
            .into_task(Utc::now());
        task.status = TaskStatus::Processing;
        task
    }

    #[test]
    fn test_failure_increments_retry_count_until_budget() {
        let machine = TaskStateMachine::default();
        let mut task = processing_task();

        for expected in 1..=MAX_RETRY_COUNT {
            let transition = machine
                .apply(&mut task, TaskEvent::fail("boom"), Utc::now())
                .unwrap();
            assert_eq!(transition.to, TaskStatus::Failed);
            assert_eq!(transition.route, Some(OutboxRoute::Retry));
            assert_eq!(task.retry_count, expected);

            machine.apply(&mut task, TaskEvent::Start, Utc::now()).unwrap();
        }

        let transition = machine
            .apply(&mut task, TaskEvent::fail("final"), Utc::now())
            .unwrap();
        assert_eq!(transition.to, TaskStatus::DeadLettered);
        assert_eq!(transition.route, Some(OutboxRoute::DeadLetter));
        assert_eq!(task.retry_count, MAX_RETRY_COUNT);
        assert_eq!(task.error_message.as_deref(), Some("final"));
    }

    #[test]
    fn test_completion_sets_result_and_completed_at() {
        let machine = TaskStateMachine::default();
        let mut task = processing_task();

        let transition = machine
            .apply(&mut task, TaskEvent::complete(json!({"url": "x"}), "v1.0.0"), Utc::now())
            .unwrap();

        assert_eq!(transition.to, TaskStatus::Completed);
        assert_eq!(transition.route, None);
        assert_eq!(task.result, Some(json!({"url": "x"})));
        assert_eq!(task.worker_version.as_deref(), Some("v1.0.0"));
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn test_terminal_states_reject_events() {
        let machine = TaskStateMachine::default();
        let mut task = processing_task();
        machine
            .apply(&mut task, TaskEvent::complete(json!({}), "v1"), Utc::now())
            .unwrap();
        let snapshot = task.clone();

        let err = machine.apply(&mut task, TaskEvent::Start, Utc::now()).unwrap_err();
        assert!(err.is_invalid_transition());
        assert_eq!(task, snapshot);
    }

    #[test]
    fn test_enqueue_requires_pending_chain_step() {
        let machine = TaskStateMachine::default();
        let mut step = NewTask::new("tenant", TaskType::Image, Priority::Medium, json!({}))
            .in_chain(Uuid::now_v7(), Some(Uuid::now_v7()))
            .into_task(Utc::now());

        let transition = machine.apply(&mut step, TaskEvent::Enqueue, Utc::now()).unwrap();
        assert_eq!(transition.from, TaskStatus::Pending);
        assert_eq!(transition.route, Some(OutboxRoute::Lane));

        // second trigger finds the step already queued
        let err = machine.apply(&mut step, TaskEvent::Enqueue, Utc::now()).unwrap_err();
        assert!(err.is_invalid_transition());
    }

    #[test]
    fn test_requeue_only_from_failed() {
        let machine = TaskStateMachine::default();
        let mut task = processing_task();
        assert!(machine.apply(&mut task, TaskEvent::Requeue, Utc::now()).is_err());

        machine.apply(&mut task, TaskEvent::fail("x"), Utc::now()).unwrap();
        let transition = machine.apply(&mut task, TaskEvent::Requeue, Utc::now()).unwrap();
        assert_eq!(transition.to, TaskStatus::Queued);
        assert_eq!(transition.route, None);
    }
}
