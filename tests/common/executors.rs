//! Deterministic executors for pipeline tests.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

use taskrelay_core::models::{Task, TaskType};
use taskrelay_core::worker::{result_document, ExecutionError, TaskExecutor};

/// Fails the first `failures` attempts, then succeeds. With a gate, every
/// attempt waits for a permit first.
#[derive(Clone)]
pub struct ScriptedExecutor {
    task_type: TaskType,
    failures: usize,
    attempts: Arc<AtomicUsize>,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedExecutor {
    pub fn succeeding(task_type: TaskType) -> Self {
        Self {
            task_type,
            failures: 0,
            attempts: Arc::new(AtomicUsize::new(0)),
            gate: None,
        }
    }

    pub fn failing(task_type: TaskType) -> Self {
        Self::failing_times(task_type, usize::MAX)
    }

    pub fn failing_times(task_type: TaskType, failures: usize) -> Self {
        Self {
            failures,
            ..Self::succeeding(task_type)
        }
    }

    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskExecutor for ScriptedExecutor {
    fn task_type(&self) -> TaskType {
        self.task_type
    }

    async fn execute(&self, task: &Task) -> Result<Value, ExecutionError> {
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate open").forget();
        }
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            return Err(ExecutionError::generation_failed(
                self.task_type,
                format!("scripted failure #{}", attempt + 1),
            ));
        }
        Ok(result_document(task, "v-test"))
    }
}
