//! # Task Executors
//!
//! The capability a worker calls to do the actual generation work.
//!
//! One worker drives every task type; behavior per type comes from an
//! [`ExecutorProfile`] (duration range, failure rate) rather than from a
//! processor subclass per type.

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::{ExecutorProfile, WorkerConfig};
use crate::models::{Task, TaskType};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    #[error("{task_type} generation failed: {reason}")]
    GenerationFailed { task_type: TaskType, reason: String },

    #[error("No executor registered for task type {0}")]
    Unsupported(TaskType),
}

impl ExecutionError {
    pub fn generation_failed(task_type: TaskType, reason: impl Into<String>) -> Self {
        Self::GenerationFailed {
            task_type,
            reason: reason.into(),
        }
    }
}

#[async_trait]
pub trait TaskExecutor: Send + Sync + 'static {
    fn task_type(&self) -> TaskType;

    /// Do the work and return the result document
    async fn execute(&self, task: &Task) -> Result<Value, ExecutionError>;
}

/// Result document shared by every generation type
pub fn result_document(task: &Task, worker_version: &str) -> Value {
    let type_name = task.task_type.as_str().to_ascii_lowercase();
    json!({
        "taskId": task.id,
        "type": task.task_type.as_str(),
        "generatedAt": Utc::now().to_rfc3339(),
        "url": format!("https://storage.taskrelay.example/{}/{}-output", task.id, type_name),
        "workerVersion": worker_version,
        "region": task.region,
        "metadata": {
            "model": format!("{type_name}-generator-v1"),
            "quality": "high",
        },
    })
}

/// Sleeps for a random duration within the profile and fails with the
/// profile's probability
#[derive(Debug, Clone)]
pub struct SimulatedExecutor {
    task_type: TaskType,
    profile: ExecutorProfile,
    worker_version: String,
}

impl SimulatedExecutor {
    pub fn new(task_type: TaskType, profile: ExecutorProfile, worker_version: impl Into<String>) -> Self {
        Self {
            task_type,
            profile,
            worker_version: worker_version.into(),
        }
    }

    pub fn text(worker_version: impl Into<String>) -> Self {
        Self::new(TaskType::Text, ExecutorProfile::default_for(TaskType::Text), worker_version)
    }

    pub fn image(worker_version: impl Into<String>) -> Self {
        Self::new(TaskType::Image, ExecutorProfile::default_for(TaskType::Image), worker_version)
    }

    pub fn video(worker_version: impl Into<String>) -> Self {
        Self::new(TaskType::Video, ExecutorProfile::default_for(TaskType::Video), worker_version)
    }

    pub fn profile(&self) -> &ExecutorProfile {
        &self.profile
    }

    fn roll(&self) -> (Duration, bool) {
        let mut rng = rand::thread_rng();
        let min = self.profile.min_duration_ms;
        let max = self.profile.max_duration_ms.max(min);
        let duration = Duration::from_millis(rng.gen_range(min..=max));
        let fails = rng.gen_bool(self.profile.failure_rate.clamp(0.0, 1.0));
        (duration, fails)
    }
}

#[async_trait]
impl TaskExecutor for SimulatedExecutor {
    fn task_type(&self) -> TaskType {
        self.task_type
    }

    async fn execute(&self, task: &Task) -> Result<Value, ExecutionError> {
        // The rng is not Send; roll before the first await
        let (duration, fails) = self.roll();
        debug!(
            task_id = %task.id,
            task_type = %self.task_type,
            duration_ms = duration.as_millis() as u64,
            "Simulating generation"
        );
        tokio::time::sleep(duration).await;

        if fails {
            return Err(ExecutionError::generation_failed(
                self.task_type,
                "simulated processing failure",
            ));
        }
        Ok(result_document(task, &self.worker_version))
    }
}

/// Executors by task type
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<TaskType, Arc<dyn TaskExecutor>>,
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("task_types", &self.executors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One simulated executor per task type, profiled from configuration
    pub fn simulated(config: &WorkerConfig) -> Self {
        TaskType::ALL
            .iter()
            .fold(Self::new(), |registry, task_type| {
                registry.with_executor(Arc::new(SimulatedExecutor::new(
                    *task_type,
                    config.profile(*task_type),
                    config.version.clone(),
                )))
            })
    }

    pub fn with_executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executors.insert(executor.task_type(), executor);
        self
    }

    pub fn get(&self, task_type: TaskType) -> Option<&Arc<dyn TaskExecutor>> {
        self.executors.get(&task_type)
    }

    pub async fn execute(&self, task: &Task) -> Result<Value, ExecutionError> {
        match self.get(task.task_type) {
            Some(executor) => executor.execute(task).await,
            None => Err(ExecutionError::Unsupported(task.task_type)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewTask, Priority};
    use crate::constants::DEFAULT_WORKER_VERSION;

    fn task(task_type: TaskType) -> Task {
        NewTask::new("acme", task_type, Priority::High, json!({})).into_task(Utc::now())
    }

    fn profile(failure_rate: f64) -> ExecutorProfile {
        ExecutorProfile {
            min_duration_ms: 10,
            max_duration_ms: 20,
            failure_rate,
            ..ExecutorProfile::default_for(TaskType::Image)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reliable_executor_produces_result_document() {
        let executor = SimulatedExecutor::new(TaskType::Image, profile(0.0), "v2.0.0");
        let task = task(TaskType::Image);
        let result = executor.execute(&task).await.unwrap();

        assert_eq!(result["type"], "IMAGE");
        assert_eq!(result["workerVersion"], "v2.0.0");
        assert_eq!(result["region"], "us-east");
        assert_eq!(result["metadata"]["model"], "image-generator-v1");
        assert_eq!(
            result["url"],
            format!("https://storage.taskrelay.example/{}/image-output", task.id)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_profile_fails() {
        let executor = SimulatedExecutor::new(TaskType::Image, profile(1.0), "v1.0.0");
        let err = executor.execute(&task(TaskType::Image)).await.unwrap_err();
        assert!(matches!(err, ExecutionError::GenerationFailed { task_type: TaskType::Image, .. }));
    }

    #[tokio::test]
    async fn test_registry_dispatches_by_task_type() {
        let registry = ExecutorRegistry::new().with_executor(Arc::new(SimulatedExecutor::new(
            TaskType::Image,
            profile(0.0),
            DEFAULT_WORKER_VERSION,
        )));
        assert!(registry.get(TaskType::Image).is_some());
        assert_eq!(
            registry.execute(&task(TaskType::Video)).await,
            Err(ExecutionError::Unsupported(TaskType::Video))
        );

        let full = ExecutorRegistry::simulated(&WorkerConfig::default());
        assert!(TaskType::ALL.iter().all(|t| full.get(*t).is_some()));
    }

    #[test]
    fn test_default_profiles() {
        assert_eq!(SimulatedExecutor::text("v").profile().failure_rate, 0.05);
        assert_eq!(SimulatedExecutor::image("v").profile().max_duration_ms, 12_000);
        assert_eq!(SimulatedExecutor::video("v").profile().lane, Priority::Low);
    }
}
