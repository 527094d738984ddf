//! # Worker
//!
//! Consumes the priority lanes and drives every status transition of a task
//! attempt: PROCESSING, then COMPLETED, FAILED (retry) or DEAD_LETTERED.
//!
//! - [`TaskExecutor`] - the work itself, one implementation per task type
//! - [`TaskProcessor`] - the per-delivery protocol
//! - [`WorkerPool`] - prefetch-1 competing consumers per lane

pub mod executor;
pub mod pool;
pub mod processor;

pub use executor::{result_document, ExecutionError, ExecutorRegistry, SimulatedExecutor, TaskExecutor};
pub use pool::WorkerPool;
pub use processor::{ProcessOutcome, TaskProcessor};
