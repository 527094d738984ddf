pub mod outbox;
pub mod task;

pub use outbox::{OutboxEntry, OutboxRoute};
pub use task::{NewTask, Priority, StorageTier, Task, TaskRow, TaskType};
