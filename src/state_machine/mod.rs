//! # Task State Machine
//!
//! `PENDING -> QUEUED -> PROCESSING -> {COMPLETED | FAILED -> QUEUED | DEAD_LETTERED}`
//!
//! The machine is pure: stores call [`TaskStateMachine::apply`] inside their
//! own read-modify-write transaction, so every transition of a single task is
//! serialized by the store and guards see the committed row.

pub mod errors;
pub mod events;
pub mod guards;
pub mod states;
pub mod task_state_machine;

pub use errors::{GuardError, StateMachineError, StateMachineResult};
pub use events::TaskEvent;
pub use guards::StateGuard;
pub use states::TaskStatus;
pub use task_state_machine::{TaskStateMachine, Transition};
