//! # Task Store
//!
//! The durable record of every task and the owner of its state machine.
//!
//! ## Key Components
//!
//! - [`TaskStore`] - the storage seam every component writes through
//! - [`InMemoryTaskStore`] - mutex-guarded store for tests and single-process runs
//! - [`PgTaskStore`] - PostgreSQL store with row-locking transactions
//! - [`migrations`] - embedded schema migrations with advisory locking

pub mod in_memory;
pub mod migrations;
pub mod pg_task_store;
pub mod task_store;

pub use in_memory::InMemoryTaskStore;
pub use migrations::DatabaseMigrations;
pub use pg_task_store::PgTaskStore;
pub use task_store::{TaskStore, TransitionOutcome};
