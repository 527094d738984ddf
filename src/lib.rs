#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # TaskRelay Core
//!
//! Task lifecycle and delivery pipeline for asynchronous AI-generation work.
//!
//! ## Overview
//!
//! Tenants submit generation tasks (TEXT, IMAGE, VIDEO), alone or as linear
//! chains. Tasks run on a pool of typed workers behind a priority queue, are
//! retried with escalating delay, and end up COMPLETED or DEAD_LETTERED.
//! Results are served through a cache-tiered read path.
//!
//! ## Architecture
//!
//! ```text
//! SubmissionService ──► TaskStore + outbox ──► TaskEnqueuer ──► PriorityQueueFabric
//!                                                                    │
//!         ┌──────────────────────────────────────────────────────────┘
//!         ▼
//!   WorkerPool / TaskProcessor ──► TaskStore + ResultCache + EventPublisher
//!                                                              │
//!                               ChainOrchestrator ◄────────────┘
//!                                       │
//!                                       └──► next chain step ──► TaskEnqueuer
//! ```
//!
//! ## Module Organization
//!
//! - [`models`] - task row, task type, priority, storage tier, outbox entry
//! - [`state_machine`] - task status transitions and guards
//! - [`database`] - durable task store (in-memory and PostgreSQL)
//! - [`messaging`] - broker seam, in-memory broker, priority queue fabric
//! - [`events`] - status event bus and the notification forwarder
//! - [`cache`] - HOT result cache
//! - [`storage`] - tiered reads and the tier migration sweeper
//! - [`worker`] - executors, per-delivery processing, worker pool
//! - [`orchestration`] - submission, chains, outbox dispatch, bootstrap
//! - [`config`] - YAML configuration with environment overlays
//! - [`logging`] - structured logging setup
//! - [`error`] - structured error handling
//!
//! ## Delivery Semantics
//!
//! At-least-once throughout. Every publish owed by a status change is
//! recorded in the same store transaction as the change, duplicate
//! deliveries are acknowledged without effect, and chain triggering is
//! guarded by the successor's PENDING status.
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit and integration tests
//! ```

pub mod cache;
pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod events;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod orchestration;
pub mod state_machine;
pub mod storage;
pub mod worker;

pub use config::{ConfigManager, TaskRelayConfig};
pub use constants::MAX_RETRY_COUNT;
pub use error::{Result, TaskRelayError};
pub use models::{NewTask, Priority, StorageTier, Task, TaskType};
pub use orchestration::{
    ChainRequest, ChainStatus, ChainStepRequest, PipelineHandle, PipelineSystem,
    SubmissionService, SubmitRequest,
};
pub use state_machine::TaskStatus;
