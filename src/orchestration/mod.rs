//! # Orchestration
//!
//! Everything between a submission and a chain's last step.
//!
//! ## Core Components
//!
//! - **SubmissionService**: validates and persists standalone tasks and chains
//! - **TaskEnqueuer**: publishes committed outbox entries to the queue fabric
//! - **OutboxRelay**: re-publishes entries a crashed writer never delivered
//! - **TaskRecovery**: puts unfinished rows back into the lanes after a
//!   restart and fails PROCESSING rows whose lease ran out
//! - **ChainOrchestrator**: advances chains on COMPLETED events, idempotently
//! - **CostLedger**: per-task and per-tenant cost accounting
//! - **ChainStatus**: chain status derived from its steps
//! - **PipelineSystem**: wires the components and owns their lifecycle

pub mod bootstrap;
pub mod chain_orchestrator;
pub mod chain_status;
pub mod cost_ledger;
pub mod outbox_relay;
pub mod submission;
pub mod task_enqueuer;
pub mod task_recovery;

pub use bootstrap::{PipelineHandle, PipelineSystem, SystemStatus};
pub use chain_orchestrator::{ChainAdvance, ChainOrchestrator};
pub use chain_status::ChainStatus;
pub use cost_ledger::CostLedger;
pub use outbox_relay::OutboxRelay;
pub use submission::{
    ChainRequest, ChainStepRequest, ChainView, StepSummary, SubmissionService, SubmitReceipt,
    SubmitRequest,
};
pub use task_enqueuer::{DispatchOutcome, TaskEnqueuer};
pub use task_recovery::{RecoveryReport, TaskRecovery};
