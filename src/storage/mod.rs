//! # Tiered Result Storage
//!
//! Cache-aside reads over the durable task store plus the background job that
//! ages completed results HOT -> WARM -> COLD.
//!
//! The tier is a label used for hit accounting and cold-retrieval logging.
//! Result payloads always stay in the durable store.

pub mod sweeper;
pub mod tiered;

pub use sweeper::{SweepReport, TierMigrationSweeper};
pub use tiered::{ReadOutcome, TierStats, TierStatsSnapshot, TieredStorage};
