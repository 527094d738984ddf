//! # Pipeline Constants
//!
//! Operational boundaries of the task relay pipeline: queue topology names,
//! retry budget, broker priority weights, storage tier thresholds and the
//! per-type cost table. Configuration defaults are derived from these values.

use std::time::Duration;

/// Maximum number of retries before a task is dead-lettered.
pub const MAX_RETRY_COUNT: u32 = 3;

/// Highest broker-native priority weight a lane message may carry.
pub const MAX_PRIORITY_WEIGHT: u8 = 10;

/// Broker header carrying the retry attempt of a message.
pub const RETRY_COUNT_HEADER: &str = "x-retry-count";

/// Region assigned when a submission does not name one.
pub const DEFAULT_REGION: &str = "us-east";

/// Version string reported by workers unless configured otherwise.
pub const DEFAULT_WORKER_VERSION: &str = "v1.0.0";

/// Queue topology names
pub mod topology {
    /// Topic exchange every lane is bound to.
    pub const TASK_EXCHANGE: &str = "taskrelay.tasks";
    /// Fanout exchange feeding the dead-letter lane.
    pub const DEAD_LETTER_EXCHANGE: &str = "taskrelay.dead_letter";
    pub const DEAD_LETTER_QUEUE: &str = "taskrelay.dead_letter.queue";

    pub const HIGH_LANE_QUEUE: &str = "taskrelay.lane.high";
    pub const MEDIUM_LANE_QUEUE: &str = "taskrelay.lane.medium";
    pub const LOW_LANE_QUEUE: &str = "taskrelay.lane.low";

    pub const HIGH_ROUTING_KEY: &str = "task.high";
    pub const MEDIUM_ROUTING_KEY: &str = "task.medium";
    pub const LOW_ROUTING_KEY: &str = "task.low";

    pub const SHORT_WAIT_EXCHANGE: &str = "taskrelay.retry.short";
    pub const MEDIUM_WAIT_EXCHANGE: &str = "taskrelay.retry.medium";
    pub const LONG_WAIT_EXCHANGE: &str = "taskrelay.retry.long";

    pub const SHORT_WAIT_QUEUE: &str = "taskrelay.retry.short.queue";
    pub const MEDIUM_WAIT_QUEUE: &str = "taskrelay.retry.medium.queue";
    pub const LONG_WAIT_QUEUE: &str = "taskrelay.retry.long.queue";
}

/// Wait lane time-to-live values
pub mod wait_lanes {
    use super::Duration;

    pub const SHORT_TTL: Duration = Duration::from_secs(5);
    pub const MEDIUM_TTL: Duration = Duration::from_secs(15);
    pub const LONG_TTL: Duration = Duration::from_secs(60);
}

/// Broker-native priority weights per lane
pub mod priority_weights {
    pub const HIGH: u8 = 10;
    pub const MEDIUM: u8 = 5;
    pub const LOW: u8 = 1;
}

/// Result storage thresholds
pub mod storage {
    use super::Duration;

    /// Lifetime of an entry in the HOT result cache.
    pub const HOT_CACHE_TTL: Duration = Duration::from_secs(10 * 60);
    /// Interval between tier migration sweeps.
    pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
    /// Completion age after which a result is relabeled WARM.
    pub const WARM_AGE: Duration = Duration::from_secs(60 * 60);
    /// COLD threshold as a multiple of the WARM age.
    pub const COLD_AGE_MULTIPLIER: u32 = 24;
}

/// Unit cost charged per completed task
pub mod costs {
    pub const TEXT: f64 = 0.001;
    pub const IMAGE: f64 = 0.01;
    pub const VIDEO: f64 = 0.10;
    pub const DEFAULT: f64 = 0.001;
}

/// Status event topics
pub mod topics {
    pub const TASK_TOPIC_PREFIX: &str = "task.";
    pub const ALL_TASKS: &str = "task.*";
}
