//! # Pipeline Configuration
//!
//! YAML-based configuration for the task relay pipeline with
//! development/test/production overrides.
//!
//! ## Architecture
//!
//! - **Single Source of Truth**: `config/taskrelay.yaml`, one section per concern
//! - **Environment Awareness**: a top-level `development`/`test`/`production`
//!   mapping is merged over the base document
//! - **Explicit Validation**: impossible values are rejected at load time
//! - **Complete Defaults**: every section falls back to the pipeline constants
//!
//! ## Usage
//!
//! ```rust,no_run
//! use taskrelay_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let ttl = manager.config().cache.hot_ttl();
//! let lane = manager.config().queues.lanes.high.clone();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

use crate::constants::{self, storage, topology, wait_lanes};
use crate::models::{Priority, TaskType};

/// Root configuration structure mirroring taskrelay.yaml
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TaskRelayConfig {
    /// Durable task store selection and connection settings
    pub database: DatabaseConfig,

    /// Queue fabric topology and retry budget
    pub queues: QueueConfig,

    /// Worker identity and per-type executor profiles
    pub worker: WorkerConfig,

    /// HOT result cache
    pub cache: CacheConfig,

    /// Tier migration thresholds
    pub storage: StorageConfig,

    /// Status event bus
    pub events: EventsConfig,

    /// Outbox relay
    pub outbox: OutboxConfig,

    /// Restart recovery and PROCESSING leases
    pub recovery: RecoveryConfig,

    pub logging: LoggingConfig,
}

impl TaskRelayConfig {
    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> ConfigResult<()> {
        self.queues.validate()?;
        self.worker.validate()?;

        if self.cache.hot_ttl_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "cache.hot_ttl_seconds",
                "0",
                "HOT cache TTL must be positive",
            ));
        }
        if self.storage.sweep_interval_seconds == 0 || self.storage.warm_age_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "storage",
                format!(
                    "sweep_interval_seconds={}, warm_age_seconds={}",
                    self.storage.sweep_interval_seconds, self.storage.warm_age_seconds
                ),
                "sweep interval and warm age must be positive",
            ));
        }
        if self.storage.cold_age_multiplier < 2 {
            return Err(ConfigurationError::invalid_value(
                "storage.cold_age_multiplier",
                self.storage.cold_age_multiplier.to_string(),
                "COLD threshold must be larger than the WARM threshold",
            ));
        }
        if self.events.channel_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "events.channel_capacity",
                "0",
                "event bus needs a positive capacity",
            ));
        }
        if self.outbox.batch_size == 0 || self.outbox.relay_interval_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "outbox",
                format!(
                    "batch_size={}, relay_interval_seconds={}",
                    self.outbox.batch_size, self.outbox.relay_interval_seconds
                ),
                "outbox relay needs a positive batch size and interval",
            ));
        }
        if self.recovery.processing_lease_seconds == 0
            || self.recovery.lease_check_interval_seconds == 0
            || self.recovery.batch_size == 0
        {
            return Err(ConfigurationError::invalid_value(
                "recovery",
                format!(
                    "processing_lease_seconds={}, lease_check_interval_seconds={}, batch_size={}",
                    self.recovery.processing_lease_seconds,
                    self.recovery.lease_check_interval_seconds,
                    self.recovery.batch_size
                ),
                "recovery needs a positive lease, check interval and batch size",
            ));
        }
        if self.database.backend == StoreBackend::Postgres && self.database.url.is_none() {
            return Err(ConfigurationError::invalid_value(
                "database.url",
                "",
                "postgres backend requires a database url (or DATABASE_URL)",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub backend: StoreBackend,
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            url: None,
            max_connections: 10,
            acquire_timeout_seconds: 5,
        }
    }
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LanesConfig {
    pub high: String,
    pub medium: String,
    pub low: String,
}

impl Default for LanesConfig {
    fn default() -> Self {
        Self {
            high: topology::HIGH_LANE_QUEUE.to_string(),
            medium: topology::MEDIUM_LANE_QUEUE.to_string(),
            low: topology::LOW_LANE_QUEUE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WaitLaneConfig {
    pub exchange: String,
    pub queue: String,
    pub ttl_seconds: u64,
}

impl WaitLaneConfig {
    fn new(exchange: &str, queue: &str, ttl: Duration) -> Self {
        Self {
            exchange: exchange.to_string(),
            queue: queue.to_string(),
            ttl_seconds: ttl.as_secs(),
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WaitLanesConfig {
    pub short: WaitLaneConfig,
    pub medium: WaitLaneConfig,
    pub long: WaitLaneConfig,
}

impl Default for WaitLanesConfig {
    fn default() -> Self {
        Self {
            short: WaitLaneConfig::new(
                topology::SHORT_WAIT_EXCHANGE,
                topology::SHORT_WAIT_QUEUE,
                wait_lanes::SHORT_TTL,
            ),
            medium: WaitLaneConfig::new(
                topology::MEDIUM_WAIT_EXCHANGE,
                topology::MEDIUM_WAIT_QUEUE,
                wait_lanes::MEDIUM_TTL,
            ),
            long: WaitLaneConfig::new(
                topology::LONG_WAIT_EXCHANGE,
                topology::LONG_WAIT_QUEUE,
                wait_lanes::LONG_TTL,
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    pub task_exchange: String,
    pub dead_letter_exchange: String,
    pub dead_letter_queue: String,
    pub lanes: LanesConfig,
    pub wait_lanes: WaitLanesConfig,
    pub max_retry_count: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            task_exchange: topology::TASK_EXCHANGE.to_string(),
            dead_letter_exchange: topology::DEAD_LETTER_EXCHANGE.to_string(),
            dead_letter_queue: topology::DEAD_LETTER_QUEUE.to_string(),
            lanes: LanesConfig::default(),
            wait_lanes: WaitLanesConfig::default(),
            max_retry_count: constants::MAX_RETRY_COUNT,
        }
    }
}

impl QueueConfig {
    pub fn lane_queue(&self, priority: Priority) -> &str {
        match priority {
            Priority::High => &self.lanes.high,
            Priority::Medium => &self.lanes.medium,
            Priority::Low => &self.lanes.low,
        }
    }

    /// Wait lane for a retry attempt: 1 -> short, 2 -> medium, 3+ -> long
    pub fn wait_lane(&self, retry_count: u32) -> &WaitLaneConfig {
        match retry_count {
            0 | 1 => &self.wait_lanes.short,
            2 => &self.wait_lanes.medium,
            _ => &self.wait_lanes.long,
        }
    }

    fn validate(&self) -> ConfigResult<()> {
        let names = [
            ("queues.task_exchange", &self.task_exchange),
            ("queues.dead_letter_exchange", &self.dead_letter_exchange),
            ("queues.dead_letter_queue", &self.dead_letter_queue),
            ("queues.lanes.high", &self.lanes.high),
            ("queues.lanes.medium", &self.lanes.medium),
            ("queues.lanes.low", &self.lanes.low),
        ];
        for (field, value) in names {
            if value.trim().is_empty() {
                return Err(ConfigurationError::invalid_value(field, value.as_str(), "name must not be empty"));
            }
        }
        for (field, lane) in [
            ("queues.wait_lanes.short", &self.wait_lanes.short),
            ("queues.wait_lanes.medium", &self.wait_lanes.medium),
            ("queues.wait_lanes.long", &self.wait_lanes.long),
        ] {
            if lane.ttl_seconds == 0 {
                return Err(ConfigurationError::invalid_value(field, "0", "wait lane TTL must be positive"));
            }
        }
        Ok(())
    }
}

/// Duration range, failure probability and lane binding of one task type
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ExecutorProfile {
    pub min_duration_ms: u64,
    pub max_duration_ms: u64,
    pub failure_rate: f64,
    #[serde(with = "lane_name")]
    pub lane: Priority,
    /// Consumer slots this type contributes to its lane
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_concurrency() -> usize {
    1
}

impl ExecutorProfile {
    pub fn default_for(task_type: TaskType) -> Self {
        match task_type {
            TaskType::Text => Self {
                min_duration_ms: 1_000,
                max_duration_ms: 3_000,
                failure_rate: 0.05,
                lane: Priority::High,
                concurrency: 4,
            },
            TaskType::Image => Self {
                min_duration_ms: 5_000,
                max_duration_ms: 12_000,
                failure_rate: 0.10,
                lane: Priority::Medium,
                concurrency: 2,
            },
            TaskType::Video => Self {
                min_duration_ms: 30_000,
                max_duration_ms: 90_000,
                failure_rate: 0.15,
                lane: Priority::Low,
                concurrency: 1,
            },
        }
    }

    pub fn min_duration(&self) -> Duration {
        Duration::from_millis(self.min_duration_ms)
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_millis(self.max_duration_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub version: String,
    pub executors: HashMap<TaskType, ExecutorProfile>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            version: constants::DEFAULT_WORKER_VERSION.to_string(),
            executors: TaskType::ALL
                .iter()
                .map(|task_type| (*task_type, ExecutorProfile::default_for(*task_type)))
                .collect(),
        }
    }
}

impl WorkerConfig {
    pub fn profile(&self, task_type: TaskType) -> ExecutorProfile {
        self.executors
            .get(&task_type)
            .cloned()
            .unwrap_or_else(|| ExecutorProfile::default_for(task_type))
    }

    /// Consumer slots per lane: the summed concurrency of the types bound to it
    pub fn consumers_per_lane(&self) -> Vec<(Priority, usize)> {
        [Priority::High, Priority::Medium, Priority::Low]
            .into_iter()
            .map(|lane| {
                let slots = TaskType::ALL
                    .iter()
                    .map(|task_type| self.profile(*task_type))
                    .filter(|profile| profile.lane == lane)
                    .map(|profile| profile.concurrency)
                    .sum();
                (lane, slots)
            })
            .collect()
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.version.trim().is_empty() {
            return Err(ConfigurationError::invalid_value("worker.version", "", "must not be empty"));
        }
        for (task_type, profile) in &self.executors {
            if profile.min_duration_ms > profile.max_duration_ms {
                return Err(ConfigurationError::invalid_value(
                    format!("worker.executors.{task_type}"),
                    format!("{}..{}", profile.min_duration_ms, profile.max_duration_ms),
                    "min_duration_ms must not exceed max_duration_ms",
                ));
            }
            if !(0.0..=1.0).contains(&profile.failure_rate) {
                return Err(ConfigurationError::invalid_value(
                    format!("worker.executors.{task_type}.failure_rate"),
                    profile.failure_rate.to_string(),
                    "failure rate must be within [0, 1]",
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub hot_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            hot_ttl_seconds: storage::HOT_CACHE_TTL.as_secs(),
        }
    }
}

impl CacheConfig {
    pub fn hot_ttl(&self) -> Duration {
        Duration::from_secs(self.hot_ttl_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub sweep_interval_seconds: u64,
    pub warm_age_seconds: u64,
    pub cold_age_multiplier: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sweep_interval_seconds: storage::SWEEP_INTERVAL.as_secs(),
            warm_age_seconds: storage::WARM_AGE.as_secs(),
            cold_age_multiplier: storage::COLD_AGE_MULTIPLIER,
        }
    }
}

impl StorageConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    pub fn warm_age(&self) -> Duration {
        Duration::from_secs(self.warm_age_seconds)
    }

    pub fn cold_age(&self) -> Duration {
        self.warm_age() * self.cold_age_multiplier
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsConfig {
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct OutboxConfig {
    pub relay_interval_seconds: u64,
    /// Entries younger than this are left to the writer that created them
    pub grace_period_seconds: u64,
    pub batch_size: usize,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            relay_interval_seconds: 5,
            grace_period_seconds: 10,
            batch_size: 100,
        }
    }
}

impl OutboxConfig {
    pub fn relay_interval(&self) -> Duration {
        Duration::from_secs(self.relay_interval_seconds)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// A PROCESSING row untouched for this long is treated as abandoned.
    /// Must exceed the slowest executor's longest run.
    pub processing_lease_seconds: u64,
    pub lease_check_interval_seconds: u64,
    pub batch_size: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            processing_lease_seconds: 300,
            lease_check_interval_seconds: 30,
            batch_size: 500,
        }
    }
}

impl RecoveryConfig {
    pub fn processing_lease(&self) -> Duration {
        Duration::from_secs(self.processing_lease_seconds)
    }

    pub fn lease_check_interval(&self) -> Duration {
        Duration::from_secs(self.lease_check_interval_seconds)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    /// Also write JSON logs to a file in this directory
    pub directory: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            directory: None,
        }
    }
}

/// Lanes are written by name in YAML
mod lane_name {
    use crate::models::Priority;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(lane: &Priority, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&lane.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Priority, D::Error> {
        let name = String::deserialize(deserializer)?;
        match name.to_ascii_lowercase().as_str() {
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            other => Err(D::Error::custom(format!("unknown lane: {other}"))),
        }
    }
}
