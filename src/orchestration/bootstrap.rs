//! # Pipeline Bootstrap
//!
//! Wires every component of the pipeline together and manages its lifecycle.
//!
//! ## Key Features
//!
//! - **Explicit Dependencies**: store, cache and broker are injected, never global
//! - **Configuration-Driven**: lane names, TTLs, consumer counts and intervals
//!   come from [`TaskRelayConfig`]
//! - **Graceful Shutdown**: one `watch` signal stops every background loop;
//!   consumers finish the delivery they hold before exiting
//! - **Restart Recovery**: unfinished rows in the store are put back into the
//!   lanes before the first consumer starts
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use taskrelay_core::cache::InMemoryResultCache;
//! use taskrelay_core::config::TaskRelayConfig;
//! use taskrelay_core::database::InMemoryTaskStore;
//! use taskrelay_core::messaging::InMemoryBroker;
//! use taskrelay_core::orchestration::PipelineSystem;
//!
//! # async fn example() -> taskrelay_core::Result<()> {
//! let mut handle = PipelineSystem::new(
//!     TaskRelayConfig::default(),
//!     Arc::new(InMemoryTaskStore::default()),
//!     Arc::new(InMemoryResultCache::new()),
//!     Arc::new(InMemoryBroker::new()),
//! )
//! .start()
//! .await?;
//!
//! // handle.submissions().submit(...).await?;
//! handle.shutdown().await?;
//! # Ok(())
//! # }
//! ```

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::chain_orchestrator::ChainOrchestrator;
use super::cost_ledger::CostLedger;
use super::outbox_relay::OutboxRelay;
use super::submission::SubmissionService;
use super::task_enqueuer::TaskEnqueuer;
use super::task_recovery::{RecoveryReport, TaskRecovery};
use crate::cache::{InMemoryResultCache, ResultCache};
use crate::config::{ConfigManager, StoreBackend, TaskRelayConfig};
use crate::database::{InMemoryTaskStore, PgTaskStore, TaskStore};
use crate::error::Result;
use crate::events::{EventPublisher, NotificationForwarder, StatusEvent};
use crate::messaging::{InMemoryBroker, LaneDepths, MessageBroker, PriorityQueueFabric};
use crate::state_machine::TaskStateMachine;
use crate::storage::{TierMigrationSweeper, TierStatsSnapshot, TieredStorage};
use crate::worker::{ExecutorRegistry, TaskProcessor, WorkerPool};

/// Unstarted pipeline: dependencies plus optional overrides
pub struct PipelineSystem {
    config: TaskRelayConfig,
    store: Arc<dyn TaskStore>,
    cache: Arc<dyn ResultCache>,
    broker: Arc<dyn MessageBroker>,
    executors: Option<ExecutorRegistry>,
    notification_sink: Option<mpsc::Sender<StatusEvent>>,
}

impl PipelineSystem {
    pub fn new(
        config: TaskRelayConfig,
        store: Arc<dyn TaskStore>,
        cache: Arc<dyn ResultCache>,
        broker: Arc<dyn MessageBroker>,
    ) -> Self {
        Self {
            config,
            store,
            cache,
            broker,
            executors: None,
            notification_sink: None,
        }
    }

    /// Build the configured store backend with the process-local cache and
    /// broker. The broker starts empty on every boot; [`PipelineSystem::start`]
    /// repopulates it from the store.
    pub async fn from_config_manager(manager: &ConfigManager) -> Result<Self> {
        let config = manager.config().clone();
        config.validate()?;

        let state_machine = TaskStateMachine::new(config.queues.max_retry_count);
        let store: Arc<dyn TaskStore> = match config.database.backend {
            StoreBackend::Memory => Arc::new(InMemoryTaskStore::new(state_machine)),
            StoreBackend::Postgres => {
                Arc::new(PgTaskStore::connect(&config.database, state_machine).await?)
            }
        };
        info!(
            environment = %manager.environment(),
            backend = ?config.database.backend,
            "🗄️ Task store ready"
        );

        Ok(Self::new(
            config,
            store,
            Arc::new(InMemoryResultCache::new()),
            Arc::new(InMemoryBroker::new()),
        ))
    }

    /// Replace the simulated executors
    pub fn with_executors(mut self, executors: ExecutorRegistry) -> Self {
        self.executors = Some(executors);
        self
    }

    /// Forward every status event to `sink`
    pub fn with_notification_sink(mut self, sink: mpsc::Sender<StatusEvent>) -> Self {
        self.notification_sink = Some(sink);
        self
    }

    /// Declare topology and spawn every background component
    pub async fn start(self) -> Result<PipelineHandle> {
        let config = self.config;
        let (shutdown_sender, shutdown) = watch::channel(false);

        let fabric = PriorityQueueFabric::new(self.broker.clone(), config.queues.clone());
        fabric.declare_topology().await?;

        let events = EventPublisher::new(config.events.channel_capacity);
        let enqueuer = TaskEnqueuer::new(self.store.clone(), fabric.clone(), events.clone());
        let storage = TieredStorage::new(self.store.clone(), self.cache.clone(), config.cache.hot_ttl());
        let ledger = Arc::new(CostLedger::new());

        let mut handles: Vec<JoinHandle<()>> = Vec::new();

        // Event consumers subscribe before any producer can publish
        let orchestrator = ChainOrchestrator::new(
            self.store.clone(),
            enqueuer.clone(),
            storage.clone(),
            ledger.clone(),
            events.clone(),
        );
        handles.push(orchestrator.spawn(shutdown.clone()));

        if let Some(sink) = self.notification_sink {
            handles.push(NotificationForwarder::new(events.clone(), sink).spawn(shutdown.clone()));
        }

        // Lanes start empty; rows published to a previous broker go back in
        let recovery = TaskRecovery::new(
            self.store.clone(),
            enqueuer.clone(),
            events.clone(),
            config.recovery.clone(),
        );
        let recovered = match recovery.recover_at(Utc::now()).await {
            Ok(report) => report,
            Err(e) => {
                shutdown_sender.send_replace(true);
                for handle in handles {
                    handle.abort();
                }
                return Err(e);
            }
        };
        handles.push(recovery.spawn(shutdown.clone()));

        let executors = self
            .executors
            .unwrap_or_else(|| ExecutorRegistry::simulated(&config.worker));
        let processor = TaskProcessor::new(
            self.store.clone(),
            enqueuer.clone(),
            storage.clone(),
            events.clone(),
            executors,
            config.worker.version.clone(),
        );
        let workers = WorkerPool::spawn(
            processor,
            self.broker.clone(),
            &config.queues,
            &config.worker,
            shutdown.clone(),
        );

        handles.push(TierMigrationSweeper::new(self.store.clone(), config.storage.clone()).spawn(shutdown.clone()));
        handles.push(OutboxRelay::new(self.store.clone(), enqueuer.clone(), config.outbox.clone()).spawn(shutdown.clone()));

        let submissions = SubmissionService::new(self.store.clone(), enqueuer, storage.clone(), events.clone());

        info!(
            consumers = workers.consumer_count(),
            worker_version = %config.worker.version,
            recovered = recovered.republished + recovered.redispatched + recovered.expired,
            "🚀 Task relay pipeline started"
        );

        Ok(PipelineHandle {
            submissions,
            events,
            fabric,
            storage,
            ledger,
            store: self.store,
            recovered,
            shutdown_sender: Some(shutdown_sender),
            handles,
            workers: Some(workers),
        })
    }
}

/// Running pipeline
pub struct PipelineHandle {
    submissions: SubmissionService,
    events: EventPublisher,
    fabric: PriorityQueueFabric,
    storage: TieredStorage,
    ledger: Arc<CostLedger>,
    store: Arc<dyn TaskStore>,
    recovered: RecoveryReport,
    shutdown_sender: Option<watch::Sender<bool>>,
    handles: Vec<JoinHandle<()>>,
    workers: Option<WorkerPool>,
}

/// Point-in-time view of a running pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct SystemStatus {
    pub running: bool,
    pub consumers: usize,
    pub lanes: LaneDepths,
    pub tiers: TierStatsSnapshot,
    pub total_cost: f64,
}

impl PipelineHandle {
    pub fn submissions(&self) -> &SubmissionService {
        &self.submissions
    }

    pub fn events(&self) -> &EventPublisher {
        &self.events
    }

    pub fn fabric(&self) -> &PriorityQueueFabric {
        &self.fabric
    }

    pub fn storage(&self) -> &TieredStorage {
        &self.storage
    }

    pub fn ledger(&self) -> &Arc<CostLedger> {
        &self.ledger
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// What the startup recovery pass put back into the lanes
    pub fn recovered(&self) -> RecoveryReport {
        self.recovered
    }

    pub fn is_running(&self) -> bool {
        self.shutdown_sender.is_some()
    }

    pub async fn status(&self) -> Result<SystemStatus> {
        Ok(SystemStatus {
            running: self.is_running(),
            consumers: self.workers.as_ref().map_or(0, WorkerPool::consumer_count),
            lanes: self.fabric.lane_depths().await?,
            tiers: self.storage.stats(),
            total_cost: self.ledger.total(),
        })
    }

    /// Signal every loop to stop and wait for them
    pub async fn shutdown(&mut self) -> Result<()> {
        let Some(sender) = self.shutdown_sender.take() else {
            warn!("Pipeline already stopped");
            return Ok(());
        };
        sender.send_replace(true);
        info!("🛑 Pipeline shutdown requested");

        if let Some(workers) = self.workers.take() {
            workers.join().await;
        }
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
        info!("🛑 Pipeline stopped");
        Ok(())
    }
}
