//! # TaskRelay Service
//!
//! Runs the pipeline in-process, or validates configuration without starting it.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

use taskrelay_core::config::ConfigManager;
use taskrelay_core::logging::init_structured_logging;
use taskrelay_core::orchestration::{ChainRequest, ChainStepRequest, PipelineSystem, SubmitRequest};

#[derive(Parser)]
#[command(name = "taskrelay")]
#[command(about = "Task lifecycle and delivery pipeline for AI-generation work")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file (default: config/taskrelay.yaml or TASKRELAY_CONFIG_PATH)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Environment overlay to apply (default: TASKRELAY_ENV or development)
    #[arg(short, long)]
    environment: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the pipeline and run until Ctrl-C
    Run {
        /// Submit a sample task and a sample chain after startup
        #[arg(long)]
        demo: bool,
    },

    /// Load and validate configuration, then print it with secrets masked
    Validate,
}

fn load_config(cli: &Cli) -> Result<Arc<ConfigManager>> {
    let manager = match (&cli.config, &cli.environment) {
        (Some(path), environment) => {
            let environment = environment.clone().unwrap_or_else(|| "development".to_string());
            ConfigManager::load_from_file(path, &environment)
        }
        (None, Some(environment)) => {
            let path = PathBuf::from("config/taskrelay.yaml");
            ConfigManager::load_from_file(&path, environment)
        }
        (None, None) => ConfigManager::load(),
    };
    manager.context("failed to load configuration")
}

async fn submit_demo(handle: &taskrelay_core::PipelineHandle) -> Result<()> {
    let receipt = handle
        .submissions()
        .submit(SubmitRequest {
            tenant_id: "demo-tenant".to_string(),
            task_type: "TEXT".to_string(),
            priority: 0,
            payload: json!({"prompt": "a haiku about queues"}),
            region: None,
            ..Default::default()
        })
        .await?;
    info!(task_id = %receipt.task_id, status = %receipt.status, "Demo task submitted");

    let chain = handle
        .submissions()
        .submit_chain(ChainRequest {
            tenant_id: "demo-tenant".to_string(),
            priority: 1,
            region: Some("eu-west".to_string()),
            steps: ["TEXT", "IMAGE", "VIDEO"]
                .into_iter()
                .map(|task_type| ChainStepRequest {
                    task_type: task_type.to_string(),
                    payload: json!({"prompt": "storyboard"}),
                })
                .collect(),
        })
        .await?;
    info!(dag_id = %chain.dag_id, steps = chain.tasks.len(), "Demo chain submitted");
    Ok(())
}

async fn run(manager: Arc<ConfigManager>, demo: bool) -> Result<()> {
    let (sink, mut notifications) = mpsc::channel(256);
    let mut handle = PipelineSystem::from_config_manager(&manager)
        .await?
        .with_notification_sink(sink)
        .start()
        .await?;

    // Stand-in for a push gateway
    tokio::spawn(async move {
        while let Some(event) = notifications.recv().await {
            info!(task_id = %event.task_id, status = %event.status, "🔔 Push notification");
        }
    });

    if demo {
        submit_demo(&handle).await?;
    }

    let mut status_ticker = tokio::time::interval(Duration::from_secs(30));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = status_ticker.tick() => match handle.status().await {
                Ok(status) => info!(
                    high = status.lanes.high,
                    medium = status.lanes.medium,
                    low = status.lanes.low,
                    dead_letter = status.lanes.dead_letter,
                    hot_hit_rate = status.tiers.hot_hit_rate(),
                    total_cost = status.total_cost,
                    "📊 Pipeline status"
                ),
                Err(e) => warn!(error = %e, "Status check failed"),
            },
        }
    }

    handle.shutdown().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let manager = load_config(&cli)?;
    init_structured_logging(&manager.config().logging);

    match cli.command.unwrap_or(Commands::Run { demo: false }) {
        Commands::Run { demo } => run(manager, demo).await,
        Commands::Validate => {
            manager.config().validate()?;
            println!("✅ Configuration valid for environment '{}'", manager.environment());
            println!("{}", serde_json::to_string_pretty(&manager.debug_config())?);
            Ok(())
        }
    }
}
