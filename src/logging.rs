//! # Structured Logging Module
//!
//! Environment-aware structured logging for the pipeline's async components.
//! Console output is human-readable or JSON; an optional JSON file sink is
//! added when `logging.directory` is configured.

use chrono::Utc;
use std::process;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use uuid::Uuid;

use crate::config::{LogFormat, LoggingConfig};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging from the logging configuration.
///
/// `RUST_LOG` takes precedence over `logging.level`. Safe to call more than
/// once; only the first call installs a subscriber.
pub fn init_structured_logging(config: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = || {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
        };

        let console = match config.format {
            LogFormat::Pretty => fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_filter(filter())
                .boxed(),
            LogFormat::Json => fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_filter(filter())
                .boxed(),
        };

        let mut log_file = None;
        let file_layer = config.directory.as_ref().map(|directory| {
            let file_name = format!(
                "taskrelay.{}.{}.log",
                process::id(),
                Utc::now().format("%Y%m%d_%H%M%S")
            );
            log_file = Some(format!("{directory}/{file_name}"));
            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            // Lives for the rest of the process
            std::mem::forget(guard);
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .json()
                .with_filter(filter())
        });

        // A global subscriber may already be installed by an embedding process
        if tracing_subscriber::registry()
            .with(console)
            .with(file_layer)
            .try_init()
            .is_err()
        {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = process::id(),
            format = ?config.format,
            log_file = log_file.as_deref(),
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Log structured data for task lifecycle operations
pub fn log_task_operation(
    operation: &str,
    task_id: Uuid,
    tenant_id: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        task_id = %task_id,
        tenant_id = tenant_id,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📋 TASK_OPERATION"
    );
}

/// Log structured data for queue fabric operations
pub fn log_queue_operation(
    operation: &str,
    queue: &str,
    task_id: Option<Uuid>,
    retry_count: Option<u32>,
    status: &str,
) {
    tracing::info!(
        operation = %operation,
        queue = %queue,
        task_id = task_id.map(|id| id.to_string()),
        retry_count = retry_count,
        status = %status,
        timestamp = %Utc::now().to_rfc3339(),
        "📬 QUEUE_OPERATION"
    );
}
