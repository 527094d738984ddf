//! Error types for the task relay pipeline.

use thiserror::Error;
use uuid::Uuid;

use crate::config::ConfigurationError;
use crate::messaging::MessagingError;
use crate::state_machine::StateMachineError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaskRelayError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("State transition error: {0}")]
    StateTransitionError(#[from] StateMachineError),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Messaging error: {0}")]
    MessagingError(String),
    #[error("Cache error: {0}")]
    CacheError(String),
    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),
    #[error("Chain not found: {0}")]
    ChainNotFound(Uuid),
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl TaskRelayError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::DatabaseError(message.into())
    }

    /// Whether retrying the same operation later could succeed.
    ///
    /// Store and broker failures are transient; rejected input and
    /// refused state transitions will fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DatabaseError(_)
                | Self::MessagingError(_)
                | Self::CacheError(_)
        )
    }
}

impl From<serde_json::Error> for TaskRelayError {
    fn from(error: serde_json::Error) -> Self {
        TaskRelayError::SerializationError(format!("JSON serialization error: {error}"))
    }
}

impl From<sqlx::Error> for TaskRelayError {
    fn from(err: sqlx::Error) -> Self {
        TaskRelayError::DatabaseError(err.to_string())
    }
}

impl From<MessagingError> for TaskRelayError {
    fn from(error: MessagingError) -> Self {
        TaskRelayError::MessagingError(error.to_string())
    }
}

impl From<ConfigurationError> for TaskRelayError {
    fn from(error: ConfigurationError) -> Self {
        TaskRelayError::ConfigurationError(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TaskRelayError>;
