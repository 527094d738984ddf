//! Broker and fabric errors.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MessagingError {
    #[error("Queue not found: {queue_name}")]
    QueueNotFound { queue_name: String },

    #[error("Exchange not found: {exchange}")]
    ExchangeNotFound { exchange: String },

    /// Ack or reject for a tag that is not in flight (already settled, or
    /// never delivered)
    #[error("Unknown delivery tag: {delivery_tag}")]
    UnknownDelivery { delivery_tag: u64 },

    #[error("Cannot encode task message: {message}")]
    MessageSerialization { message: String },

    /// The body is not a task message; redelivery cannot fix it
    #[error("Malformed task message: {message}")]
    MessageDeserialization { message: String },

    #[error("Topology conflict on {name}: {reason}")]
    TopologyConflict { name: String, reason: String },
}

impl MessagingError {
    pub fn queue_not_found(queue_name: impl Into<String>) -> Self {
        Self::QueueNotFound {
            queue_name: queue_name.into(),
        }
    }

    pub fn exchange_not_found(exchange: impl Into<String>) -> Self {
        Self::ExchangeNotFound {
            exchange: exchange.into(),
        }
    }

    pub fn message_serialization(message: impl Into<String>) -> Self {
        Self::MessageSerialization {
            message: message.into(),
        }
    }

    pub fn message_deserialization(message: impl Into<String>) -> Self {
        Self::MessageDeserialization {
            message: message.into(),
        }
    }

    pub fn topology_conflict(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TopologyConflict {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

pub type MessagingResult<T> = Result<T, MessagingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_resource() {
        assert_eq!(
            MessagingError::queue_not_found("taskrelay.lane.high").to_string(),
            "Queue not found: taskrelay.lane.high"
        );
        assert_eq!(
            MessagingError::topology_conflict("taskrelay.tasks", "kind differs").to_string(),
            "Topology conflict on taskrelay.tasks: kind differs"
        );
    }
}
