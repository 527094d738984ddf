//! # Message Broker Abstraction
//!
//! The small slice of an AMQP-style broker the pipeline relies on: topic and
//! fanout exchanges, durable queues with an optional per-message TTL and
//! dead-letter exchange, broker-native priority, and manually acknowledged
//! deliveries.
//!
//! Consumers get prefetch=1 semantics by awaiting [`MessageBroker::consume`]
//! only after the previous delivery was acked or rejected.

use async_trait::async_trait;
use std::time::Duration;

use super::errors::MessagingResult;
use super::message::BrokerMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeKind {
    /// Routes by binding pattern (`*` one word, `#` zero or more words)
    Topic,
    /// Routes to every bound queue regardless of routing key
    Fanout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDeclaration {
    pub name: String,
    /// Messages older than this are dead-lettered
    pub message_ttl: Option<Duration>,
    /// Exchange expired or rejected messages are republished to, under their
    /// original routing key
    pub dead_letter_exchange: Option<String>,
    pub max_priority: Option<u8>,
}

impl QueueDeclaration {
    pub fn durable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message_ttl: None,
            dead_letter_exchange: None,
            max_priority: None,
        }
    }

    pub fn with_max_priority(mut self, max_priority: u8) -> Self {
        self.max_priority = Some(max_priority);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration, dead_letter_exchange: impl Into<String>) -> Self {
        self.message_ttl = Some(ttl);
        self.dead_letter_exchange = Some(dead_letter_exchange.into());
        self
    }
}

/// A message handed to a consumer and awaiting ack or reject
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    pub message: BrokerMessage,
}

#[async_trait]
pub trait MessageBroker: Send + Sync + 'static {
    /// Idempotent; redeclaring with a different kind is a conflict
    async fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> MessagingResult<()>;

    /// Idempotent; redeclaring with different arguments is a conflict
    async fn declare_queue(&self, declaration: QueueDeclaration) -> MessagingResult<()>;

    async fn bind_queue(&self, queue: &str, exchange: &str, binding_key: &str)
        -> MessagingResult<()>;

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: BrokerMessage,
    ) -> MessagingResult<()>;

    /// Wait for the next message on `queue`. Each message is handed to
    /// exactly one consumer at a time.
    async fn consume(&self, queue: &str) -> MessagingResult<Delivery>;

    async fn ack(&self, delivery_tag: u64) -> MessagingResult<()>;

    /// `requeue = false` drops the message, or dead-letters it when the
    /// queue has a dead-letter exchange
    async fn reject(&self, delivery_tag: u64, requeue: bool) -> MessagingResult<()>;

    /// Ready (not in-flight) messages in `queue`
    async fn queue_depth(&self, queue: &str) -> MessagingResult<usize>;
}

/// Match a routing key against a topic binding pattern.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    fn matches(pattern: &[&str], key: &[&str]) -> bool {
        match (pattern.first(), key.first()) {
            (None, None) => true,
            (Some(&"#"), _) => {
                matches(&pattern[1..], key) || (!key.is_empty() && matches(pattern, &key[1..]))
            }
            (Some(&"*"), Some(_)) => matches(&pattern[1..], &key[1..]),
            (Some(p), Some(k)) if p == k => matches(&pattern[1..], &key[1..]),
            _ => false,
        }
    }

    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = if routing_key.is_empty() {
        Vec::new()
    } else {
        routing_key.split('.').collect()
    };
    matches(&pattern, &key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_matching() {
        assert!(topic_matches("task.high", "task.high"));
        assert!(!topic_matches("task.high", "task.low"));
        assert!(topic_matches("task.*", "task.low"));
        assert!(!topic_matches("task.*", "task.low.extra"));
        assert!(topic_matches("#", "task.medium"));
        assert!(topic_matches("#", ""));
        assert!(topic_matches("task.#", "task"));
        assert!(topic_matches("task.#", "task.a.b"));
        assert!(!topic_matches("*.high", "task.low"));
    }
}
