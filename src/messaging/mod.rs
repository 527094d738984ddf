//! # Messaging Module
//!
//! The priority queue fabric and the broker it is built on.
//!
//! - [`MessageBroker`] - AMQP-style broker seam (exchanges, TTL queues, manual ack)
//! - [`InMemoryBroker`] - process-local broker driven by `tokio::time`
//! - [`PriorityQueueFabric`] - lanes, wait lanes and the dead-letter lane
//! - [`TaskMessage`] - the wire format of a task

pub mod broker;
pub mod errors;
pub mod fabric;
pub mod in_memory_broker;
pub mod message;

pub use broker::{Delivery, ExchangeKind, MessageBroker, QueueDeclaration};
pub use errors::{MessagingError, MessagingResult};
pub use fabric::{LaneDepths, PriorityQueueFabric, WaitLane};
pub use in_memory_broker::{InMemoryBroker, RoutedMessage};
pub use message::{BrokerMessage, TaskMessage};
