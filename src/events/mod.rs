//! # Status Event Bus
//!
//! Lightweight pub/sub over `tokio::sync::broadcast` carrying every task
//! status change. Delivery is at-least-once from the publisher's point of
//! view and unordered across tasks; consumers must be idempotent.

pub mod forwarder;
pub mod publisher;
pub mod status_event;

pub use forwarder::NotificationForwarder;
pub use publisher::{EventPublisher, PublishError, Received, StatusSubscription};
pub use status_event::{StatusEvent, TopicPattern};
