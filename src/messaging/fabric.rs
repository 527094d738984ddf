//! # Priority Queue Fabric
//!
//! Three priority lanes, three wait lanes and one dead-letter lane built from
//! broker primitives.
//!
//! ```text
//!                      task exchange (topic)
//!        task.high ──► lane.high     task.medium ──► lane.medium     task.low ──► lane.low
//!                          ▲
//!   wait exchange (topic, "#") ──► wait queue (TTL 5s/15s/60s, dead-letter ─► task exchange)
//!
//!   dead-letter exchange (fanout) ──► dead-letter queue
//! ```
//!
//! The broker has no "deliver after N seconds" primitive, so a retry is
//! published to a wait queue that nobody consumes. When the message's TTL
//! expires the broker dead-letters it to the task exchange under its
//! original routing key, which lands it back on its priority lane.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::broker::{ExchangeKind, MessageBroker, QueueDeclaration};
use super::errors::MessagingResult;
use super::message::TaskMessage;
use crate::config::QueueConfig;
use crate::constants::MAX_PRIORITY_WEIGHT;
use crate::models::Priority;

/// Where a retry was parked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitLane {
    pub queue: String,
    pub ttl: Duration,
}

/// Ready message counts per lane
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaneDepths {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub dead_letter: usize,
}

#[derive(Clone)]
pub struct PriorityQueueFabric {
    broker: Arc<dyn MessageBroker>,
    config: QueueConfig,
}

impl std::fmt::Debug for PriorityQueueFabric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityQueueFabric")
            .field("task_exchange", &self.config.task_exchange)
            .finish()
    }
}

impl PriorityQueueFabric {
    pub fn new(broker: Arc<dyn MessageBroker>, config: QueueConfig) -> Self {
        Self { broker, config }
    }

    pub fn broker(&self) -> &Arc<dyn MessageBroker> {
        &self.broker
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn lane_queue(&self, priority: Priority) -> &str {
        self.config.lane_queue(priority)
    }

    /// Declare every exchange, queue and binding. Idempotent.
    pub async fn declare_topology(&self) -> MessagingResult<()> {
        let config = &self.config;

        self.broker
            .declare_exchange(&config.task_exchange, ExchangeKind::Topic)
            .await?;
        for priority in [Priority::High, Priority::Medium, Priority::Low] {
            let queue = config.lane_queue(priority);
            self.broker
                .declare_queue(QueueDeclaration::durable(queue).with_max_priority(MAX_PRIORITY_WEIGHT))
                .await?;
            self.broker
                .bind_queue(queue, &config.task_exchange, priority.routing_key())
                .await?;
        }

        for wait_lane in [
            &config.wait_lanes.short,
            &config.wait_lanes.medium,
            &config.wait_lanes.long,
        ] {
            self.broker
                .declare_exchange(&wait_lane.exchange, ExchangeKind::Topic)
                .await?;
            self.broker
                .declare_queue(
                    QueueDeclaration::durable(&wait_lane.queue)
                        .with_ttl(wait_lane.ttl(), &config.task_exchange),
                )
                .await?;
            // Any routing key; it is preserved for the trip back
            self.broker
                .bind_queue(&wait_lane.queue, &wait_lane.exchange, "#")
                .await?;
        }

        self.broker
            .declare_exchange(&config.dead_letter_exchange, ExchangeKind::Fanout)
            .await?;
        self.broker
            .declare_queue(QueueDeclaration::durable(&config.dead_letter_queue))
            .await?;
        self.broker
            .bind_queue(&config.dead_letter_queue, &config.dead_letter_exchange, "")
            .await?;

        info!(
            task_exchange = %config.task_exchange,
            dead_letter_queue = %config.dead_letter_queue,
            "🧵 Queue fabric topology declared"
        );
        Ok(())
    }

    /// Publish to the lane matching the message's priority
    pub async fn publish_task(&self, message: &TaskMessage) -> MessagingResult<()> {
        let envelope = message.to_broker_message()?;
        self.broker
            .publish(&self.config.task_exchange, message.routing_key(), envelope)
            .await?;
        debug!(
            task_id = %message.task_id,
            lane = %self.lane_queue(message.priority),
            "📤 Published task to lane"
        );
        Ok(())
    }

    /// Park a retry in the wait lane selected by `message.retry_count`
    pub async fn publish_retry(&self, message: &TaskMessage) -> MessagingResult<WaitLane> {
        let wait_lane = self.config.wait_lane(message.retry_count);
        let envelope = message.to_broker_message()?;
        self.broker
            .publish(&wait_lane.exchange, message.routing_key(), envelope)
            .await?;
        debug!(
            task_id = %message.task_id,
            retry_count = message.retry_count,
            wait_queue = %wait_lane.queue,
            delay_seconds = wait_lane.ttl_seconds,
            "⏳ Parked retry in wait lane"
        );
        Ok(WaitLane {
            queue: wait_lane.queue.clone(),
            ttl: wait_lane.ttl(),
        })
    }

    pub async fn publish_dead_letter(&self, message: &TaskMessage) -> MessagingResult<()> {
        let envelope = message.to_broker_message()?;
        self.broker
            .publish(&self.config.dead_letter_exchange, message.routing_key(), envelope)
            .await?;
        debug!(task_id = %message.task_id, "💀 Published task to dead-letter lane");
        Ok(())
    }

    pub async fn lane_depths(&self) -> MessagingResult<LaneDepths> {
        Ok(LaneDepths {
            high: self.broker.queue_depth(&self.config.lanes.high).await?,
            medium: self.broker.queue_depth(&self.config.lanes.medium).await?,
            low: self.broker.queue_depth(&self.config.lanes.low).await?,
            dead_letter: self
                .broker
                .queue_depth(&self.config.dead_letter_queue)
                .await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::InMemoryBroker;
    use crate::models::{NewTask, TaskType};
    use chrono::Utc;
    use serde_json::json;

    async fn fabric() -> (InMemoryBroker, PriorityQueueFabric) {
        let broker = InMemoryBroker::new();
        let fabric = PriorityQueueFabric::new(Arc::new(broker.clone()), QueueConfig::default());
        fabric.declare_topology().await.unwrap();
        (broker, fabric)
    }

    fn message(priority: Priority) -> TaskMessage {
        let task = NewTask::new("tenant", TaskType::Text, priority, json!({})).into_task(Utc::now());
        TaskMessage::from_task(&task)
    }

    #[tokio::test]
    async fn test_topology_declaration_is_idempotent() {
        let (_, fabric) = fabric().await;
        fabric.declare_topology().await.unwrap();
    }

    #[tokio::test]
    async fn test_each_priority_lands_on_its_lane() {
        let (_, fabric) = fabric().await;
        fabric.publish_task(&message(Priority::High)).await.unwrap();
        fabric.publish_task(&message(Priority::Low)).await.unwrap();
        fabric.publish_task(&message(Priority::Low)).await.unwrap();

        let depths = fabric.lane_depths().await.unwrap();
        assert_eq!(
            depths,
            LaneDepths {
                high: 1,
                medium: 0,
                low: 2,
                dead_letter: 0
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_returns_to_original_lane_after_ttl() {
        let (broker, fabric) = fabric().await;
        let mut msg = message(Priority::Medium);
        msg.retry_count = 2;

        let wait_lane = fabric.publish_retry(&msg).await.unwrap();
        assert_eq!(wait_lane.ttl, Duration::from_secs(15));
        assert_eq!(fabric.lane_depths().await.unwrap().medium, 0);

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert_eq!(fabric.lane_depths().await.unwrap().medium, 1);

        let delivery = broker.consume(fabric.lane_queue(Priority::Medium)).await.unwrap();
        let decoded = TaskMessage::from_broker_message(&delivery.message).unwrap();
        assert_eq!(decoded.task_id, msg.task_id);
        assert_eq!(decoded.retry_count, 2);
    }

    #[tokio::test]
    async fn test_dead_letter_lane() {
        let (_, fabric) = fabric().await;
        fabric.publish_dead_letter(&message(Priority::High)).await.unwrap();
        let depths = fabric.lane_depths().await.unwrap();
        assert_eq!(depths.dead_letter, 1);
        assert_eq!(depths.high, 0);
    }
}
