//! # In-Memory Broker
//!
//! A process-local [`MessageBroker`] with the routing, priority, TTL and
//! dead-letter semantics the fabric needs. Time-to-live is driven by
//! `tokio::time`, so tests running with a paused clock see wait lanes expire
//! deterministically.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::broker::{topic_matches, Delivery, ExchangeKind, MessageBroker, QueueDeclaration};
use super::errors::{MessagingError, MessagingResult};
use super::message::BrokerMessage;

/// Routed messages kept for inspection before the oldest are dropped
pub const DEFAULT_ROUTING_LOG_CAPACITY: usize = 1024;

/// Ordering key: highest weight first, then publish order
type QueueKey = (Reverse<u8>, u64);

#[derive(Debug, Clone)]
struct QueuedMessage {
    exchange: String,
    routing_key: String,
    message: BrokerMessage,
    redelivered: bool,
}

struct QueueState {
    declaration: QueueDeclaration,
    ready: BTreeMap<QueueKey, QueuedMessage>,
    notify: Arc<Notify>,
}

impl QueueState {
    fn new(declaration: QueueDeclaration) -> Self {
        Self {
            declaration,
            ready: BTreeMap::new(),
            notify: Arc::new(Notify::new()),
        }
    }
}

#[derive(Debug, Clone)]
struct Binding {
    exchange: String,
    queue: String,
    pattern: String,
}

struct InFlight {
    queue: String,
    key: QueueKey,
    queued: QueuedMessage,
}

/// One message landing in one queue; kept for inspection
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub queue: String,
    pub retry_count: Option<u32>,
    pub at: Instant,
}

struct BrokerState {
    exchanges: HashMap<String, ExchangeKind>,
    bindings: Vec<Binding>,
    queues: HashMap<String, QueueState>,
    in_flight: HashMap<u64, InFlight>,
    /// Ring buffer of the most recent routings
    routing_log: VecDeque<RoutedMessage>,
    routing_log_capacity: usize,
    next_seq: u64,
    next_tag: u64,
}

impl BrokerState {
    fn new(routing_log_capacity: usize) -> Self {
        Self {
            exchanges: HashMap::new(),
            bindings: Vec::new(),
            queues: HashMap::new(),
            in_flight: HashMap::new(),
            routing_log: VecDeque::with_capacity(routing_log_capacity.min(DEFAULT_ROUTING_LOG_CAPACITY)),
            routing_log_capacity,
            next_seq: 0,
            next_tag: 0,
        }
    }

    fn log_routing(&mut self, routed: RoutedMessage) {
        if self.routing_log_capacity == 0 {
            return;
        }
        if self.routing_log.len() == self.routing_log_capacity {
            self.routing_log.pop_front();
        }
        self.routing_log.push_back(routed);
    }
}

#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::with_routing_log_capacity(DEFAULT_ROUTING_LOG_CAPACITY)
    }
}

impl std::fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("InMemoryBroker")
            .field("exchanges", &state.exchanges.len())
            .field("queues", &state.queues.len())
            .field("in_flight", &state.in_flight.len())
            .finish()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `capacity` routed messages for inspection; 0 disables the
    /// log
    pub fn with_routing_log_capacity(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::new(capacity))),
        }
    }

    /// The most recent routings, oldest first
    pub fn routing_log(&self) -> Vec<RoutedMessage> {
        self.state.lock().routing_log.iter().cloned().collect()
    }

    /// Retained messages routed into `queue`
    pub fn routed_to(&self, queue: &str) -> Vec<RoutedMessage> {
        self.state
            .lock()
            .routing_log
            .iter()
            .filter(|routed| routed.queue == queue)
            .cloned()
            .collect()
    }

    pub fn in_flight_count(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    /// Deliver to every queue bound to `exchange` that matches `routing_key`.
    fn route(
        &self,
        exchange: &str,
        routing_key: &str,
        message: BrokerMessage,
    ) -> MessagingResult<usize> {
        let mut expiring = Vec::new();
        let delivered = {
            let mut state = self.state.lock();
            let kind = *state
                .exchanges
                .get(exchange)
                .ok_or_else(|| MessagingError::exchange_not_found(exchange))?;

            let targets: Vec<String> = state
                .bindings
                .iter()
                .filter(|binding| binding.exchange == exchange)
                .filter(|binding| match kind {
                    ExchangeKind::Fanout => true,
                    ExchangeKind::Topic => topic_matches(&binding.pattern, routing_key),
                })
                .map(|binding| binding.queue.clone())
                .collect();

            for queue_name in &targets {
                state.next_seq += 1;
                let seq = state.next_seq;
                let Some(queue) = state.queues.get_mut(queue_name) else {
                    continue;
                };
                let key = (Reverse(message.priority), seq);
                queue.ready.insert(
                    key,
                    QueuedMessage {
                        exchange: exchange.to_string(),
                        routing_key: routing_key.to_string(),
                        message: message.clone(),
                        redelivered: false,
                    },
                );
                queue.notify.notify_one();
                if let Some(ttl) = queue.declaration.message_ttl {
                    expiring.push((queue_name.clone(), key, ttl));
                }
                state.log_routing(RoutedMessage {
                    exchange: exchange.to_string(),
                    routing_key: routing_key.to_string(),
                    queue: queue_name.clone(),
                    retry_count: message.retry_count(),
                    at: Instant::now(),
                });
            }
            targets.len()
        };

        for (queue, key, ttl) in expiring {
            let broker = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(ttl).await;
                broker.expire(&queue, key);
            });
        }

        if delivered == 0 {
            warn!(exchange = %exchange, routing_key = %routing_key, "📭 Unroutable message dropped");
        }
        Ok(delivered)
    }

    /// TTL elapsed: dead-letter the message if nobody consumed it.
    fn expire(&self, queue_name: &str, key: QueueKey) {
        let expired = {
            let mut state = self.state.lock();
            let Some(queue) = state.queues.get_mut(queue_name) else {
                return;
            };
            let Some(queued) = queue.ready.remove(&key) else {
                return;
            };
            queue
                .declaration
                .dead_letter_exchange
                .clone()
                .map(|dlx| (dlx, queued))
        };

        if let Some((dlx, queued)) = expired {
            debug!(
                queue = %queue_name,
                dead_letter_exchange = %dlx,
                routing_key = %queued.routing_key,
                "⏰ Message TTL expired, dead-lettering"
            );
            if let Err(e) = self.route(&dlx, &queued.routing_key, queued.message) {
                warn!(queue = %queue_name, error = %e, "Failed to dead-letter expired message");
            }
        }
    }

    fn try_take(&self, queue_name: &str) -> MessagingResult<Result<Delivery, Arc<Notify>>> {
        let mut state = self.state.lock();
        let queue = state
            .queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let Some((key, queued)) = queue.ready.pop_first() else {
            return Ok(Err(queue.notify.clone()));
        };

        state.next_tag += 1;
        let delivery_tag = state.next_tag;
        let delivery = Delivery {
            delivery_tag,
            queue: queue_name.to_string(),
            exchange: queued.exchange.clone(),
            routing_key: queued.routing_key.clone(),
            redelivered: queued.redelivered,
            message: queued.message.clone(),
        };
        state.in_flight.insert(
            delivery_tag,
            InFlight {
                queue: queue_name.to_string(),
                key,
                queued,
            },
        );
        Ok(Ok(delivery))
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> MessagingResult<()> {
        let mut state = self.state.lock();
        match state.exchanges.get(name) {
            Some(existing) if *existing != kind => Err(MessagingError::topology_conflict(
                name,
                format!("already declared as {existing:?}"),
            )),
            Some(_) => Ok(()),
            None => {
                state.exchanges.insert(name.to_string(), kind);
                Ok(())
            }
        }
    }

    async fn declare_queue(&self, declaration: QueueDeclaration) -> MessagingResult<()> {
        let mut state = self.state.lock();
        match state.queues.get(&declaration.name) {
            Some(existing) if existing.declaration != declaration => Err(
                MessagingError::topology_conflict(&declaration.name, "declared with different arguments"),
            ),
            Some(_) => Ok(()),
            None => {
                state
                    .queues
                    .insert(declaration.name.clone(), QueueState::new(declaration));
                Ok(())
            }
        }
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        binding_key: &str,
    ) -> MessagingResult<()> {
        let mut state = self.state.lock();
        if !state.queues.contains_key(queue) {
            return Err(MessagingError::queue_not_found(queue));
        }
        if !state.exchanges.contains_key(exchange) {
            return Err(MessagingError::exchange_not_found(exchange));
        }
        let exists = state.bindings.iter().any(|binding| {
            binding.queue == queue && binding.exchange == exchange && binding.pattern == binding_key
        });
        if !exists {
            state.bindings.push(Binding {
                exchange: exchange.to_string(),
                queue: queue.to_string(),
                pattern: binding_key.to_string(),
            });
        }
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: BrokerMessage,
    ) -> MessagingResult<()> {
        self.route(exchange, routing_key, message).map(|_| ())
    }

    async fn consume(&self, queue: &str) -> MessagingResult<Delivery> {
        loop {
            match self.try_take(queue)? {
                Ok(delivery) => return Ok(delivery),
                Err(notify) => notify.notified().await,
            }
        }
    }

    async fn ack(&self, delivery_tag: u64) -> MessagingResult<()> {
        self.state
            .lock()
            .in_flight
            .remove(&delivery_tag)
            .map(|_| ())
            .ok_or(MessagingError::UnknownDelivery { delivery_tag })
    }

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> MessagingResult<()> {
        let dead_letter = {
            let mut state = self.state.lock();
            let in_flight = state
                .in_flight
                .remove(&delivery_tag)
                .ok_or(MessagingError::UnknownDelivery { delivery_tag })?;
            let Some(queue) = state.queues.get_mut(&in_flight.queue) else {
                return Ok(());
            };

            if requeue {
                let mut queued = in_flight.queued;
                queued.redelivered = true;
                queue.ready.insert(in_flight.key, queued);
                queue.notify.notify_one();
                None
            } else {
                queue
                    .declaration
                    .dead_letter_exchange
                    .clone()
                    .map(|dlx| (dlx, in_flight.queued))
            }
        };

        if let Some((dlx, queued)) = dead_letter {
            self.route(&dlx, &queued.routing_key, queued.message)?;
        }
        Ok(())
    }

    async fn queue_depth(&self, queue: &str) -> MessagingResult<usize> {
        self.state
            .lock()
            .queues
            .get(queue)
            .map(|state| state.ready.len())
            .ok_or_else(|| MessagingError::queue_not_found(queue))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn broker_with_lane() -> InMemoryBroker {
        let broker = InMemoryBroker::new();
        broker.declare_exchange("tasks", ExchangeKind::Topic).await.unwrap();
        broker
            .declare_queue(QueueDeclaration::durable("lane").with_max_priority(10))
            .await
            .unwrap();
        broker.bind_queue("lane", "tasks", "task.high").await.unwrap();
        broker
    }

    #[tokio::test]
    async fn test_higher_weight_is_delivered_first() {
        let broker = broker_with_lane().await;
        broker
            .publish("tasks", "task.high", BrokerMessage::new(b"low".to_vec()).with_priority(1))
            .await
            .unwrap();
        broker
            .publish("tasks", "task.high", BrokerMessage::new(b"high".to_vec()).with_priority(10))
            .await
            .unwrap();

        let first = broker.consume("lane").await.unwrap();
        assert_eq!(first.message.body, b"high".to_vec());
        broker.ack(first.delivery_tag).await.unwrap();

        let second = broker.consume("lane").await.unwrap();
        assert_eq!(second.message.body, b"low".to_vec());
    }

    #[tokio::test]
    async fn test_reject_with_requeue_redelivers() {
        let broker = broker_with_lane().await;
        broker
            .publish("tasks", "task.high", BrokerMessage::new(b"m".to_vec()))
            .await
            .unwrap();

        let delivery = broker.consume("lane").await.unwrap();
        assert_eq!(broker.queue_depth("lane").await.unwrap(), 0);
        broker.reject(delivery.delivery_tag, true).await.unwrap();

        let again = broker.consume("lane").await.unwrap();
        assert!(again.redelivered);
        broker.reject(again.delivery_tag, false).await.unwrap();
        assert_eq!(broker.queue_depth("lane").await.unwrap(), 0);
        assert_eq!(broker.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_routing_log_keeps_only_the_most_recent_entries() {
        let broker = InMemoryBroker::with_routing_log_capacity(3);
        broker.declare_exchange("tasks", ExchangeKind::Topic).await.unwrap();
        broker.declare_queue(QueueDeclaration::durable("lane")).await.unwrap();
        broker.bind_queue("lane", "tasks", "task.*").await.unwrap();

        for key in ["task.a", "task.b", "task.c", "task.d", "task.e"] {
            broker
                .publish("tasks", key, BrokerMessage::new(key.as_bytes().to_vec()))
                .await
                .unwrap();
        }

        let keys: Vec<String> = broker
            .routing_log()
            .into_iter()
            .map(|routed| routed.routing_key)
            .collect();
        assert_eq!(keys, vec!["task.c", "task.d", "task.e"]);
        // Messages themselves are unaffected by the log bound
        assert_eq!(broker.queue_depth("lane").await.unwrap(), 5);

        let silent = InMemoryBroker::with_routing_log_capacity(0);
        silent.declare_exchange("tasks", ExchangeKind::Fanout).await.unwrap();
        silent.declare_queue(QueueDeclaration::durable("lane")).await.unwrap();
        silent.bind_queue("lane", "tasks", "").await.unwrap();
        silent.publish("tasks", "x", BrokerMessage::new(b"m".to_vec())).await.unwrap();
        assert!(silent.routing_log().is_empty());
    }

    #[tokio::test]
    async fn test_ack_unknown_tag_fails() {
        let broker = broker_with_lane().await;
        assert!(matches!(
            broker.ack(42).await,
            Err(MessagingError::UnknownDelivery { delivery_tag: 42 })
        ));
    }

    #[tokio::test]
    async fn test_redeclare_with_different_arguments_conflicts() {
        let broker = broker_with_lane().await;
        broker
            .declare_queue(QueueDeclaration::durable("lane").with_max_priority(10))
            .await
            .unwrap();
        assert!(broker
            .declare_queue(QueueDeclaration::durable("lane"))
            .await
            .is_err());
        assert!(broker
            .declare_exchange("tasks", ExchangeKind::Fanout)
            .await
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry_dead_letters_with_original_routing_key() {
        let broker = broker_with_lane().await;
        broker.declare_exchange("wait", ExchangeKind::Topic).await.unwrap();
        broker
            .declare_queue(QueueDeclaration::durable("wait.q").with_ttl(Duration::from_secs(5), "tasks"))
            .await
            .unwrap();
        broker.bind_queue("wait.q", "wait", "#").await.unwrap();

        broker
            .publish("wait", "task.high", BrokerMessage::new(b"retry".to_vec()))
            .await
            .unwrap();
        assert_eq!(broker.queue_depth("wait.q").await.unwrap(), 1);
        assert_eq!(broker.queue_depth("lane").await.unwrap(), 0);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(broker.queue_depth("lane").await.unwrap(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(broker.queue_depth("wait.q").await.unwrap(), 0);

        let delivery = broker.consume("lane").await.unwrap();
        assert_eq!(delivery.routing_key, "task.high");
        assert_eq!(delivery.exchange, "tasks");
        assert_eq!(delivery.message.body, b"retry".to_vec());
    }
}
