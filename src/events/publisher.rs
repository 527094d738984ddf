use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::status_event::{StatusEvent, TopicPattern};

/// Status event bus: every subscriber sees every event its pattern matches
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<StatusEvent>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish a status event on its task topic.
    ///
    /// Having no subscribers is not an error.
    pub fn publish(&self, event: StatusEvent) -> Result<(), PublishError> {
        debug!(
            topic = %event.topic(),
            status = %event.status,
            subscribers = self.sender.receiver_count(),
            "📣 Publishing status event"
        );
        // send() only fails when nobody is subscribed
        let _ = self.sender.send(event);
        Ok(())
    }

    /// Subscribe to events whose topic matches `pattern`
    pub fn subscribe(&self, pattern: TopicPattern) -> StatusSubscription {
        StatusSubscription {
            receiver: self.sender.subscribe(),
            pattern,
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// What a subscriber gets from [`StatusSubscription::recv`]
#[derive(Debug, Clone, PartialEq)]
pub enum Received {
    Event(StatusEvent),
    /// The subscriber fell behind and `skipped` events were dropped
    Lagged { skipped: u64 },
    Closed,
}

pub struct StatusSubscription {
    receiver: broadcast::Receiver<StatusEvent>,
    pattern: TopicPattern,
}

impl StatusSubscription {
    /// Next matching event
    pub async fn recv(&mut self) -> Received {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.pattern.matches(&event.topic()) => return Received::Event(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped = skipped, "⚠️ Status subscriber lagged behind the event bus");
                    return Received::Lagged { skipped };
                }
                Err(broadcast::error::RecvError::Closed) => return Received::Closed,
            }
        }
    }

    pub fn pattern(&self) -> &TopicPattern {
        &self.pattern
    }
}

/// Error types for event publishing
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Event channel is closed")]
    ChannelClosed,
}
