//! Push-notification forwarder.
//!
//! The second wildcard consumer of the status bus. It hands every task event
//! to an outbound sink (a push gateway client in production, a channel in
//! tests) and never blocks the pipeline: a slow or closed sink only costs the
//! forwarder its own events.

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::publisher::{EventPublisher, Received};
use super::status_event::{StatusEvent, TopicPattern};
use crate::constants::topics::ALL_TASKS;

pub struct NotificationForwarder {
    publisher: EventPublisher,
    sink: mpsc::Sender<StatusEvent>,
}

impl NotificationForwarder {
    pub fn new(publisher: EventPublisher, sink: mpsc::Sender<StatusEvent>) -> Self {
        Self { publisher, sink }
    }

    /// Subscribe now and forward until shutdown or until the bus closes
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let mut subscription = self.publisher.subscribe(TopicPattern::parse(ALL_TASKS));
        let sink = self.sink;

        tokio::spawn(async move {
            info!("📨 Notification forwarder started");
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    received = subscription.recv() => match received {
                        Received::Event(event) => {
                            let task_id = event.task_id;
                            if let Err(e) = sink.try_send(event) {
                                warn!(task_id = %task_id, error = %e, "Dropping push notification");
                            } else {
                                debug!(task_id = %task_id, "Forwarded push notification");
                            }
                        }
                        Received::Lagged { .. } => continue,
                        Received::Closed => break,
                    },
                }
            }
            info!("📨 Notification forwarder stopped");
        })
    }
}
