//! # Message Structures for Priority Lanes
//!
//! The wire format of a task on the fabric and the broker envelope that
//! carries it with headers and a broker-native priority weight.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use super::errors::{MessagingError, MessagingResult};
use crate::constants::RETRY_COUNT_HEADER;
use crate::models::{Priority, Task, TaskType};

/// Task payload published to a lane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMessage {
    pub task_id: Uuid,
    pub tenant_id: String,
    pub task_type: TaskType,
    pub priority: Priority,
    pub payload: Value,
    pub retry_count: u32,
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dag_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl TaskMessage {
    pub fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.id,
            tenant_id: task.tenant_id.clone(),
            task_type: task.task_type,
            priority: task.priority,
            payload: task.payload.clone(),
            retry_count: task.retry_count,
            region: task.region.clone(),
            dag_id: task.dag_id,
            parent_task_id: task.parent_task_id,
            created_at: task.created_at,
        }
    }

    pub fn routing_key(&self) -> &'static str {
        self.priority.routing_key()
    }

    /// Wrap into a broker envelope carrying the retry header and lane weight
    pub fn to_broker_message(&self) -> MessagingResult<BrokerMessage> {
        let body = serde_json::to_vec(self)
            .map_err(|e| MessagingError::message_serialization(e.to_string()))?;

        let mut headers = HashMap::new();
        headers.insert(
            RETRY_COUNT_HEADER.to_string(),
            Value::from(self.retry_count),
        );

        Ok(BrokerMessage {
            body,
            headers,
            priority: self.priority.broker_weight(),
        })
    }

    /// Decode a delivery. The `x-retry-count` header wins over the body field.
    pub fn from_broker_message(message: &BrokerMessage) -> MessagingResult<Self> {
        let mut decoded: TaskMessage = serde_json::from_slice(&message.body)
            .map_err(|e| MessagingError::message_deserialization(e.to_string()))?;

        if let Some(retry_count) = message.retry_count() {
            decoded.retry_count = retry_count;
        }

        Ok(decoded)
    }
}

/// Broker-level envelope
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerMessage {
    pub body: Vec<u8>,
    pub headers: HashMap<String, Value>,
    /// Broker-native priority weight (higher is preferred)
    pub priority: u8,
}

impl BrokerMessage {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            headers: HashMap::new(),
            priority: 0,
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn retry_count(&self) -> Option<u32> {
        self.headers
            .get(RETRY_COUNT_HEADER)
            .and_then(Value::as_u64)
            .and_then(|count| u32::try_from(count).ok())
    }
}
