//! Mock MQTT channel for testing without a real broker.
//!
//! Records subscriptions, publishes and disconnects in a single ordered
//! log so tests can assert on ordering, and supports failure injection.

use async_trait::async_trait;
use rumqttc::QoS;
use std::sync::Mutex;

use crate::channel::Channel;
use crate::error::{MqttError, MqttResult};

/// A recorded publish call.
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
}

impl PublishedMessage {
    /// Parse the payload as JSON.
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.payload).unwrap_or(serde_json::Value::Null)
    }
}

/// One call on the channel, in the order it happened.
#[derive(Debug, Clone)]
pub enum Operation {
    Subscribe { filter: String, qos: QoS },
    Publish(PublishedMessage),
    Disconnect,
}

/// Mock implementation of the `Channel` trait.
///
/// Thread-safe via `Mutex` (fine for test contexts).
#[derive(Default)]
pub struct MockChannel {
    operations: Mutex<Vec<Operation>>,
    publish_failures: Mutex<u32>,
    refused_filters: Mutex<Vec<String>>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recorded operation, oldest first.
    pub fn operations(&self) -> Vec<Operation> {
        self.operations.lock().unwrap().clone()
    }

    /// Get all published messages.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.operations
            .lock()
            .unwrap()
            .iter()
            .filter_map(|op| match op {
                Operation::Publish(msg) => Some(msg.clone()),
                _ => None,
            })
            .collect()
    }

    /// Get all subscription filters.
    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        self.operations
            .lock()
            .unwrap()
            .iter()
            .filter_map(|op| match op {
                Operation::Subscribe { filter, qos } => Some((filter.clone(), *qos)),
                _ => None,
            })
            .collect()
    }

    /// Get the last published message.
    pub fn last_published(&self) -> Option<PublishedMessage> {
        self.published().pop()
    }

    /// Get published messages for a specific topic.
    pub fn published_to(&self, topic: &str) -> Vec<PublishedMessage> {
        self.published()
            .into_iter()
            .filter(|m| m.topic == topic)
            .collect()
    }

    /// Check whether a subscription was made to the given filter.
    pub fn is_subscribed_to(&self, filter: &str) -> bool {
        self.subscriptions().iter().any(|(f, _)| f == filter)
    }

    /// Whether `disconnect` was called.
    pub fn is_disconnected(&self) -> bool {
        self.operations
            .lock()
            .unwrap()
            .iter()
            .any(|op| matches!(op, Operation::Disconnect))
    }

    /// Make the next `count` publishes fail with a transport error.
    pub fn fail_next_publishes(&self, count: u32) {
        *self.publish_failures.lock().unwrap() = count;
    }

    /// Make the broker refuse subscriptions to `filter`.
    pub fn refuse_subscription(&self, filter: impl Into<String>) {
        self.refused_filters.lock().unwrap().push(filter.into());
    }

    /// Clear all recorded state.
    pub fn reset(&self) {
        self.operations.lock().unwrap().clear();
        *self.publish_failures.lock().unwrap() = 0;
        self.refused_filters.lock().unwrap().clear();
    }
}

#[async_trait]
impl Channel for MockChannel {
    async fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> MqttResult<()> {
        {
            let mut failures = self.publish_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(MqttError::Publish("injected publish failure".into()));
            }
        }
        self.operations
            .lock()
            .unwrap()
            .push(Operation::Publish(PublishedMessage {
                topic: topic.to_string(),
                payload: payload.to_vec(),
                qos,
            }));
        Ok(())
    }

    async fn subscribe(&self, filter: &str, qos: QoS) -> MqttResult<()> {
        if self
            .refused_filters
            .lock()
            .unwrap()
            .iter()
            .any(|f| f == filter)
        {
            return Err(MqttError::Subscribe(format!(
                "broker refused subscription to {filter}"
            )));
        }
        self.operations.lock().unwrap().push(Operation::Subscribe {
            filter: filter.to_string(),
            qos,
        });
        Ok(())
    }

    async fn disconnect(&self) -> MqttResult<()> {
        self.operations.lock().unwrap().push(Operation::Disconnect);
        Ok(())
    }
}
