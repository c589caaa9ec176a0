//! AWS IoT Device Shadow MQTT operations.
//!
//! Provides typed helpers for publishing shadow updates and subscribing
//! to update responses and delta notifications via the MQTT channel.

use std::sync::Arc;

use rumqttc::QoS;
use serde::Serialize;

use crate::channel::Channel;
use crate::error::{MqttError, MqttResult};
use sl_protocol::{WarningPayload, shadows::UpdateRequest, topics};

/// Shadow operations for one thing, backed by a `Channel` implementation.
///
/// `shadow = None` addresses the classic (unnamed) shadow.
pub struct ShadowClient<C: Channel> {
    channel: Arc<C>,
    thing_name: String,
}

impl<C: Channel> Clone for ShadowClient<C> {
    fn clone(&self) -> Self {
        Self {
            channel: Arc::clone(&self.channel),
            thing_name: self.thing_name.clone(),
        }
    }
}

impl<C: Channel> ShadowClient<C> {
    pub fn new(channel: Arc<C>, thing_name: impl Into<String>) -> Self {
        Self {
            channel,
            thing_name: thing_name.into(),
        }
    }

    pub fn thing_name(&self) -> &str {
        &self.thing_name
    }

    /// Subscribe to `update/accepted` and `update/rejected`, waiting for
    /// both SUBACKs.
    pub async fn subscribe_update_responses(&self, shadow: Option<&str>) -> MqttResult<()> {
        let accepted = topics::update_accepted(&self.thing_name, shadow);
        self.channel.subscribe(&accepted, QoS::AtLeastOnce).await?;

        let rejected = topics::update_rejected(&self.thing_name, shadow);
        self.channel.subscribe(&rejected, QoS::AtLeastOnce).await
    }

    /// Subscribe to delta notifications.
    pub async fn subscribe_delta(&self, shadow: Option<&str>) -> MqttResult<()> {
        let topic = topics::update_delta(&self.thing_name, shadow);
        self.channel.subscribe(&topic, QoS::AtLeastOnce).await
    }

    /// Publish an update request and wait for the PUBACK.
    pub async fn publish_update(
        &self,
        shadow: Option<&str>,
        request: &UpdateRequest,
    ) -> MqttResult<()> {
        let topic = topics::update(&self.thing_name, shadow);
        self.publish_json(&topic, request).await
    }

    /// Publish a threshold alert to an application-defined topic.
    pub async fn publish_alert(&self, topic: &str, alert: &WarningPayload) -> MqttResult<()> {
        self.publish_json(topic, alert).await
    }

    /// Publish any JSON payload at QoS 1.
    pub async fn publish_json<T: Serialize + Sync>(
        &self,
        topic: &str,
        payload: &T,
    ) -> MqttResult<()> {
        let bytes =
            serde_json::to_vec(payload).map_err(|e| MqttError::Serialization(e.to_string()))?;
        self.channel.publish(topic, &bytes, QoS::AtLeastOnce).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockChannel;
    use serde_json::json;
    use sl_protocol::shadows::ShadowState;

    fn client(mock: &Arc<MockChannel>) -> ShadowClient<MockChannel> {
        ShadowClient::new(Arc::clone(mock), "named_test")
    }

    #[tokio::test]
    async fn publish_named_shadow_update() {
        let mock = Arc::new(MockChannel::new());
        let client = client(&mock);

        let state = json!({"humidity": 30.1, "temperature": 27.2});
        let request = UpdateRequest::with_token(
            ShadowState::reported(state.as_object().cloned().unwrap()),
            "tok-1",
        );
        client
            .publish_update(Some("dht_sensor"), &request)
            .await
            .unwrap();

        let msgs = mock.published();
        assert_eq!(msgs.len(), 1);
        assert_eq!(
            msgs[0].topic,
            "$aws/things/named_test/shadow/name/dht_sensor/update"
        );
        assert_eq!(msgs[0].qos, QoS::AtLeastOnce);
        let payload: UpdateRequest = serde_json::from_slice(&msgs[0].payload).unwrap();
        assert_eq!(payload, request);
    }

    #[tokio::test]
    async fn publish_classic_shadow_update() {
        let mock = Arc::new(MockChannel::new());
        let client = client(&mock);

        let request = UpdateRequest::new(ShadowState::reported(Default::default()));
        client.publish_update(None, &request).await.unwrap();

        assert_eq!(
            mock.last_published().unwrap().topic,
            "$aws/things/named_test/shadow/update"
        );
    }

    #[tokio::test]
    async fn subscribe_responses_and_delta() {
        let mock = Arc::new(MockChannel::new());
        let client = client(&mock);

        client
            .subscribe_update_responses(Some("controller"))
            .await
            .unwrap();
        client.subscribe_delta(Some("controller")).await.unwrap();

        assert_eq!(
            mock.subscriptions()
                .into_iter()
                .map(|(f, _)| f)
                .collect::<Vec<_>>(),
            vec![
                "$aws/things/named_test/shadow/name/controller/update/accepted",
                "$aws/things/named_test/shadow/name/controller/update/rejected",
                "$aws/things/named_test/shadow/name/controller/update/delta",
            ]
        );
    }

    #[tokio::test]
    async fn publish_alert_json() {
        let mock = Arc::new(MockChannel::new());
        let client = client(&mock);

        let alert = WarningPayload {
            reported_temperature: 31.0,
            threshold_temperature: 30.0,
        };
        client
            .publish_alert(topics::DEFAULT_WARNING_TOPIC, &alert)
            .await
            .unwrap();

        let msg = mock.last_published().unwrap();
        assert_eq!(msg.topic, "dht_sensor/warning");
        assert_eq!(msg.json()["reported_temperature"], 31.0);
    }
}
