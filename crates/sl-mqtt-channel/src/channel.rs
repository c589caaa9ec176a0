//! MQTT channel: async client for AWS IoT Core communication.
//!
//! Wraps `rumqttc::AsyncClient` so that publish, subscribe and disconnect
//! resolve only once the broker acknowledged them (see [`Session`]).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS};

use crate::config::MqttConfig;
use crate::error::{MqttError, MqttResult};
use crate::session::Session;
use crate::tls;

/// Capacity of the request channel between `AsyncClient` and `EventLoop`.
const REQUEST_CAPACITY: usize = 64;

// ── Channel trait ─────────────────────────────────────────────

/// Abstraction for acknowledged MQTT publishing and subscribing.
///
/// Enables mocking in tests without a real MQTT broker.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Publish a raw payload to a topic. Resolves on PUBACK for QoS 1.
    async fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> MqttResult<()>;

    /// Subscribe to a topic filter. Resolves on SUBACK.
    async fn subscribe(&self, filter: &str, qos: QoS) -> MqttResult<()>;

    /// Close the session.
    async fn disconnect(&self) -> MqttResult<()>;
}

// ── MqttChannel ───────────────────────────────────────────────

/// MQTT channel connected to AWS IoT Core.
///
/// Owns the `AsyncClient` for publishing/subscribing. The `EventLoop`
/// is returned separately from `new()`: the caller must drive it in a
/// spawned task and feed every event to [`MqttChannel::session`].
#[derive(Clone)]
pub struct MqttChannel {
    client: AsyncClient,
    session: Arc<Session>,
    subscriptions: Arc<Mutex<Vec<(String, QoS)>>>,
    client_id: String,
}

impl MqttChannel {
    /// Create a new MQTT channel with TLS (production mode).
    ///
    /// Returns `(channel, event_loop)`. Nothing touches the network until
    /// the event loop is polled.
    pub fn new(config: &MqttConfig) -> MqttResult<(Self, EventLoop)> {
        let mut options =
            MqttOptions::new(&config.client_id, &config.broker_host, config.broker_port);
        options.set_keep_alive(Duration::from_secs(config.keepalive_secs.into()));
        options.set_clean_session(config.clean_session);
        options.set_transport(tls::transport(config)?);

        Ok(Self::from_options(
            options,
            &config.client_id,
            config.ack_timeout(),
        ))
    }

    /// Create a channel for local development (no TLS).
    pub fn new_plaintext(config: &MqttConfig) -> (Self, EventLoop) {
        let mut options =
            MqttOptions::new(&config.client_id, &config.broker_host, config.broker_port);
        options.set_keep_alive(Duration::from_secs(config.keepalive_secs.into()));
        options.set_clean_session(config.clean_session);

        Self::from_options(options, &config.client_id, config.ack_timeout())
    }

    fn from_options(
        options: MqttOptions,
        client_id: &str,
        ack_timeout: Duration,
    ) -> (Self, EventLoop) {
        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        (
            Self {
                client,
                session: Arc::new(Session::new(ack_timeout)),
                subscriptions: Arc::new(Mutex::new(Vec::new())),
                client_id: client_id.to_string(),
            },
            eventloop,
        )
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Acknowledgment tracker fed by the event loop.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Filters subscribed so far, in subscription order.
    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        self.subscriptions
            .lock()
            .map(|subs| subs.clone())
            .unwrap_or_default()
    }

    /// Re-subscribe every remembered filter. Needed after a reconnect
    /// whose CONNACK reports no session present.
    pub async fn resubscribe_all(&self) -> MqttResult<()> {
        for (filter, qos) in self.subscriptions() {
            self.subscribe_tracked(&filter, qos).await?;
            tracing::info!(filter = %filter, "re-subscribed after reconnect");
        }
        Ok(())
    }

    async fn subscribe_tracked(&self, filter: &str, qos: QoS) -> MqttResult<()> {
        self.session
            .track_subscribe(async {
                self.client
                    .subscribe(filter, qos)
                    .await
                    .map_err(|e| MqttError::Subscribe(e.to_string()))
            })
            .await
    }
}

#[async_trait]
impl Channel for MqttChannel {
    async fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> MqttResult<()> {
        self.session
            .track_publish(qos, async {
                self.client
                    .publish(topic, qos, false, payload.to_vec())
                    .await
                    .map_err(|e| MqttError::Publish(e.to_string()))
            })
            .await
    }

    async fn subscribe(&self, filter: &str, qos: QoS) -> MqttResult<()> {
        self.subscribe_tracked(filter, qos).await?;
        if let Ok(mut subs) = self.subscriptions.lock() {
            if !subs.iter().any(|(f, _)| f == filter) {
                subs.push((filter.to_string(), qos));
            }
        }
        Ok(())
    }

    async fn disconnect(&self) -> MqttResult<()> {
        self.session
            .track_disconnect(async {
                self.client
                    .disconnect()
                    .await
                    .map_err(|e| MqttError::Connection(e.to_string()))
            })
            .await
    }
}
