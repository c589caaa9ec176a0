//! MQTT event loop driver and incoming message dispatcher.
//!
//! Polls the rumqttc event loop forever, feeds every event to the
//! acknowledgment [`Session`], completes shadow update responses inline
//! and forwards deltas to the delta worker.

use std::sync::Arc;
use std::time::Duration;

use rumqttc::{ConnAck, ConnectReturnCode, Event, EventLoop, Packet};
use tokio::sync::mpsc::{self, error::TrySendError};

use sl_mqtt_channel::{Channel, IncomingMessage, MqttChannel, Session, classify};
use sl_protocol::shadows::DeltaEvent;

use crate::shadow_sync::ShadowSynchronizer;

/// Delay between failed polls: doubles from `initial` up to `max` and
/// starts over once the broker accepts a connection.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl ReconnectBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}

/// Poll `eventloop` forever, keeping `session` informed and passing every
/// event to `on_event`. rumqttc reconnects on the poll after an error.
pub async fn drive<F>(mut eventloop: EventLoop, session: &Session, mut on_event: F)
where
    F: FnMut(&Event),
{
    let mut backoff = ReconnectBackoff::default();
    loop {
        match eventloop.poll().await {
            Ok(event) => {
                session.on_event(&event);
                if let Event::Incoming(Packet::ConnAck(ack)) = &event {
                    if ack.code == ConnectReturnCode::Success {
                        backoff.reset();
                    }
                }
                on_event(&event);
            }
            Err(e) => {
                session.on_connection_lost(&e.to_string());
                let delay = backoff.next_delay();
                tracing::error!(
                    error = %e,
                    retry_in_ms = delay.as_millis() as u64,
                    "MQTT event loop error, reconnecting"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Drive the agent's MQTT connection.
///
/// Runs until the task is cancelled. Intended to be spawned as a
/// background tokio task.
pub async fn run(
    eventloop: EventLoop,
    channel: MqttChannel,
    sync: Arc<ShadowSynchronizer<MqttChannel>>,
    deltas: mpsc::Sender<DeltaEvent>,
) {
    let session = Arc::clone(channel.session());
    drive(eventloop, &session, |event| {
        handle_event(event, &channel, &sync, &deltas)
    })
    .await
}

/// React to one event after the session has seen it.
pub fn handle_event<C: Channel + 'static>(
    event: &Event,
    channel: &MqttChannel,
    sync: &ShadowSynchronizer<C>,
    deltas: &mpsc::Sender<DeltaEvent>,
) {
    match event {
        Event::Incoming(Packet::ConnAck(ack)) => on_connack(ack, channel),
        Event::Incoming(Packet::Publish(publish)) => dispatch(classify(publish), sync, deltas),
        _ => {}
    }
}

fn on_connack(ack: &ConnAck, channel: &MqttChannel) {
    if ack.code != ConnectReturnCode::Success {
        tracing::error!(code = ?ack.code, "broker refused connection");
        return;
    }
    tracing::info!(session_present = ack.session_present, "connected to broker");

    // A fresh session has no subscriptions; the first connect has nothing to restore.
    if !ack.session_present && !channel.subscriptions().is_empty() {
        let channel = channel.clone();
        tokio::spawn(async move {
            if let Err(e) = channel.resubscribe_all().await {
                tracing::error!(error = %e, "failed to restore subscriptions");
            }
        });
    }
}

/// Route a classified message to the synchronizer.
pub fn dispatch<C: Channel + 'static>(
    msg: IncomingMessage,
    sync: &ShadowSynchronizer<C>,
    deltas: &mpsc::Sender<DeltaEvent>,
) {
    match msg {
        IncomingMessage::UpdateAccepted {
            shadow_name,
            response,
        } => {
            tracing::trace!(shadow = ?shadow_name, version = ?response.version, "update accepted");
            sync.on_update_accepted(&response);
        }
        IncomingMessage::UpdateRejected { shadow_name, error } => {
            tracing::debug!(shadow = ?shadow_name, code = error.code, "update rejected");
            sync.on_update_rejected(&error);
        }
        IncomingMessage::Delta { shadow_name, event } => {
            if shadow_name.as_deref() != Some(sync.controller_shadow()) {
                tracing::debug!(shadow = ?shadow_name, "ignoring delta for unknown shadow");
                return;
            }
            match deltas.try_send(event) {
                Ok(()) => {}
                // Each delta carries the whole outstanding difference, so a
                // later one supersedes the dropped event.
                Err(TrySendError::Full(event)) => {
                    tracing::warn!(version = ?event.version, "delta queue full, dropping delta");
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::error!("delta worker stopped, dropping delta");
                }
            }
        }
        IncomingMessage::Unknown { topic, .. } => {
            tracing::debug!(topic = %topic, "ignoring unrecognized message");
        }
    }
}
