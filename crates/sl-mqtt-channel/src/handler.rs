//! Incoming message classification for the MQTT event loop.
//!
//! Parses raw MQTT publishes into typed `IncomingMessage` variants
//! so the agent can dispatch them without topic string matching.

use rumqttc::Publish;

use sl_protocol::shadows::{DeltaEvent, ErrorResponse, UpdateAccepted};
use sl_protocol::topics::{self, ShadowOperation};

/// A classified incoming MQTT message.
#[derive(Debug)]
pub enum IncomingMessage {
    /// The service applied an update request.
    UpdateAccepted {
        shadow_name: Option<String>,
        response: UpdateAccepted,
    },
    /// The service refused an update request.
    UpdateRejected {
        shadow_name: Option<String>,
        error: ErrorResponse,
    },
    /// Desired state diverged from reported.
    Delta {
        shadow_name: Option<String>,
        event: DeltaEvent,
    },
    /// Unrecognized topic or payload.
    Unknown { topic: String, payload: Vec<u8> },
}

/// Classify a raw MQTT publish into a typed message.
///
/// Uses `sl_protocol::topics::parse_shadow_topic` to extract the shadow
/// and operation, then attempts JSON deserialization into the matching type.
pub fn classify(publish: &Publish) -> IncomingMessage {
    let topic = &publish.topic;
    let payload = &publish.payload;

    let unknown = || IncomingMessage::Unknown {
        topic: topic.clone(),
        payload: payload.to_vec(),
    };

    let Some(parsed) = topics::parse_shadow_topic(topic) else {
        return unknown();
    };
    let shadow_name = parsed.shadow_name;

    match parsed.operation {
        ShadowOperation::UpdateAccepted => match serde_json::from_slice(payload) {
            Ok(response) => IncomingMessage::UpdateAccepted {
                shadow_name,
                response,
            },
            Err(_) => unknown(),
        },
        ShadowOperation::UpdateRejected => match serde_json::from_slice(payload) {
            Ok(error) => IncomingMessage::UpdateRejected { shadow_name, error },
            Err(_) => unknown(),
        },
        ShadowOperation::UpdateDelta => match serde_json::from_slice(payload) {
            Ok(event) => IncomingMessage::Delta { shadow_name, event },
            Err(_) => unknown(),
        },
        ShadowOperation::Update => unknown(),
    }
}
