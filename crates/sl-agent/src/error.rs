//! Error classification for shadow synchronization.

use thiserror::Error;

use sl_device::DeviceError;
use sl_mqtt_channel::MqttError;
use sl_protocol::shadows::is_retryable_code;

/// Errors surfaced by the synchronizer and the loops around it.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("subscription failed: {0}")]
    Subscription(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("update {token} rejected ({code}): {message}")]
    ShadowRejected {
        code: u16,
        message: String,
        token: String,
    },

    #[error("no response to update {token} within {timeout_ms}ms")]
    ResponseTimeout { token: String, timeout_ms: u64 },

    #[error(transparent)]
    Actuator(#[from] DeviceError),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl SyncError {
    /// Short machine-friendly label for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Subscription(_) => "subscription",
            Self::Publish(_) => "publish",
            Self::ShadowRejected { .. } => "shadow_rejected",
            Self::ResponseTimeout { .. } => "response_timeout",
            Self::Actuator(_) => "actuator",
            Self::Serialization(_) => "serialization",
        }
    }

    /// Whether sending the same update again can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Publish(_) | Self::ResponseTimeout { .. } => true,
            Self::ShadowRejected { code, .. } => is_retryable_code(*code),
            Self::Subscription(_) | Self::Actuator(_) | Self::Serialization(_) => false,
        }
    }

    /// Client token of the update this error belongs to, if known.
    pub fn client_token(&self) -> Option<&str> {
        match self {
            Self::ShadowRejected { token, .. } | Self::ResponseTimeout { token, .. } => {
                Some(token)
            }
            _ => None,
        }
    }
}

impl From<MqttError> for SyncError {
    fn from(err: MqttError) -> Self {
        match err {
            MqttError::Connection(msg) | MqttError::Tls(msg) => Self::Connection(msg),
            MqttError::Subscribe(msg) => Self::Subscription(msg),
            MqttError::Serialization(msg) => Self::Serialization(msg),
            other => Self::Publish(other.to_string()),
        }
    }
}

/// Convenience alias for synchronizer results.
pub type SyncResult<T> = Result<T, SyncError>;
