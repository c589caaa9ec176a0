//! MQTT transport client for AWS IoT Core.
//!
//! Provides the transport layer of the ShadowLink agent:
//! - `Channel` trait for acknowledged publish/subscribe (mockable in tests)
//! - `MqttChannel` with TLS (mTLS) for production
//! - `Session` correlating requests with PUBACK/SUBACK/CONNACK
//! - `MockChannel` for testing without a broker
//! - `ShadowClient` for device shadow operations
//! - `IncomingMessage` classification for dispatching events

pub mod channel;
pub mod config;
pub mod error;
pub mod handler;
pub mod mock;
pub mod session;
pub mod shadows;
pub mod tls;

// Re-exports for convenience.
pub use channel::{Channel, MqttChannel};
pub use config::MqttConfig;
pub use error::{MqttError, MqttResult};
pub use handler::{IncomingMessage, classify};
pub use mock::MockChannel;
pub use session::{ConnectionState, Session};
pub use shadows::ShadowClient;
