use std::time::Duration;

use serde::Deserialize;

/// MQTT connection configuration, loadable from TOML or built from CLI flags.
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    /// MQTT broker hostname (e.g., AWS IoT endpoint).
    pub broker_host: String,
    /// MQTT broker port (default 8883 for TLS).
    #[serde(default = "default_port")]
    pub broker_port: u16,
    /// MQTT client ID (should be unique per device).
    pub client_id: String,
    /// Enable TLS (mTLS). When false, connects plaintext (local dev).
    #[serde(default = "default_use_tls")]
    pub use_tls: bool,
    /// Path to device X.509 certificate (PEM).
    #[serde(default)]
    pub client_cert_path: String,
    /// Path to device private key (PEM).
    #[serde(default)]
    pub client_key_path: String,
    /// Path to CA certificate (e.g., AmazonRootCA1.pem).
    #[serde(default)]
    pub ca_cert_path: String,
    /// Keep-alive interval in seconds.
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u16,
    /// Start a fresh session on connect. `false` asks the broker to keep
    /// subscriptions and queued QoS 1 messages across reconnects.
    #[serde(default = "default_clean_session")]
    pub clean_session: bool,
    /// How long publish/subscribe/disconnect wait for their acknowledgment.
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout_secs: u64,
}

impl MqttConfig {
    /// Config for `host` with every optional field at its default.
    pub fn new(broker_host: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            broker_host: broker_host.into(),
            broker_port: default_port(),
            client_id: client_id.into(),
            use_tls: default_use_tls(),
            client_cert_path: String::new(),
            client_key_path: String::new(),
            ca_cert_path: String::new(),
            keepalive_secs: default_keepalive(),
            clean_session: default_clean_session(),
            ack_timeout_secs: default_ack_timeout(),
        }
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }
}

fn default_use_tls() -> bool {
    true
}

fn default_port() -> u16 {
    8883
}

fn default_keepalive() -> u16 {
    30
}

fn default_clean_session() -> bool {
    true
}

fn default_ack_timeout() -> u64 {
    10
}
