//! Agent configuration, loadable from TOML.
//!
//! Every field has a default, so the agent runs without a config file;
//! credentials and the endpoint always come from the command line.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use sl_device::DeviceConfig;

use crate::shadow_sync::SyncConfig;
use crate::threshold::ThresholdConfig;

/// Longest accepted alert cooldown: one week.
const MAX_COOLDOWN_SECS: u64 = 7 * 24 * 60 * 60;

/// Top-level configuration for the agent.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AgentConfig {
    /// IoT Core thing name.
    #[serde(default = "default_thing_name")]
    pub thing_name: String,
    /// Named shadow receiving sensor readings.
    #[serde(default = "default_sensor_shadow")]
    pub sensor_shadow: String,
    /// Named shadow holding controller properties and receiving deltas.
    #[serde(default = "default_controller_shadow")]
    pub controller_shadow: String,
    /// Seconds between two sensor reads. The DHT sensor needs at least 2.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default)]
    pub mqtt: MqttSettings,
    #[serde(default)]
    pub monitor: ThresholdConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub device: DeviceConfig,
}

/// `[mqtt]` section: session settings that are not credentials.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MqttSettings {
    /// Client id. Defaults to `test-<uuid>`, unique per run.
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u16,
    #[serde(default = "default_clean_session")]
    pub clean_session: bool,
    /// Timeout for PUBACK / SUBACK.
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout_secs: u64,
    /// Timeout for the first CONNACK.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_thing_name() -> String {
    "named_test".to_string()
}

fn default_sensor_shadow() -> String {
    "dht_sensor".to_string()
}

fn default_controller_shadow() -> String {
    "controller".to_string()
}

fn default_poll_interval() -> u64 {
    2
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

fn default_connect_timeout() -> u64 {
    30
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            client_id: None,
            keepalive_secs: default_keepalive(),
            clean_session: default_clean_session(),
            ack_timeout_secs: default_ack_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl MqttSettings {
    pub fn client_id(&self) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| format!("test-{}", uuid::Uuid::now_v7()))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            thing_name: default_thing_name(),
            sensor_shadow: default_sensor_shadow(),
            controller_shadow: default_controller_shadow(),
            poll_interval_secs: default_poll_interval(),
            mqtt: MqttSettings::default(),
            monitor: ThresholdConfig::default(),
            sync: SyncConfig::default(),
            device: DeviceConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Load config from a TOML file path.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the loops cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.poll_interval_secs > 0, "poll_interval_secs must be positive");
        anyhow::ensure!(self.sync.max_in_flight > 0, "sync.max_in_flight must be positive");
        anyhow::ensure!(self.sync.max_attempts > 0, "sync.max_attempts must be positive");
        anyhow::ensure!(
            self.sync.delta_queue_capacity > 0,
            "sync.delta_queue_capacity must be positive"
        );
        anyhow::ensure!(
            self.monitor.cooldown_secs <= MAX_COOLDOWN_SECS,
            "monitor.cooldown_secs must be at most {MAX_COOLDOWN_SECS}"
        );
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}
