//! Command-line flags of the `sl-agent` binary.

use std::path::PathBuf;

use clap::Parser;

use sl_mqtt_channel::MqttConfig;

use crate::config::AgentConfig;

#[derive(Debug, Parser)]
#[command(name = "sl-agent")]
#[command(about = "Synchronize a DHT sensor and a controller with AWS IoT device shadows")]
#[command(version)]
pub struct Cli {
    /// Root CA file path
    #[arg(long = "ca_file", value_name = "PATH")]
    pub ca_file: PathBuf,

    /// Device certificate file path
    #[arg(long, value_name = "PATH")]
    pub cert: PathBuf,

    /// Device private key file path
    #[arg(long, value_name = "PATH")]
    pub key: PathBuf,

    /// AWS IoT custom endpoint
    #[arg(long, value_name = "HOST")]
    pub endpoint: String,

    /// Agent configuration file (TOML)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Broker port
    #[arg(long, default_value = "8883")]
    pub port: u16,

    /// Connect without TLS (local broker)
    #[arg(long)]
    pub plaintext: bool,
}

impl Cli {
    /// Load the config file, or defaults when none was given.
    pub fn load_config(&self) -> anyhow::Result<AgentConfig> {
        match &self.config {
            Some(path) => AgentConfig::from_file(path),
            None => Ok(AgentConfig::default()),
        }
    }

    /// Transport settings from flags plus the `[mqtt]` section.
    pub fn mqtt_config(&self, config: &AgentConfig) -> MqttConfig {
        let mut mqtt = MqttConfig::new(&self.endpoint, config.mqtt.client_id());
        mqtt.broker_port = self.port;
        mqtt.use_tls = !self.plaintext;
        mqtt.ca_cert_path = self.ca_file.display().to_string();
        mqtt.client_cert_path = self.cert.display().to_string();
        mqtt.client_key_path = self.key.display().to_string();
        mqtt.keepalive_secs = config.mqtt.keepalive_secs;
        mqtt.clean_session = config.mqtt.clean_session;
        mqtt.ack_timeout_secs = config.mqtt.ack_timeout_secs;
        mqtt
    }
}
