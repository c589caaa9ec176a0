//! Environment reporter: publishes sensor readings to a thing's classic
//! shadow as `{"env_condition": {...}}`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use sl_device::Sensor;
use sl_mqtt_channel::{Channel, MqttConfig, ShadowClient};
use sl_protocol::SensorReading;
use sl_protocol::shadows::{ShadowState, UpdateRequest};

#[derive(Debug, Parser)]
#[command(name = "sl-env-reporter")]
#[command(about = "Publish env_condition to an AWS IoT shadow repeatedly")]
#[command(version)]
pub struct ReporterArgs {
    /// Your AWS IoT endpoint
    #[arg(long, value_name = "HOST")]
    pub endpoint: String,

    /// Path to your certificate.pem
    #[arg(long, value_name = "PATH")]
    pub cert: PathBuf,

    /// Path to your private key
    #[arg(long, value_name = "PATH")]
    pub key: PathBuf,

    /// Thing name to update shadow
    #[arg(long = "thing_name")]
    pub thing_name: String,

    /// Root CA file path
    #[arg(long = "ca_file", value_name = "PATH", default_value = "./AmazonRootCA1.pem")]
    pub ca_file: PathBuf,

    /// Seconds between updates
    #[arg(long = "interval-secs", default_value = "1")]
    pub interval_secs: u64,

    #[arg(long, default_value = "8883")]
    pub port: u16,
}

impl ReporterArgs {
    /// The thing name doubles as client id, on a persistent session.
    pub fn mqtt_config(&self) -> MqttConfig {
        let mut config = MqttConfig::new(&self.endpoint, &self.thing_name);
        config.broker_port = self.port;
        config.ca_cert_path = self.ca_file.display().to_string();
        config.client_cert_path = self.cert.display().to_string();
        config.client_key_path = self.key.display().to_string();
        config.clean_session = false;
        config.keepalive_secs = 30;
        config
    }

    /// Reporting period, at least one second.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

/// Read the sensor once and publish the reading to the classic shadow,
/// returning after the broker acknowledged the publish.
pub async fn report_once<C: Channel>(
    shadows: &ShadowClient<C>,
    sensor: &dyn Sensor,
) -> anyhow::Result<SensorReading> {
    let reading = sensor.read().await.context("reading sensor")?;
    let request = UpdateRequest::new(ShadowState::reported(reading.to_env_condition()));
    tracing::info!(
        temperature = reading.temperature,
        humidity = reading.humidity,
        client_token = %request.client_token,
        "updating shadow"
    );
    shadows
        .publish_update(None, &request)
        .await
        .with_context(|| format!("publishing env_condition {}", request.client_token))?;
    Ok(reading)
}
