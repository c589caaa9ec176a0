//! Publish simulated environment readings to a thing's classic shadow.
//!
//! Every interval a random temperature/humidity pair is reported as
//! `{"env_condition": {...}}`, and each publish waits for its PUBACK.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use sl_agent::mqtt_loop;
use sl_agent::reporter::{self, ReporterArgs};
use sl_device::SimulatedSensor;
use sl_mqtt_channel::{Channel, MqttChannel, ShadowClient};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ReporterArgs::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = args.mqtt_config();
    let (channel, eventloop) = MqttChannel::new(&config)?;
    let channel = Arc::new(channel);

    let session = Arc::clone(channel.session());
    let mqtt_task = tokio::spawn(async move {
        mqtt_loop::drive(eventloop, &session, |_| {}).await;
    });

    tracing::info!(endpoint = %args.endpoint, client_id = %config.client_id, "connecting");
    channel.session().wait_connected(CONNECT_TIMEOUT).await?;
    tracing::info!("connected");

    let shadows = ShadowClient::new(Arc::clone(&channel), &args.thing_name);
    let sensor = SimulatedSensor::new();
    let mut ticker = tokio::time::interval(args.interval());

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = reporter::report_once(&shadows, &sensor).await {
                    tracing::warn!(error = %format!("{e:#}"), "shadow update not acknowledged");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("stopping");
                break;
            }
        }
    }

    match tokio::time::timeout(config.ack_timeout(), channel.disconnect()).await {
        Ok(Ok(())) => tracing::info!("disconnected"),
        Ok(Err(e)) => tracing::warn!(error = %e, "disconnect failed"),
        Err(_) => tracing::warn!("disconnect timed out"),
    }
    mqtt_task.abort();
    Ok(())
}
