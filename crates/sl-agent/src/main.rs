//! ShadowLink agent: keeps a DHT sensor and a controller in sync with
//! AWS IoT named shadows.
//!
//! Wires the MQTT channel, the shadow synchronizer, the delta worker and
//! the sensor driver into a single binary.

use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use sl_agent::cli::Cli;
use sl_agent::driver::Driver;
use sl_agent::shadow_sync::{self, ShadowSynchronizer};
use sl_agent::threshold::ThresholdMonitor;
use sl_agent::{SyncError, mqtt_loop};
use sl_mqtt_channel::{Channel, MqttChannel, ShadowClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "sl-agent starting");

    // ── Load config ─────────────────────────────────────────────
    let config = cli.load_config()?;
    let mqtt = cli.mqtt_config(&config);
    tracing::info!(
        thing = %config.thing_name,
        client_id = %mqtt.client_id,
        endpoint = %mqtt.broker_host,
        "config loaded"
    );

    // ── Devices ─────────────────────────────────────────────────
    let sensor = config.device.build_sensor();
    let actuator = config.device.build_actuator().await?;
    tracing::info!(
        sensor = ?config.device.sensor,
        actuator = ?config.device.actuator,
        "devices ready"
    );

    // ── MQTT channel ────────────────────────────────────────────
    let (channel, eventloop) = if cli.plaintext {
        tracing::info!("MQTT plaintext mode (no TLS)");
        MqttChannel::new_plaintext(&mqtt)
    } else {
        MqttChannel::new(&mqtt)?
    };
    let channel = Arc::new(channel);

    let sync = Arc::new(ShadowSynchronizer::new(
        ShadowClient::new(Arc::clone(&channel), &config.thing_name),
        actuator,
        &config.sensor_shadow,
        &config.controller_shadow,
        &config.sync,
    ));

    let (delta_tx, delta_rx) = mpsc::channel(config.sync.delta_queue_capacity);
    let mut mqtt_task = tokio::spawn(mqtt_loop::run(
        eventloop,
        (*channel).clone(),
        Arc::clone(&sync),
        delta_tx,
    ));

    channel
        .session()
        .wait_connected(config.mqtt.connect_timeout())
        .await
        .map_err(SyncError::from)?;
    tracing::info!("connected");

    // Responses published before these SUBACKs would be lost.
    sync.subscribe_all().await?;

    if let Err(e) = sync.report_initial_state().await {
        tracing::warn!(
            kind = e.kind(),
            error = %e,
            client_token = ?e.client_token(),
            "initial controller state not reported"
        );
    }

    let driver = Driver::new(
        Arc::clone(&sync),
        sensor,
        ThresholdMonitor::new(&config.monitor),
        &config.monitor.warning_topic,
        config.poll_interval(),
    );

    tracing::info!("sl-agent ready");

    tokio::select! {
        result = &mut mqtt_task => {
            tracing::error!(result = ?result, "MQTT loop exited unexpectedly");
        }
        () = shadow_sync::run_delta_worker(Arc::clone(&sync), delta_rx) => {
            tracing::error!("delta worker exited unexpectedly");
        }
        () = driver.run() => {
            tracing::error!("driver loop exited unexpectedly");
        }
        // Graceful shutdown on SIGINT
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    match tokio::time::timeout(mqtt.ack_timeout(), channel.disconnect()).await {
        Ok(Ok(())) => tracing::info!("disconnected"),
        Ok(Err(e)) => tracing::warn!(error = %e, "disconnect failed"),
        Err(_) => tracing::warn!("disconnect timed out"),
    }
    mqtt_task.abort();

    tracing::info!("sl-agent stopped");
    Ok(())
}
