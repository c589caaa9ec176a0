//! Sensor polling loop.
//!
//! Reads the sensor every poll interval, reports the reading to the sensor
//! shadow and runs the threshold monitor. On an alert the warning is
//! published and the corrective state is applied to the controller.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use sl_device::Sensor;
use sl_mqtt_channel::Channel;
use sl_protocol::SensorReading;

use crate::shadow_sync::ShadowSynchronizer;
use crate::threshold::{Alert, ThresholdMonitor};

/// Result of one loop iteration.
#[derive(Debug, Clone, PartialEq)]
pub enum Tick {
    SensorFailed,
    Reported(SensorReading),
    Alerted(SensorReading),
}

pub struct Driver<C: Channel + 'static> {
    sync: Arc<ShadowSynchronizer<C>>,
    sensor: Arc<dyn Sensor>,
    monitor: ThresholdMonitor,
    warning_topic: String,
    poll_interval: Duration,
}

impl<C: Channel + 'static> Driver<C> {
    pub fn new(
        sync: Arc<ShadowSynchronizer<C>>,
        sensor: Arc<dyn Sensor>,
        monitor: ThresholdMonitor,
        warning_topic: impl Into<String>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            sync,
            sensor,
            monitor,
            warning_topic: warning_topic.into(),
            poll_interval,
        }
    }

    pub fn monitor(&self) -> &ThresholdMonitor {
        &self.monitor
    }

    /// Poll forever. Cancel by dropping the future.
    pub async fn run(mut self) {
        tracing::info!(
            interval_secs = self.poll_interval.as_secs(),
            threshold = self.monitor.threshold(),
            "driver loop started"
        );
        loop {
            self.run_iteration().await;
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    pub async fn run_iteration(&mut self) -> Tick {
        let reading = match self.sensor.read().await {
            Ok(reading) => reading,
            Err(e) => {
                tracing::warn!(error = %e, "sensor read failed, skipping iteration");
                return Tick::SensorFailed;
            }
        };
        tracing::info!(
            humidity = reading.humidity,
            temperature = reading.temperature,
            "sensor reading"
        );

        // The spawned update reports its own outcome.
        if let Err(e) = self.sync.submit_reading(&reading).await {
            tracing::warn!(
                kind = e.kind(),
                error = %e,
                client_token = ?e.client_token(),
                "sensor update not submitted"
            );
        }

        match self.monitor.evaluate(&reading, Instant::now()) {
            Some(alert) => {
                self.raise(alert).await;
                Tick::Alerted(reading)
            }
            None => Tick::Reported(reading),
        }
    }

    async fn raise(&self, alert: Alert) {
        tracing::warn!(
            temperature = alert.warning.reported_temperature,
            threshold = alert.warning.threshold_temperature,
            topic = %self.warning_topic,
            at = %chrono::Utc::now().to_rfc3339(),
            "temperature above threshold, publishing warning"
        );
        if let Err(e) = self.sync.publish_alert(&self.warning_topic, &alert.warning).await {
            tracing::error!(
                kind = e.kind(),
                error = %e,
                topic = %self.warning_topic,
                "failed to publish warning"
            );
        }

        let sync = Arc::clone(&self.sync);
        tokio::spawn(async move {
            if let Err(e) = sync.apply_and_report(alert.corrective).await {
                tracing::error!(
                    kind = e.kind(),
                    error = %e,
                    client_token = ?e.client_token(),
                    "corrective action failed"
                );
            }
        });
    }
}
