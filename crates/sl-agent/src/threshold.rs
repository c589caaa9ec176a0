//! Rate-limited over-temperature alerts.
//!
//! The monitor has two states encoded in `last_alert`: never alerted /
//! cooled down, and alerted within the cooldown window. A reading above
//! the threshold fires an alert only in the first state.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tokio::time::Instant;

use sl_protocol::shadows::StateMap;
use sl_protocol::{SensorReading, WarningPayload, topics};

/// `[monitor]` section of the agent configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ThresholdConfig {
    /// Readings strictly above this temperature trigger an alert.
    #[serde(default = "default_threshold")]
    pub threshold_temperature: f64,
    /// Target temperature set on the controller when an alert fires.
    #[serde(default = "default_activated")]
    pub activated_temperature: f64,
    /// Minimum time between two alerts.
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
    #[serde(default = "default_warning_topic")]
    pub warning_topic: String,
}

fn default_threshold() -> f64 {
    30.0
}

fn default_activated() -> f64 {
    26.0
}

fn default_cooldown() -> u64 {
    5 * 60
}

fn default_warning_topic() -> String {
    topics::DEFAULT_WARNING_TOPIC.to_string()
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            threshold_temperature: default_threshold(),
            activated_temperature: default_activated(),
            cooldown_secs: default_cooldown(),
            warning_topic: default_warning_topic(),
        }
    }
}

/// What to do when the threshold is crossed.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    /// Published to the warning topic.
    pub warning: WarningPayload,
    /// Applied to the controller and echoed to its shadow.
    pub corrective: StateMap,
}

#[derive(Debug)]
pub struct ThresholdMonitor {
    threshold: f64,
    activated_temperature: f64,
    cooldown: Duration,
    last_alert: Option<Instant>,
}

impl ThresholdMonitor {
    pub fn new(config: &ThresholdConfig) -> Self {
        Self {
            threshold: config.threshold_temperature,
            activated_temperature: config.activated_temperature,
            cooldown: Duration::from_secs(config.cooldown_secs),
            last_alert: None,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn last_alert(&self) -> Option<Instant> {
        self.last_alert
    }

    /// Check one reading taken at `now`.
    pub fn evaluate(&mut self, reading: &SensorReading, now: Instant) -> Option<Alert> {
        if reading.temperature <= self.threshold {
            return None;
        }
        if let Some(last) = self.last_alert {
            // A cooldown past the end of representable time never expires.
            let cooling = last
                .checked_add(self.cooldown)
                .is_none_or(|until| now < until);
            if cooling {
                tracing::debug!(
                    temperature = reading.temperature,
                    since_last_alert_secs = now.duration_since(last).as_secs(),
                    "over threshold, alert suppressed by cooldown"
                );
                return None;
            }
        }

        self.last_alert = Some(now);

        let mut corrective = StateMap::new();
        corrective.insert("temperature".into(), json!(self.activated_temperature));
        corrective.insert("ac_is_enable".into(), json!(true));

        Some(Alert {
            warning: WarningPayload {
                reported_temperature: reading.temperature,
                threshold_temperature: self.threshold,
            },
            corrective,
        })
    }
}
