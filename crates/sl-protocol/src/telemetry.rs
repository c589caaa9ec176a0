use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::shadows::StateMap;

/// A single humidity/temperature sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// Relative humidity in percent.
    pub humidity: f64,
    /// Temperature in celsius.
    pub temperature: f64,
}

impl SensorReading {
    pub fn new(humidity: f64, temperature: f64) -> Self {
        Self {
            humidity,
            temperature,
        }
    }

    /// Reported state for the sensor shadow: `{"humidity": h, "temperature": t}`.
    pub fn to_state(&self) -> StateMap {
        let mut state = StateMap::new();
        state.insert("humidity".into(), json!(self.humidity));
        state.insert("temperature".into(), json!(self.temperature));
        state
    }

    /// Reported state for the classic shadow: `{"env_condition": {...}}`.
    pub fn to_env_condition(&self) -> StateMap {
        let mut state = StateMap::new();
        state.insert(
            "env_condition".into(),
            json!({"temperature": self.temperature, "humidity": self.humidity}),
        );
        state
    }
}

/// Alert payload published when a reading crosses the threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarningPayload {
    pub reported_temperature: f64,
    pub threshold_temperature: f64,
}
