//! Mock sensor and controller for testing and bench runs.
//!
//! `MockSensor` returns a fixed reading (or a scripted sequence);
//! `MockController` keeps properties in memory and records every apply.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Mutex;

use sl_protocol::SensorReading;
use sl_protocol::shadows::StateMap;

use crate::error::{DeviceError, DeviceResult};
use crate::interface::{Actuator, Sensor, default_controller_state};

/// Humidity reported by the mock sensor.
pub const MOCK_HUMIDITY: f64 = 30.1;
/// Temperature reported by the mock sensor.
pub const MOCK_TEMPERATURE: f64 = 27.2;

/// Sensor returning scripted readings.
///
/// Readings are returned in order; the last one repeats forever.
pub struct MockSensor {
    readings: Mutex<Vec<SensorReading>>,
    failures: Mutex<u32>,
}

impl MockSensor {
    /// Always reads 30.1 % / 27.2 °C.
    pub fn new() -> Self {
        Self::with_readings(vec![SensorReading::new(MOCK_HUMIDITY, MOCK_TEMPERATURE)])
    }

    pub fn with_readings(readings: Vec<SensorReading>) -> Self {
        Self {
            readings: Mutex::new(readings),
            failures: Mutex::new(0),
        }
    }

    /// Make the next `count` reads fail.
    pub fn fail_next_reads(&self, count: u32) {
        *self.failures.lock().unwrap() = count;
    }
}

impl Default for MockSensor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sensor for MockSensor {
    async fn read(&self) -> DeviceResult<SensorReading> {
        {
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(DeviceError::Sensor("injected read failure".into()));
            }
        }
        let mut readings = self.readings.lock().unwrap();
        match readings.len() {
            0 => Err(DeviceError::Sensor("no readings scripted".into())),
            1 => Ok(readings[0]),
            _ => Ok(readings.remove(0)),
        }
    }
}

/// In-memory controller that logs and records every property change.
pub struct MockController {
    state: Mutex<StateMap>,
    applied: Mutex<Vec<(String, Value)>>,
    failing: Mutex<Vec<String>>,
}

impl MockController {
    pub fn new() -> Self {
        Self::with_state(default_controller_state())
    }

    pub fn with_state(state: StateMap) -> Self {
        Self {
            state: Mutex::new(state),
            applied: Mutex::new(Vec::new()),
            failing: Mutex::new(Vec::new()),
        }
    }

    /// Every `(property, value)` applied so far, in order.
    pub fn applied(&self) -> Vec<(String, Value)> {
        self.applied.lock().unwrap().clone()
    }

    /// Snapshot of the current properties.
    pub fn state(&self) -> StateMap {
        self.state.lock().unwrap().clone()
    }

    /// Make every apply of `property` fail.
    pub fn fail_on(&self, property: impl Into<String>) {
        self.failing.lock().unwrap().push(property.into());
    }
}

impl Default for MockController {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Actuator for MockController {
    async fn apply(&self, property: &str, value: &Value) -> DeviceResult<()> {
        if self.failing.lock().unwrap().iter().any(|p| p == property) {
            return Err(DeviceError::Actuator {
                property: property.to_string(),
                reason: "injected actuator failure".into(),
            });
        }
        tracing::info!(property, value = %value, "controller sets property");
        self.state
            .lock()
            .unwrap()
            .insert(property.to_string(), value.clone());
        self.applied
            .lock()
            .unwrap()
            .push((property.to_string(), value.clone()));
        Ok(())
    }

    async fn properties(&self) -> StateMap {
        self.state()
    }
}
