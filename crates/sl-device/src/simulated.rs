//! Random readings for running the agent without hardware.

use async_trait::async_trait;
use rand::Rng;

use sl_protocol::SensorReading;

use crate::error::DeviceResult;
use crate::interface::Sensor;

/// Sensor drawing uniform readings from fixed ranges, rounded to one decimal.
#[derive(Debug, Clone)]
pub struct SimulatedSensor {
    temperature: (f64, f64),
    humidity: (f64, f64),
}

impl SimulatedSensor {
    /// 20–30 °C and 40–80 % relative humidity.
    pub fn new() -> Self {
        Self::with_ranges((20.0, 30.0), (40.0, 80.0))
    }

    pub fn with_ranges(temperature: (f64, f64), humidity: (f64, f64)) -> Self {
        Self {
            temperature,
            humidity,
        }
    }
}

impl Default for SimulatedSensor {
    fn default() -> Self {
        Self::new()
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[async_trait]
impl Sensor for SimulatedSensor {
    async fn read(&self) -> DeviceResult<SensorReading> {
        let mut rng = rand::thread_rng();
        let temperature = round1(rng.gen_range(self.temperature.0..=self.temperature.1));
        let humidity = round1(rng.gen_range(self.humidity.0..=self.humidity.1));
        Ok(SensorReading::new(humidity, temperature))
    }
}
