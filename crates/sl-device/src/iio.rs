//! DHT11/DHT22 sensor through the Linux Industrial I/O subsystem.
//!
//! With the `dht11` device-tree overlay enabled the kernel exposes the
//! sensor under `/sys/bus/iio/devices/iio:deviceN/`:
//! - `in_temp_input`: temperature in milli-degrees celsius
//! - `in_humidityrelative_input`: relative humidity in milli-percent
//!
//! The driver returns `EIO` when a transfer fails its checksum; callers
//! should treat a failed read as transient.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use sl_protocol::SensorReading;

use crate::error::{DeviceError, DeviceResult};
use crate::interface::Sensor;

const TEMPERATURE_FILE: &str = "in_temp_input";
const HUMIDITY_FILE: &str = "in_humidityrelative_input";

/// Sensor backed by an IIO device directory.
#[derive(Debug, Clone)]
pub struct IioSensor {
    device_dir: PathBuf,
}

impl IioSensor {
    pub fn new(device_dir: impl Into<PathBuf>) -> Self {
        Self {
            device_dir: device_dir.into(),
        }
    }

    pub fn device_dir(&self) -> &Path {
        &self.device_dir
    }

    async fn read_milli(&self, file: &str) -> DeviceResult<f64> {
        let path = self.device_dir.join(file);
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| DeviceError::Sensor(format!("{}: {e}", path.display())))?;
        let milli: i64 = raw.trim().parse().map_err(|e| {
            DeviceError::Parse(format!("{}: '{}': {e}", path.display(), raw.trim()))
        })?;
        Ok(milli as f64 / 1000.0)
    }
}

#[async_trait]
impl Sensor for IioSensor {
    async fn read(&self) -> DeviceResult<SensorReading> {
        let temperature = self.read_milli(TEMPERATURE_FILE).await?;
        let humidity = self.read_milli(HUMIDITY_FILE).await?;
        Ok(SensorReading::new(humidity, temperature))
    }
}
