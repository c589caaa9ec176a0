//! Startup selection of sensor and actuator implementations.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use crate::error::DeviceResult;
use crate::file::FileController;
use crate::iio::IioSensor;
use crate::interface::{Actuator, Sensor};
use crate::mock::{MockController, MockSensor};
use crate::simulated::SimulatedSensor;

/// Which `Sensor` implementation to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    /// Fixed reading of 30.1 % / 27.2 °C.
    #[default]
    Mock,
    Simulated,
    Iio,
}

/// Which `Actuator` implementation to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActuatorKind {
    #[default]
    Mock,
    File,
}

/// `[device]` section of the agent configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeviceConfig {
    #[serde(default)]
    pub sensor: SensorKind,
    /// IIO device directory, used when `sensor = "iio"`.
    #[serde(default = "default_iio_path")]
    pub iio_path: PathBuf,
    #[serde(default)]
    pub actuator: ActuatorKind,
    /// Controller state file, used when `actuator = "file"`.
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
}

fn default_iio_path() -> PathBuf {
    PathBuf::from("/sys/bus/iio/devices/iio:device0")
}

fn default_state_path() -> PathBuf {
    PathBuf::from("controller_state.json")
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            sensor: SensorKind::default(),
            iio_path: default_iio_path(),
            actuator: ActuatorKind::default(),
            state_path: default_state_path(),
        }
    }
}

impl DeviceConfig {
    pub fn build_sensor(&self) -> Arc<dyn Sensor> {
        match self.sensor {
            SensorKind::Mock => Arc::new(MockSensor::new()),
            SensorKind::Simulated => Arc::new(SimulatedSensor::new()),
            SensorKind::Iio => Arc::new(IioSensor::new(&self.iio_path)),
        }
    }

    /// Build the actuator. A `file` actuator loads its state file, which
    /// fails on a corrupt or unreadable file.
    pub async fn build_actuator(&self) -> DeviceResult<Arc<dyn Actuator>> {
        Ok(match self.actuator {
            ActuatorKind::Mock => Arc::new(MockController::new()),
            ActuatorKind::File => Arc::new(FileController::open(&self.state_path).await?),
        })
    }
}
