//! Sensor and actuator adapters for the ShadowLink agent.
//!
//! `Sensor` and `Actuator` traits with swappable implementations:
//! - `MockSensor` / `MockController`: fixed values, in-memory state
//! - `SimulatedSensor`: random readings in a plausible indoor range
//! - `IioSensor`: Linux IIO sysfs (`dht11` kernel driver)
//! - `FileController`: properties persisted to a JSON state file
//!
//! `DeviceConfig` picks the implementations at startup.

pub mod config;
pub mod error;
pub mod file;
pub mod iio;
pub mod interface;
pub mod mock;
pub mod simulated;

pub use config::{ActuatorKind, DeviceConfig, SensorKind};
pub use error::{DeviceError, DeviceResult};
pub use file::FileController;
pub use iio::IioSensor;
pub use interface::{Actuator, Sensor, default_controller_state};
pub use mock::{MockController, MockSensor};
pub use simulated::SimulatedSensor;
