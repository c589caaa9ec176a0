//! Capability interfaces for the hardware the agent drives.

use async_trait::async_trait;
use serde_json::{Value, json};

use sl_protocol::SensorReading;
use sl_protocol::shadows::StateMap;

use crate::error::DeviceResult;

/// A humidity/temperature sensor.
#[async_trait]
pub trait Sensor: Send + Sync {
    async fn read(&self) -> DeviceResult<SensorReading>;
}

/// A machine whose properties can be set remotely.
///
/// `apply` must be idempotent: setting a property to its current value
/// is harmless.
#[async_trait]
pub trait Actuator: Send + Sync {
    /// Set one property.
    async fn apply(&self, property: &str, value: &Value) -> DeviceResult<()>;

    /// Current value of every property.
    async fn properties(&self) -> StateMap;
}

/// Controller properties before any command was applied.
pub fn default_controller_state() -> StateMap {
    let mut state = StateMap::new();
    state.insert("humidity".into(), json!(30.0));
    state.insert("temperature".into(), json!(26.0));
    state.insert("dehumidifier_is_enable".into(), json!(false));
    state.insert("ac_is_enable".into(), json!(false));
    state
}
