//! Device adapter error types.

use thiserror::Error;

/// Errors that can occur while reading a sensor or driving an actuator.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("sensor read failed: {0}")]
    Sensor(String),

    #[error("actuator failed to set '{property}': {reason}")]
    Actuator { property: String, reason: String },

    #[error("I/O error on {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("parse error: {0}")]
    Parse(String),
}

/// Convenience alias for device results.
pub type DeviceResult<T> = Result<T, DeviceError>;
