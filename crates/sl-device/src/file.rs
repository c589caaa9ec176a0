//! Controller whose properties live in a JSON state file.
//!
//! Another process (a relay daemon, a GPIO script) watches the file and
//! drives the physical machine. Writes go through a temporary file and a
//! rename so readers never observe a partial document.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use sl_protocol::shadows::StateMap;

use crate::error::{DeviceError, DeviceResult};
use crate::interface::{Actuator, default_controller_state};

/// File-backed actuator.
pub struct FileController {
    path: PathBuf,
    state: Mutex<StateMap>,
}

impl FileController {
    /// Open `path`, loading existing properties or starting from the
    /// controller defaults when the file does not exist yet.
    pub async fn open(path: impl Into<PathBuf>) -> DeviceResult<Self> {
        let path = path.into();
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| DeviceError::Parse(format!("{}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => default_controller_state(),
            Err(e) => {
                return Err(DeviceError::Io {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                });
            }
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, state: &StateMap) -> DeviceResult<()> {
        let io_err = |e: std::io::Error| DeviceError::Io {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        };
        let bytes = serde_json::to_vec_pretty(state)
            .map_err(|e| DeviceError::Parse(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(io_err)
    }
}

#[async_trait]
impl Actuator for FileController {
    async fn apply(&self, property: &str, value: &Value) -> DeviceResult<()> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        next.insert(property.to_string(), value.clone());
        self.persist(&next).await.map_err(|e| DeviceError::Actuator {
            property: property.to_string(),
            reason: e.to_string(),
        })?;
        *state = next;
        tracing::info!(
            property,
            value = %value,
            path = %self.path.display(),
            "controller state written"
        );
        Ok(())
    }

    async fn properties(&self) -> StateMap {
        self.state.lock().await.clone()
    }
}
