//! ShadowLink agent: library crate behind the `sl-agent` binary.
//!
//! Exposes the synchronizer, threshold monitor, driver and event loop so
//! `sl-e2e-tests` can wire them against mock channels and devices.

pub mod cli;
pub mod config;
pub mod driver;
pub mod error;
pub mod mqtt_loop;
pub mod reporter;
pub mod shadow_sync;
pub mod threshold;

pub use error::{SyncError, SyncResult};
