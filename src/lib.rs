//! EcoFlow power station client library
//!
//! Signs and sends EcoFlow Developer API requests, builds the per-firmware command
//! payloads and keeps a merged REST/MQTT snapshot per device.

pub mod api;
pub mod commands;
pub mod config;
pub mod coordinator;
pub mod devices;
pub mod diagnostics;
pub mod error;
pub mod host;
pub mod models;
pub mod mqtt;

// Re-export common types for easier access
pub use api::{EcoFlowApiClient, QuotaApi};
pub use commands::{build_command, CommandArgs, CommandFormat};
pub use config::ConfigHolder;
pub use coordinator::{CoordinatorOptions, HybridCoordinator};
pub use error::EcoFlowError;
pub use models::{ConnectionMode, CredentialSet, DeviceIdentity, Region, Snapshot};
pub use mqtt::{EcoFlowMqttClient, PushChannel};

pub fn get_unix_ts_ms() -> u64 {
    return std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
}
