use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_yml;
use std::fs::File;
use std::io::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::EcoFlowError;
use crate::host::{CredentialSource, EntryOptions};
use crate::models::{CredentialSet, DeviceIdentity, Region};

const CONFIG_PATHS: [&str; 2] = ["config/ecoflow.yaml", "ecoflow.yaml"];

fn region_default() -> Region { return Region::Eu }

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct AccountConfig {
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    #[serde(default="region_default")]
    pub region: Region,
    pub mqtt_enabled: Option<bool>,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
}

impl AccountConfig {
    pub fn credentials(&self) -> CredentialSet {
        CredentialSet {
            access_key: self.access_key.clone(),
            secret_key: self.secret_key.clone(),
            mqtt_username: self.mqtt_username.clone(),
            mqtt_password: self.mqtt_password.clone(),
            region: self.region,
        }
    }
}

fn device_type_default() -> String { return "unknown".to_string() }
fn update_interval_default() -> u64 { return 15 }
fn diagnostic_mode_default() -> bool { return false }

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct DeviceConfig {
    pub sn: String,
    #[serde(default="device_type_default")]
    pub device_type: String,
    #[serde(default="update_interval_default")]
    pub update_interval: u64,
    #[serde(default="diagnostic_mode_default")]
    pub diagnostic_mode: bool,
}

fn devices_default() -> Vec<DeviceConfig> { return Vec::new() }

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Config {
    pub account: AccountConfig,
    #[serde(default="devices_default")]
    pub devices: Vec<DeviceConfig>,
}

impl Config {
    fn validate(&self) -> Result<(), EcoFlowError> {
        for device in &self.devices {
            if device.sn.trim().is_empty() {
                return Err(EcoFlowError::Config("device serial number must not be empty".to_string()));
            }
            if device.update_interval == 0 {
                return Err(EcoFlowError::Config(format!(
                    "update_interval of device {} must be positive",
                    device.sn
                )));
            }
        }
        Ok(())
    }
}

/// One configured device together with the account it belongs to
#[derive(Serialize, Clone, Debug)]
pub struct DeviceEntry {
    pub account: AccountConfig,
    pub device: DeviceConfig,
}

impl CredentialSource for DeviceEntry {
    fn entry_id(&self) -> String {
        return format!("{}-{}", self.device.device_type, self.device.sn);
    }

    fn credentials(&self) -> CredentialSet {
        self.account.credentials()
    }

    fn device(&self) -> DeviceIdentity {
        DeviceIdentity::new(self.device.sn.clone(), self.device.device_type.clone())
    }

    fn options(&self) -> EntryOptions {
        EntryOptions {
            update_interval: Duration::from_secs(self.device.update_interval),
            diagnostic_mode: self.device.diagnostic_mode,
            mqtt_enabled: self.account.mqtt_enabled,
        }
    }
}

pub struct ConfigHolder {
    pub config: Config,
    pub path: PathBuf,
}

impl ConfigHolder {
    /// Load from the first existing of `config/ecoflow.yaml` and `ecoflow.yaml`.
    pub fn load() -> Result<Self, EcoFlowError> {
        /* Check for the two paths of the config file */
        for path in CONFIG_PATHS {
            if Path::new(path).exists() {
                return Self::load_from(path);
            }
        }
        Err(EcoFlowError::Config(format!(
            "Unable to read the config on {} or {}",
            CONFIG_PATHS[0], CONFIG_PATHS[1]
        )))
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, EcoFlowError> {
        let path = path.as_ref();
        let mut file = File::open(path)
            .map_err(|e| EcoFlowError::Config(format!("Unable to open {}: {e}", path.display())))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| EcoFlowError::Config(format!("Unable to read {}: {e}", path.display())))?;

        let config = Self::parse(&contents)?;
        info!("Loaded {} device(s) from {}", config.devices.len(), path.display());
        return Ok(ConfigHolder { config, path: path.to_path_buf() });
    }

    pub fn from_str(contents: &str) -> Result<Self, EcoFlowError> {
        return Ok(ConfigHolder { config: Self::parse(contents)?, path: PathBuf::new() });
    }

    fn parse(contents: &str) -> Result<Config, EcoFlowError> {
        let config: Config = serde_yml::from_str(contents)
            .map_err(|e| EcoFlowError::Config(format!("Unable to parse config file: {e}")))?;
        config.validate()?;

        let credentials = config.account.credentials();
        if !credentials.has_api_keys() && !credentials.has_mqtt_credentials() {
            warn!("Config has neither API keys nor MQTT credentials");
        }
        debug!("Config region: {}", config.account.region.description());
        Ok(config)
    }

    /// One entry per configured device
    pub fn entries(&self) -> Vec<DeviceEntry> {
        self.config
            .devices
            .iter()
            .map(|device| DeviceEntry {
                account: self.config.account.clone(),
                device: device.clone(),
            })
            .collect()
    }
}
