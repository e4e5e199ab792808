use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use crate::api::{EcoFlowApiClient, QuotaApi};
use crate::coordinator::{CoordinatorOptions, HybridCoordinator, DEFAULT_UPDATE_INTERVAL};
use crate::error::EcoFlowError;
use crate::models::{ConnectionMode, CredentialSet, DeviceIdentity, MqttCertificate};
use crate::mqtt::{EcoFlowMqttClient, MqttSettings, PushChannel};

/// Per entry options a host may change without re-entering credentials
#[derive(Debug, Clone, PartialEq)]
pub struct EntryOptions {
    pub update_interval: Duration,
    pub diagnostic_mode: bool,
    /// `None` means "enabled when MQTT credentials are present"
    pub mqtt_enabled: Option<bool>,
}

impl Default for EntryOptions {
    fn default() -> Self {
        EntryOptions {
            update_interval: DEFAULT_UPDATE_INTERVAL,
            diagnostic_mode: false,
            mqtt_enabled: None,
        }
    }
}

/// Supplies everything needed to set up one device entry.
pub trait CredentialSource: Send + Sync {
    fn entry_id(&self) -> String;
    fn credentials(&self) -> CredentialSet;
    fn device(&self) -> DeviceIdentity;
    fn options(&self) -> EntryOptions;

    /// REST endpoint override, the region decides when absent
    fn api_base_url(&self) -> Option<String> {
        None
    }
}

/// Host-side registry of devices and entities, only used for cleanup.
pub trait EntityRegistrySink {
    fn devices_for_entry(&self, entry_id: &str) -> Vec<String>;
    fn entities_for_entry(&self, entry_id: &str) -> Vec<String>;
    fn remove_device(&mut self, device_id: &str);
    fn remove_entity(&mut self, entity_id: &str);
}

fn mqtt_enabled(options: &EntryOptions, credentials: &CredentialSet) -> bool {
    match options.mqtt_enabled {
        Some(enabled) => enabled,
        None => credentials.has_mqtt_credentials(),
    }
}

async fn resolve_mqtt_settings(
    rest: Option<&EcoFlowApiClient>,
    credentials: &CredentialSet,
) -> Option<MqttSettings> {
    let mut certificate = MqttCertificate::default();
    if let Some(rest) = rest {
        match rest.get_mqtt_credentials().await {
            Ok(cert) => certificate = cert,
            Err(e) => warn!("Failed to get MQTT certificate from API, using configured credentials: {e}"),
        }
    }

    MqttSettings::from_certificate(
        &certificate,
        credentials.mqtt_username.as_deref(),
        credentials.mqtt_password.as_deref(),
    )
}

/// Build, set up and start the coordinator for one entry.
pub async fn setup_entry(source: &dyn CredentialSource) -> Result<Arc<HybridCoordinator>, EcoFlowError> {
    let credentials = source.credentials();
    let identity = source.device();
    let options = source.options();

    if !credentials.has_api_keys() && !credentials.has_mqtt_credentials() {
        return Err(EcoFlowError::NoDataSource);
    }

    let rest = if credentials.has_api_keys() {
        let mut client = EcoFlowApiClient::new(
            credentials.access_key.clone().unwrap_or_default(),
            credentials.secret_key.clone().unwrap_or_default(),
            credentials.region,
        );
        if let Some(base_url) = source.api_base_url() {
            client = client.with_base_url(base_url);
        }
        Some(Arc::new(client))
    } else {
        None
    };

    let mut push: Option<Arc<dyn PushChannel>> = None;
    if mqtt_enabled(&options, &credentials) {
        match resolve_mqtt_settings(rest.as_deref(), &credentials).await {
            Some(settings) => {
                debug!("MQTT broker {}:{} for ...{}", settings.host, settings.port, identity.short_sn());
                push = Some(Arc::new(EcoFlowMqttClient::new(settings, identity.sn.clone())));
            }
            None => warn!("MQTT enabled but no usable credentials for ...{}", identity.short_sn()),
        }
    }

    let coordinator = HybridCoordinator::new(
        identity,
        rest.map(|r| r as Arc<dyn QuotaApi>),
        push,
        CoordinatorOptions {
            update_interval: options.update_interval,
            diagnostic_mode: options.diagnostic_mode,
            ..Default::default()
        },
    );

    let mode = coordinator.setup().await?;
    if let Err(e) = coordinator.first_refresh().await {
        coordinator.shutdown().await;
        return Err(e);
    }
    if mode.uses_rest() {
        coordinator.start_polling().await;
    }

    info!(
        "EcoFlow {} ...{} set up: {}",
        coordinator.device_type(),
        coordinator.identity().short_sn(),
        mode_description(mode)
    );

    Ok(coordinator)
}

fn mode_description(mode: ConnectionMode) -> &'static str {
    match (mode.uses_rest(), mode.uses_mqtt()) {
        (true, true) => "Hybrid mode (REST + MQTT)",
        (true, false) => "REST API only",
        _ => "MQTT only",
    }
}

pub async fn unload_entry(coordinator: &HybridCoordinator) {
    coordinator.shutdown().await;
}

/// Remove every entity and device the host registered for `entry_id`.
/// Returns `(devices, entities)` removed.
pub fn remove_entry(sink: &mut dyn EntityRegistrySink, entry_id: &str) -> (usize, usize) {
    let entities = sink.entities_for_entry(entry_id);
    for entity in &entities {
        sink.remove_entity(entity);
    }

    let devices = sink.devices_for_entry(entry_id);
    for device in &devices {
        sink.remove_device(device);
    }

    info!(
        "Removed {} devices and {} entities for entry {}",
        devices.len(),
        entities.len(),
        entry_id
    );
    (devices.len(), entities.len())
}
