use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Latest known device telemetry keyed by dot-path field name (e.g. `bms.soc`).
pub type Snapshot = serde_json::Map<String, Value>;

pub const DOMAIN: &str = "ecoflow_api";

pub const API_BASE_URL_EU: &str = "https://api-e.ecoflow.com";
pub const API_BASE_URL_US: &str = "https://api.ecoflow.com";

/// Selects the EcoFlow API host
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Region {
    #[default]
    #[serde(rename = "eu")]
    Eu,
    #[serde(rename = "us")]
    Us,
}

impl Region {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "eu" => Some(Region::Eu),
            "us" => Some(Region::Us),
            _ => None,
        }
    }

    pub fn to_string(&self) -> String {
        match self {
            Region::Eu => "eu".to_string(),
            Region::Us => "us".to_string(),
        }
    }

    pub fn base_url(&self) -> &'static str {
        match self {
            Region::Eu => API_BASE_URL_EU,
            Region::Us => API_BASE_URL_US,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Region::Eu => "Europe (api-e.ecoflow.com)",
            Region::Us => "United States (api.ecoflow.com)",
        }
    }
}

/// API signing keys plus optional MQTT login, fixed for the lifetime of an integration instance
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CredentialSet {
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub region: Region,
}

fn non_empty(value: &Option<String>) -> bool {
    value.as_deref().map(|v| !v.is_empty()).unwrap_or(false)
}

impl CredentialSet {
    pub fn has_api_keys(&self) -> bool {
        non_empty(&self.access_key) && non_empty(&self.secret_key)
    }

    pub fn has_mqtt_credentials(&self) -> bool {
        non_empty(&self.mqtt_username) && non_empty(&self.mqtt_password)
    }
}

/// A physical unit: its serial number and the device type tag selecting its profile
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub sn: String,
    pub device_type: String,
}

impl DeviceIdentity {
    pub fn new(sn: impl Into<String>, device_type: impl Into<String>) -> Self {
        Self {
            sn: sn.into(),
            device_type: device_type.into(),
        }
    }

    /// Last four characters of the serial, used in log lines
    pub fn short_sn(&self) -> &str {
        short_sn(&self.sn)
    }
}

pub fn short_sn(sn: &str) -> &str {
    let start = sn.char_indices().rev().nth(3).map(|(i, _)| i).unwrap_or(0);
    &sn[start..]
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectionMode {
    RestOnly,
    MqttOnly,
    Hybrid,
}

impl ConnectionMode {
    pub fn to_string(&self) -> String {
        match self {
            ConnectionMode::RestOnly => "rest".to_string(),
            ConnectionMode::MqttOnly => "mqtt".to_string(),
            ConnectionMode::Hybrid => "hybrid".to_string(),
        }
    }

    pub fn uses_rest(&self) -> bool {
        matches!(self, ConnectionMode::RestOnly | ConnectionMode::Hybrid)
    }

    pub fn uses_mqtt(&self) -> bool {
        matches!(self, ConnectionMode::MqttOnly | ConnectionMode::Hybrid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Uninitialized,
    Running(ConnectionMode),
    Shutdown,
}

/// Device registry entry as exposed to the host
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceInfo {
    pub identifiers: Vec<(String, String)>,
    pub name: String,
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
}

/// One entry of `GET /iot-open/sign/device/list`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceRecord {
    pub sn: String,
    #[serde(rename = "deviceName", default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub online: Option<i64>,
    #[serde(rename = "productName", default)]
    pub product_name: Option<String>,
}

fn mqtt_url_default() -> String { return "mqtt.ecoflow.com".to_string() }
fn mqtt_port_default() -> u16 { return 8883 }
fn mqtt_protocol_default() -> String { return "mqtts".to_string() }

/// Broker login issued by `GET /iot-open/sign/certification`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttCertificate {
    #[serde(default = "mqtt_url_default")]
    pub url: String,
    #[serde(default = "mqtt_port_default", deserialize_with = "port_from_any")]
    pub port: u16,
    #[serde(rename = "certificateAccount", default)]
    pub certificate_account: Option<String>,
    #[serde(rename = "certificatePassword", default)]
    pub certificate_password: Option<String>,
    #[serde(default = "mqtt_protocol_default")]
    pub protocol: String,
}

impl Default for MqttCertificate {
    fn default() -> Self {
        MqttCertificate {
            url: mqtt_url_default(),
            port: mqtt_port_default(),
            certificate_account: None,
            certificate_password: None,
            protocol: mqtt_protocol_default(),
        }
    }
}

impl MqttCertificate {
    pub fn is_complete(&self) -> bool {
        non_empty(&self.certificate_account) && non_empty(&self.certificate_password)
    }

    pub fn masked_password(&self) -> String {
        let password = self.certificate_password.clone().unwrap_or_default();
        if password.chars().count() > 8 {
            let head: String = password.chars().take(4).collect();
            let tail: String = password.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
            format!("{head}...{tail}")
        } else {
            "***".to_string()
        }
    }
}

/* The certification endpoint answers the port as a string */
fn port_from_any<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Number(n) => n
            .as_u64()
            .and_then(|p| u16::try_from(p).ok())
            .ok_or_else(|| serde::de::Error::custom("port out of range")),
        Value::String(s) => s.trim().parse::<u16>().map_err(serde::de::Error::custom),
        _ => Err(serde::de::Error::custom("port must be a number or string")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_urls() {
        assert_eq!(Region::Eu.base_url(), "https://api-e.ecoflow.com");
        assert_eq!(Region::Us.base_url(), "https://api.ecoflow.com");
        assert_eq!(Region::default(), Region::Eu);
        assert_eq!(Region::from_str("us"), Some(Region::Us));
        assert_eq!(Region::from_str("asia"), None);
    }

    #[test]
    fn test_short_sn() {
        assert_eq!(short_sn("MR51ZAS2PG330026"), "0026");
        assert_eq!(short_sn("AB"), "AB");
    }

    #[test]
    fn test_empty_credentials_count_as_absent() {
        let creds = CredentialSet {
            access_key: Some("".to_string()),
            secret_key: Some("secret".to_string()),
            mqtt_username: Some("user".to_string()),
            mqtt_password: Some("pass".to_string()),
            region: Region::Eu,
        };
        assert!(!creds.has_api_keys());
        assert!(creds.has_mqtt_credentials());
    }

    #[test]
    fn test_certificate_from_api() {
        let cert: MqttCertificate = serde_json::from_value(serde_json::json!({
            "url": "mqtt-e.ecoflow.com",
            "port": "8883",
            "certificateAccount": "open-abc",
            "certificatePassword": "0123456789abcdef",
            "protocol": "mqtts"
        }))
        .unwrap();
        assert_eq!(cert.port, 8883);
        assert!(cert.is_complete());
        assert_eq!(cert.masked_password(), "0123...cdef");

        let partial: MqttCertificate = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(partial.url, "mqtt.ecoflow.com");
        assert!(!partial.is_complete());
        assert_eq!(partial.masked_password(), "***");
    }
}
