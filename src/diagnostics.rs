use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::coordinator::HybridCoordinator;

pub const REDACTED: &str = "**REDACTED**";
pub const DIAGNOSTIC_LOG_SIZE: usize = 20;

const TO_REDACT: [&str; 7] = [
    "access_key",
    "secret_key",
    "device_sn",
    "sn",
    "serial_number",
    "serialNumber",
    "mqtt_password",
];

/// FIFO that drops its oldest entry once `maxlen` is reached
#[derive(Debug, Clone)]
pub struct BoundFifoList<T> {
    maxlen: usize,
    items: VecDeque<(DateTime<Utc>, T)>,
}

impl<T> BoundFifoList<T> {
    pub fn new(maxlen: usize) -> Self {
        BoundFifoList {
            maxlen,
            items: VecDeque::with_capacity(maxlen),
        }
    }

    pub fn append(&mut self, item: T) {
        if self.maxlen == 0 {
            return;
        }
        while self.items.len() >= self.maxlen {
            self.items.pop_front();
        }
        self.items.push_back((Utc::now(), item));
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(DateTime<Utc>, T)> {
        self.items.iter()
    }
}

impl<T: Serialize> BoundFifoList<T> {
    /// Oldest first, each entry as `{timestamp, data}`
    pub fn to_json(&self) -> Value {
        Value::Array(
            self.items
                .iter()
                .map(|(ts, item)| {
                    json!({
                        "timestamp": ts.to_rfc3339(),
                        "data": item,
                    })
                })
                .collect(),
        )
    }
}

/// Replace sensitive values with [`REDACTED`], at any depth.
pub fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, v) in map {
                if TO_REDACT.contains(&key.as_str()) {
                    out.insert(key.clone(), Value::from(REDACTED));
                } else {
                    out.insert(key.clone(), redact(v));
                }
            }
            Value::Object(out)
        }
        Value::Array(list) => Value::Array(list.iter().map(redact).collect()),
        other => other.clone(),
    }
}

/// Support dump of one configured device, safe to share.
pub async fn config_entry_diagnostics<C: Serialize>(config: &C, coordinator: &HybridCoordinator) -> Value {
    let config = serde_json::to_value(config).unwrap_or(Value::Null);
    let data = Value::Object(coordinator.data().as_ref().clone());

    let mode = match coordinator.mode().await {
        Some(mode) => mode.to_string(),
        None => "none".to_string(),
    };

    let mut diagnostics = json!({
        "config_entry": redact(&config),
        "device_data": redact(&data),
        "coordinator": {
            "device_type": coordinator.identity().device_type,
            "last_update_success": coordinator.last_update_success(),
            "update_interval": coordinator.update_interval().as_secs(),
            "mqtt_connected": coordinator.mqtt_connected().await,
            "connection_mode": mode,
        },
    });

    if let Some(logs) = coordinator.diagnostic_logs().await {
        diagnostics["diagnostic_logs"] = redact(&logs);
    }

    diagnostics
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_drops_oldest() {
        let mut list = BoundFifoList::new(DIAGNOSTIC_LOG_SIZE);
        for i in 0..25 {
            list.append(i);
        }
        assert_eq!(list.len(), 20);
        let values: Vec<i32> = list.iter().map(|(_, v)| *v).collect();
        assert_eq!(values.first(), Some(&5));
        assert_eq!(values.last(), Some(&24));
    }

    #[test]
    fn test_fifo_json() {
        let mut list = BoundFifoList::new(2);
        list.append(json!({"a": 1}));
        let dumped = list.to_json();
        assert_eq!(dumped[0]["data"], json!({"a": 1}));
        assert!(dumped[0]["timestamp"].as_str().unwrap().contains('T'));

        let mut empty: BoundFifoList<i32> = BoundFifoList::new(0);
        empty.append(1);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_redact_nested() {
        let value = json!({
            "access_key": "ak",
            "region": "eu",
            "devices": [{"sn": "MR51", "update_interval": 15}],
            "response": {"serialNumber": "X", "soc": 50}
        });
        let redacted = redact(&value);
        assert_eq!(redacted["access_key"], json!(REDACTED));
        assert_eq!(redacted["region"], json!("eu"));
        assert_eq!(redacted["devices"][0]["sn"], json!(REDACTED));
        assert_eq!(redacted["devices"][0]["update_interval"], json!(15));
        assert_eq!(redacted["response"]["serialNumber"], json!(REDACTED));
        assert_eq!(redacted["response"]["soc"], json!(50));
    }

    #[tokio::test]
    async fn test_config_entry_diagnostics() {
        use crate::coordinator::CoordinatorOptions;
        use crate::models::DeviceIdentity;

        let coordinator = HybridCoordinator::new(
            DeviceIdentity::new("MR51ZAS2PG330026", "delta_pro_3"),
            None,
            None,
            CoordinatorOptions {
                diagnostic_mode: true,
                ..Default::default()
            },
        );
        coordinator
            .apply_push_update(json!({"bmsBattSoc": 55, "sn": "MR51"}).as_object().cloned().unwrap())
            .await;

        let config = json!({"account": {"access_key": "ak", "region": "eu"}});
        let dump = config_entry_diagnostics(&config, &coordinator).await;
        assert_eq!(dump["config_entry"]["account"]["access_key"], json!(REDACTED));
        assert_eq!(dump["device_data"]["bmsBattSoc"], json!(55));
        assert_eq!(dump["device_data"]["sn"], json!(REDACTED));
        assert_eq!(dump["coordinator"]["connection_mode"], json!("none"));
        assert_eq!(dump["coordinator"]["update_interval"], json!(15));
        assert_eq!(dump["coordinator"]["mqtt_connected"], json!(false));
        assert!(dump["diagnostic_logs"]["rest_requests"].as_array().unwrap().is_empty());
    }
}
