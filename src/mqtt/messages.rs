use serde_json::{Map, Value};

use crate::error::EcoFlowError;
use crate::models::Snapshot;

/* typeCode of a push message -> key prefix used by the REST quota */
const TYPE_CODE_PREFIXES: [(&str, &str); 7] = [
    ("pdStatus", "pd"),
    ("invStatus", "inv"),
    ("mpptStatus", "mppt"),
    ("bmsStatus", "bms_bmsStatus"),
    ("emsStatus", "bms_emsStatus"),
    ("bmsInfo", "bms_bmsInfo"),
    ("bmsMaster", "bmsMaster"),
];

/// Topics of one device on the open-platform broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub quota: String,
    pub set: String,
    pub set_reply: String,
    pub status: String,
}

impl Topics {
    pub fn new(account: &str, device_sn: &str) -> Self {
        let base = format!("/open/{account}/{device_sn}");
        Topics {
            quota: format!("{base}/quota"),
            set: format!("{base}/set"),
            set_reply: format!("{base}/set_reply"),
            status: format!("{base}/status"),
        }
    }

    /// Topics the client listens on
    pub fn subscriptions(&self) -> [&str; 3] {
        [self.quota.as_str(), self.set_reply.as_str(), self.status.as_str()]
    }
}

pub fn type_code_prefix(type_code: &str) -> &str {
    TYPE_CODE_PREFIXES
        .iter()
        .find(|(code, _)| *code == type_code)
        .map(|(_, prefix)| *prefix)
        .unwrap_or(type_code)
}

fn flatten_into(source: &Map<String, Value>, prefix: &str, out: &mut Snapshot) {
    for (key, value) in source {
        let full_key = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            Value::Object(nested) => flatten_into(nested, &full_key, out),
            other => {
                out.insert(full_key, other.clone());
            }
        }
    }
}

/// Decode a telemetry message from the quota topic into snapshot fields.
///
/// Only the `params` (or `param`) object carries telemetry. A `typeCode` puts the
/// module prefix in front of every key, nested objects are flattened with `.`.
pub fn decode_push_message(payload: &[u8]) -> Result<Snapshot, EcoFlowError> {
    let message: Value =
        serde_json::from_slice(payload).map_err(|e| EcoFlowError::ResponseParse(e.to_string()))?;

    let message = match message {
        Value::Object(message) => message,
        _ => return Err(EcoFlowError::ResponseParse("push message is not an object".to_string())),
    };

    let params = match message.get("params").or_else(|| message.get("param")) {
        Some(Value::Object(params)) => params,
        _ => return Ok(Snapshot::new()),
    };

    let prefix = match message.get("typeCode").and_then(Value::as_str) {
        Some(type_code) => type_code_prefix(type_code).to_string(),
        None => String::new(),
    };

    let mut snapshot = Snapshot::new();
    flatten_into(params, &prefix, &mut snapshot);
    Ok(snapshot)
}

/// Fill in the fields the broker needs on a command payload without touching what the caller set.
pub fn prepare_mqtt_payload(payload: &Value, id: u64) -> Value {
    let mut prepared = match payload {
        Value::Object(map) => map.clone(),
        other => {
            let mut map = Map::new();
            map.insert("params".to_string(), other.clone());
            map
        }
    };

    prepared.entry("id").or_insert_with(|| Value::from(id));
    prepared.entry("version").or_insert_with(|| Value::from("1.0"));

    let is_pro_v1 = prepared
        .get("params")
        .and_then(Value::as_object)
        .map(|params| params.contains_key("cmdSet"))
        .unwrap_or(false);
    if is_pro_v1 {
        prepared.entry("operateType").or_insert_with(|| Value::from("TCP"));
        prepared.entry("moduleType").or_insert_with(|| Value::from(0));
    }

    Value::Object(prepared)
}

/// Message id as a number; replies sometimes carry it as a string.
pub fn message_id(message: &Value) -> Option<u64> {
    match message.get("id")? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse::<u64>().ok(),
        _ => None,
    }
}
