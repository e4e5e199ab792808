use hmac::{Hmac, Mac};
use rand::Rng;
use serde_json::{Map, Value};
use sha2::Sha256;
use std::collections::BTreeMap;

type HmacSha256 = Hmac<Sha256>;

pub const NONCE_LENGTH: usize = 6;
pub const CONTENT_TYPE_JSON: &str = "application/json;charset=UTF-8";

/// Flatten nested parameters into `key=value` pairs the way the API expects them signed.
///
/// Nested objects join their keys with `.`, array elements get `[index]`,
/// booleans render as `true`/`false`.
pub fn flatten(params: &Map<String, Value>) -> BTreeMap<String, String> {
    let mut items = BTreeMap::new();
    flatten_into(params, "", &mut items);
    items
}

fn flatten_into(params: &Map<String, Value>, parent_key: &str, items: &mut BTreeMap<String, String>) {
    for (key, value) in params {
        let new_key = if parent_key.is_empty() {
            key.clone()
        } else {
            format!("{parent_key}.{key}")
        };

        match value {
            Value::Object(nested) => flatten_into(nested, &new_key, items),
            Value::Array(list) => {
                for (i, item) in list.iter().enumerate() {
                    let item_key = format!("{new_key}[{i}]");
                    match item {
                        Value::Object(nested) => flatten_into(nested, &item_key, items),
                        other => {
                            items.insert(item_key, scalar_to_string(other));
                        }
                    }
                }
            }
            other => {
                items.insert(new_key, scalar_to_string(other));
            }
        }
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        /* the server side renders an unset value as `None` */
        Value::Null => "None".to_string(),
        // numbers and arrays nested in arrays keep their JSON text
        other => other.to_string(),
    }
}

/// Join flattened parameters as `k1=v1&k2=v2` in ascending key order; empty input yields `""`.
pub fn sort_and_concat(flat: &BTreeMap<String, String>) -> String {
    let mut pairs: Vec<(&String, &String)> = flat.iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    pairs
        .into_iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<String>>()
        .join("&")
}

/// `flatten` followed by `sort_and_concat`
pub fn params_string(params: &Map<String, Value>) -> String {
    if params.is_empty() {
        return String::new();
    }
    sort_and_concat(&flatten(params))
}

/// Random decimal digits, not cryptographically secure.
pub fn generate_nonce(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

/// Holds the developer key pair and signs request strings with it.
#[derive(Clone)]
pub struct Signer {
    access_key: String,
    secret_key: String,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("access_key", &self.access_key)
            .field("secret_key", &"***")
            .finish()
    }
}

impl Signer {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Signer {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }

    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    /// The exact string that gets signed
    pub fn sign_string(&self, params_str: &str, timestamp: &str, nonce: &str) -> String {
        let auth_str = format!(
            "accessKey={}&nonce={}&timestamp={}",
            self.access_key, nonce, timestamp
        );
        if params_str.is_empty() {
            auth_str
        } else {
            format!("{params_str}&{auth_str}")
        }
    }

    /// Lowercase hex HMAC-SHA256 over `sign_string`, always 64 characters.
    pub fn sign(&self, params_str: &str, timestamp: &str, nonce: &str) -> String {
        let sign_str = self.sign_string(params_str, timestamp, nonce);
        hmac_sha256_hex(self.secret_key.as_bytes(), sign_str.as_bytes())
    }

    /// Authentication headers for one request.
    pub fn headers(
        &self,
        params_str: &str,
        timestamp: &str,
        nonce: &str,
        include_content_type: bool,
    ) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("accessKey", self.access_key.clone()),
            ("timestamp", timestamp.to_string()),
            ("nonce", nonce.to_string()),
            ("sign", self.sign(params_str, timestamp, nonce)),
        ];

        if include_content_type {
            headers.push(("Content-Type", CONTENT_TYPE_JSON.to_string()));
        }

        headers
    }
}

fn hmac_sha256_hex(key: &[u8], message: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC-SHA256 accepts keys of any size"),
    };
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn signer() -> Signer {
        Signer::new("test_access_key", "test_secret_key")
    }

    #[test]
    fn test_flatten_flat_params() {
        let flat = flatten(&obj(json!({"key1": "val1", "key2": 42})));
        assert_eq!(flat.get("key1").unwrap(), "val1");
        assert_eq!(flat.get("key2").unwrap(), "42");
        assert_eq!(flat.len(), 2);
    }

    #[test]
    fn test_flatten_nested_and_bool() {
        let flat = flatten(&obj(json!({"a": {"b": true}, "flag": false})));
        assert_eq!(flat.get("a.b").unwrap(), "true");
        assert_eq!(flat.get("flag").unwrap(), "false");
    }

    #[test]
    fn test_flatten_lists() {
        let flat = flatten(&obj(json!({"items": [1, {"x": 2}]})));
        assert_eq!(flat.len(), 2);
        assert_eq!(flat.get("items[0]").unwrap(), "1");
        assert_eq!(flat.get("items[1].x").unwrap(), "2");

        let flat = flatten(&obj(json!({"bits": [true, false]})));
        assert_eq!(flat.get("bits[0]").unwrap(), "true");
        assert_eq!(flat.get("bits[1]").unwrap(), "false");
    }

    #[test]
    fn test_flatten_null_values() {
        let params = json!({"a": null, "b": {"c": null}, "d": [null, 1]});
        let flat = flatten(params.as_object().unwrap());
        assert_eq!(flat.get("a").map(String::as_str), Some("None"));
        assert_eq!(flat.get("b.c").map(String::as_str), Some("None"));
        assert_eq!(flat.get("d[0]").map(String::as_str), Some("None"));
        assert_eq!(flat.get("d[1]").map(String::as_str), Some("1"));
        assert_eq!(sort_and_concat(&flat), "a=None&b.c=None&d[0]=None&d[1]=1");
    }

    #[test]
    fn test_flatten_empty() {
        assert!(flatten(&Map::new()).is_empty());
        assert_eq!(sort_and_concat(&BTreeMap::new()), "");
        assert_eq!(params_string(&Map::new()), "");
    }

    #[test]
    fn test_sorted_output() {
        let s = params_string(&obj(json!({"z": 1, "a": 2, "m": 3})));
        assert_eq!(s, "a=2&m=3&z=1");
    }

    #[test]
    fn test_keys_strictly_ascending() {
        let s = params_string(&obj(json!({
            "sn": "SN1",
            "params": {"cfgAcOutOpen": true, "cmdSet": 32, "id": 66},
            "cmdId": 17,
            "needAck": true
        })));
        let keys: Vec<&str> = s.split('&').map(|p| p.split('=').next().unwrap()).collect();
        for pair in keys.windows(2) {
            assert!(pair[0] < pair[1], "{} !< {}", pair[0], pair[1]);
        }
        assert_eq!(
            s,
            "cmdId=17&needAck=true&params.cfgAcOutOpen=true&params.cmdSet=32&params.id=66&sn=SN1"
        );
    }

    #[test]
    fn test_nonce() {
        let nonce = generate_nonce(NONCE_LENGTH);
        assert_eq!(nonce.len(), 6);
        assert!(nonce.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(generate_nonce(10).len(), 10);

        let nonces: std::collections::HashSet<String> = (0..100).map(|_| generate_nonce(6)).collect();
        assert!(nonces.len() > 1);
    }

    #[test]
    fn test_signature_shape_and_determinism() {
        let s = signer();
        let a = s.sign("sn=TEST", "1234567890", "123456");
        let b = s.sign("sn=TEST", "1234567890", "123456");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| "0123456789abcdef".contains(c)));

        assert_ne!(a, s.sign("sn=TEST2", "1234567890", "123456"));
        assert_ne!(a, s.sign("sn=TEST", "1234567891", "123456"));
        assert_ne!(a, s.sign("sn=TEST", "1234567890", "654321"));
        assert_ne!(a, Signer::new("test_access_key", "other").sign("sn=TEST", "1234567890", "123456"));
        assert_ne!(a, Signer::new("other", "test_secret_key").sign("sn=TEST", "1234567890", "123456"));
    }

    #[test]
    fn test_signature_matches_reference() {
        let s = signer();
        let expected_str = "sn=TEST123&accessKey=test_access_key&nonce=123456&timestamp=1700000000000";
        assert_eq!(s.sign_string("sn=TEST123", "1700000000000", "123456"), expected_str);

        let mut mac = HmacSha256::new_from_slice(b"test_secret_key").unwrap();
        mac.update(expected_str.as_bytes());
        let expected = hex::encode(mac.finalize().into_bytes());
        assert_eq!(s.sign("sn=TEST123", "1700000000000", "123456"), expected);
    }

    #[test]
    fn test_known_vector() {
        // RFC 4231 test case 2
        assert_eq!(
            hmac_sha256_hex(b"Jefe", b"what do ya want for nothing?"),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_empty_params_signs_auth_only() {
        let s = signer();
        assert_eq!(
            s.sign_string("", "1700000000000", "123456"),
            "accessKey=test_access_key&nonce=123456&timestamp=1700000000000"
        );
    }

    #[test]
    fn test_headers() {
        let s = signer();
        let headers = s.headers("", "123", "456", false);
        let names: Vec<&str> = headers.iter().map(|(k, _)| *k).collect();
        assert_eq!(names, vec!["accessKey", "timestamp", "nonce", "sign"]);

        let headers = s.headers("", "123", "456", true);
        let content_type = headers.iter().find(|(k, _)| *k == "Content-Type").unwrap();
        assert_eq!(content_type.1, "application/json;charset=UTF-8");
    }
}
