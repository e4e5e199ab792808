//! Signed client for the EcoFlow Developer REST API.
//!
//! Every request carries `accessKey`, `timestamp`, `nonce` and `sign` headers.
//! GET requests sign their query parameters, all other methods sign the
//! flattened JSON body. Responses come wrapped in a `{code, message, data}`
//! envelope which is unwrapped here and mapped onto [`EcoFlowError`].
//!
//! Documentation: https://developer-eu.ecoflow.com/us/document/introduction

pub mod signer;

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info};
use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Map, Value};

use crate::error::{EcoFlowError, DEVICE_NOT_AUTHORIZED_CODE};
use crate::models::{DeviceRecord, MqttCertificate, Region, Snapshot};
use crate::get_unix_ts_ms;
use signer::{generate_nonce, params_string, Signer, NONCE_LENGTH};

pub const API_TIMEOUT: Duration = Duration::from_secs(30);

pub const ENDPOINT_CERTIFICATION: &str = "/iot-open/sign/certification";
pub const ENDPOINT_DEVICE_LIST: &str = "/iot-open/sign/device/list";
pub const ENDPOINT_QUOTA_ALL: &str = "/iot-open/sign/device/quota/all";
pub const ENDPOINT_QUOTA: &str = "/iot-open/sign/device/quota";

/// Read and write access to device quotas, the part of the REST API the coordinator needs.
#[async_trait]
pub trait QuotaApi: Send + Sync {
    async fn get_device_quota(&self, device_sn: &str) -> Result<Snapshot, EcoFlowError>;

    async fn set_device_quota(&self, payload: &Value) -> Result<Value, EcoFlowError>;
}

#[derive(Debug, Clone)]
pub struct EcoFlowApiClient {
    signer: Signer,
    client: Client,
    base_url: String,
    region: Region,
    timeout: Duration,
}

impl EcoFlowApiClient {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>, region: Region) -> Self {
        let client = Client::builder().build().unwrap_or_default();

        EcoFlowApiClient {
            signer: Signer::new(access_key, secret_key),
            client,
            base_url: region.base_url().to_string(),
            region,
            timeout: API_TIMEOUT,
        }
    }

    /// Point the client at another host, e.g. a mock server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn region(&self) -> Region {
        self.region
    }

    /// Issue a signed request and return the unwrapped `data` object.
    ///
    /// `query` is signed and appended verbatim for GET, `body` is signed and
    /// sent as JSON for every other method.
    pub async fn request(
        &self,
        method: Method,
        endpoint: &str,
        query: Option<&Map<String, Value>>,
        body: Option<&Map<String, Value>>,
    ) -> Result<Value, EcoFlowError> {
        let envelope = self.request_envelope(method, endpoint, query, body).await?;
        Ok(unwrap_data(envelope))
    }

    async fn request_envelope(
        &self,
        method: Method,
        endpoint: &str,
        query: Option<&Map<String, Value>>,
        body: Option<&Map<String, Value>>,
    ) -> Result<Value, EcoFlowError> {
        let timestamp = get_unix_ts_ms().to_string();
        let nonce = generate_nonce(NONCE_LENGTH);

        let is_get = method == Method::GET;
        let empty = Map::new();
        let sign_params = if is_get { query } else { body }.unwrap_or(&empty);
        let params_str = params_string(sign_params);

        let include_content_type = (method == Method::POST || method == Method::PUT) && body.is_some();
        let headers = self.signer.headers(&params_str, &timestamp, &nonce, include_content_type);

        let url = if is_get && !params_str.is_empty() {
            format!("{}{}?{}", self.base_url, endpoint, params_str)
        } else {
            format!("{}{}", self.base_url, endpoint)
        };

        let mut request = self.client.request(method.clone(), &url);
        for (key, value) in headers {
            request = request.header(key, value);
        }
        if !is_get {
            if let Some(body) = body {
                request = request.body(Value::Object(body.clone()).to_string());
            }
        }

        let send = async {
            let response = request.send().await?;
            let status = response.status();
            let text = response.text().await?;
            Ok::<(StatusCode, String), reqwest::Error>((status, text))
        };

        let (status, text) = match tokio::time::timeout(self.timeout, send).await {
            Err(_) => {
                return Err(EcoFlowError::Connection(format!(
                    "Timeout connecting to EcoFlow API after {}s",
                    self.timeout.as_secs()
                )))
            }
            Ok(Err(e)) => return Err(EcoFlowError::Connection(e.to_string())),
            Ok(Ok(r)) => r,
        };

        debug!("{method} {endpoint} -> {status}");
        parse_envelope(status.as_u16(), &text)
    }

    /// MQTT broker login for this developer account.
    pub async fn get_mqtt_credentials(&self) -> Result<MqttCertificate, EcoFlowError> {
        let result = self.request(Method::GET, ENDPOINT_CERTIFICATION, None, None).await?;
        let cert: MqttCertificate = serde_json::from_value(result)
            .map_err(|e| EcoFlowError::ResponseParse(e.to_string()))?;

        info!(
            "MQTT credentials from API: url={}, port={}, certificateAccount={}, password={}",
            cert.url,
            cert.port,
            cert.certificate_account.as_deref().unwrap_or("N/A"),
            cert.masked_password()
        );

        Ok(cert)
    }

    /// All devices bound to the account.
    pub async fn get_device_list(&self) -> Result<Vec<DeviceRecord>, EcoFlowError> {
        let envelope = self.request_envelope(Method::GET, ENDPOINT_DEVICE_LIST, None, None).await?;
        let list = match envelope.get("data") {
            Some(Value::Array(list)) => list.clone(),
            _ => return Ok(Vec::new()),
        };

        Ok(list
            .into_iter()
            .filter_map(|entry| serde_json::from_value::<DeviceRecord>(entry).ok())
            .collect())
    }

    /// Send a command in the legacy `{sn, cmdCode, params}` shape.
    pub async fn set_device_quota_legacy(
        &self,
        device_sn: &str,
        cmd_code: &str,
        params: Map<String, Value>,
    ) -> Result<Value, EcoFlowError> {
        let payload = json!({
            "sn": device_sn,
            "cmdCode": cmd_code,
            "params": params,
        });
        self.set_device_quota(&payload).await
    }

    /// True when the device list can be fetched with these credentials.
    pub async fn test_connection(&self) -> bool {
        match self.get_device_list().await {
            Ok(_) => true,
            Err(e) => {
                error!("Connection test failed: {e}");
                false
            }
        }
    }
}

#[async_trait]
impl QuotaApi for EcoFlowApiClient {
    async fn get_device_quota(&self, device_sn: &str) -> Result<Snapshot, EcoFlowError> {
        let mut query = Map::new();
        query.insert("sn".to_string(), Value::String(device_sn.to_string()));

        match self.request(Method::GET, ENDPOINT_QUOTA_ALL, Some(&query), None).await? {
            Value::Object(data) => Ok(data),
            other => Err(EcoFlowError::ResponseParse(format!(
                "quota response is not an object: {other}"
            ))),
        }
    }

    async fn set_device_quota(&self, payload: &Value) -> Result<Value, EcoFlowError> {
        let body = payload.as_object().ok_or_else(|| {
            EcoFlowError::Config("command payload must be a JSON object".to_string())
        })?;

        debug!("SET device quota: PUT payload={payload}");
        let result = self.request(Method::PUT, ENDPOINT_QUOTA, None, Some(body)).await?;
        debug!("SET device quota: response={result}");

        Ok(result)
    }
}

/// `code` values 0, "0", 200, "200" and an absent code all mean success
pub fn code_is_success(code: Option<&Value>) -> bool {
    match code {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s == "0" || s == "200",
        Some(Value::Number(n)) => n.as_f64().map(|c| c == 0.0 || c == 200.0).unwrap_or(false),
        Some(_) => false,
    }
}

fn code_to_string(code: &Value) -> String {
    match code {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Map an HTTP status and body onto the API envelope or a typed failure.
pub fn parse_envelope(status: u16, text: &str) -> Result<Value, EcoFlowError> {
    if status == 401 {
        return Err(EcoFlowError::Authentication);
    }

    if status != 200 {
        return Err(EcoFlowError::Request {
            status,
            body: text.to_string(),
        });
    }

    let envelope: Value =
        serde_json::from_str(text).map_err(|e| EcoFlowError::ResponseParse(e.to_string()))?;

    let code = envelope.get("code");
    if !code_is_success(code) {
        let code = code.map(code_to_string).unwrap_or_default();
        let message = envelope
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown error")
            .to_string();

        if code == DEVICE_NOT_AUTHORIZED_CODE {
            return Err(EcoFlowError::DeviceNotAuthorized { code, message });
        }
        return Err(EcoFlowError::Api { code, message });
    }

    Ok(envelope)
}

/// `data` when it is an object, otherwise the whole envelope
pub fn unwrap_data(envelope: Value) -> Value {
    match envelope.get("data") {
        Some(Value::Object(data)) => Value::Object(data.clone()),
        _ => envelope,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client_for(server: &mockito::ServerGuard) -> EcoFlowApiClient {
        EcoFlowApiClient::new("test_access_key", "test_secret_key", Region::Eu).with_base_url(server.url())
    }

    #[test]
    fn test_region_base_url() {
        assert_eq!(EcoFlowApiClient::new("k", "s", Region::Eu).base_url(), "https://api-e.ecoflow.com");
        assert_eq!(EcoFlowApiClient::new("k", "s", Region::Us).base_url(), "https://api.ecoflow.com");
    }

    #[test]
    fn test_envelope_success_variants() {
        let data = parse_envelope(200, r#"{"code":"0","data":{"a":1}}"#).map(unwrap_data).unwrap();
        assert_eq!(data, json!({"a": 1}));

        assert!(parse_envelope(200, r#"{"code":0,"data":{}}"#).is_ok());
        assert!(parse_envelope(200, r#"{"code":"200"}"#).is_ok());
        assert!(parse_envelope(200, r#"{"code":200}"#).is_ok());
        assert!(parse_envelope(200, r#"{"data":{"x":true}}"#).is_ok());
    }

    #[test]
    fn test_envelope_non_object_data_returns_envelope() {
        let envelope = parse_envelope(200, r#"{"code":"0","data":[1,2]}"#).unwrap();
        assert_eq!(unwrap_data(envelope.clone()), envelope);
    }

    #[test]
    fn test_envelope_errors() {
        assert!(matches!(parse_envelope(401, ""), Err(EcoFlowError::Authentication)));

        match parse_envelope(500, "boom") {
            Err(EcoFlowError::Request { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected {other:?}"),
        }

        assert!(matches!(parse_envelope(200, "not json"), Err(EcoFlowError::ResponseParse(_))));

        match parse_envelope(200, r#"{"code":"8521","message":"signature is wrong"}"#) {
            Err(EcoFlowError::Api { code, message }) => {
                assert_eq!(code, "8521");
                assert_eq!(message, "signature is wrong");
            }
            other => panic!("unexpected {other:?}"),
        }

        let err = parse_envelope(200, r#"{"code":1006,"message":"not allowed"}"#).unwrap_err();
        assert!(err.is_device_not_authorized());
        let err = parse_envelope(200, r#"{"code":"1006"}"#).unwrap_err();
        assert!(err.is_device_not_authorized());
        assert!(err.to_string().contains("Unknown error"));
    }

    #[tokio::test]
    async fn test_get_quota_signs_query() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/iot-open/sign/device/quota/all")
            .match_query(Matcher::UrlEncoded("sn".into(), "SN1".into()))
            .match_header("accessKey", "test_access_key")
            .match_header("nonce", Matcher::Regex(r"^\d{6}$".to_string()))
            .match_header("timestamp", Matcher::Regex(r"^\d{13}$".to_string()))
            .match_header("sign", Matcher::Regex(r"^[0-9a-f]{64}$".to_string()))
            .match_header("content-type", Matcher::Missing)
            .with_status(200)
            .with_body(r#"{"code":"0","message":"Success","data":{"bms.soc":87,"pd.beepState":1}}"#)
            .create_async()
            .await;

        let client = client_for(&server);
        let quota = client.get_device_quota("SN1").await.unwrap();
        assert_eq!(quota.get("bms.soc"), Some(&json!(87)));
        assert_eq!(quota.len(), 2);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_set_quota_puts_json_body() {
        let mut server = mockito::Server::new_async().await;
        let payload = json!({"sn": "SN1", "cmdCode": "WN511_SOCKET_SET_PLUG_SWITCH_MESSAGE", "params": {"plugSwitch": 1}});
        let mock = server
            .mock("PUT", "/iot-open/sign/device/quota")
            .match_header("content-type", "application/json;charset=UTF-8")
            .match_body(Matcher::Json(payload.clone()))
            .with_status(200)
            .with_body(r#"{"code":"0","message":"Success"}"#)
            .create_async()
            .await;

        let client = client_for(&server);
        let mut params = Map::new();
        params.insert("plugSwitch".to_string(), json!(1));
        let result = client
            .set_device_quota_legacy("SN1", "WN511_SOCKET_SET_PLUG_SWITCH_MESSAGE", params)
            .await
            .unwrap();
        assert_eq!(result.get("message"), Some(&json!("Success")));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_401_is_authentication_failure() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/iot-open/sign/device/list")
            .with_status(401)
            .create_async()
            .await;

        let client = client_for(&server);
        assert!(matches!(client.get_device_list().await, Err(EcoFlowError::Authentication)));
        assert!(!client.test_connection().await);
    }

    #[tokio::test]
    async fn test_device_list() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/iot-open/sign/device/list")
            .with_status(200)
            .with_body(r#"{"code":"0","data":[{"sn":"SN1","deviceName":"Garage","online":1},{"sn":"SN2"}]}"#)
            .create_async()
            .await;

        let client = client_for(&server);
        let devices = client.get_device_list().await.unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].device_name.as_deref(), Some("Garage"));
        assert_eq!(devices[1].online, None);
        assert!(client.test_connection().await);
    }

    #[tokio::test]
    async fn test_certification() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/iot-open/sign/certification")
            .with_status(200)
            .with_body(r#"{"code":"0","data":{"url":"mqtt-e.ecoflow.com","port":"8883","certificateAccount":"open-1","certificatePassword":"secretsecret","protocol":"mqtts"}}"#)
            .create_async()
            .await;

        let cert = client_for(&server).get_mqtt_credentials().await.unwrap();
        assert_eq!(cert.url, "mqtt-e.ecoflow.com");
        assert_eq!(cert.certificate_account.as_deref(), Some("open-1"));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_connection_failure() {
        let client = EcoFlowApiClient::new("k", "s", Region::Eu)
            .with_base_url("http://127.0.0.1:9")
            .with_timeout(Duration::from_secs(2));
        let err = client.get_device_quota("SN1").await.unwrap_err();
        assert!(matches!(err, EcoFlowError::Connection(_)));
        assert!(err.is_retryable());
    }
}
