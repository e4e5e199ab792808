use thiserror::Error;

const DEVICE_NOT_AUTHORIZED_HELP: &str = "This error typically means:
1. The device is not properly bound to your EcoFlow Developer account
2. EcoFlow hasn't enabled API access for this device model yet
3. The device serial number might be incorrect

Troubleshooting steps:
- Verify the device is bound to your account in the EcoFlow app
- Check that you're using the correct device serial number
- Try regenerating your API credentials in the Developer Portal
- Contact EcoFlow support to enable API access for your device
- Note: River 3 and River 3 Plus are not supported by EcoFlow REST API (error 1006)";

/// Envelope code the API answers with when the device is not bound to the account.
pub const DEVICE_NOT_AUTHORIZED_CODE: &str = "1006";

#[derive(Error, Debug)]
pub enum EcoFlowError {
    #[error("Authentication failed - check your API credentials")]
    Authentication,
    #[error("API request failed with status {status}: {body}")]
    Request { status: u16, body: String },
    #[error("Failed to parse API response: {0}")]
    ResponseParse(String),
    #[error("API error (code {code}): {message}")]
    Api { code: String, message: String },
    #[error("API error (code {code}): {message}\n\n{}", DEVICE_NOT_AUTHORIZED_HELP)]
    DeviceNotAuthorized { code: String, message: String },
    #[error("Error connecting to EcoFlow API: {0}")]
    Connection(String),
    #[error("Missing required command argument `{0}`")]
    MissingArgument(&'static str),
    #[error("Unknown command format `{0}`")]
    UnknownCommandFormat(String),
    #[error("MQTT error: {0}")]
    Mqtt(String),
    #[error("No credentials provided. Please add either API keys or MQTT credentials.")]
    NoDataSource,
    #[error("Error fetching data: {0}")]
    UpdateFailed(Box<EcoFlowError>),
    #[error("Command failed via MQTT ({mqtt}) and REST ({rest})")]
    CommandFailed {
        mqtt: Box<EcoFlowError>,
        rest: Box<EcoFlowError>,
    },
    #[error("Coordinator has been shut down")]
    Shutdown,
    #[error("Invalid option `{option}` for {entity}")]
    InvalidOption { entity: String, option: String },
    #[error("Unknown entity `{key}` for device type {device_type}")]
    UnknownEntity { device_type: String, key: String },
    #[error("Configuration error: {0}")]
    Config(String),
}

impl EcoFlowError {
    /// Failures worth retrying on the next poll cycle.
    pub fn is_retryable(&self) -> bool {
        match self {
            EcoFlowError::Connection(_)
            | EcoFlowError::ResponseParse(_)
            | EcoFlowError::Request { .. }
            | EcoFlowError::Mqtt(_) => true,
            EcoFlowError::UpdateFailed(inner) => inner.is_retryable(),
            _ => false,
        }
    }

    pub fn is_device_not_authorized(&self) -> bool {
        match self {
            EcoFlowError::DeviceNotAuthorized { .. } => true,
            EcoFlowError::UpdateFailed(inner) => inner.is_device_not_authorized(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_not_authorized_message_has_guidance() {
        let err = EcoFlowError::DeviceNotAuthorized {
            code: "1006".to_string(),
            message: "device not allowed".to_string(),
        };
        let text = err.to_string();
        assert!(text.starts_with("API error (code 1006): device not allowed"));
        assert!(text.contains("Troubleshooting steps"));
        assert!(err.is_device_not_authorized());
    }

    #[test]
    fn test_retryable_classes() {
        assert!(EcoFlowError::Connection("timeout".to_string()).is_retryable());
        assert!(EcoFlowError::ResponseParse("eof".to_string()).is_retryable());
        assert!(EcoFlowError::UpdateFailed(Box::new(EcoFlowError::Connection("x".to_string()))).is_retryable());
        assert!(!EcoFlowError::MissingArgument("cmd_set").is_retryable());
        assert!(!EcoFlowError::Authentication.is_retryable());
    }
}
