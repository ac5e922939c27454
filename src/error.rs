use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Result type for Scalar Web API operations
pub type Result<T> = std::result::Result<T, ScalarError>;

/// Errors that can occur when talking to a device
#[derive(Error, Debug)]
pub enum ScalarError {
    /// HTTP request failed below the protocol layer
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket connection error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Connect, handshake or read did not finish in time
    #[error("Request timeout")]
    Timeout,

    /// Connection was closed unexpectedly
    #[error("Connection closed")]
    ConnectionClosed,

    /// Device answered with a non-success HTTP status
    #[error("Got a non-ok response (status {status}){}", display_nested(.error))]
    Status {
        status: u16,
        error: Option<DeviceError>,
    },

    /// A type description string could not be parsed
    #[error("Unable to parse type description: {0}")]
    Schema(String),

    /// The namespace advertises no sub-protocol this client speaks
    #[error("No known protocols for {service}, got: {offered:?}")]
    NoCompatibleProtocol {
        service: String,
        offered: Vec<String>,
    },

    /// Device returned a structured error for a call
    #[error("Got an error for {method}: {error}")]
    DeviceCall { method: String, error: DeviceError },

    /// Response envelope carried neither `result` nor `error`
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Caller supplied an invalid combination of arguments
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// Endpoint URL could not be parsed or converted
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Namespace was not discovered on this device
    #[error("Service not present: {0}")]
    ServiceNotPresent(String),

    /// Method is not part of the namespace
    #[error("{service} does not contain method {method}")]
    MethodNotPresent { service: String, method: String },

    /// Requested signature version is unknown for the method
    #[error("Method {method} has no signature for version {version}")]
    UnsupportedVersion { method: String, version: String },

    /// Notifications need the duplex sub-protocol
    #[error("Notifications are only supported over websockets (service {0})")]
    NotificationsUnsupported(String),

    /// Payload did not have the expected shape
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Session was closed
    #[error("Device session is closed")]
    Closed,

    /// Notification listening is already running for this device
    #[error("Already listening for notifications")]
    AlreadyListening,

    /// Event receiver fell behind and missed events
    #[error("Lagged by {0} events")]
    Lagged(u64),
}

fn display_nested(error: &Option<DeviceError>) -> String {
    match error {
        Some(error) => format!(": {}", error),
        None => String::new(),
    }
}

impl ScalarError {
    /// Device-reported error carried by this error, if any
    pub fn device_error(&self) -> Option<&DeviceError> {
        match self {
            ScalarError::DeviceCall { error, .. } => Some(error),
            ScalarError::Status { error, .. } => error.as_ref(),
            _ => None,
        }
    }

    /// Device-given error code, if any
    pub fn code(&self) -> Option<i64> {
        self.device_error().map(|e| e.code)
    }

    /// Whether this failure happened below the protocol layer
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ScalarError::Http(_)
                | ScalarError::WebSocket(_)
                | ScalarError::Json(_)
                | ScalarError::Timeout
                | ScalarError::ConnectionClosed
                | ScalarError::Status { .. }
        )
    }
}

/// Known device error codes
///
/// See the vendor's Audio Control API error code reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceErrorCode {
    Generic,
    Timeout,
    IllegalArgument,
    IllegalRequest,
    IllegalState,
    NoSuchMethod,
    UnsupportedVersion,
    UnsupportedOperation,
    Unknown,
}

impl DeviceErrorCode {
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => DeviceErrorCode::Generic,
            2 => DeviceErrorCode::Timeout,
            3 => DeviceErrorCode::IllegalArgument,
            5 => DeviceErrorCode::IllegalRequest,
            7 => DeviceErrorCode::IllegalState,
            12 => DeviceErrorCode::NoSuchMethod,
            14 => DeviceErrorCode::UnsupportedVersion,
            15 => DeviceErrorCode::UnsupportedOperation,
            _ => DeviceErrorCode::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceErrorCode::Generic => "Generic",
            DeviceErrorCode::Timeout => "Timeout",
            DeviceErrorCode::IllegalArgument => "IllegalArgument",
            DeviceErrorCode::IllegalRequest => "IllegalRequest",
            DeviceErrorCode::IllegalState => "IllegalState",
            DeviceErrorCode::NoSuchMethod => "NoSuchMethod",
            DeviceErrorCode::UnsupportedVersion => "UnsupportedVersion",
            DeviceErrorCode::UnsupportedOperation => "UnsupportedOperation",
            DeviceErrorCode::Unknown => "Unknown",
        }
    }
}

/// Structured error returned by the device: `[code, message]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceError {
    pub code: i64,
    pub message: String,
}

impl DeviceError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Build from the `error` member of a response envelope
    ///
    /// Accepts `[code, message]` as well as the rarer `{code, message}` object.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Array(items) => {
                let code = items.first()?.as_i64()?;
                let message = match items.get(1) {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                Some(Self { code, message })
            }
            Value::Object(map) => {
                let code = map.get("code")?.as_i64()?;
                let message = map
                    .get("message")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                Some(Self { code, message })
            }
            _ => None,
        }
    }

    pub fn kind(&self) -> DeviceErrorCode {
        DeviceErrorCode::from_code(self.code)
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            DeviceErrorCode::Unknown => write!(f, "Unknown error {}: {}", self.code, self.message),
            kind => write!(f, "{} ({}): {}", kind.as_str(), self.code, self.message),
        }
    }
}
