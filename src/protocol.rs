use crate::error::{DeviceError, Result, ScalarError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use url::Url;

const GUIDE_PATH: &str = "/sony/guide";

/// API request envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    pub params: Vec<Value>,
    pub id: u64,
    pub version: String,
}

impl Request {
    /// Create a new request for the given method and version
    pub fn new(method: impl Into<String>, version: impl Into<String>, id: u64) -> Self {
        Self {
            method: method.into(),
            params: Vec::new(),
            id,
            version: version.into(),
        }
    }

    /// Set the positional params array
    pub fn with_params(mut self, params: Vec<Value>) -> Self {
        self.params = params;
        self
    }
}

/// Wire style a namespace can be reached with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolType {
    /// Persistent duplex connection
    #[serde(rename = "websocket:jsonizer")]
    WebSocket,
    /// One-shot HTTP POST
    #[serde(rename = "xhrpost:jsonizer")]
    XhrPost,
}

impl ProtocolType {
    pub fn identifier(&self) -> &'static str {
        match self {
            ProtocolType::WebSocket => "websocket:jsonizer",
            ProtocolType::XhrPost => "xhrpost:jsonizer",
        }
    }

    /// Accept full identifiers as well as the short `websocket` / `xhrpost` names
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "websocket" | "websocket:jsonizer" => Some(ProtocolType::WebSocket),
            "xhrpost" | "xhrpost:jsonizer" | "post" => Some(ProtocolType::XhrPost),
            _ => None,
        }
    }

    /// Pick the sub-protocol for a namespace advertising `offered`
    ///
    /// A forced protocol wins when offered, then duplex is preferred over unary.
    pub fn negotiate(offered: &[String], forced: Option<ProtocolType>) -> Option<ProtocolType> {
        let supports = |p: ProtocolType| offered.iter().any(|o| o == p.identifier());

        if let Some(forced) = forced {
            if supports(forced) {
                return Some(forced);
            }
        }

        [ProtocolType::WebSocket, ProtocolType::XhrPost]
            .into_iter()
            .find(|p| supports(*p))
    }
}

impl fmt::Display for ProtocolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identifier())
    }
}

/// Per-device correlation id sequence, starting at 1
///
/// Clones share the same counter.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    next: Arc<AtomicU64>,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            next: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Base API URL plus the derived discovery (guide) URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    base: Url,
    guide: Url,
}

impl Endpoint {
    /// Parse a base endpoint such as `http://192.168.1.20:10000/sony`
    pub fn new(base: &str) -> Result<Self> {
        let base = Url::parse(base.trim_end_matches('/'))
            .map_err(|e| ScalarError::InvalidEndpoint(format!("{}: {}", base, e)))?;

        if base.cannot_be_a_base() || base.host_str().is_none() {
            return Err(ScalarError::InvalidEndpoint(base.to_string()));
        }

        let mut guide = base.clone();
        guide.set_path(GUIDE_PATH);
        guide.set_query(None);

        Ok(Self { base, guide })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// URL of the `getSupportedApiInfo` discovery call
    pub fn guide(&self) -> &Url {
        &self.guide
    }

    /// HTTP URL of a namespace, `<base>/<service>`
    pub fn service_url(&self, service: &str) -> Result<Url> {
        let joined = format!("{}/{}", self.base.as_str().trim_end_matches('/'), service);
        Url::parse(&joined).map_err(|e| ScalarError::InvalidEndpoint(format!("{}: {}", joined, e)))
    }
}

/// Duplex counterpart of an HTTP URL (`http` → `ws`, `https` → `wss`)
pub fn websocket_url(url: &Url) -> Result<Url> {
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(ScalarError::InvalidEndpoint(format!(
                "unsupported scheme {} in {}",
                other, url
            )))
        }
    };
    let mut ws = url.clone();
    ws.set_scheme(scheme)
        .map_err(|_| ScalarError::InvalidEndpoint(url.to_string()))?;
    Ok(ws)
}

/// Outcome of a successful call
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Empty `result` array
    Success,
    /// Exactly one result element
    Single(Value),
    /// More than one result element
    Multiple(Vec<Value>),
}

impl Reply {
    /// Interpret a response envelope
    pub fn from_response(method: &str, response: Value) -> Result<Self> {
        if let Some(error) = response.get("error").filter(|e| !e.is_null()) {
            let error = DeviceError::from_value(error)
                .unwrap_or_else(|| DeviceError::new(-1, error.to_string()));
            return Err(ScalarError::DeviceCall {
                method: method.to_string(),
                error,
            });
        }

        let mut result = match response.get("result") {
            Some(Value::Array(items)) => items.clone(),
            Some(other) => {
                return Err(ScalarError::Protocol(format!(
                    "result of {} is not an array: {}",
                    method, other
                )))
            }
            None => {
                tracing::error!("No result in response for {}: {}", method, response);
                return Err(ScalarError::Protocol(format!(
                    "response for {} has neither result nor error",
                    method
                )));
            }
        };

        match result.len() {
            0 => {
                tracing::debug!("Got no response for {}, assuming success", method);
                Ok(Reply::Success)
            }
            1 => Ok(Reply::Single(result.remove(0))),
            n => {
                tracing::warn!("Got a response with {} elements for {}", n, method);
                Ok(Reply::Multiple(result))
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Reply::Success)
    }

    /// The payload as a single value; `Success` becomes `null`
    pub fn into_value(self) -> Value {
        match self {
            Reply::Success => Value::Null,
            Reply::Single(value) => value,
            Reply::Multiple(values) => Value::Array(values),
        }
    }

    /// The payload as a list of entries
    ///
    /// A single array element is unwrapped, since most list getters answer `[[...]]`.
    pub fn into_list(self) -> Vec<Value> {
        match self {
            Reply::Success => Vec::new(),
            Reply::Single(Value::Array(items)) => items,
            Reply::Single(value) => vec![value],
            Reply::Multiple(values) => values,
        }
    }

    /// Decode the payload with serde
    pub fn decode<T: serde::de::DeserializeOwned>(self) -> Result<T> {
        Ok(serde_json::from_value(self.into_value())?)
    }
}
