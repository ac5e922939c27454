use crate::connection::Transport;
use crate::error::{DeviceError, Result, ScalarError};
use crate::protocol::{websocket_url, IdGenerator, ProtocolType, Reply, Request};
use crate::signature::{compare_versions, Shape, Signature};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use url::Url;

/// Arguments for a method call
///
/// The device accepts either nothing, one positional value, or one object of
/// keyword arguments. Setting both a positional value and keywords is rejected
/// before anything goes on the wire.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    positional: Option<Value>,
    keywords: Map<String, Value>,
}

impl Args {
    /// No arguments, sent as `params: []`
    pub fn none() -> Self {
        Self::default()
    }

    /// A single positional argument, sent as `params: [value]`
    pub fn positional(value: Value) -> Self {
        Self {
            positional: Some(value),
            keywords: Map::new(),
        }
    }

    /// Keyword arguments from an object, sent as `params: [{...}]`
    pub fn keywords(keywords: Map<String, Value>) -> Self {
        Self {
            positional: None,
            keywords,
        }
    }

    /// Add one keyword argument
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.keywords.insert(key.into(), value.into());
        self
    }

    /// Set the positional argument
    pub fn with_positional(mut self, value: Value) -> Self {
        self.positional = Some(value);
        self
    }

    /// Build the `params` array
    pub fn into_params(self) -> Result<Vec<Value>> {
        match (self.positional, self.keywords.is_empty()) {
            (Some(_), false) => Err(ScalarError::InvalidArguments(
                "a positional argument cannot be combined with keyword arguments".to_string(),
            )),
            (Some(Value::Null), true) => Ok(Vec::new()),
            (Some(value), true) => Ok(vec![value]),
            (None, false) => Ok(vec![Value::Object(self.keywords)]),
            (None, true) => Ok(Vec::new()),
        }
    }
}

impl From<Value> for Args {
    fn from(value: Value) -> Self {
        Args::positional(value)
    }
}

/// Where and how calls for one namespace go
#[derive(Debug)]
pub(crate) struct Channel {
    pub(crate) service: String,
    pub(crate) url: Url,
    pub(crate) protocol: ProtocolType,
    pub(crate) transport: Transport,
    pub(crate) ids: IdGenerator,
}

impl Channel {
    /// Send one request over the namespace's sub-protocol
    pub(crate) async fn exchange(&self, request: &Request) -> Result<Value> {
        match self.protocol {
            ProtocolType::XhrPost => self.transport.unary(&self.url, request).await,
            ProtocolType::WebSocket => {
                let url = websocket_url(&self.url)?;
                self.transport.duplex(&url, request).await
            }
        }
    }
}

/// One remotely invokable operation of a service
#[derive(Debug, Clone, Serialize)]
pub struct Method {
    name: String,
    service: String,
    signatures: BTreeMap<String, Signature>,
    active_version: String,
    supported_versions: Vec<String>,
    #[serde(skip)]
    channel: Arc<Channel>,
}

impl Method {
    pub(crate) fn new(signature: Signature, channel: Arc<Channel>) -> Self {
        let active_version = signature.version.clone();
        let mut signatures = BTreeMap::new();
        signatures.insert(signature.version.clone(), signature);

        Self {
            name: signatures[&active_version].name.clone(),
            service: channel.service.clone(),
            supported_versions: vec![active_version.clone()],
            signatures,
            active_version,
            channel,
        }
    }

    /// Learn another signature for this method
    ///
    /// A new version is added; a known version with different shapes is a
    /// conflict and the existing one is kept. Returns whether anything changed.
    pub fn add_signature(&mut self, signature: Signature) -> bool {
        if signature.name != self.name {
            tracing::warn!(
                "Ignoring signature {} for method {}",
                signature.name,
                self.name
            );
            return false;
        }

        match self.signatures.get(&signature.version) {
            Some(existing) if *existing == signature => false,
            Some(existing) => {
                tracing::warn!(
                    "Got duplicate signature for {} version {}, existing was {:?}, keeping it",
                    self.name,
                    signature.version,
                    existing
                );
                false
            }
            None => {
                self.add_supported_version(&signature.version);
                self.signatures.insert(signature.version.clone(), signature);
                true
            }
        }
    }

    pub fn add_supported_version(&mut self, version: &str) {
        if !self.supported_versions.iter().any(|v| v == version) {
            self.supported_versions.push(version.to_string());
        }
    }

    /// Switch the active signature
    pub fn use_version(&mut self, version: &str) -> Result<()> {
        if !self.signatures.contains_key(version) {
            return Err(ScalarError::UnsupportedVersion {
                method: self.name.clone(),
                version: version.to_string(),
            });
        }
        self.active_version = version.to_string();
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn version(&self) -> &str {
        &self.active_version
    }

    pub fn signature(&self) -> &Signature {
        // active_version is always a key of signatures
        &self.signatures[&self.active_version]
    }

    pub fn signatures(&self) -> &BTreeMap<String, Signature> {
        &self.signatures
    }

    pub fn inputs(&self) -> &Shape {
        &self.signature().input
    }

    pub fn outputs(&self) -> &Shape {
        &self.signature().output
    }

    pub fn supported_versions(&self) -> &[String] {
        &self.supported_versions
    }

    pub fn latest_supported_version(&self) -> Option<&str> {
        self.supported_versions
            .iter()
            .max_by(|a, b| compare_versions(a, b))
            .map(String::as_str)
    }

    /// Build the request envelope for a call with the active signature
    pub fn request(&self, args: Args) -> Result<Request> {
        let params = args.into_params()?;
        Ok(Request::new(&self.name, &self.active_version, self.channel.ids.next_id())
            .with_params(params))
    }

    /// Call the method
    pub async fn invoke(&self, args: Args) -> Result<Reply> {
        let request = self.request(args)?;
        tracing::debug!(
            "{}.{} called with {:?} (version {}, {})",
            self.service,
            self.name,
            request.params,
            self.active_version,
            self.channel.protocol
        );

        let response = self.channel.exchange(&request).await?;
        Reply::from_response(&self.name, response)
    }

    /// Call the method on a duplex connection and keep reading pushed frames
    ///
    /// The connection is dedicated to push delivery: every frame goes to `consumer`
    /// until `stop` is signalled or the connection fails. A frame carrying a device
    /// error for this request ends the session with `DeviceCall`.
    pub async fn listen(
        &self,
        args: Args,
        stop: &mut watch::Receiver<bool>,
        consumer: &mut (dyn FnMut(Value) + Send),
    ) -> Result<()> {
        if self.channel.protocol != ProtocolType::WebSocket {
            return Err(ScalarError::NotificationsUnsupported(self.service.clone()));
        }

        let request = self.request(args)?;
        let url = websocket_url(&self.channel.url)?;
        let request_id = request.id;
        let name = self.name.clone();

        let mut forward = |frame: Value| -> Result<()> {
            let is_ours = frame.get("id").and_then(Value::as_u64) == Some(request_id);
            if is_ours {
                if let Some(error) = frame.get("error").filter(|e| !e.is_null()) {
                    return Err(ScalarError::DeviceCall {
                        method: name.clone(),
                        error: DeviceError::from_value(error)
                            .unwrap_or_else(|| DeviceError::new(-1, error.to_string())),
                    });
                }
            }
            consumer(frame);
            Ok(())
        };

        self.channel
            .transport
            .duplex_listen(&url, &request, stop, &mut forward)
            .await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use serde_json::json;

    pub(crate) fn test_channel(protocol: ProtocolType) -> Arc<Channel> {
        Arc::new(Channel {
            service: "audio".to_string(),
            url: Url::parse("http://127.0.0.1:9/sony/audio").unwrap(),
            protocol,
            transport: Transport::new(&DeviceConfig::default()).unwrap(),
            ids: IdGenerator::new(),
        })
    }

    fn sig(name: &str, version: &str, input: &str) -> Signature {
        Signature {
            name: name.to_string(),
            input: Shape::parse(input).unwrap(),
            output: Shape::Empty,
            version: version.to_string(),
        }
    }

    #[test]
    fn test_params_marshalling() {
        assert_eq!(Args::none().into_params().unwrap(), Vec::<Value>::new());
        assert_eq!(
            Args::positional(json!({})).into_params().unwrap(),
            vec![json!({})]
        );
        assert_eq!(
            Args::none().with("status", "off").into_params().unwrap(),
            vec![json!({"status": "off"})]
        );
        assert_eq!(Args::positional(Value::Null).into_params().unwrap(), Vec::<Value>::new());
    }

    #[test]
    fn test_positional_and_keywords_rejected() {
        let args = Args::positional(json!("x")).with("status", "off");
        assert!(matches!(args.into_params(), Err(ScalarError::InvalidArguments(_))));
    }

    #[tokio::test]
    async fn test_invoke_with_bad_args_does_no_io() {
        let channel = test_channel(ProtocolType::XhrPost);
        let method = Method::new(sig("setAudioVolume", "1.1", "string"), channel.clone());

        let err = method
            .invoke(Args::positional(json!("5")).with("output", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, ScalarError::InvalidArguments(_)));
        // no correlation id was consumed
        assert_eq!(channel.ids.next_id(), 1);
    }

    #[test]
    fn test_use_version() {
        let mut method = Method::new(sig("getVolumeInformation", "1.0", ""), test_channel(ProtocolType::XhrPost));
        assert!(method.add_signature(sig("getVolumeInformation", "1.1", "{\"output\":\"string\"}")));
        assert_eq!(method.version(), "1.0");

        method.use_version("1.1").unwrap();
        assert_eq!(method.version(), "1.1");
        assert!(matches!(method.inputs(), Shape::Fields { .. }));

        let request = method.request(Args::positional(json!({"output": ""}))).unwrap();
        assert_eq!(request.version, "1.1");

        let err = method.use_version("9.9").unwrap_err();
        assert!(matches!(err, ScalarError::UnsupportedVersion { .. }));
        assert_eq!(method.version(), "1.1");
    }

    #[test]
    fn test_conflicting_signature_keeps_first() {
        let mut method = Method::new(sig("setPowerStatus", "1.1", "string"), test_channel(ProtocolType::XhrPost));
        assert!(!method.add_signature(sig("setPowerStatus", "1.1", "int")));
        assert_eq!(method.signature().input, Shape::parse("string").unwrap());
        assert_eq!(method.signatures().len(), 1);
    }

    #[test]
    fn test_latest_supported_version() {
        let mut method = Method::new(sig("getPowerStatus", "1.0", ""), test_channel(ProtocolType::XhrPost));
        method.add_supported_version("1.10");
        method.add_supported_version("1.2");
        assert_eq!(method.latest_supported_version(), Some("1.10"));
    }

    #[tokio::test]
    async fn test_listen_requires_duplex() {
        let method = Method::new(sig("switchNotifications", "1.0", ""), test_channel(ProtocolType::XhrPost));
        let (_tx, mut rx) = watch::channel(false);
        let err = method
            .listen(Args::none(), &mut rx, &mut |_frame: Value| {})
            .await
            .unwrap_err();
        assert!(matches!(err, ScalarError::NotificationsUnsupported(_)));
    }
}
