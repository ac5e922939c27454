use crate::connection::Transport;
use crate::error::{DeviceError, Result, ScalarError};
use crate::method::{Args, Channel, Method};
use crate::notification::{ChangeEvent, Notification};
use crate::protocol::{Endpoint, IdGenerator, ProtocolType, Reply, Request};
use crate::signature::Signature;
use crate::types::nullable;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;

const SWITCH_NOTIFICATIONS: &str = "switchNotifications";

/// One namespace entry of the `getSupportedApiInfo` answer
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceInfo {
    pub service: String,
    #[serde(default, deserialize_with = "nullable")]
    pub protocols: Vec<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub notifications: Vec<ApiInfo>,
    #[serde(default, deserialize_with = "nullable")]
    pub apis: Vec<ApiInfo>,
}

/// A named API or notification with the versions it is offered in
#[derive(Debug, Clone, Deserialize)]
pub struct ApiInfo {
    pub name: String,
    #[serde(default, deserialize_with = "nullable")]
    versions: Vec<VersionInfo>,
}

#[derive(Debug, Clone, Deserialize)]
struct VersionInfo {
    #[serde(default)]
    version: Option<String>,
}

impl ApiInfo {
    pub fn versions(&self) -> Vec<String> {
        self.versions.iter().filter_map(|v| v.version.clone()).collect()
    }
}

/// An API namespace such as `system`, `audio` or `avContent`
#[derive(Debug, Clone, Serialize)]
pub struct Service {
    name: String,
    url: String,
    protocol: ProtocolType,
    protocols: Vec<String>,
    methods: BTreeMap<String, Method>,
    notifications: Vec<Notification>,
}

impl Service {
    /// Negotiate the sub-protocol of a namespace and fetch its method table
    pub async fn discover(
        info: &ServiceInfo,
        endpoint: &Endpoint,
        transport: &Transport,
        ids: &IdGenerator,
        force_protocol: Option<ProtocolType>,
    ) -> Result<Self> {
        let name = info.service.clone();
        tracing::debug!(service = %name, "Available protocols: {:?}", info.protocols);

        let protocol = ProtocolType::negotiate(&info.protocols, force_protocol).ok_or_else(|| {
            ScalarError::NoCompatibleProtocol {
                service: name.clone(),
                offered: info.protocols.clone(),
            }
        })?;
        tracing::debug!(service = %name, "Using protocol {}", protocol);

        let url = endpoint.service_url(&name)?;
        let channel = Arc::new(Channel {
            service: name.clone(),
            url: url.clone(),
            protocol,
            transport: transport.clone(),
            ids: ids.clone(),
        });

        let methods = fetch_methods(&channel).await?;
        let mut service = Self {
            name,
            url: url.to_string(),
            protocol,
            protocols: info.protocols.clone(),
            methods,
            notifications: Vec::new(),
        };

        for api in &info.apis {
            if let Some(method) = service.methods.get_mut(&api.name) {
                for version in api.versions() {
                    method.add_supported_version(&version);
                }
            }
        }

        service.notifications = service.build_notifications(&info.notifications);
        tracing::info!(
            service = %service.name,
            "Discovered {} methods, {} notifications",
            service.methods.len(),
            service.notifications.len()
        );
        Ok(service)
    }

    fn build_notifications(&self, offered: &[ApiInfo]) -> Vec<Notification> {
        let Some(switch) = self.methods.get(SWITCH_NOTIFICATIONS) else {
            if !offered.is_empty() {
                tracing::debug!(
                    service = %self.name,
                    "Notifications offered without {}, ignoring them",
                    SWITCH_NOTIFICATIONS
                );
            }
            return Vec::new();
        };

        offered
            .iter()
            .filter_map(|entry| {
                let notification =
                    Notification::new(&entry.name, &entry.versions(), &self.url, switch.clone());
                if notification.is_none() {
                    tracing::warn!(service = %self.name, "Notification {} has no versions", entry.name);
                }
                notification
            })
            .collect()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// The negotiated sub-protocol
    pub fn protocol(&self) -> ProtocolType {
        self.protocol
    }

    /// Sub-protocol identifiers the device offered for this namespace
    pub fn protocols(&self) -> &[String] {
        &self.protocols
    }

    pub fn methods(&self) -> &BTreeMap<String, Method> {
        &self.methods
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn method(&self, name: &str) -> Result<&Method> {
        self.methods.get(name).ok_or_else(|| missing(&self.name, name))
    }

    pub fn method_mut(&mut self, name: &str) -> Result<&mut Method> {
        let service = &self.name;
        self.methods.get_mut(name).ok_or_else(|| missing(service, name))
    }

    /// Switch the active signature of one method
    pub fn use_method_version(&mut self, method: &str, version: &str) -> Result<()> {
        self.method_mut(method)?.use_version(version)?;

        if method == SWITCH_NOTIFICATIONS {
            if let Some(switch) = self.methods.get(SWITCH_NOTIFICATIONS) {
                for notification in &mut self.notifications {
                    notification.rebind(switch.clone());
                }
            }
        }
        Ok(())
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    /// Call a method of this namespace by name
    pub async fn invoke(&self, method: &str, args: Args) -> Result<Reply> {
        self.method(method)?.invoke(args).await
    }

    /// Enable every notification of this namespace and forward decoded events
    ///
    /// Returns immediately when the namespace has no notifications; otherwise runs
    /// until `stop` is signalled or the connection fails.
    pub async fn listen_all_notifications(
        &self,
        stop: &mut watch::Receiver<bool>,
        sink: &mut (dyn FnMut(ChangeEvent) + Send),
    ) -> Result<()> {
        if self.notifications.is_empty() {
            tracing::debug!("No notifications available for {}", self.name);
            return Ok(());
        }

        let everything: Vec<Value> = self.notifications.iter().map(Notification::as_entry).collect();
        let switch = self.method(SWITCH_NOTIFICATIONS)?;
        tracing::info!(service = %self.name, "Listening for {} notifications", everything.len());

        switch
            .listen(
                Args::positional(json!({"enabled": everything})),
                stop,
                &mut |frame: Value| sink(ChangeEvent::from_frame(&frame)),
            )
            .await
    }
}

fn missing(service: &str, method: &str) -> ScalarError {
    ScalarError::MethodNotPresent {
        service: service.to_string(),
        method: method.to_string(),
    }
}

/// Ask the namespace for its method table and build the registry
async fn fetch_methods(channel: &Arc<Channel>) -> Result<BTreeMap<String, Method>> {
    let request =
        Request::new("getMethodTypes", "1.0", channel.ids.next_id()).with_params(vec![json!("")]);
    let response = channel.exchange(&request).await?;

    if let Some(error) = response.get("error").filter(|e| !e.is_null()) {
        tracing::error!(service = %channel.service, "Got error when fetching sigs: {}", error);
        return Err(ScalarError::DeviceCall {
            method: request.method,
            error: DeviceError::from_value(error).unwrap_or_else(|| DeviceError::new(-1, error.to_string())),
        });
    }

    let rows = response
        .get("results")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            ScalarError::Protocol(format!("getMethodTypes for {} has no results", channel.service))
        })?;

    let mut methods: BTreeMap<String, Method> = BTreeMap::new();
    for row in rows {
        let signature = match Signature::from_row(row) {
            Ok(signature) => signature,
            Err(e) => {
                tracing::warn!(service = %channel.service, "Skipping method row {}: {}", row, e);
                continue;
            }
        };
        match methods.get_mut(&signature.name) {
            Some(method) => {
                method.add_signature(signature);
            }
            None => {
                methods.insert(signature.name.clone(), Method::new(signature, channel.clone()));
            }
        }
    }
    Ok(methods)
}
