use crate::error::{Result, ScalarError};
use crate::method::{Args, Method};
use crate::signature::compare_versions;
use crate::types::{make, nullable, string_like, Power, Record, SoftwareUpdateInfo, Storage, Terminal, Volume};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::watch;

/// A push event kind a service can emit
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub name: String,
    pub version: String,
    pub endpoint: String,
    #[serde(skip)]
    switch: Method,
}

impl Notification {
    /// Build from one discovery entry, using the highest offered version
    ///
    /// Returns `None` when the entry offers no version at all.
    pub(crate) fn new(name: &str, versions: &[String], endpoint: &str, switch: Method) -> Option<Self> {
        let version = versions.iter().max_by(|a, b| compare_versions(a, b))?;
        Some(Self {
            name: name.to_string(),
            version: version.clone(),
            endpoint: endpoint.to_string(),
            switch,
        })
    }

    pub(crate) fn rebind(&mut self, switch: Method) {
        self.switch = switch;
    }

    /// `{name, version}` entry used by `switchNotifications`
    pub fn as_entry(&self) -> Value {
        json!({"name": self.name, "version": self.version})
    }

    /// Enable only this notification and forward decoded events to `sink`
    ///
    /// Blocks like [`Method::listen`] until `stop` is signalled or the connection fails.
    pub async fn activate(
        &self,
        stop: &mut watch::Receiver<bool>,
        sink: &mut (dyn FnMut(ChangeEvent) + Send),
    ) -> Result<()> {
        let args = Args::positional(json!({"enabled": [self.as_entry()]}));
        self.switch
            .listen(args, stop, &mut |frame: Value| sink(ChangeEvent::from_frame(&frame)))
            .await
    }
}

/// Key of the callback registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Power,
    Volume,
    Content,
    Setting,
    Terminal,
    SoftwareUpdate,
    PlaybackFunction,
    Storage,
    Subscription,
    Connectivity,
    Unrecognized,
    Raw,
}

/// A decoded push event
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Power(Power),
    Volume(Volume),
    Content(ContentChange),
    Setting(SettingChange),
    /// External terminal or zone activation
    Terminal(Terminal),
    SoftwareUpdate(SoftwareUpdateChange),
    PlaybackFunction(PlaybackFunctionChange),
    Storage(Storage),
    /// Acknowledgement of a `switchNotifications` call
    Subscription(SubscriptionChange),
    Connectivity(ConnectChange),
    /// A pushed event with a name we do not know, or could not decode
    Unrecognized { method: String, payload: Value },
    /// Anything else the device sent
    Raw(Value),
}

impl ChangeEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ChangeEvent::Power(_) => EventKind::Power,
            ChangeEvent::Volume(_) => EventKind::Volume,
            ChangeEvent::Content(_) => EventKind::Content,
            ChangeEvent::Setting(_) => EventKind::Setting,
            ChangeEvent::Terminal(_) => EventKind::Terminal,
            ChangeEvent::SoftwareUpdate(_) => EventKind::SoftwareUpdate,
            ChangeEvent::PlaybackFunction(_) => EventKind::PlaybackFunction,
            ChangeEvent::Storage(_) => EventKind::Storage,
            ChangeEvent::Subscription(_) => EventKind::Subscription,
            ChangeEvent::Connectivity(_) => EventKind::Connectivity,
            ChangeEvent::Unrecognized { .. } => EventKind::Unrecognized,
            ChangeEvent::Raw(_) => EventKind::Raw,
        }
    }

    /// Decode one frame received on a listening connection
    pub fn from_frame(frame: &Value) -> Self {
        if let Some(method) = frame.get("method").and_then(Value::as_str) {
            let payload = frame
                .get("params")
                .and_then(|p| p.get(0))
                .cloned()
                .unwrap_or(Value::Null);

            return match decode_push(method, &payload) {
                Some(Ok(event)) => event,
                Some(Err(e)) => {
                    tracing::warn!("Unable to decode {}: {}", method, e);
                    ChangeEvent::Unrecognized {
                        method: method.to_string(),
                        payload,
                    }
                }
                None => {
                    tracing::warn!("Got unknown notification type: {} - params: {}", method, payload);
                    ChangeEvent::Unrecognized {
                        method: method.to_string(),
                        payload,
                    }
                }
            };
        }

        if let Some(result) = frame.get("result").and_then(|r| r.get(0)) {
            if result.get("enabled").is_some() || result.get("disabled").is_some() {
                match serde_json::from_value::<SubscriptionAck>(result.clone()) {
                    Ok(ack) => return ChangeEvent::Subscription(ack.into_change()),
                    Err(e) => tracing::warn!("Malformed subscription ack {}: {}", result, e),
                }
            }
        }

        tracing::warn!("Unknown notification, returning raw: {}", frame);
        ChangeEvent::Raw(frame.clone())
    }

    /// Synthetic event for a listen loop that went away
    pub fn connection_lost(error: &ScalarError) -> Self {
        ChangeEvent::Connectivity(ConnectChange {
            connected: false,
            reason: Some(error.to_string()),
        })
    }
}

fn decode_push(method: &str, payload: &Value) -> Option<Result<ChangeEvent>> {
    let event = match method {
        "notifyPowerStatus" => make::<Power>(payload).map(ChangeEvent::Power),
        "notifyVolumeInformation" => make::<Volume>(payload).map(ChangeEvent::Volume),
        "notifyPlayingContentInfo" => make::<ContentChange>(payload).map(ChangeEvent::Content),
        "notifySettingsUpdate" => make::<SettingChange>(payload)
            .map(SettingChange::flatten)
            .map(ChangeEvent::Setting),
        "notifyExternalTerminalStatus" => make::<Terminal>(payload).map(ChangeEvent::Terminal),
        "notifySWUpdateInfo" => make::<SoftwareUpdateChange>(payload).map(ChangeEvent::SoftwareUpdate),
        "notifyAvailablePlaybackFunction" => {
            make::<PlaybackFunctionChange>(payload).map(ChangeEvent::PlaybackFunction)
        }
        "notifyStorageStatus" => make::<Storage>(payload).map(ChangeEvent::Storage),
        _ => return None,
    };
    Some(event)
}

/// The playing content or the active source changed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContentChange {
    pub content_kind: Option<String>,
    pub service: Option<String>,
    pub source: Option<String>,
    pub output: Option<String>,
    pub uri: Option<String>,
    pub application_name: Option<String>,
    pub kind: Option<String>,
    pub media_type: Option<String>,
    pub parent_uri: Option<String>,
    pub state_info: Option<Value>,
}

impl Record for ContentChange {
    const NAME: &'static str = "ContentChange";
    const FIELDS: &'static [&'static str] = &[
        "contentKind",
        "service",
        "source",
        "output",
        "uri",
        "applicationName",
        "kind",
        "mediaType",
        "parentUri",
        "stateInfo",
    ];
}

impl ContentChange {
    /// The change is an input switch
    pub fn is_input(&self) -> bool {
        self.content_kind.as_deref() == Some("input")
    }
}

/// A setting changed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingChange {
    #[serde(rename = "titleTextID")]
    pub title_text_id: Option<String>,
    #[serde(rename = "guideTextID")]
    pub guide_text_id: Option<String>,
    pub is_available: Option<bool>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub title: Option<String>,
    pub api_mapping_update: Option<Value>,
    pub target: Option<String>,
    #[serde(deserialize_with = "string_like")]
    pub current_value: Option<String>,
}

impl Record for SettingChange {
    const NAME: &'static str = "SettingChange";
    const FIELDS: &'static [&'static str] = &[
        "titleTextID",
        "guideTextID",
        "isAvailable",
        "type",
        "title",
        "apiMappingUpdate",
        "target",
        "currentValue",
    ];
}

impl SettingChange {
    /// Lift `target` and `currentValue` out of `apiMappingUpdate`
    ///
    /// Directory entries carry no value and are left as they are.
    fn flatten(mut self) -> Self {
        if self.kind.as_deref() == Some("directory") {
            tracing::debug!("Got SettingChange for directory {:?}, ignoring", self.title_text_id);
            return self;
        }
        let Some(update) = &self.api_mapping_update else {
            tracing::warn!(
                "Got SettingChange for {:?} without apiMappingUpdate",
                self.title_text_id
            );
            return self;
        };

        let text = |v: &Value| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if let Some(target) = update.get("target").filter(|v| !v.is_null()) {
            self.target = Some(text(target));
        }
        if let Some(value) = update.get("currentValue").filter(|v| !v.is_null()) {
            self.current_value = Some(text(value));
        }
        self
    }
}

/// Software update availability changed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SoftwareUpdateChange {
    #[serde(deserialize_with = "string_like")]
    pub is_updatable: Option<String>,
    #[serde(deserialize_with = "nullable")]
    pub sw_info: Vec<SoftwareUpdateInfo>,
}

impl Record for SoftwareUpdateChange {
    const NAME: &'static str = "SoftwareUpdateChange";
    const FIELDS: &'static [&'static str] = &["isUpdatable", "swInfo"];
}

impl SoftwareUpdateChange {
    pub fn is_updatable(&self) -> bool {
        self.is_updatable.as_deref() == Some("true")
    }

    pub fn info(&self) -> Option<&SoftwareUpdateInfo> {
        self.sw_info.first()
    }
}

/// The set of usable playback functions changed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackFunctionChange {
    pub uri: Option<String>,
    pub output: Option<String>,
    #[serde(deserialize_with = "nullable")]
    pub functions: Vec<crate::types::PlaybackFunction>,
}

impl Record for PlaybackFunctionChange {
    const NAME: &'static str = "PlaybackFunctionChange";
    const FIELDS: &'static [&'static str] = &["uri", "output", "functions"];
}

#[derive(Debug, Deserialize)]
struct SubscriptionAck {
    #[serde(default, deserialize_with = "nullable")]
    enabled: Vec<NamedEntry>,
    #[serde(default, deserialize_with = "nullable")]
    disabled: Vec<NamedEntry>,
}

#[derive(Debug, Deserialize)]
struct NamedEntry {
    name: String,
}

/// Notification names enabled and disabled after a subscription call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionChange {
    pub enabled: Vec<String>,
    pub disabled: Vec<String>,
}

impl SubscriptionAck {
    fn into_change(self) -> SubscriptionChange {
        SubscriptionChange {
            enabled: self.enabled.into_iter().map(|e| e.name).collect(),
            disabled: self.disabled.into_iter().map(|e| e.name).collect(),
        }
    }
}

/// Connectivity of a listen session changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectChange {
    pub connected: bool,
    pub reason: Option<String>,
}
