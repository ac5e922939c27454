use crate::config::DeviceConfig;
use crate::error::{Result, ScalarError};
use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// A payload record decoded from device responses
///
/// `FIELDS` lists the wire names the record knows about; [`make`] uses it to
/// report unknown and missing keys.
pub trait Record: DeserializeOwned {
    const NAME: &'static str;
    const FIELDS: &'static [&'static str];
}

/// Build a record from a JSON object
///
/// Unknown keys are reported and dropped, missing keys fall back to defaults.
pub fn make<T: Record>(value: &Value) -> Result<T> {
    let obj = value.as_object().ok_or_else(|| {
        ScalarError::InvalidResponse(format!("{} payload is not an object: {}", T::NAME, value))
    })?;

    let unknown: Vec<&str> = obj
        .keys()
        .map(String::as_str)
        .filter(|k| !T::FIELDS.contains(k))
        .collect();
    if !unknown.is_empty() {
        tracing::warn!("Got unknown fields for {}: {:?}", T::NAME, unknown);
    }

    let missing: Vec<&str> = T::FIELDS
        .iter()
        .copied()
        .filter(|f| !obj.contains_key(*f))
        .collect();
    if !missing.is_empty() {
        tracing::debug!("Missing fields for {}: {:?}", T::NAME, missing);
    }

    serde_json::from_value(value.clone())
        .map_err(|e| ScalarError::InvalidResponse(format!("{}: {}", T::NAME, e)))
}

/// Build a record from every entry of a list
pub fn make_list<T: Record>(values: &[Value]) -> Result<Vec<T>> {
    values.iter().map(make::<T>).collect()
}

/// Strings, numbers and booleans all read as text
pub(crate) fn string_like<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    })
}

/// `null` reads as the default value
pub(crate) fn nullable<'de, D, T>(d: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

fn is(value: &Option<String>, expected: &str) -> bool {
    value.as_deref() == Some(expected)
}

// ========== Power ==========

/// Power status
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Power {
    #[serde(deserialize_with = "string_like")]
    pub status: Option<String>,
    #[serde(deserialize_with = "string_like")]
    pub standby_detail: Option<String>,
}

impl Record for Power {
    const NAME: &'static str = "Power";
    const FIELDS: &'static [&'static str] = &["status", "standbyDetail"];
}

impl Power {
    pub fn is_on(&self) -> bool {
        is(&self.status, "active")
    }
}

impl fmt::Display for Power {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_on() {
            write!(f, "Power on")
        } else {
            write!(f, "Power off")
        }
    }
}

// ========== Volume ==========

/// Volume of one output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Volume {
    pub max_volume: Option<i64>,
    pub min_volume: Option<i64>,
    #[serde(deserialize_with = "string_like")]
    pub mute: Option<String>,
    #[serde(deserialize_with = "string_like")]
    pub output: Option<String>,
    pub step: Option<i64>,
    pub volume: Option<i64>,
}

impl Record for Volume {
    const NAME: &'static str = "Volume";
    const FIELDS: &'static [&'static str] =
        &["maxVolume", "minVolume", "mute", "output", "step", "volume"];
}

impl Volume {
    pub fn is_muted(&self) -> bool {
        is(&self.mute, "on") || is(&self.mute, "true")
    }

    /// Output URI, empty for the main output
    pub fn output(&self) -> &str {
        self.output.as_deref().unwrap_or_default()
    }
}

impl fmt::Display for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let volume = self.volume.unwrap_or_default();
        let max = self.max_volume.unwrap_or_default();
        match self.output().rfind('=') {
            Some(idx) if idx > 0 => write!(f, "Zone {} Volume: {}/{}", &self.output()[idx + 1..], volume, max)?,
            _ => write!(f, "Volume: {}/{}", volume, max)?,
        }
        if self.is_muted() {
            write!(f, " (muted)")?;
        }
        Ok(())
    }
}

// ========== Product and system information ==========

/// Generic product information
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InterfaceInfo {
    pub product_name: Option<String>,
    pub model_name: Option<String>,
    pub product_category: Option<String>,
    pub interface_version: Option<String>,
    pub server_name: Option<String>,
}

impl Record for InterfaceInfo {
    const NAME: &'static str = "InterfaceInfo";
    const FIELDS: &'static [&'static str] = &[
        "productName",
        "modelName",
        "productCategory",
        "interfaceVersion",
        "serverName",
    ];
}

/// System information including addresses and firmware version
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Sysinfo {
    pub bd_addr: Option<String>,
    pub mac_addr: Option<String>,
    pub version: Option<String>,
    pub wireless_mac_addr: Option<String>,
    pub bssid: Option<String>,
    pub ssid: Option<String>,
    #[serde(rename = "bleID")]
    pub ble_id: Option<String>,
}

impl Record for Sysinfo {
    const NAME: &'static str = "Sysinfo";
    const FIELDS: &'static [&'static str] = &[
        "bdAddr",
        "macAddr",
        "version",
        "wirelessMacAddr",
        "bssid",
        "ssid",
        "bleID",
    ];
}

/// Software update information
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SoftwareUpdateInfo {
    #[serde(deserialize_with = "string_like")]
    pub is_updatable: Option<String>,
    pub sw_info: Option<Value>,
    pub estimated_time_sec: Option<i64>,
    #[serde(deserialize_with = "string_like")]
    pub target: Option<String>,
    #[serde(deserialize_with = "string_like")]
    pub updatable_version: Option<String>,
    #[serde(deserialize_with = "string_like")]
    pub forced_update: Option<String>,
}

impl Record for SoftwareUpdateInfo {
    const NAME: &'static str = "SoftwareUpdateInfo";
    const FIELDS: &'static [&'static str] = &[
        "isUpdatable",
        "swInfo",
        "estimatedTimeSec",
        "target",
        "updatableVersion",
        "forcedUpdate",
    ];
}

impl SoftwareUpdateInfo {
    pub fn is_updatable(&self) -> bool {
        is(&self.is_updatable, "true")
    }

    pub fn is_forced(&self) -> bool {
        is(&self.forced_update, "true")
    }
}

// ========== Settings ==========

/// One option of a setting
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingCandidate {
    pub title: Option<String>,
    #[serde(deserialize_with = "string_like")]
    pub value: Option<String>,
    pub is_available: Option<bool>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub step: Option<f64>,
    #[serde(rename = "titleTextID")]
    pub title_text_id: Option<String>,
}

impl Record for SettingCandidate {
    const NAME: &'static str = "SettingCandidate";
    const FIELDS: &'static [&'static str] = &[
        "title",
        "value",
        "isAvailable",
        "min",
        "max",
        "step",
        "titleTextID",
    ];
}

/// A setting with its current value and candidates
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Setting {
    #[serde(deserialize_with = "string_like")]
    pub current_value: Option<String>,
    pub target: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    #[serde(deserialize_with = "nullable")]
    pub candidate: Vec<SettingCandidate>,
    pub is_available: Option<bool>,
    pub title: Option<String>,
    #[serde(rename = "titleTextID")]
    pub title_text_id: Option<String>,
    #[serde(rename = "deviceUIInfo")]
    pub device_ui_info: Option<String>,
    pub uri: Option<String>,
}

impl Record for Setting {
    const NAME: &'static str = "Setting";
    const FIELDS: &'static [&'static str] = &[
        "currentValue",
        "target",
        "type",
        "candidate",
        "isAvailable",
        "title",
        "titleTextID",
        "deviceUIInfo",
        "uri",
    ];
}

/// Getter/setter mapping of a settings tree entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiMapping {
    pub service: Option<String>,
    pub get_api: Option<Value>,
    pub set_api: Option<Value>,
    pub target: Option<String>,
    pub target_suppl: Option<Value>,
}

impl ApiMapping {
    /// Name of the getter method, if the mapping has one
    pub fn getter(&self) -> Option<&str> {
        self.get_api.as_ref()?.get("name")?.as_str()
    }
}

/// One node of the settings tree
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsEntry {
    pub is_available: Option<bool>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub api_mapping: Option<ApiMapping>,
    #[serde(deserialize_with = "nullable")]
    pub settings: Vec<SettingsEntry>,
    pub title: Option<String>,
    #[serde(rename = "titleTextID")]
    pub title_text_id: Option<String>,
    pub usage: Option<String>,
    #[serde(rename = "deviceUIInfo")]
    pub device_ui_info: Option<String>,
}

impl Record for SettingsEntry {
    const NAME: &'static str = "SettingsEntry";
    const FIELDS: &'static [&'static str] = &[
        "isAvailable",
        "type",
        "apiMapping",
        "settings",
        "title",
        "titleTextID",
        "usage",
        "deviceUIInfo",
    ];
}

impl SettingsEntry {
    pub fn is_directory(&self) -> bool {
        is(&self.kind, "directory")
    }
}

// ========== Playback ==========

/// Playback state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StateInfo {
    pub state: Option<String>,
    pub supplement: Option<String>,
}

/// Currently playing content
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayInfo {
    #[serde(deserialize_with = "nullable")]
    pub state_info: StateInfo,
    pub content_kind: Option<String>,
    pub uri: Option<String>,
    pub output: Option<String>,
    pub service: Option<String>,
    pub artist: Option<String>,
    pub album_name: Option<String>,
    pub title: Option<String>,
    pub duration_msec: Option<u64>,
    pub media_type: Option<String>,
    pub parent_uri: Option<String>,
    pub position_msec: Option<u64>,
    pub repeat_type: Option<String>,
    pub source: Option<String>,
}

impl Record for PlayInfo {
    const NAME: &'static str = "PlayInfo";
    const FIELDS: &'static [&'static str] = &[
        "stateInfo",
        "contentKind",
        "uri",
        "output",
        "service",
        "artist",
        "albumName",
        "title",
        "durationMsec",
        "mediaType",
        "parentUri",
        "positionMsec",
        "repeatType",
        "source",
    ];
}

impl PlayInfo {
    /// Nothing is being played
    pub fn is_idle(&self) -> bool {
        self.title.is_none()
    }

    pub fn state(&self) -> Option<&str> {
        self.state_info.state.as_deref()
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration_msec.map(Duration::from_millis)
    }

    pub fn position(&self) -> Option<Duration> {
        self.position_msec.map(Duration::from_millis)
    }
}

/// A playback function such as `play` or `pause`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackFunction {
    pub function: Option<String>,
}

/// Playback functions supported for one URI
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupportedFunctions {
    pub uri: Option<String>,
    #[serde(deserialize_with = "nullable")]
    pub functions: Vec<PlaybackFunction>,
}

impl Record for SupportedFunctions {
    const NAME: &'static str = "SupportedFunctions";
    const FIELDS: &'static [&'static str] = &["uri", "functions"];
}

// ========== Inputs, zones and sources ==========

/// External terminal: an input, or a zone output when `meta` says so
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Terminal {
    pub meta: Option<String>,
    pub connection: Option<String>,
    pub title: Option<String>,
    pub uri: Option<String>,
    pub active: Option<String>,
    pub label: Option<String>,
    pub icon_url: Option<String>,
    #[serde(deserialize_with = "nullable")]
    pub outputs: Vec<String>,
}

impl Record for Terminal {
    const NAME: &'static str = "Terminal";
    const FIELDS: &'static [&'static str] = &[
        "meta",
        "connection",
        "title",
        "uri",
        "active",
        "label",
        "iconUrl",
        "outputs",
    ];
}

impl Terminal {
    pub fn is_zone(&self) -> bool {
        self.meta
            .as_deref()
            .is_some_and(|m| m.contains("meta:zone:output"))
    }

    pub fn is_active(&self) -> bool {
        is(&self.active, "active")
    }

    /// Title without trailing padding
    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or_default().trim()
    }

    pub fn uri(&self) -> &str {
        self.uri.as_deref().unwrap_or_default()
    }
}

impl fmt::Display for Terminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (uri: {})", self.title(), self.uri())?;
        if self.is_active() {
            write!(f, " (active)")?;
        }
        Ok(())
    }
}

/// URI scheme
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scheme {
    pub scheme: Option<String>,
}

impl Record for Scheme {
    const NAME: &'static str = "Scheme";
    const FIELDS: &'static [&'static str] = &["scheme"];
}

/// Playback source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Source {
    pub title: Option<String>,
    pub source: Option<String>,
    pub icon_url: Option<String>,
    pub is_browsable: Option<bool>,
    pub is_playable: Option<bool>,
    pub meta: Option<String>,
    pub play_action: Option<String>,
    #[serde(deserialize_with = "nullable")]
    pub outputs: Vec<String>,
}

impl Record for Source {
    const NAME: &'static str = "Source";
    const FIELDS: &'static [&'static str] = &[
        "title",
        "source",
        "iconUrl",
        "isBrowsable",
        "isPlayable",
        "meta",
        "playAction",
        "outputs",
    ];
}

// ========== Storage and contents ==========

/// Connected storage device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Storage {
    pub device_name: Option<String>,
    pub uri: Option<String>,
    pub volume_label: Option<String>,
    #[serde(rename = "freeCapacityMB")]
    pub free_capacity_mb: Option<i64>,
    #[serde(rename = "systemAreaCapacityMB")]
    pub system_area_capacity_mb: Option<i64>,
    #[serde(rename = "wholeCapacityMB")]
    pub whole_capacity_mb: Option<i64>,
    #[serde(deserialize_with = "string_like")]
    pub formattable: Option<String>,
    #[serde(deserialize_with = "string_like")]
    pub formatting: Option<String>,
    #[serde(deserialize_with = "string_like")]
    pub is_available: Option<String>,
    #[serde(deserialize_with = "string_like")]
    pub mounted: Option<String>,
    pub permission: Option<String>,
    pub position: Option<String>,
}

impl Record for Storage {
    const NAME: &'static str = "Storage";
    const FIELDS: &'static [&'static str] = &[
        "deviceName",
        "uri",
        "volumeLabel",
        "freeCapacityMB",
        "systemAreaCapacityMB",
        "wholeCapacityMB",
        "formattable",
        "formatting",
        "isAvailable",
        "mounted",
        "permission",
        "position",
    ];
}

impl Storage {
    pub fn is_available(&self) -> bool {
        is(&self.is_available, "true")
    }

    pub fn is_mounted(&self) -> bool {
        is(&self.mounted, "mounted")
    }
}

/// Content count of a source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentInfo {
    pub capability: Option<Value>,
    pub count: Option<i64>,
}

impl Record for ContentInfo {
    const NAME: &'static str = "ContentInfo";
    const FIELDS: &'static [&'static str] = &["capability", "count"];
}

/// A content entry: file, directory, radio station...
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Content {
    #[serde(deserialize_with = "string_like")]
    pub is_browsable: Option<String>,
    pub uri: Option<String>,
    pub content_kind: Option<String>,
    #[serde(deserialize_with = "string_like")]
    pub is_playable: Option<String>,
    pub index: Option<i64>,
    pub title: Option<String>,
    pub folder_no: Option<i64>,
    pub file_no: Option<i64>,
    pub parent_uri: Option<String>,
    pub file_size_byte: Option<i64>,
    pub created_time: Option<String>,
    pub broadcast_freq_band: Option<String>,
    pub broadcast_freq: Option<i64>,
}

impl Record for Content {
    const NAME: &'static str = "Content";
    const FIELDS: &'static [&'static str] = &[
        "isBrowsable",
        "uri",
        "contentKind",
        "isPlayable",
        "index",
        "title",
        "folderNo",
        "fileNo",
        "parentUri",
        "fileSizeByte",
        "createdTime",
        "broadcastFreqBand",
        "broadcastFreq",
    ];
}

impl Content {
    /// Directory that can be listed further
    pub fn is_directory(&self) -> bool {
        self.content_kind.as_deref() == Some("directory") && self.index.unwrap_or(-1) >= 0
    }
}

// ========== LAN discovery ==========

/// A device located by a LAN discovery mechanism
///
/// Only the endpoint is used; the API surface always comes from the device's own
/// discovery handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    pub name: String,
    pub model_number: String,
    pub endpoint: String,
    pub services: Vec<String>,
}

impl DiscoveredDevice {
    /// Connect to this device and run discovery
    pub async fn connect(&self, config: DeviceConfig) -> Result<crate::device::Device> {
        let endpoint = crate::protocol::Endpoint::new(&self.endpoint)?;
        crate::device::Device::connect(endpoint, config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_make_tolerates_unknown_and_missing() {
        let power: Power = make(&json!({"status": "active", "somethingNew": 1})).unwrap();
        assert!(power.is_on());
        assert_eq!(power.standby_detail, None);
        assert_eq!(power.to_string(), "Power on");
    }

    #[test]
    fn test_make_rejects_non_object() {
        assert!(matches!(
            make::<Power>(&json!([1, 2])),
            Err(ScalarError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_volume_display() {
        let volume: Volume = make(&json!({
            "volume": 12, "maxVolume": 50, "minVolume": 0, "step": 1,
            "mute": "on", "output": "extOutput:zone?zone=2"
        }))
        .unwrap();
        assert!(volume.is_muted());
        assert_eq!(volume.to_string(), "Zone 2 Volume: 12/50 (muted)");
    }

    #[test]
    fn test_setting_with_null_candidates() {
        let setting: Setting = make(&json!({
            "target": "soundField", "currentValue": "movie", "candidate": null, "type": "enumTarget"
        }))
        .unwrap();
        assert!(setting.candidate.is_empty());
        assert_eq!(setting.kind.as_deref(), Some("enumTarget"));
    }

    #[test]
    fn test_numeric_current_value_reads_as_text() {
        let setting: Setting = make(&json!({"target": "sleep", "currentValue": 30})).unwrap();
        assert_eq!(setting.current_value.as_deref(), Some("30"));
    }

    #[test]
    fn test_settings_tree_recursion() {
        let entry: SettingsEntry = make(&json!({
            "type": "directory",
            "title": "Sound",
            "settings": [{
                "type": "enumTarget",
                "title": "Sound Field",
                "apiMapping": {
                    "service": "audio",
                    "getApi": {"name": "getSoundSettings", "version": "1.1"},
                    "target": "soundField"
                }
            }]
        }))
        .unwrap();
        assert!(entry.is_directory());
        let child = &entry.settings[0];
        assert_eq!(
            child.api_mapping.as_ref().and_then(ApiMapping::getter),
            Some("getSoundSettings")
        );
    }

    #[test]
    fn test_terminal_zone_detection() {
        let zone: Terminal = make(&json!({
            "meta": "meta:zone:output", "title": "Zone 2  ", "uri": "extOutput:zone?zone=2", "active": "active"
        }))
        .unwrap();
        assert!(zone.is_zone());
        assert!(zone.is_active());
        assert_eq!(zone.title(), "Zone 2");
    }

    #[test]
    fn test_play_info_durations() {
        let info: PlayInfo = make(&json!({
            "stateInfo": {"state": "PLAYING"}, "title": "Song", "durationMsec": 2000, "positionMsec": 500
        }))
        .unwrap();
        assert!(!info.is_idle());
        assert_eq!(info.state(), Some("PLAYING"));
        assert_eq!(info.duration(), Some(Duration::from_secs(2)));
    }
}
