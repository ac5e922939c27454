//! Typed helpers on [`Device`], each one call plus a decode.

use crate::device::Device;
use crate::error::{Result, ScalarError};
use crate::method::Args;
use crate::types::{
    make, make_list, Content, ContentInfo, InterfaceInfo, PlayInfo, Power, Scheme, Setting,
    SettingsEntry, SoftwareUpdateInfo, Source, Storage, SupportedFunctions, Sysinfo, Terminal,
    Volume,
};
use serde_json::{json, Value};
use std::collections::HashSet;

fn settings_args(target: &str, value: &str) -> Args {
    Args::positional(json!({"settings": [{"target": target, "value": value}]}))
}

fn empty_object() -> Args {
    Args::positional(json!({}))
}

impl Device {
    async fn list<T: crate::types::Record>(&self, service: &str, method: &str, args: Args) -> Result<Vec<T>> {
        let reply = self.call_operation(service, method, args).await?;
        make_list(&reply.into_list())
    }

    async fn single<T: crate::types::Record>(&self, service: &str, method: &str, args: Args) -> Result<T> {
        let reply = self.call_operation(service, method, args).await?;
        make(&reply.into_value())
    }

    async fn apply(&self, service: &str, method: &str, args: Args) -> Result<()> {
        self.call_operation(service, method, args).await.map(|_| ())
    }

    // ========== Power ==========

    pub async fn get_power(&self) -> Result<Power> {
        self.single("system", "getPowerStatus", Args::none()).await
    }

    /// Turn the device on or off
    pub async fn set_power(&self, on: bool) -> Result<()> {
        let status = if on { "active" } else { "off" };
        self.apply("system", "setPowerStatus", Args::none().with("status", status))
            .await
    }

    pub async fn get_power_settings(&self) -> Result<Vec<Setting>> {
        self.list("system", "getPowerSettings", empty_object()).await
    }

    pub async fn set_power_settings(&self, target: &str, value: &str) -> Result<()> {
        self.apply("system", "setPowerSettings", settings_args(target, value))
            .await
    }

    // ========== System ==========

    pub async fn get_googlecast_settings(&self) -> Result<Vec<Setting>> {
        self.list("system", "getWuTangInfo", empty_object()).await
    }

    pub async fn set_googlecast_settings(&self, target: &str, value: &str) -> Result<()> {
        self.apply("system", "setWuTangInfo", settings_args(target, value))
            .await
    }

    /// Raw settings tree
    pub async fn request_settings_tree(&self) -> Result<Value> {
        let reply = self
            .call_operation("system", "getSettingsTree", Args::none().with("usage", ""))
            .await?;
        Ok(reply.into_value())
    }

    /// Settings tree as typed entries
    pub async fn get_settings(&self) -> Result<Vec<SettingsEntry>> {
        let tree = self.request_settings_tree().await?;
        let entries = tree
            .get("settings")
            .and_then(Value::as_array)
            .ok_or_else(|| ScalarError::InvalidResponse(format!("settings tree without settings: {}", tree)))?;
        make_list(entries)
    }

    /// Name, timezone and similar settings
    pub async fn get_misc_settings(&self) -> Result<Vec<Setting>> {
        self.list("system", "getDeviceMiscSettings", Args::none().with("target", ""))
            .await
    }

    pub async fn set_misc_settings(&self, target: &str, value: &str) -> Result<()> {
        self.apply("system", "setDeviceMiscSettings", settings_args(target, value))
            .await
    }

    pub async fn get_interface_information(&self) -> Result<InterfaceInfo> {
        self.single("system", "getInterfaceInformation", Args::none())
            .await
    }

    pub async fn get_system_info(&self) -> Result<Sysinfo> {
        self.single("system", "getSystemInformation", Args::none()).await
    }

    pub async fn get_sleep_timer_settings(&self) -> Result<Vec<Setting>> {
        self.list("system", "getSleepTimerSettings", empty_object()).await
    }

    pub async fn get_storage_list(&self) -> Result<Vec<Storage>> {
        self.list("system", "getStorageList", empty_object()).await
    }

    pub async fn get_update_info(&self, from_network: bool) -> Result<SoftwareUpdateInfo> {
        let network = if from_network { "true" } else { "false" };
        self.single("system", "getSWUpdateInfo", Args::none().with("network", network))
            .await
    }

    /// Start a software update if one is available
    pub async fn activate_system_update(&self) -> Result<()> {
        self.apply("system", "actSWUpdate", Args::none()).await
    }

    /// Read one setting through the getter named in its `ApiMapping`
    pub async fn get_setting(&self, service: &str, method: &str, target: &str) -> Result<Value> {
        let reply = self
            .call_operation(service, method, Args::none().with("target", target))
            .await?;
        Ok(reply.into_value())
    }

    // ========== Inputs and zones ==========

    async fn external_terminals(&self) -> Result<Vec<Terminal>> {
        self.list("avContent", "getCurrentExternalTerminalsStatus", Args::none())
            .await
    }

    pub async fn get_inputs(&self) -> Result<Vec<Terminal>> {
        let terminals = self.external_terminals().await?;
        Ok(terminals.into_iter().filter(|t| !t.is_zone()).collect())
    }

    pub async fn get_zones(&self) -> Result<Vec<Terminal>> {
        let zones: Vec<Terminal> = self
            .external_terminals()
            .await?
            .into_iter()
            .filter(Terminal::is_zone)
            .collect();
        if zones.is_empty() {
            return Err(ScalarError::InvalidResponse("Device has no zones".to_string()));
        }
        Ok(zones)
    }

    pub async fn get_zone(&self, name: &str) -> Result<Terminal> {
        self.get_zones()
            .await?
            .into_iter()
            .find(|z| z.title() == name)
            .ok_or_else(|| ScalarError::InvalidArguments(format!("Unable to find zone {}", name)))
    }

    /// Play from an input, optionally on a given zone output
    pub async fn activate_input(&self, uri: &str, output: Option<&str>) -> Result<()> {
        let args = Args::none()
            .with("uri", uri)
            .with("output", output.unwrap_or_default());
        self.apply("avContent", "setPlayContent", args).await
    }

    pub async fn activate_zone(&self, uri: &str, active: bool) -> Result<()> {
        let args = Args::none()
            .with("active", if active { "active" } else { "inactive" })
            .with("uri", uri);
        self.apply("avContent", "setActiveTerminal", args).await
    }

    // ========== Playback ==========

    /// What is playing right now
    pub async fn get_play_info(&self) -> Result<PlayInfo> {
        let mut infos: Vec<PlayInfo> = self
            .list("avContent", "getPlayingContentInfo", empty_object())
            .await?;
        infos
            .pop()
            .ok_or_else(|| ScalarError::InvalidResponse("no playing content info".to_string()))
    }

    pub async fn get_bluetooth_settings(&self) -> Result<Vec<Setting>> {
        self.list("avContent", "getBluetoothSettings", empty_object()).await
    }

    pub async fn set_bluetooth_settings(&self, target: &str, value: &str) -> Result<()> {
        self.apply("avContent", "setBluetoothSettings", settings_args(target, value))
            .await
    }

    pub async fn get_supported_playback_functions(&self, uri: &str) -> Result<Vec<SupportedFunctions>> {
        self.list("avContent", "getSupportedPlaybackFunction", Args::none().with("uri", uri))
            .await
    }

    /// Playback functions available on an output; empty means the current one
    pub async fn get_available_playback_functions(&self, output: &str) -> Result<Value> {
        let reply = self
            .call_operation(
                "avContent",
                "getAvailablePlaybackFunction",
                Args::none().with("output", output),
            )
            .await?;
        Ok(reply.into_value())
    }

    /// Shuffle, repeat and similar
    pub async fn get_playback_settings(&self) -> Result<Vec<Setting>> {
        self.list("avContent", "getPlaybackModeSettings", empty_object())
            .await
    }

    pub async fn set_playback_settings(&self, target: &str, value: &str) -> Result<()> {
        self.apply("avContent", "setPlaybackModeSettings", settings_args(target, value))
            .await
    }

    pub async fn get_schemes(&self) -> Result<Vec<Scheme>> {
        self.list("avContent", "getSchemeList", Args::none()).await
    }

    pub async fn get_source_list(&self, scheme: &str) -> Result<Vec<Source>> {
        self.list("avContent", "getSourceList", Args::none().with("scheme", scheme))
            .await
    }

    pub async fn get_content_count(&self, source: &str) -> Result<ContentInfo> {
        let params = json!({"uri": source, "type": null, "target": "all", "view": "flat"});
        self.single("avContent", "getContentCount", Args::positional(params))
            .await
    }

    async fn list_content(&self, uri: &str) -> Result<Vec<Content>> {
        self.list("avContent", "getContentList", Args::none().with("uri", uri))
            .await
    }

    /// List the contents below `uri`, descending into directories
    pub async fn get_contents(&self, uri: &str) -> Result<Vec<Content>> {
        let mut visited = HashSet::from([uri.to_string()]);
        let mut pending = vec![self.list_content(uri).await?.into_iter()];
        let mut contents = Vec::new();

        loop {
            let next = match pending.last_mut() {
                Some(level) => level.next(),
                None => break,
            };
            match next {
                Some(content) if content.is_directory() => {
                    let Some(child) = content.uri.clone() else {
                        contents.push(content);
                        continue;
                    };
                    if visited.insert(child.clone()) {
                        pending.push(self.list_content(&child).await?.into_iter());
                    }
                }
                Some(content) => contents.push(content),
                None => {
                    pending.pop();
                }
            }
        }
        Ok(contents)
    }

    // ========== Audio ==========

    /// Volume of every output
    pub async fn get_volume_information(&self) -> Result<Vec<Volume>> {
        let volumes: Vec<Volume> = self
            .list("audio", "getVolumeInformation", empty_object())
            .await?;
        match volumes.len() {
            0 => tracing::warn!("Unable to get volume information"),
            1 => {}
            _ => tracing::debug!("The device seems to have more than one volume setting."),
        }
        Ok(volumes)
    }

    /// Set the volume of an output
    ///
    /// `volume` is absolute (`"25"`) or relative (`"+1"`, `"-2"`).
    pub async fn set_volume(&self, volume: &str, output: &str) -> Result<()> {
        let args = Args::none().with("volume", volume).with("output", output);
        self.apply("audio", "setAudioVolume", args).await
    }

    pub async fn set_mute(&self, mute: bool, output: &str) -> Result<()> {
        let args = Args::none()
            .with("mute", if mute { "on" } else { "off" })
            .with("output", output);
        self.apply("audio", "setAudioMute", args).await
    }

    pub async fn toggle_mute(&self, output: &str) -> Result<()> {
        let args = Args::none().with("mute", "toggle").with("output", output);
        self.apply("audio", "setAudioMute", args).await
    }

    /// Sound settings; an empty target returns all of them
    pub async fn get_sound_settings(&self, target: &str) -> Result<Vec<Setting>> {
        self.list("audio", "getSoundSettings", Args::positional(json!({"target": target})))
            .await
    }

    pub async fn set_sound_settings(&self, target: &str, value: &str) -> Result<()> {
        self.apply("audio", "setSoundSettings", settings_args(target, value))
            .await
    }

    pub async fn get_soundfield(&self) -> Result<Setting> {
        self.get_sound_settings("soundField")
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ScalarError::InvalidResponse("no soundField setting".to_string()))
    }

    pub async fn set_soundfield(&self, value: &str) -> Result<()> {
        self.set_sound_settings("soundField", value).await
    }

    pub async fn get_speaker_settings(&self) -> Result<Vec<Setting>> {
        self.list("audio", "getSpeakerSettings", empty_object()).await
    }

    pub async fn set_speaker_settings(&self, target: &str, value: &str) -> Result<()> {
        self.apply("audio", "setSpeakerSettings", settings_args(target, value))
            .await
    }

    pub async fn get_custom_eq(&self) -> Result<Value> {
        let reply = self
            .call_operation("audio", "getCustomEqualizerSettings", empty_object())
            .await?;
        Ok(reply.into_value())
    }

    pub async fn set_custom_eq(&self, target: &str, value: &str) -> Result<()> {
        self.apply("audio", "setCustomEqualizerSettings", settings_args(target, value))
            .await
    }
}
