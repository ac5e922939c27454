//! Client library for the Scalar Web API spoken by networked audio devices
//!
//! The API surface is not fixed: every device reports the namespaces it serves,
//! and each namespace reports its methods, their versions and the push
//! notifications it can emit. This library discovers that surface at connect
//! time and then lets you:
//!
//! - Call any discovered method, over HTTP POST or WebSocket as the device prefers
//! - Switch between method versions
//! - Use typed helpers for power, volume, inputs, zones, settings and content
//! - Listen for push notifications and route them to per-kind callbacks
//!
//! # Quick Start
//!
//! ```no_run
//! use scalarweb::{Device, DeviceConfig, Endpoint};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let endpoint = Endpoint::new("http://192.168.1.20:10000/sony")?;
//!     let device = Device::connect(endpoint, DeviceConfig::from_env()).await?;
//!
//!     println!("{}", device.get_power().await?);
//!     for volume in device.get_volume_information().await? {
//!         println!("{}", volume);
//!     }
//!
//!     device.set_volume("+1", "").await?;
//!     Ok(())
//! }
//! ```
//!
//! # Notifications
//!
//! ```no_run
//! use scalarweb::{callback, ChangeEvent, Device, DeviceConfig, Endpoint, EventKind};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let endpoint = Endpoint::new("http://192.168.1.20:10000/sony")?;
//!     let device = Arc::new(Device::connect(endpoint, DeviceConfig::default()).await?);
//!
//!     device.on_notification(
//!         EventKind::Volume,
//!         callback(|event| {
//!             if let ChangeEvent::Volume(volume) = event {
//!                 println!("{}", volume);
//!             }
//!             Ok(())
//!         }),
//!     );
//!
//!     let listener = device.clone();
//!     let task = tokio::spawn(async move { listener.listen_notifications(None).await });
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(30)).await;
//!     device.stop_listen_notifications();
//!     task.await??;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Connection**: unary (HTTP POST) and duplex (WebSocket) exchanges
//! - **Signature / Method**: versioned method shapes and calls
//! - **Service**: one namespace, its sub-protocol and method registry
//! - **Notification / Dispatch**: push event decoding and callback fan-out
//! - **Device**: discovery handshake, session lifecycle and typed helpers

mod config;
mod connection;
mod controller;
mod device;
mod dispatch;
mod error;
mod method;
mod notification;
mod operations;
mod protocol;
mod service;
mod signature;
mod subscription;
mod types;

// Public exports
pub use config::DeviceConfig;
pub use connection::Transport;
pub use controller::{connect_with_fallback, Controller};
pub use device::{Device, DeviceState};
pub use dispatch::{callback, BoxError, Callback, Dispatcher};
pub use error::{DeviceError, DeviceErrorCode, Result, ScalarError};
pub use method::{Args, Method};
pub use notification::{
    ChangeEvent, ConnectChange, ContentChange, EventKind, Notification, PlaybackFunctionChange,
    SettingChange, SoftwareUpdateChange, SubscriptionChange,
};
pub use protocol::{websocket_url, Endpoint, IdGenerator, ProtocolType, Reply, Request};
pub use service::{ApiInfo, Service, ServiceInfo};
pub use signature::{compare_versions, Shape, Signature, TypeTag};
pub use subscription::EventReceiver;
pub use types::{
    make, make_list, ApiMapping, Content, ContentInfo, DiscoveredDevice, InterfaceInfo, PlayInfo,
    PlaybackFunction, Power, Record, Scheme, Setting, SettingCandidate, SettingsEntry,
    SoftwareUpdateInfo, Source, StateInfo, Storage, SupportedFunctions, Sysinfo, Terminal, Volume,
};
