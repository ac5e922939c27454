use crate::config::DeviceConfig;
use crate::connection::Transport;
use crate::dispatch::{Callback, Dispatcher};
use crate::error::{Result, ScalarError};
use crate::method::Args;
use crate::notification::{ChangeEvent, EventKind, Notification};
use crate::protocol::{Endpoint, IdGenerator, Reply, Request};
use crate::service::{Service, ServiceInfo};
use crate::subscription::EventReceiver;
use futures_util::future::join_all;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinSet;

/// Session lifecycle of a [`Device`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Unconnected,
    Discovering,
    Ready,
    Listening,
    Closed,
}

/// A session with one device
///
/// Create with [`Device::connect`], or [`Device::new`] followed by
/// [`Device::discover`]. After discovery every namespace the device reported is
/// reachable through [`Device::call_operation`] and the typed helpers.
pub struct Device {
    endpoint: Endpoint,
    config: DeviceConfig,
    transport: Transport,
    ids: IdGenerator,
    services: BTreeMap<String, Arc<Service>>,
    dispatcher: Arc<Dispatcher>,
    state: Mutex<DeviceState>,
    stop_tx: watch::Sender<bool>,
}

impl Device {
    pub fn new(endpoint: Endpoint, config: DeviceConfig) -> Result<Self> {
        if let Some(protocol) = config.force_protocol {
            tracing::warn!("Forcing protocol {}", protocol);
        }
        tracing::debug!("Endpoint: {}, guide endpoint: {}", endpoint.base(), endpoint.guide());

        Ok(Self {
            transport: Transport::new(&config)?,
            endpoint,
            config,
            ids: IdGenerator::new(),
            services: BTreeMap::new(),
            dispatcher: Arc::new(Dispatcher::new()),
            state: Mutex::new(DeviceState::Unconnected),
            stop_tx: watch::Sender::new(false),
        })
    }

    /// Create a session and run discovery
    pub async fn connect(endpoint: Endpoint, config: DeviceConfig) -> Result<Self> {
        let mut device = Self::new(endpoint, config)?;
        device.discover().await?;
        Ok(device)
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn state(&self) -> DeviceState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: DeviceState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state() {
            DeviceState::Closed => Err(ScalarError::Closed),
            _ => Ok(()),
        }
    }

    /// Run the discovery handshake and rebuild the service registry
    ///
    /// Namespaces that fail their own discovery are left out. Failure of the
    /// initial namespace listing is returned.
    pub async fn discover(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.set_state(DeviceState::Discovering);

        let infos = match self.request_supported_api_info().await {
            Ok(infos) => infos,
            Err(e) => {
                self.set_state(DeviceState::Unconnected);
                return Err(e);
            }
        };
        tracing::debug!("Got {} services", infos.len());

        let results = join_all(infos.iter().map(|info| {
            Service::discover(
                info,
                &self.endpoint,
                &self.transport,
                &self.ids,
                self.config.force_protocol,
            )
        }))
        .await;

        let mut services = BTreeMap::new();
        for (info, result) in infos.iter().zip(results) {
            match result {
                Ok(service) => {
                    services.insert(info.service.clone(), Arc::new(service));
                }
                Err(e) => tracing::warn!("Unable to create service {}: {}", info.service, e),
            }
        }

        tracing::info!(
            "Discovered {} services at {}: {:?}",
            services.len(),
            self.endpoint.base(),
            services.keys().collect::<Vec<_>>()
        );
        self.services = services;
        self.set_state(DeviceState::Ready);
        Ok(())
    }

    async fn request_supported_api_info(&self) -> Result<Vec<ServiceInfo>> {
        let request = Request::new("getSupportedApiInfo", "1.0", self.ids.next_id())
            .with_params(vec![json!({})]);
        let response = self.transport.unary(self.endpoint.guide(), &request).await?;
        let reply = Reply::from_response(&request.method, response)?;

        let mut infos = Vec::new();
        for entry in reply.into_list() {
            match serde_json::from_value::<ServiceInfo>(entry.clone()) {
                Ok(info) => infos.push(info),
                Err(e) => tracing::warn!("Ignoring malformed service entry {}: {}", entry, e),
            }
        }
        Ok(infos)
    }

    pub fn services(&self) -> &BTreeMap<String, Arc<Service>> {
        &self.services
    }

    pub fn service_names(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }

    pub fn service(&self, name: &str) -> Result<&Service> {
        self.services
            .get(name)
            .map(Arc::as_ref)
            .ok_or_else(|| ScalarError::ServiceNotPresent(name.to_string()))
    }

    /// Call any discovered method
    pub async fn call_operation(&self, service: &str, method: &str, args: Args) -> Result<Reply> {
        self.ensure_open()?;
        self.service(service)?.invoke(method, args).await
    }

    /// Call an arbitrary method with a raw parameter value
    ///
    /// Objects and other values are sent as the single positional parameter;
    /// `null` sends no parameters.
    pub async fn raw_command(&self, service: &str, method: &str, params: Value) -> Result<Reply> {
        tracing::info!("Calling {}.{}({})", service, method, params);
        self.call_operation(service, method, Args::from(params)).await
    }

    /// Switch the active signature version of one method
    pub fn use_method_version(&mut self, service: &str, method: &str, version: &str) -> Result<()> {
        let entry = self
            .services
            .get_mut(service)
            .ok_or_else(|| ScalarError::ServiceNotPresent(service.to_string()))?;
        Arc::make_mut(entry).use_method_version(method, version)
    }

    /// Every notification descriptor offered by the device
    pub fn get_notifications(&self) -> Vec<Notification> {
        self.services
            .values()
            .flat_map(|s| s.notifications().iter().cloned())
            .collect()
    }

    /// Register a callback for one kind of event
    pub fn on_notification(&self, kind: EventKind, callback: Callback) {
        self.dispatcher.register(kind, callback);
    }

    pub fn clear_notification_callbacks(&self) {
        self.dispatcher.clear();
    }

    /// Receive every dispatched event through a channel
    pub fn subscribe(&self) -> EventReceiver {
        self.dispatcher.subscribe()
    }

    /// Listen for notifications from every service until stopped
    ///
    /// Opens one duplex session per service with notifications. Events go to the
    /// callbacks registered for their kind, or to `fallback` when there are none.
    /// When a session fails the others are stopped and a single connectivity-lost
    /// event is dispatched before this returns `Ok(())`.
    pub async fn listen_notifications(&self, fallback: Option<Callback>) -> Result<()> {
        let previous = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let previous = *state;
            match previous {
                DeviceState::Closed => return Err(ScalarError::Closed),
                DeviceState::Listening => return Err(ScalarError::AlreadyListening),
                _ => {}
            }
            if self.stop_tx.send_replace(false) {
                tracing::debug!("Stop was requested before listening started");
                return Ok(());
            }
            *state = DeviceState::Listening;
            previous
        };
        let stop_rx = self.stop_tx.subscribe();

        let mut tasks = JoinSet::new();
        for service in self.services.values().filter(|s| !s.notifications().is_empty()) {
            let service = service.clone();
            let dispatcher = self.dispatcher.clone();
            let fallback = fallback.clone();
            let mut stop = stop_rx.clone();

            tasks.spawn(async move {
                let mut sink = |event: ChangeEvent| {
                    dispatcher.dispatch(&event, fallback.as_ref());
                };
                let result = service.listen_all_notifications(&mut stop, &mut sink).await;
                (service.name().to_string(), result)
            });
        }

        let mut failure = None;
        while let Some(joined) = tasks.join_next().await {
            let (name, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) => (
                    "<task>".to_string(),
                    Err(ScalarError::Protocol(format!("listen task ended abnormally: {}", e))),
                ),
            };

            match result {
                Ok(()) => tracing::debug!("Stopped listening on {}", name),
                Err(e) if failure.is_none() => {
                    tracing::error!("Listening on {} failed: {}", name, e);
                    self.dispatcher
                        .dispatch(&ChangeEvent::connection_lost(&e), fallback.as_ref());
                    failure = Some(e);
                    self.stop_listen_notifications();
                }
                Err(e) => tracing::debug!("Listening on {} also ended with: {}", name, e),
            }
        }

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == DeviceState::Listening {
            *state = previous;
        }
        self.stop_tx.send_replace(false);
        Ok(())
    }

    /// Ask every listen session to stop
    ///
    /// A frame already being read may still be delivered. Called while not
    /// listening, the stop is kept and ends the next `listen_notifications` call
    /// right away.
    pub fn stop_listen_notifications(&self) {
        tracing::debug!("Stopping listening for notifications..");
        self.stop_tx.send_replace(true);
    }

    /// End the session; later calls fail with `Closed`
    pub fn close(&self) {
        self.stop_listen_notifications();
        self.set_state(DeviceState::Closed);
        tracing::info!("Closed session with {}", self.endpoint.base());
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("endpoint", &self.endpoint.base().as_str())
            .field("state", &self.state())
            .field("services", &self.services.keys().collect::<Vec<_>>())
            .finish()
    }
}
