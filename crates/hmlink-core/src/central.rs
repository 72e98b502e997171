// ── Central unit ──
//
// Top-level orchestrator. Owns the clients, both description caches,
// the visibility engine, and the device/entity graph; drives the
// start/stop lifecycle, device add/delete, event ingress, and callback
// dispatch.
//
// All graph mutation happens in sync sections behind coarse locks that
// are never held across an await point; RPC rounds complete first, then
// the result is applied.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::client::Client;
use crate::config::CentralConfig;
use crate::error::CentralError;
use crate::events::{
    EntityEvent, EventBroker, InterfaceEvent, InterfaceEventKind, SystemEvent,
};
use crate::model::{
    Channel, Device, DeviceDescription, EntityKey, EntityUsage, FirmwareInfo, GenericEntity,
    PARAM_PONG, ParamValue, ParamsetKey,
};
use crate::rpc::{ProgramData, RpcProxyFactory, SystemVariableData};
use crate::store::{DeviceDescriptionCache, ParamsetDescriptionCache};
use crate::visibility::ParameterVisibility;

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<CentralInner>`. Construct with
/// [`Central::new`], then [`start()`](Self::start) to connect clients,
/// build the entity graph, and begin keep-alive checks.
#[derive(Clone)]
pub struct Central {
    inner: Arc<CentralInner>,
}

struct CentralInner {
    config: CentralConfig,
    factory: Arc<dyn RpcProxyFactory>,
    clients: RwLock<BTreeMap<String, Arc<Client>>>,
    devices: RwLock<BTreeMap<String, Arc<Device>>>,
    device_descriptions: DeviceDescriptionCache,
    paramset_descriptions: ParamsetDescriptionCache,
    visibility: ParameterVisibility,
    events: Arc<EventBroker>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Central {
    /// Create a new central from configuration. Does NOT connect --
    /// call [`start()`](Self::start) to build clients and the graph.
    pub fn new(config: CentralConfig, factory: Arc<dyn RpcProxyFactory>) -> Self {
        let visibility =
            ParameterVisibility::from_lines(config.un_ignore.iter().map(String::as_str));
        Self {
            inner: Arc::new(CentralInner {
                config,
                factory,
                clients: RwLock::new(BTreeMap::new()),
                devices: RwLock::new(BTreeMap::new()),
                device_descriptions: DeviceDescriptionCache::new(),
                paramset_descriptions: ParamsetDescriptionCache::new(),
                visibility,
                events: Arc::new(EventBroker::new()),
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &CentralConfig {
        &self.inner.config
    }

    pub fn parameter_visibility(&self) -> &ParameterVisibility {
        &self.inner.visibility
    }

    pub fn device_descriptions(&self) -> &DeviceDescriptionCache {
        &self.inner.device_descriptions
    }

    pub fn paramset_descriptions(&self) -> &ParamsetDescriptionCache {
        &self.inner.paramset_descriptions
    }

    // ── Callback registration ────────────────────────────────────────

    pub fn register_system_event_callback(
        &self,
        callback: impl Fn(&SystemEvent) + Send + Sync + 'static,
    ) {
        self.inner.events.register_system_event_callback(callback);
    }

    pub fn register_entity_event_callback(
        &self,
        callback: impl Fn(&EntityEvent) + Send + Sync + 'static,
    ) {
        self.inner.events.register_entity_event_callback(callback);
    }

    pub fn register_interface_event_callback(
        &self,
        callback: impl Fn(&InterfaceEvent) + Send + Sync + 'static,
    ) {
        self.inner.events.register_interface_event_callback(callback);
    }

    /// Report an interface health signal through the callback surface.
    /// Used by listener collaborators for push-channel health.
    pub fn fire_interface_event(&self, interface_id: &str, kind: InterfaceEventKind) {
        self.inner.events.fire_interface_event(&InterfaceEvent {
            interface_id: interface_id.to_owned(),
            kind,
        });
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Connect clients, build the device graph from cached or freshly
    /// fetched descriptions, and begin periodic health checks.
    ///
    /// One interface failing to connect degrades only that interface;
    /// partial startup is valid and `has_clients()` reflects the
    /// successful subset.
    pub async fn start(&self) -> Result<(), CentralError> {
        if let Some(dir) = &self.inner.config.cache_dir {
            self.inner.device_descriptions.load(dir)?;
            self.inner.paramset_descriptions.load(dir)?;
        }

        if self.create_clients().await {
            let clients = self.clients_in_config_order();
            for client in &clients {
                self.refresh_missing_descriptions(client).await;
            }
            for client in &clients {
                self.create_devices(client.interface_id());
            }
            self.save_caches();
            self.spawn_connection_checkers().await;
        }

        info!(name = %self.inner.config.name, "central started");
        Ok(())
    }

    /// Gracefully cancel health checks and release all clients. Caches
    /// and entity identities persist across restart.
    pub async fn stop(&self) {
        self.inner.cancel.cancel();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }

        self.save_caches();

        let mut clients = self.inner.clients.write().expect("clients lock");
        for client in clients.values() {
            client.set_available(false);
        }
        clients.clear();
        debug!(name = %self.inner.config.name, "central stopped");
    }

    async fn create_clients(&self) -> bool {
        let mut created: Vec<Arc<Client>> = Vec::new();

        for interface in &self.inner.config.interfaces {
            let interface_id = self.inner.config.interface_id(&interface.name);
            if created.iter().any(|c| c.interface_id() == interface_id) {
                warn!(%interface_id, "duplicate interface name ignored");
                continue;
            }

            let proxy = match self.inner.factory.create(&interface_id, interface).await {
                Ok(proxy) => proxy,
                Err(err) => {
                    warn!(%interface_id, %err, "failed to create RPC proxy");
                    self.fire_interface_event(
                        &interface_id,
                        InterfaceEventKind::Proxy { available: false },
                    );
                    continue;
                }
            };

            let client = Arc::new(Client::new(
                interface_id.clone(),
                interface.clone(),
                proxy,
                self.inner.config.ping_pong_mismatch_count,
                self.inner.config.ping_pong_mismatch_ttl,
                Arc::clone(&self.inner.events),
            ));

            match client.connect(self.inner.config.init_timeout).await {
                Ok(()) => {
                    info!(%interface_id, "interface connected");
                    created.push(client);
                }
                Err(err) => {
                    warn!(%interface_id, %err, "interface connect failed");
                    self.fire_interface_event(
                        &interface_id,
                        InterfaceEventKind::Proxy { available: false },
                    );
                }
            }
        }

        let any = !created.is_empty();
        let mut clients = self.inner.clients.write().expect("clients lock");
        for client in created {
            clients.insert(client.interface_id().to_owned(), client);
        }
        any
    }

    async fn spawn_connection_checkers(&self) {
        let clients = self.clients_in_config_order();
        let mut handles = self.inner.task_handles.lock().await;
        for client in clients {
            handles.push(tokio::spawn(connection_checker_task(
                client,
                Arc::clone(&self.inner.events),
                self.inner.config.connection_checker_interval,
                self.inner.cancel.clone(),
            )));
        }
    }

    fn clients_in_config_order(&self) -> Vec<Arc<Client>> {
        let clients = self.inner.clients.read().expect("clients lock");
        self.inner
            .config
            .interfaces
            .iter()
            .filter_map(|i| clients.get(&self.inner.config.interface_id(&i.name)).cloned())
            .collect()
    }

    // ── Client access ────────────────────────────────────────────────

    pub fn has_clients(&self) -> bool {
        !self.inner.clients.read().expect("clients lock").is_empty()
    }

    /// All clients available (vacuously true without clients).
    pub fn available(&self) -> bool {
        self.inner
            .clients
            .read()
            .expect("clients lock")
            .values()
            .all(|c| c.is_available())
    }

    pub fn get_client(&self, interface_id: &str) -> Result<Arc<Client>, CentralError> {
        let clients = self.inner.clients.read().expect("clients lock");
        if clients.is_empty() {
            return Err(CentralError::NoClients);
        }
        clients
            .get(interface_id)
            .cloned()
            .ok_or_else(|| CentralError::UnknownInterface {
                interface_id: interface_id.to_owned(),
            })
    }

    /// The first connected client in configuration order; carries the
    /// hub-level operations (programs, system variables).
    fn primary_client(&self) -> Result<Arc<Client>, CentralError> {
        self.clients_in_config_order()
            .into_iter()
            .next()
            .ok_or(CentralError::NoClients)
    }

    // ── Discovery & device graph ─────────────────────────────────────

    async fn refresh_missing_descriptions(&self, client: &Arc<Client>) {
        let interface_id = client.interface_id();
        if !self.inner.device_descriptions.has_descriptions(interface_id) {
            match client.fetch_device_descriptions().await {
                Ok(descriptions) => {
                    debug!(interface_id, count = descriptions.len(), "fetched device descriptions");
                    self.inner
                        .device_descriptions
                        .add_device_descriptions(interface_id, &descriptions);
                }
                Err(err) => {
                    warn!(interface_id, %err, "device description fetch failed");
                    return;
                }
            }
        }
        self.fetch_missing_paramsets(client).await;
    }

    /// Fetch paramset descriptions for cached addresses that have none.
    async fn fetch_missing_paramsets(&self, client: &Arc<Client>) {
        let interface_id = client.interface_id();
        for address in self.inner.device_descriptions.record_addresses(interface_id) {
            if self.inner.paramset_descriptions.has_channel(interface_id, &address) {
                continue;
            }
            let Some(description) = self.inner.device_descriptions.get(interface_id, &address)
            else {
                continue;
            };
            for key in &description.paramsets {
                let Ok(paramset_key) = ParamsetKey::from_str(key) else {
                    continue; // LINK and friends are not modeled
                };
                match client.fetch_paramset_description(&address, paramset_key).await {
                    Ok(parameters) => {
                        self.inner.paramset_descriptions.add_paramset_description(
                            interface_id,
                            &address,
                            paramset_key,
                            parameters,
                        );
                    }
                    Err(err) => {
                        warn!(interface_id, %address, %paramset_key, %err, "paramset description fetch failed");
                    }
                }
            }
        }
    }

    /// Merge new descriptions and materialize devices for addresses not
    /// seen before. Idempotent on known addresses.
    pub async fn add_devices(
        &self,
        interface_id: &str,
        descriptions: Vec<DeviceDescription>,
    ) -> Result<(), CentralError> {
        let client = self.get_client(interface_id)?;
        self.inner
            .device_descriptions
            .add_device_descriptions(interface_id, &descriptions);
        self.fetch_missing_paramsets(&client).await;
        self.save_caches();
        self.create_devices(interface_id);
        Ok(())
    }

    /// Build device objects for cached addresses that have none yet, and
    /// fire `DevicesCreated` when anything new appeared.
    fn create_devices(&self, interface_id: &str) {
        let mut new_entities: Vec<EntityKey> = Vec::new();
        let mut created = 0usize;
        {
            let mut devices = self.inner.devices.write().expect("devices lock");
            for address in self.inner.device_descriptions.device_addresses(interface_id) {
                if devices.contains_key(&address) {
                    continue;
                }
                let Some(device) = self.build_device(interface_id, &address) else {
                    continue;
                };
                new_entities.extend(device.generic_entities().iter().map(|e| e.key()));
                devices.insert(address, Arc::new(device));
                created += 1;
            }
        }

        if created > 0 {
            new_entities.sort();
            debug!(interface_id, devices = created, entities = new_entities.len(), "devices created");
            self.inner.events.fire_system_event(&SystemEvent::DevicesCreated {
                interface_id: interface_id.to_owned(),
                new_entities,
            });
        }
    }

    fn build_device(&self, interface_id: &str, device_address: &str) -> Option<Device> {
        let description = self.inner.device_descriptions.get(interface_id, device_address)?;

        let channels: Vec<Channel> = self
            .inner
            .device_descriptions
            .channel_addresses(interface_id, device_address)
            .into_iter()
            .filter_map(|address| {
                let channel = self.inner.device_descriptions.get(interface_id, &address)?;
                Some(Channel {
                    no: channel.channel_no()?,
                    channel_type: channel.device_type,
                    address,
                })
            })
            .collect();

        let firmware = FirmwareInfo {
            firmware: description.firmware.clone(),
            available_firmware: description.available_firmware.clone(),
            updatable: description.firmware_updatable.unwrap_or(false),
            update_state: description.firmware_update_state.unwrap_or_default(),
        };

        let device = Device::new(
            interface_id,
            device_address,
            description.device_type.clone(),
            description.sub_type.clone(),
            firmware,
            channels,
        );

        // Device-level paramsets first (MASTER lives at the device address).
        self.create_entities_for_address(&device, &description.device_type, device_address, None);
        for channel in &device.channels {
            self.create_entities_for_address(
                &device,
                &description.device_type,
                &channel.address,
                Some(channel.no),
            );
        }
        Some(device)
    }

    fn create_entities_for_address(
        &self,
        device: &Device,
        device_type: &str,
        address: &str,
        channel_no: Option<u32>,
    ) {
        for paramset_key in [ParamsetKey::Values, ParamsetKey::Master] {
            let Some(parameters) = self.inner.paramset_descriptions.get_paramset_description(
                &device.interface_id,
                address,
                paramset_key,
            ) else {
                continue;
            };

            for (parameter, description) in parameters {
                let usage = match paramset_key {
                    ParamsetKey::Values => self.inner.visibility.usage_for(
                        device_type,
                        channel_no,
                        paramset_key,
                        &parameter,
                    ),
                    // MASTER parameters are configuration; they only become
                    // entities when an override names them.
                    ParamsetKey::Master => {
                        if self.inner.visibility.parameter_is_un_ignored(
                            device_type,
                            channel_no,
                            paramset_key,
                            &parameter,
                        ) {
                            EntityUsage::Entity
                        } else {
                            continue;
                        }
                    }
                };

                device.add_entity(Arc::new(GenericEntity::new(
                    device.interface_id.clone(),
                    address,
                    channel_no,
                    parameter,
                    paramset_key,
                    usage,
                    description.is_readable(),
                    description.is_writable(),
                )));
            }
        }
    }

    /// Remove devices with everything they own. Unknown addresses are a
    /// no-op, not an error.
    pub fn delete_devices(&self, interface_id: &str, addresses: &[String]) {
        let mut removed = Vec::new();
        {
            let mut devices = self.inner.devices.write().expect("devices lock");
            for address in addresses {
                let owned = devices
                    .get(address)
                    .is_some_and(|d| d.interface_id == interface_id);
                if owned {
                    devices.remove(address);
                    removed.push(address.clone());
                }
            }
        }

        if removed.is_empty() {
            return;
        }
        for address in &removed {
            self.inner.device_descriptions.remove_device(interface_id, address);
            self.inner.paramset_descriptions.remove_device(interface_id, address);
        }
        self.save_caches();
        debug!(interface_id, devices = removed.len(), "devices deleted");
        self.inner.events.fire_system_event(&SystemEvent::DevicesDeleted {
            interface_id: interface_id.to_owned(),
            addresses: removed,
        });
    }

    pub fn delete_device(&self, interface_id: &str, device_address: &str) {
        self.delete_devices(interface_id, &[device_address.to_owned()]);
    }

    // ── Event ingress ────────────────────────────────────────────────

    /// Single ingress point for unsolicited push notifications, called
    /// by the listener collaborator in controller-delivery order.
    pub fn event(
        &self,
        interface_id: &str,
        channel_address: &str,
        parameter: &str,
        value: ParamValue,
    ) {
        let client = self
            .inner
            .clients
            .read()
            .expect("clients lock")
            .get(interface_id)
            .cloned();
        let Some(client) = client else {
            trace!(interface_id, "event for unknown interface dropped");
            return;
        };
        client.mark_event(Utc::now());

        if parameter == PARAM_PONG {
            if let Some(token) = value.as_text() {
                client.handle_received_pong(token);
            }
            return;
        }

        match self.get_generic_entity(channel_address, parameter) {
            Some(entity) => self.apply_entity_value(&entity, value),
            None => {
                trace!(channel_address, parameter, "event for unmodeled parameter dropped");
            }
        }
    }

    fn apply_entity_value(&self, entity: &Arc<GenericEntity>, value: ParamValue) {
        entity.update_value(value.clone());
        self.inner.events.fire_entity_event(&EntityEvent {
            interface_id: entity.interface_id.clone(),
            channel_address: entity.channel_address.clone(),
            parameter: entity.parameter.clone(),
            value,
        });
    }

    // ── Graph accessors ──────────────────────────────────────────────

    pub fn get_device(&self, address: &str) -> Option<Arc<Device>> {
        self.inner.devices.read().expect("devices lock").get(address).cloned()
    }

    pub fn get_devices(&self) -> Vec<Arc<Device>> {
        self.inner.devices.read().expect("devices lock").values().cloned().collect()
    }

    pub fn device_count(&self) -> usize {
        self.inner.devices.read().expect("devices lock").len()
    }

    pub fn get_generic_entity(
        &self,
        channel_address: &str,
        parameter: &str,
    ) -> Option<Arc<GenericEntity>> {
        let device_address = channel_address.split(':').next().unwrap_or(channel_address);
        self.get_device(device_address)?
            .get_generic_entity(channel_address, parameter)
    }

    /// Visible entities only (suppressed usage filtered out).
    pub fn get_entities(&self) -> Vec<Arc<GenericEntity>> {
        self.collect_entities(|e| e.usage == EntityUsage::Entity)
    }

    /// Every materialized entity, suppressed ones included.
    pub fn get_all_entities(&self) -> Vec<Arc<GenericEntity>> {
        self.collect_entities(|_| true)
    }

    pub fn get_readable_generic_entities(&self) -> Vec<Arc<GenericEntity>> {
        self.collect_entities(|e| e.usage == EntityUsage::Entity && e.is_readable)
    }

    fn collect_entities(
        &self,
        keep: impl Fn(&GenericEntity) -> bool,
    ) -> Vec<Arc<GenericEntity>> {
        self.inner
            .devices
            .read()
            .expect("devices lock")
            .values()
            .flat_map(|d| d.generic_entities())
            .filter(|e| keep(e))
            .collect()
    }

    pub fn get_virtual_remotes(&self) -> Vec<Arc<Device>> {
        self.inner
            .devices
            .read()
            .expect("devices lock")
            .values()
            .filter(|d| d.is_virtual_remote())
            .cloned()
            .collect()
    }

    pub fn get_virtual_remote(&self, device_address: &str) -> Option<Arc<Device>> {
        self.get_device(device_address).filter(|d| d.is_virtual_remote())
    }

    // ── Hub-level operations ─────────────────────────────────────────

    pub async fn get_system_variable(&self, name: &str) -> Result<ParamValue, CentralError> {
        self.primary_client()?.get_system_variable(name).await
    }

    pub async fn set_system_variable(
        &self,
        name: &str,
        value: ParamValue,
    ) -> Result<(), CentralError> {
        self.primary_client()?.set_system_variable(name, value).await
    }

    pub async fn get_all_programs(
        &self,
        include_internal: bool,
    ) -> Result<Vec<ProgramData>, CentralError> {
        self.primary_client()?.get_all_programs(include_internal).await
    }

    pub async fn get_all_system_variables(
        &self,
        include_internal: bool,
    ) -> Result<Vec<SystemVariableData>, CentralError> {
        self.primary_client()?
            .get_all_system_variables(include_internal)
            .await
    }

    pub async fn execute_program(&self, pid: &str) -> Result<bool, CentralError> {
        self.primary_client()?.execute_program(pid).await
    }

    pub async fn set_install_mode(
        &self,
        interface_id: &str,
        on: bool,
        duration_secs: u32,
        mode: u32,
        device_address: Option<&str>,
    ) -> Result<(), CentralError> {
        self.get_client(interface_id)?
            .set_install_mode(on, duration_secs, mode, device_address)
            .await
    }

    // ── Bulk refresh & cache control ─────────────────────────────────

    /// Refresh live values for every readable VALUES parameter through
    /// the normal entity-update path. MASTER data is configuration and
    /// is not bulk-refreshed.
    pub async fn load_and_refresh_entity_data(
        &self,
        paramset_key: ParamsetKey,
    ) -> Result<(), CentralError> {
        if paramset_key == ParamsetKey::Master {
            return Ok(());
        }

        for (address, parameter) in self.inner.paramset_descriptions.all_readable_parameters() {
            let Some(entity) = self.get_generic_entity(&address, &parameter) else {
                continue;
            };
            if entity.paramset_key != ParamsetKey::Values {
                continue;
            }
            let Ok(client) = self.get_client(&entity.interface_id) else {
                continue;
            };
            match client.get_value(&address, ParamsetKey::Values, &parameter).await {
                Ok(value) => self.apply_entity_value(&entity, value),
                Err(err) => {
                    debug!(%address, %parameter, %err, "value refresh failed");
                }
            }
        }
        Ok(())
    }

    /// Wipe both description caches and rewrite the persisted files,
    /// forcing a full resync on the next start.
    pub fn clear_caches(&self) {
        self.inner.device_descriptions.clear();
        self.inner.paramset_descriptions.clear();
        self.save_caches();
    }

    fn save_caches(&self) {
        let Some(dir) = &self.inner.config.cache_dir else {
            return;
        };
        if let Err(err) = self.inner.device_descriptions.save(dir) {
            warn!(%err, "saving device descriptions failed");
        }
        if let Err(err) = self.inner.paramset_descriptions.save(dir) {
            warn!(%err, "saving paramset descriptions failed");
        }
    }
}

// ── Background tasks ─────────────────────────────────────────────────

/// Periodic keep-alive probing for one client. Availability flips are
/// reported through the interface-event callback surface; the interface
/// is never forcibly disconnected.
async fn connection_checker_task(
    client: Arc<Client>,
    events: Arc<EventBroker>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let was_available = client.is_available();
                let alive = client.probe(true).await;
                if alive != was_available {
                    if alive {
                        info!(interface_id = client.interface_id(), "interface recovered");
                    } else {
                        warn!(interface_id = client.interface_id(), "interface unavailable");
                    }
                    events.fire_interface_event(&InterfaceEvent {
                        interface_id: client.interface_id().to_owned(),
                        kind: InterfaceEventKind::Proxy { available: alive },
                    });
                }
            }
        }
    }
}
