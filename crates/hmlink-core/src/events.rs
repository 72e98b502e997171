// ── Typed events and callback dispatch ──
//
// A closed set of event variants with fixed payloads, one subscriber
// list per category. Callbacks run synchronously in registration order
// from the central's execution context.

use std::sync::RwLock;

use crate::model::{EntityKey, ParamValue};

/// Lifecycle events concerning the device/entity graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemEvent {
    /// New devices were materialized; carries the created entity keys.
    DevicesCreated {
        interface_id: String,
        new_entities: Vec<EntityKey>,
    },
    /// Devices (and everything they owned) were removed.
    DevicesDeleted {
        interface_id: String,
        addresses: Vec<String>,
    },
}

/// A state change applied to one generic entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityEvent {
    pub interface_id: String,
    pub channel_address: String,
    pub parameter: String,
    pub value: ParamValue,
}

/// Health signal for one interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceEvent {
    pub interface_id: String,
    pub kind: InterfaceEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterfaceEventKind {
    /// The inbound push channel's health, reported by the listener.
    Callback { available: bool },
    /// The outbound RPC channel's health.
    Proxy { available: bool },
    /// Pending keep-alive probes crossed the configured threshold.
    PendingPong { pong_mismatch_count: usize },
}

type SystemEventCallback = Box<dyn Fn(&SystemEvent) + Send + Sync>;
type EntityEventCallback = Box<dyn Fn(&EntityEvent) + Send + Sync>;
type InterfaceEventCallback = Box<dyn Fn(&InterfaceEvent) + Send + Sync>;

/// Subscriber registry shared by the central and its clients.
#[derive(Default)]
pub struct EventBroker {
    system: RwLock<Vec<SystemEventCallback>>,
    entity: RwLock<Vec<EntityEventCallback>>,
    interface: RwLock<Vec<InterfaceEventCallback>>,
}

impl std::fmt::Debug for EventBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBroker").finish_non_exhaustive()
    }
}

impl EventBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_system_event_callback(
        &self,
        callback: impl Fn(&SystemEvent) + Send + Sync + 'static,
    ) {
        self.system
            .write()
            .expect("system callback lock")
            .push(Box::new(callback));
    }

    pub fn register_entity_event_callback(
        &self,
        callback: impl Fn(&EntityEvent) + Send + Sync + 'static,
    ) {
        self.entity
            .write()
            .expect("entity callback lock")
            .push(Box::new(callback));
    }

    pub fn register_interface_event_callback(
        &self,
        callback: impl Fn(&InterfaceEvent) + Send + Sync + 'static,
    ) {
        self.interface
            .write()
            .expect("interface callback lock")
            .push(Box::new(callback));
    }

    pub fn fire_system_event(&self, event: &SystemEvent) {
        for callback in self.system.read().expect("system callback lock").iter() {
            callback(event);
        }
    }

    pub fn fire_entity_event(&self, event: &EntityEvent) {
        for callback in self.entity.read().expect("entity callback lock").iter() {
            callback(event);
        }
    }

    pub fn fire_interface_event(&self, event: &InterfaceEvent) {
        for callback in self.interface.read().expect("interface callback lock").iter() {
            callback(event);
        }
    }
}
