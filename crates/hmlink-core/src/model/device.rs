// ── Device / channel / entity graph ──
//
// Live model built from cached descriptions. Devices own channels and
// generic entities; entity value state sits behind interior mutability
// so the graph can be shared as `Arc` handles.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use super::description::{DeviceFirmwareState, ParamsetKey};
use super::value::ParamValue;

/// Device types that act as virtual remote controls on the controller.
pub const VIRTUAL_REMOTE_TYPES: &[&str] = &["HM-RCV-50", "HMW-RCV-50", "HmIP-RCV-50"];

/// Identity of a generic entity within a central: channel address + parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
    pub channel_address: String,
    pub parameter: String,
}

impl EntityKey {
    pub fn new(channel_address: impl Into<String>, parameter: impl Into<String>) -> Self {
        Self {
            channel_address: channel_address.into(),
            parameter: parameter.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.channel_address, self.parameter)
    }
}

/// How an entity surfaces to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum EntityUsage {
    /// Exposed as a first-class entity.
    Entity,
    /// Materialized for internal bookkeeping but suppressed from consumers.
    NoCreate,
}

#[derive(Debug, Default)]
struct EntityState {
    value: Option<ParamValue>,
    last_updated: Option<DateTime<Utc>>,
}

/// An individually addressable parameter exposed as a typed value.
#[derive(Debug)]
pub struct GenericEntity {
    pub interface_id: String,
    pub channel_address: String,
    /// `None` for device-level (channel-absent) parameters.
    pub channel_no: Option<u32>,
    pub parameter: String,
    pub paramset_key: ParamsetKey,
    pub usage: EntityUsage,
    pub is_readable: bool,
    pub is_writable: bool,
    state: RwLock<EntityState>,
}

impl GenericEntity {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        interface_id: impl Into<String>,
        channel_address: impl Into<String>,
        channel_no: Option<u32>,
        parameter: impl Into<String>,
        paramset_key: ParamsetKey,
        usage: EntityUsage,
        is_readable: bool,
        is_writable: bool,
    ) -> Self {
        Self {
            interface_id: interface_id.into(),
            channel_address: channel_address.into(),
            channel_no,
            parameter: parameter.into(),
            paramset_key,
            usage,
            is_readable,
            is_writable,
            state: RwLock::new(EntityState::default()),
        }
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.channel_address.clone(), self.parameter.clone())
    }

    /// The owning device address (channel address without the `:n` suffix).
    pub fn device_address(&self) -> &str {
        self.channel_address
            .split(':')
            .next()
            .unwrap_or(&self.channel_address)
    }

    pub fn value(&self) -> Option<ParamValue> {
        self.state.read().expect("entity state lock").value.clone()
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.state.read().expect("entity state lock").last_updated
    }

    pub(crate) fn update_value(&self, value: ParamValue) {
        let mut state = self.state.write().expect("entity state lock");
        state.value = Some(value);
        state.last_updated = Some(Utc::now());
    }
}

/// A numbered sub-unit of a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub address: String,
    pub no: u32,
    pub channel_type: String,
}

/// Firmware metadata carried by a device, refreshed from descriptions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FirmwareInfo {
    pub firmware: Option<String>,
    pub available_firmware: Option<String>,
    pub updatable: bool,
    pub update_state: DeviceFirmwareState,
}

/// A controller-advertised physical (or virtual) unit.
#[derive(Debug)]
pub struct Device {
    pub interface_id: String,
    pub address: String,
    pub device_type: String,
    pub sub_type: Option<String>,
    pub firmware: FirmwareInfo,
    pub channels: Vec<Channel>,
    entities: RwLock<HashMap<EntityKey, Arc<GenericEntity>>>,
}

impl Device {
    pub(crate) fn new(
        interface_id: impl Into<String>,
        address: impl Into<String>,
        device_type: impl Into<String>,
        sub_type: Option<String>,
        firmware: FirmwareInfo,
        channels: Vec<Channel>,
    ) -> Self {
        Self {
            interface_id: interface_id.into(),
            address: address.into(),
            device_type: device_type.into(),
            sub_type,
            firmware,
            channels,
            entities: RwLock::new(HashMap::new()),
        }
    }

    pub fn is_virtual_remote(&self) -> bool {
        VIRTUAL_REMOTE_TYPES.contains(&self.device_type.as_str())
    }

    pub(crate) fn add_entity(&self, entity: Arc<GenericEntity>) {
        self.entities
            .write()
            .expect("device entity lock")
            .insert(entity.key(), entity);
    }

    pub fn get_generic_entity(
        &self,
        channel_address: &str,
        parameter: &str,
    ) -> Option<Arc<GenericEntity>> {
        self.entities
            .read()
            .expect("device entity lock")
            .get(&EntityKey::new(channel_address, parameter))
            .cloned()
    }

    /// All entities of this device, suppressed ones included.
    pub fn generic_entities(&self) -> Vec<Arc<GenericEntity>> {
        self.entities
            .read()
            .expect("device entity lock")
            .values()
            .cloned()
            .collect()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.read().expect("device entity lock").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(channel_address: &str, parameter: &str) -> GenericEntity {
        GenericEntity::new(
            "central-BidCos-RF",
            channel_address,
            Some(1),
            parameter,
            ParamsetKey::Values,
            EntityUsage::Entity,
            true,
            false,
        )
    }

    #[test]
    fn entity_value_updates() {
        let e = entity("VCU1:1", "LEVEL");
        assert_eq!(e.value(), None);
        assert_eq!(e.last_updated(), None);

        e.update_value(ParamValue::Float(0.5));
        assert_eq!(e.value(), Some(ParamValue::Float(0.5)));
        assert!(e.last_updated().is_some());
    }

    #[test]
    fn entity_key_identity() {
        let e = entity("VCU1:1", "LEVEL");
        assert_eq!(e.key(), EntityKey::new("VCU1:1", "LEVEL"));
        assert_eq!(e.device_address(), "VCU1");
        assert_eq!(e.key().to_string(), "VCU1:1.LEVEL");
    }

    #[test]
    fn device_holds_entities() {
        let device = Device::new(
            "central-BidCos-RF",
            "VCU1",
            "HmIP-BSM",
            None,
            FirmwareInfo::default(),
            vec![Channel {
                address: "VCU1:1".into(),
                no: 1,
                channel_type: "SWITCH_CHANNEL".into(),
            }],
        );
        device.add_entity(Arc::new(entity("VCU1:1", "STATE")));
        assert_eq!(device.entity_count(), 1);
        assert!(device.get_generic_entity("VCU1:1", "STATE").is_some());
        assert!(device.get_generic_entity("VCU1:1", "LEVEL").is_none());
        assert!(!device.is_virtual_remote());
    }

    #[test]
    fn virtual_remote_detection() {
        let device = Device::new(
            "central-BidCos-RF",
            "VCU0000057",
            "HM-RCV-50",
            None,
            FirmwareInfo::default(),
            Vec::new(),
        );
        assert!(device.is_virtual_remote());
    }
}
