// ── Controller description records ──
//
// Raw capability records as advertised by the controller. Field names
// follow the controller's UPPERCASE wire keys so cached files stay
// byte-compatible with what the RPC layer hands over.

use serde::{Deserialize, Serialize};

use super::value::ParamValue;

/// Paramset group a parameter belongs to.
///
/// `VALUES` holds live state, `MASTER` holds device configuration.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum ParamsetKey {
    Master,
    Values,
}

/// Firmware rollout state reported per device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceFirmwareState {
    #[default]
    #[serde(rename = "UP_TO_DATE")]
    UpToDate,
    #[serde(rename = "NEW_FIRMWARE_AVAILABLE")]
    NewFirmwareAvailable,
    #[serde(rename = "READY_FOR_UPDATE")]
    ReadyForUpdate,
    #[serde(rename = "DO_UPDATE_PENDING")]
    DoUpdatePending,
    #[serde(rename = "PERFORMING_UPDATE")]
    PerformingUpdate,
}

/// One device- or channel-level description record.
///
/// Device-level records have an address without `:`; channel records are
/// `device_address:channel_no` and point back via `parent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescription {
    #[serde(rename = "ADDRESS")]
    pub address: String,
    #[serde(rename = "TYPE")]
    pub device_type: String,
    #[serde(rename = "PARENT", default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(rename = "PARENT_TYPE", default, skip_serializing_if = "Option::is_none")]
    pub parent_type: Option<String>,
    #[serde(rename = "CHILDREN", default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<String>,
    /// Paramset keys this record advertises (`VALUES`, `MASTER`, ...).
    #[serde(rename = "PARAMSETS", default, skip_serializing_if = "Vec::is_empty")]
    pub paramsets: Vec<String>,
    #[serde(rename = "SUBTYPE", default, skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<String>,
    #[serde(rename = "FIRMWARE", default, skip_serializing_if = "Option::is_none")]
    pub firmware: Option<String>,
    #[serde(
        rename = "AVAILABLE_FIRMWARE",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub available_firmware: Option<String>,
    #[serde(rename = "UPDATABLE", default, skip_serializing_if = "Option::is_none")]
    pub firmware_updatable: Option<bool>,
    #[serde(
        rename = "FIRMWARE_UPDATE_STATE",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub firmware_update_state: Option<DeviceFirmwareState>,
}

impl DeviceDescription {
    /// Whether this record describes a device (as opposed to a channel).
    pub fn is_device(&self) -> bool {
        !self.address.contains(':')
    }

    /// The owning device address (identity for device-level records).
    pub fn device_address(&self) -> &str {
        self.address.split(':').next().unwrap_or(&self.address)
    }

    /// Channel number for channel-level records, `None` for devices.
    pub fn channel_no(&self) -> Option<u32> {
        self.address.split_once(':').and_then(|(_, no)| no.parse().ok())
    }
}

/// Operation bits in a parameter description's `OPERATIONS` mask.
pub mod operations {
    pub const READ: u8 = 1;
    pub const WRITE: u8 = 2;
    pub const EVENT: u8 = 4;
}

/// Primitive type of a described parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum ParameterType {
    /// Trigger-style parameters (buttons); written, never read back.
    Action,
    Bool,
    Enum,
    Float,
    Integer,
    String,
}

/// One parameter's description inside a paramset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDescription {
    #[serde(rename = "TYPE")]
    pub parameter_type: ParameterType,
    #[serde(rename = "OPERATIONS", default)]
    pub operations: u8,
    #[serde(rename = "FLAGS", default)]
    pub flags: u8,
    #[serde(rename = "DEFAULT", default, skip_serializing_if = "Option::is_none")]
    pub default: Option<ParamValue>,
    #[serde(rename = "MIN", default, skip_serializing_if = "Option::is_none")]
    pub min: Option<ParamValue>,
    #[serde(rename = "MAX", default, skip_serializing_if = "Option::is_none")]
    pub max: Option<ParamValue>,
    #[serde(rename = "UNIT", default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(rename = "VALUE_LIST", default, skip_serializing_if = "Option::is_none")]
    pub value_list: Option<Vec<String>>,
}

impl ParameterDescription {
    pub fn is_readable(&self) -> bool {
        self.operations & operations::READ != 0
    }

    pub fn is_writable(&self) -> bool {
        self.operations & operations::WRITE != 0
    }

    pub fn is_event(&self) -> bool {
        self.operations & operations::EVENT != 0
    }
}
