// ── Domain model ──
//
// Description records mirror the controller wire format; the device
// graph is the live, typed view the central maintains on top of them.

pub mod description;
pub mod device;
pub mod value;

pub use description::{
    DeviceDescription, DeviceFirmwareState, ParameterDescription, ParameterType, ParamsetKey,
    operations,
};
pub use device::{
    Channel, Device, EntityKey, EntityUsage, FirmwareInfo, GenericEntity, VIRTUAL_REMOTE_TYPES,
};
pub use value::ParamValue;

/// Parameter name carrying keep-alive probe responses.
pub const PARAM_PONG: &str = "PONG";

/// Availability parameters maintained on channel 0 of most devices.
pub const PARAM_UNREACH: &str = "UNREACH";
pub const PARAM_STICKY_UNREACH: &str = "STICKY_UNREACH";
pub const PARAM_CONFIG_PENDING: &str = "CONFIG_PENDING";
pub const PARAM_UPDATE_PENDING: &str = "UPDATE_PENDING";
