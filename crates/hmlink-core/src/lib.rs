// hmlink-core: Central orchestration layer between RPC transports and
// consumers. Discovers devices, maintains the live entity graph, keeps
// interfaces health-checked, and applies visibility overrides.

pub mod central;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod model;
pub mod rpc;
pub mod store;
pub mod visibility;

// ── Primary re-exports ──────────────────────────────────────────────
pub use central::Central;
pub use client::{Client, PONG_TOKEN_TS_FORMAT, PingPongCache};
pub use config::{CentralConfig, InterfaceConfig};
pub use error::CentralError;
pub use events::{
    EntityEvent, EventBroker, InterfaceEvent, InterfaceEventKind, SystemEvent,
};
pub use rpc::{ProgramData, RpcError, RpcProxy, RpcProxyFactory, SystemVariableData};
pub use store::{DeviceDescriptionCache, ParamsetDescriptionCache};
pub use visibility::{ParameterVisibility, RuleParseError, UnignoreRule};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    Channel, Device, DeviceDescription, DeviceFirmwareState, EntityKey, EntityUsage,
    FirmwareInfo, GenericEntity, ParamValue, ParameterDescription, ParameterType, ParamsetKey,
    VIRTUAL_REMOTE_TYPES,
};
