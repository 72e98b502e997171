// ── RPC transport boundary ──
//
// The core depends only on this method-shaped contract. Wire encoding,
// sessions, and connection pooling live in transport crates that
// implement `RpcProxy`; tests drive the central with in-process fakes.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::InterfaceConfig;
use crate::model::{DeviceDescription, ParamValue, ParameterDescription, ParamsetKey};

/// Transport-layer failure, translated into `CentralError` by clients.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("endpoint unreachable: {reason}")]
    Unreachable { reason: String },

    #[error("request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// The controller answered but rejected or garbled the call.
    #[error("protocol fault: {message}")]
    Protocol { message: String },

    #[error("unknown remote object: {address}")]
    UnknownObject { address: String },
}

/// One program record as reported by the controller logic layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramData {
    pub pid: String,
    pub name: String,
    pub is_active: bool,
    pub is_internal: bool,
    pub last_execute_time: String,
}

/// One system variable record.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemVariableData {
    pub name: String,
    pub value: ParamValue,
    pub unit: Option<String>,
}

/// Live RPC channel for a single interface.
///
/// Every method suspends until round-trip completion or the transport's
/// configured timeout. Implementations must be safe to share across
/// tasks behind an `Arc`.
#[async_trait]
pub trait RpcProxy: Send + Sync {
    /// Keep-alive probe. `caller_id` is echoed back by the controller in
    /// a `PONG` event, so it doubles as the probe token.
    async fn ping(&self, caller_id: &str) -> Result<(), RpcError>;

    async fn set_value(
        &self,
        channel_address: &str,
        paramset_key: ParamsetKey,
        parameter: &str,
        value: ParamValue,
    ) -> Result<(), RpcError>;

    async fn put_paramset(
        &self,
        address: &str,
        paramset_key: ParamsetKey,
        values: HashMap<String, ParamValue>,
    ) -> Result<(), RpcError>;

    async fn get_value(
        &self,
        channel_address: &str,
        paramset_key: ParamsetKey,
        parameter: &str,
    ) -> Result<ParamValue, RpcError>;

    async fn get_paramset(
        &self,
        address: &str,
        paramset_key: ParamsetKey,
    ) -> Result<HashMap<String, ParamValue>, RpcError>;

    /// All device and channel descriptions the interface currently serves.
    async fn list_devices(&self) -> Result<Vec<DeviceDescription>, RpcError>;

    async fn get_paramset_description(
        &self,
        channel_address: &str,
        paramset_key: ParamsetKey,
    ) -> Result<HashMap<String, ParameterDescription>, RpcError>;

    async fn get_all_programs(&self, include_internal: bool)
    -> Result<Vec<ProgramData>, RpcError>;

    async fn execute_program(&self, pid: &str) -> Result<bool, RpcError>;

    async fn get_all_system_variables(
        &self,
        include_internal: bool,
    ) -> Result<Vec<SystemVariableData>, RpcError>;

    async fn get_system_variable(&self, name: &str) -> Result<ParamValue, RpcError>;

    async fn set_system_variable(&self, name: &str, value: ParamValue) -> Result<(), RpcError>;

    async fn set_install_mode(
        &self,
        on: bool,
        duration_secs: u32,
        mode: u32,
        device_address: Option<&str>,
    ) -> Result<(), RpcError>;
}

/// Constructs one `RpcProxy` per interface. Injected into the central so
/// transports stay pluggable and tests stay hermetic.
#[async_trait]
pub trait RpcProxyFactory: Send + Sync {
    async fn create(
        &self,
        interface_id: &str,
        config: &InterfaceConfig,
    ) -> Result<Arc<dyn RpcProxy>, RpcError>;
}
