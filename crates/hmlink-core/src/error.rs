// ── Core error types ──
//
// User-facing errors from hmlink-core. Consumers never see raw
// transport failures -- clients translate `RpcError` into these
// variants with interface context attached.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CentralError {
    /// Interface unreachable at connect time or during a probe.
    #[error("cannot reach interface {interface_id}: {reason}")]
    Connectivity { interface_id: String, reason: String },

    /// An operation targeted an interface id this central does not own.
    #[error("unknown interface: {interface_id}")]
    UnknownInterface { interface_id: String },

    /// The central has no connected clients at all.
    #[error("no clients configured")]
    NoClients,

    #[error("request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// The transport completed the round trip but the controller rejected it.
    #[error("RPC call failed: {message}")]
    Rpc { message: String },

    #[error("cache I/O failed: {0}")]
    CacheIo(#[from] std::io::Error),

    #[error("cache serialization failed: {0}")]
    CacheFormat(#[from] serde_json::Error),
}
