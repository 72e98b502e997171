// ── Runtime configuration ──
//
// These types describe *how* to reach a controller and how the central
// should behave. They never touch disk -- file loading lives in the
// `hmlink-config` crate, which hands a finished `CentralConfig` in.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

/// Probe cadence for the per-client keep-alive checker.
pub const DEFAULT_CONNECTION_CHECKER_INTERVAL: Duration = Duration::from_secs(15);
/// Pending probes tolerated before an interface counts as degraded.
pub const DEFAULT_PING_PONG_MISMATCH_COUNT: usize = 15;
/// Age after which an unanswered probe is discarded from the cache.
pub const DEFAULT_PING_PONG_MISMATCH_TTL: Duration = Duration::from_secs(300);
/// Per-call RPC timeout handed to the transport.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(60);
/// Budget for the initial reachability handshake per interface.
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(90);

/// Connection parameters for one controller interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceConfig {
    /// Logical interface name, unique within a central (e.g. `HmIP-RF`).
    pub name: String,
    pub port: u16,
    /// Optional remote path for interfaces mounted off the root endpoint.
    pub remote_path: Option<String>,
    /// Per-call RPC timeout for this interface.
    pub timeout: Duration,
}

impl InterfaceConfig {
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            port,
            remote_path: None,
            timeout: DEFAULT_RPC_TIMEOUT,
        }
    }

    pub fn with_remote_path(mut self, remote_path: impl Into<String>) -> Self {
        self.remote_path = Some(remote_path.into());
        self
    }
}

/// Configuration for one central, threaded through construction.
#[derive(Debug, Clone)]
pub struct CentralConfig {
    /// Instance name; prefixes every interface id.
    pub name: String,
    /// Controller host the transport connects to.
    pub host: String,
    pub username: String,
    pub password: SecretString,
    pub interfaces: Vec<InterfaceConfig>,
    /// Ordered visibility-override lines (see the visibility engine).
    pub un_ignore: Vec<String>,
    /// Directory for persisted description caches. `None` disables persistence.
    pub cache_dir: Option<PathBuf>,
    pub connection_checker_interval: Duration,
    pub init_timeout: Duration,
    pub ping_pong_mismatch_count: usize,
    pub ping_pong_mismatch_ttl: Duration,
}

impl CentralConfig {
    /// The id a given interface name gets within this central.
    pub fn interface_id(&self, interface_name: &str) -> String {
        format!("{}-{}", self.name, interface_name)
    }
}

impl Default for CentralConfig {
    fn default() -> Self {
        Self {
            name: "hmlink".into(),
            host: "127.0.0.1".into(),
            username: "Admin".into(),
            password: SecretString::from(String::new()),
            interfaces: Vec::new(),
            un_ignore: Vec::new(),
            cache_dir: None,
            connection_checker_interval: DEFAULT_CONNECTION_CHECKER_INTERVAL,
            init_timeout: DEFAULT_INIT_TIMEOUT,
            ping_pong_mismatch_count: DEFAULT_PING_PONG_MISMATCH_COUNT,
            ping_pong_mismatch_ttl: DEFAULT_PING_PONG_MISMATCH_TTL,
        }
    }
}
