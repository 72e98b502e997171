//! Configuration loading for hmlink.
//!
//! TOML files merged with `HMLINK_`-prefixed environment variables,
//! validated and translated into [`hmlink_core::CentralConfig`]. The
//! core never reads config files -- embedding applications load a
//! [`Config`] here and hand the result in.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use hmlink_core::{CentralConfig, InterfaceConfig};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
///
/// `unignore` is declared first so serialization emits it before the
/// table sections (TOML wants values ahead of tables).
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Ordered visibility-override lines.
    #[serde(default)]
    pub unignore: Vec<String>,

    pub central: CentralSection,

    /// Interface name -> connection parameters.
    #[serde(default)]
    pub interfaces: BTreeMap<String, InterfaceSection>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CentralSection {
    /// Instance name; prefixes every interface id.
    pub name: String,

    /// Controller host.
    pub host: String,

    #[serde(default = "default_username")]
    pub username: String,

    /// Plaintext in the file; wrapped into a secret during translation.
    #[serde(default)]
    pub password: String,

    /// Directory for persisted description caches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    #[serde(default = "default_checker_interval_secs")]
    pub connection_checker_interval_secs: u64,

    #[serde(default = "default_init_timeout_secs")]
    pub init_timeout_secs: u64,

    #[serde(default = "default_mismatch_count")]
    pub ping_pong_mismatch_count: usize,
}

fn default_username() -> String {
    "Admin".into()
}
fn default_checker_interval_secs() -> u64 {
    hmlink_core::config::DEFAULT_CONNECTION_CHECKER_INTERVAL.as_secs()
}
fn default_init_timeout_secs() -> u64 {
    hmlink_core::config::DEFAULT_INIT_TIMEOUT.as_secs()
}
fn default_mismatch_count() -> usize {
    hmlink_core::config::DEFAULT_PING_PONG_MISMATCH_COUNT
}
fn default_timeout_secs() -> u64 {
    hmlink_core::config::DEFAULT_RPC_TIMEOUT.as_secs()
}

/// Connection parameters for one interface.
#[derive(Debug, Deserialize, Serialize)]
pub struct InterfaceSection {
    pub port: u16,

    /// Remote path for interfaces mounted off the root endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

// ── Loading ─────────────────────────────────────────────────────────

impl Config {
    /// Platform default config file location.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("org", "hmlink", "hmlink")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load a config file, layering `HMLINK_`-prefixed environment
    /// variables on top (e.g. `HMLINK_CENTRAL__HOST`).
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("HMLINK_").split("__"))
            .extract()?;
        Ok(config)
    }

    /// Write this config back to disk, e.g. to scaffold a starter file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Validate and translate into the core's runtime configuration.
    pub fn into_central_config(self) -> Result<CentralConfig, ConfigError> {
        if self.central.name.is_empty() {
            return Err(ConfigError::Validation {
                field: "central.name".into(),
                reason: "must not be empty".into(),
            });
        }
        if self.central.host.is_empty() {
            return Err(ConfigError::Validation {
                field: "central.host".into(),
                reason: "must not be empty".into(),
            });
        }

        let mut interfaces = Vec::with_capacity(self.interfaces.len());
        for (name, section) in self.interfaces {
            if name.is_empty() {
                return Err(ConfigError::Validation {
                    field: "interfaces".into(),
                    reason: "interface name must not be empty".into(),
                });
            }
            if section.port == 0 {
                return Err(ConfigError::Validation {
                    field: format!("interfaces.{name}.port"),
                    reason: "must not be zero".into(),
                });
            }
            let mut interface = InterfaceConfig::new(name, section.port);
            if let Some(path) = section.path {
                interface = interface.with_remote_path(path);
            }
            interface.timeout = Duration::from_secs(section.timeout_secs);
            interfaces.push(interface);
        }

        Ok(CentralConfig {
            name: self.central.name,
            host: self.central.host,
            username: self.central.username,
            password: SecretString::from(self.central.password),
            interfaces,
            un_ignore: self.unignore,
            cache_dir: self.central.cache_dir,
            connection_checker_interval: Duration::from_secs(
                self.central.connection_checker_interval_secs,
            ),
            init_timeout: Duration::from_secs(self.central.init_timeout_secs),
            ping_pong_mismatch_count: self.central.ping_pong_mismatch_count,
            ..CentralConfig::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, content).expect("write config");
        (dir, path)
    }

    #[test]
    fn load_full_config() {
        let (_dir, path) = write_config(
            r#"
            unignore = ["LEVEL:VALUES@all:all", "ignore_HmIP-BWTH"]

            [central]
            name = "ccu-dev"
            host = "192.168.1.173"
            username = "Admin"
            password = ""
            cache_dir = "/var/cache/hmlink"

            [interfaces.HmIP-RF]
            port = 2010

            [interfaces.BidCos-RF]
            port = 2001

            [interfaces.VirtualDevices]
            port = 9292
            path = "/groups"
            timeout_secs = 30
            "#,
        );

        let config = Config::load(&path).expect("load");
        let central = config.into_central_config().expect("translate");

        assert_eq!(central.name, "ccu-dev");
        assert_eq!(central.host, "192.168.1.173");
        assert_eq!(central.interfaces.len(), 3);
        assert_eq!(central.un_ignore.len(), 2);
        assert_eq!(central.cache_dir.as_deref(), Some(Path::new("/var/cache/hmlink")));
        assert_eq!(central.interface_id("BidCos-RF"), "ccu-dev-BidCos-RF");

        let virtual_devices = central
            .interfaces
            .iter()
            .find(|i| i.name == "VirtualDevices")
            .expect("VirtualDevices interface");
        assert_eq!(virtual_devices.port, 9292);
        assert_eq!(virtual_devices.remote_path.as_deref(), Some("/groups"));
        assert_eq!(virtual_devices.timeout, Duration::from_secs(30));
    }

    #[test]
    fn defaults_fill_missing_tuning() {
        let (_dir, path) = write_config(
            r#"
            [central]
            name = "ccu-dev"
            host = "127.0.0.1"

            [interfaces.BidCos-RF]
            port = 2001
            "#,
        );

        let central = Config::load(&path)
            .expect("load")
            .into_central_config()
            .expect("translate");

        assert_eq!(central.username, "Admin");
        assert_eq!(central.cache_dir, None);
        assert_eq!(
            central.connection_checker_interval,
            hmlink_core::config::DEFAULT_CONNECTION_CHECKER_INTERVAL,
        );
        assert_eq!(
            central.ping_pong_mismatch_count,
            hmlink_core::config::DEFAULT_PING_PONG_MISMATCH_COUNT,
        );
        let interface = &central.interfaces[0];
        assert_eq!(interface.timeout, hmlink_core::config::DEFAULT_RPC_TIMEOUT);
    }

    #[test]
    fn save_and_reload_round_trips() {
        let (_dir, path) = write_config(
            r#"
            unignore = ["LEVEL:VALUES@all:all"]

            [central]
            name = "ccu-dev"
            host = "127.0.0.1"

            [interfaces.BidCos-RF]
            port = 2001
            "#,
        );

        let config = Config::load(&path).expect("load");
        let copy_path = path.with_file_name("copy.toml");
        config.save(&copy_path).expect("save");

        let reloaded = Config::load(&copy_path).expect("reload");
        assert_eq!(reloaded.central.name, "ccu-dev");
        assert_eq!(reloaded.unignore, vec!["LEVEL:VALUES@all:all"]);
        assert_eq!(reloaded.interfaces.len(), 1);
    }

    #[test]
    fn zero_port_is_rejected() {
        let (_dir, path) = write_config(
            r#"
            [central]
            name = "ccu-dev"
            host = "127.0.0.1"

            [interfaces.BidCos-RF]
            port = 0
            "#,
        );

        let result = Config::load(&path).expect("load").into_central_config();
        assert!(matches!(
            result,
            Err(ConfigError::Validation { field, .. }) if field == "interfaces.BidCos-RF.port",
        ));
    }

    #[test]
    fn empty_name_is_rejected() {
        let (_dir, path) = write_config(
            r#"
            [central]
            name = ""
            host = "127.0.0.1"
            "#,
        );

        let result = Config::load(&path).expect("load").into_central_config();
        assert!(matches!(
            result,
            Err(ConfigError::Validation { field, .. }) if field == "central.name",
        ));
    }
}
