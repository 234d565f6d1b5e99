use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

/// Daemon configuration, loaded from a TOML file with every field optional.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BrokerConfig {
    /// Port the text protocol listens on. Loopback only by convention; the
    /// listener binds 127.0.0.1 unconditionally.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Hard cap on live client connections; the next accept past the cap is
    /// closed without being authenticated.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Per-connection idle timeout: a connection that sends nothing for this
    /// long is closed.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// Upper bound on waiting for in-flight workers during shutdown;
    /// stragglers are abandoned.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// Grant store file.
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// Installed-package registry file.
    #[serde(default = "default_package_index_path")]
    pub package_index_path: PathBuf,

    /// Elevation helper program, invoked as `<helper> -c <command>`.
    #[serde(default = "default_elevation_helper")]
    pub elevation_helper: PathBuf,

    /// Socket path for the binary transactional interface.
    #[serde(default = "default_compat_socket_path")]
    pub compat_socket_path: PathBuf,

    /// Compatibility-mode toggle; switches only whether the binary interface
    /// is served, never broker behavior.
    #[serde(default = "default_compat_enabled")]
    pub compat_enabled: bool,

    /// Socket of an already-running external broker. When set and answering
    /// at startup, binary-interface transactions are forwarded to it.
    #[serde(default)]
    pub external_broker_socket: Option<PathBuf>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            listen_port: default_listen_port(),
            max_connections: default_max_connections(),
            idle_timeout_ms: default_idle_timeout_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            store_path: default_store_path(),
            package_index_path: default_package_index_path(),
            elevation_helper: default_elevation_helper(),
            compat_socket_path: default_compat_socket_path(),
            compat_enabled: default_compat_enabled(),
            external_broker_socket: None,
        }
    }
}

impl BrokerConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("failed to parse config {}", path.display()))
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn default_listen_port() -> u16 {
    38388
}

fn default_max_connections() -> usize {
    10
}

fn default_idle_timeout_ms() -> u64 {
    30_000
}

fn default_shutdown_grace_ms() -> u64 {
    5_000
}

fn default_store_path() -> PathBuf {
    PathBuf::from("/var/lib/privd/grants.json")
}

fn default_package_index_path() -> PathBuf {
    PathBuf::from("/etc/privd/packages.toml")
}

fn default_elevation_helper() -> PathBuf {
    PathBuf::from("su")
}

fn default_compat_socket_path() -> PathBuf {
    PathBuf::from("/run/privd/ipc.sock")
}

fn default_compat_enabled() -> bool {
    true
}
